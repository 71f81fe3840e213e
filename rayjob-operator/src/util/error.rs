#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("Invalid user input: {0}")]
    UserInput(String),

    #[error("ClusterSelector names a cluster that does not exist: {0}")]
    ClusterSelectorNotFound(String),

    #[error("dashboard request failed: {0}")]
    Dashboard(String),

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl Error {
    /// Errors that should never block finalizer removal or surface a status transition;
    /// the caller requeues and tries again later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Kube { .. } | Error::Dashboard(_))
    }
}
