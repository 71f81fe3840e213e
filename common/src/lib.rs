pub mod shutdown;

/// Sets up process-wide ambient state: color output toggling via `DISABLE_COLORS`.
pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);
}

/// Writes the readiness marker consumed by the container platform's readiness probe.
pub fn signal_ready() {
    std::fs::write("/etc/ready", "ready").expect("Failed to write readiness file");
}

/// Label and annotation keys stamped on resources owned by the controller.
pub mod annotations {
    /// Identifies the owning RayJob on a created RayCluster or submitter workload.
    pub const RAYJOB_LABEL: &str = "ray.io/rayjob";

    /// Marks who created a resource, for `kubectl get -l` filtering and auditing.
    pub const CREATED_BY: &str = "ray.io/created-by";

    /// SHA-256 of the inline `ClusterSpec` at creation time, used for drift logging only.
    pub const SPEC_HASH: &str = "ray.io/spec-hash";
}

/// Component name recorded as the value of [`annotations::CREATED_BY`] and used as the
/// server-side-apply field manager.
pub const COMPONENT_NAME: &str = "rayjob-controller";
