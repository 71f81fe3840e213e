//! DashboardGateway: the capability the core depends on to submit/observe/stop a Ray job on
//! a cluster's dashboard. The wire protocol is out of scope (spec.md §4.3); this module
//! supplies one concrete `reqwest`-based implementation so the controller is runnable.

use async_trait::async_trait;
use owo_colors::OwoColorize;
use rayjob_types::JobStatus;
use std::sync::RwLock;

use crate::util::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct JobInfo {
    pub job_status: JobStatus,
    pub message: Option<String>,
    pub start_time_ms: Option<i64>,
    pub end_time_ms: Option<i64>,
}

#[async_trait]
pub trait DashboardGateway: Send + Sync {
    /// Binds subsequent calls to a dashboard endpoint.
    fn init_client(&self, base_url: &str);

    /// Observational; any error is treated by the caller as transient.
    async fn get_job_info(&self, job_id: &str) -> Result<JobInfo, Error>;

    /// Best-effort graceful stop. Never returns an error to the caller: failures are logged
    /// and ignored (spec.md §4.3, §4.4).
    async fn stop_job(&self, job_id: &str);
}

pub struct HttpDashboardGateway {
    client: reqwest::Client,
    base_url: RwLock<Option<String>>,
}

impl HttpDashboardGateway {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: RwLock::new(None),
        }
    }

    fn base(&self) -> Result<String, Error> {
        self.base_url
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Dashboard("dashboard client not initialized".to_string()))
    }
}

impl Default for HttpDashboardGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(serde::Deserialize)]
struct JobInfoWire {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    start_time: Option<i64>,
    #[serde(default)]
    end_time: Option<i64>,
}

fn parse_job_status(wire: &str) -> JobStatus {
    match wire.to_uppercase().as_str() {
        "PENDING" => JobStatus::Pending,
        "RUNNING" => JobStatus::Running,
        "STOPPED" => JobStatus::Stopped,
        "SUCCEEDED" => JobStatus::Succeeded,
        "FAILED" => JobStatus::Failed,
        _ => JobStatus::New,
    }
}

#[async_trait]
impl DashboardGateway for HttpDashboardGateway {
    fn init_client(&self, base_url: &str) {
        *self.base_url.write().unwrap() = Some(base_url.trim_end_matches('/').to_string());
    }

    async fn get_job_info(&self, job_id: &str) -> Result<JobInfo, Error> {
        let base = self.base()?;
        let resp = self
            .client
            .get(format!("{base}/api/jobs/{job_id}"))
            .send()
            .await
            .map_err(|e| Error::Dashboard(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::Dashboard(format!(
                "dashboard returned {}",
                resp.status()
            )));
        }

        let wire: JobInfoWire = resp
            .json()
            .await
            .map_err(|e| Error::Dashboard(e.to_string()))?;

        Ok(JobInfo {
            job_status: parse_job_status(&wire.status),
            message: wire.message,
            start_time_ms: wire.start_time,
            end_time_ms: wire.end_time,
        })
    }

    async fn stop_job(&self, job_id: &str) {
        let base = match self.base() {
            Ok(base) => base,
            Err(e) => {
                eprintln!("{}", format!("⚠️ cannot stop job {job_id}: {e}").yellow());
                return;
            }
        };
        let result = self
            .client
            .post(format!("{base}/api/jobs/{job_id}/stop"))
            .send()
            .await;
        if let Err(e) = result {
            eprintln!(
                "{}",
                format!("⚠️ best-effort StopJob failed for {job_id}: {e}").yellow()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_job_statuses() {
        assert_eq!(parse_job_status("SUCCEEDED"), JobStatus::Succeeded);
        assert_eq!(parse_job_status("failed"), JobStatus::Failed);
        assert_eq!(parse_job_status("Running"), JobStatus::Running);
    }

    #[test]
    fn unknown_status_falls_back_to_new() {
        assert_eq!(parse_job_status("SOMETHING_ELSE"), JobStatus::New);
    }

    #[tokio::test]
    async fn get_job_info_without_init_is_dashboard_error() {
        let gw = HttpDashboardGateway::new();
        let err = gw.get_job_info("job-1").await.unwrap_err();
        assert!(matches!(err, Error::Dashboard(_)));
    }
}
