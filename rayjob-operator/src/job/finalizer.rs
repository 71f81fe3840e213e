//! Finalizer bookkeeping for RayJob deletion (spec.md §4.5): the dashboard gets a best-effort
//! stop request before the owned cluster and submitter workload are garbage collected via
//! owner references.

pub const FINALIZER: &str = "ray.io/rayjob-stop-job";

use rayjob_types::RayJob;

/// Whether the deletion path must reach out to the dashboard before finalizing.
pub fn needs_stop(rayjob: &RayJob) -> bool {
    rayjob
        .status
        .as_ref()
        .is_some_and(|s| s.job_status.is_pending_or_running())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayjob_types::{JobStatus, RayJobSpec, RayJobStatus};

    #[test]
    fn no_status_does_not_need_stop() {
        let rayjob = RayJob::new("demo", RayJobSpec::default());
        assert!(!needs_stop(&rayjob));
    }

    #[test]
    fn running_job_needs_stop() {
        let mut rayjob = RayJob::new("demo", RayJobSpec::default());
        rayjob.status = Some(RayJobStatus {
            job_status: JobStatus::Running,
            ..Default::default()
        });
        assert!(needs_stop(&rayjob));
    }

    #[test]
    fn succeeded_job_does_not_need_stop() {
        let mut rayjob = RayJob::new("demo", RayJobSpec::default());
        rayjob.status = Some(RayJobStatus {
            job_status: JobStatus::Succeeded,
            ..Default::default()
        });
        assert!(!needs_stop(&rayjob));
    }
}
