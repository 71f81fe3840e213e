//! StatusWriter: persists at most one status patch per reconcile tick (spec.md §8, property 8
//! "status write parsimony").

use kube::Client;
use rayjob_types::{RayJob, RayJobStatus};

use crate::util::Error;
use crate::util::patch::patch_status;

/// Whether `mutated`'s status differs from `original`'s in the two fields that gate a write:
/// `JobStatus` and `JobDeploymentStatus`. Other fields (dashboard message text, the copied
/// `ray_cluster_status` JSON, timestamps) can drift every tick without forcing a patch, matching
/// the Go original's `updateRayJobStatus`, which gates `Status().Update` on exactly these two
/// fields.
pub fn status_changed(original: &RayJob, mutated: &RayJob) -> bool {
    let key = |rayjob: &RayJob| {
        rayjob
            .status
            .as_ref()
            .map(|s| (s.job_status, s.job_deployment_status))
    };
    key(original) != key(mutated)
}

/// Patches `original`'s status to `mutated`'s status, but only issues the API call if they
/// differ. Returns the object the next tick should treat as current.
pub async fn write_if_changed(
    client: Client,
    original: &RayJob,
    mutated: &RayJob,
) -> Result<RayJob, Error> {
    if !status_changed(original, mutated) {
        return Ok(original.clone());
    }
    let desired = mutated.status.clone().unwrap_or_default();
    patch_status::<RayJobStatus, RayJob>(client, original, move |s| *s = desired)
        .await
        .map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayjob_types::{JobDeploymentStatus, JobStatus, RayJobSpec};

    #[test]
    fn identical_status_is_unchanged() {
        let rayjob = RayJob::new("demo", RayJobSpec::default());
        let mut other = rayjob.clone();
        other.status = rayjob.status.clone();
        assert!(!status_changed(&rayjob, &other));
    }

    #[test]
    fn differing_job_deployment_status_is_changed() {
        let original = RayJob::new("demo", RayJobSpec::default());
        let mut mutated = original.clone();
        mutated.status = Some(RayJobStatus {
            job_deployment_status: JobDeploymentStatus::Initializing,
            ..Default::default()
        });
        assert!(status_changed(&original, &mutated));
    }

    #[test]
    fn differing_job_status_is_changed() {
        let original = RayJob::new("demo", RayJobSpec::default());
        let mut mutated = original.clone();
        mutated.status = Some(RayJobStatus {
            job_status: JobStatus::Running,
            ..Default::default()
        });
        assert!(status_changed(&original, &mutated));
    }

    #[test]
    fn drifting_message_and_cluster_status_alone_is_unchanged() {
        let mut rayjob = RayJob::new("demo", RayJobSpec::default());
        rayjob.status = Some(RayJobStatus::default());
        let original = rayjob.clone();
        let mut mutated = rayjob;
        let status = mutated.status.as_mut().unwrap();
        status.message = Some("waiting for dashboard".to_string());
        status.ray_cluster_status = Some(serde_json::json!({"state": "Ready"}));
        assert!(!status_changed(&original, &mutated));
    }
}
