//! Deterministic-per-call, collision-resistant identifier generation (spec.md §9).

use uuid::Uuid;

/// Generates a job id derived from the RayJob name: a short random suffix is sufficient
/// because collisions only matter across distinct RayJobs reconciling concurrently.
pub fn generate_job_id(rayjob_name: &str) -> String {
    format!("{rayjob_name}-{}", short_suffix())
}

/// Generates the name of the RayCluster to create for this RayJob.
pub fn generate_cluster_name(rayjob_name: &str) -> String {
    format!("{rayjob_name}-raycluster-{}", short_suffix())
}

fn short_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_is_prefixed_with_rayjob_name() {
        let id = generate_job_id("my-job");
        assert!(id.starts_with("my-job-"));
        assert_eq!(id.len(), "my-job-".len() + 8);
    }

    #[test]
    fn cluster_name_is_prefixed_with_rayjob_name() {
        let name = generate_cluster_name("my-job");
        assert!(name.starts_with("my-job-raycluster-"));
    }

    #[test]
    fn successive_calls_do_not_collide() {
        let a = generate_job_id("same-name");
        let b = generate_job_id("same-name");
        assert_ne!(a, b);
    }
}
