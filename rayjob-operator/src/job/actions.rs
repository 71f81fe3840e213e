//! Per-transition side effects for the JobStateMachine dispatch (spec.md §4.1).

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::runtime::controller::Action;
use kube::runtime::events::Recorder;
use kube::{Client, ResourceExt};
use owo_colors::OwoColorize;
use rayjob_types::*;

use super::dashboard::DashboardGateway;
use super::{ids, resources, termination};
use crate::util::{self, Error};

pub(crate) fn selector_mode(rayjob: &RayJob) -> bool {
    rayjob
        .spec
        .cluster_selector
        .as_ref()
        .is_some_and(|m| !m.is_empty())
}

fn selected_cluster_name(rayjob: &RayJob) -> Result<String, Error> {
    rayjob
        .spec
        .cluster_selector
        .as_ref()
        .and_then(|m| m.get(CLUSTER_SELECTOR_KEY))
        .cloned()
        .ok_or_else(|| Error::UserInput(format!("ClusterSelector is missing key {CLUSTER_SELECTOR_KEY}")))
}

/// Whether a suspend request is honored from the current state (spec.md §4.1 "Suspend gating").
fn suspend_allowed(rayjob: &RayJob, deployment_status: JobDeploymentStatus) -> bool {
    rayjob.spec.suspend
        && !selector_mode(rayjob)
        && matches!(
            deployment_status,
            JobDeploymentStatus::Initializing | JobDeploymentStatus::Running
        )
}

/// `""`/`New` → `Initializing`. The stop-job finalizer is ensured present by the caller before
/// this runs at all (the first `Apply` event of `kube::runtime::finalizer`).
pub fn enter_initializing(rayjob: &RayJob) -> Result<RayJob, Error> {
    let mut mutated = rayjob.clone();
    let job_id = rayjob
        .spec
        .job_id
        .clone()
        .unwrap_or_else(|| ids::generate_job_id(&rayjob.name_any()));
    let cluster_name = if selector_mode(rayjob) {
        selected_cluster_name(rayjob)?
    } else {
        ids::generate_cluster_name(&rayjob.name_any())
    };

    let status = mutated.status.get_or_insert_with(Default::default);
    status.job_id = job_id;
    status.ray_cluster_name = cluster_name;
    status.job_status = JobStatus::New;
    status.job_deployment_status = JobDeploymentStatus::Initializing;
    Ok(mutated)
}

/// `Initializing` → `Suspending`/`Running`, or stays `Initializing` on a non-fatal wait
/// (cluster not ready yet, head service not provisioned yet — spec.md §9 Open Question 2).
pub async fn drive_initializing(
    client: Client,
    recorder: &Recorder,
    rayjob: &RayJob,
) -> Result<(RayJob, Action), Error> {
    let mut mutated = rayjob.clone();

    if suspend_allowed(rayjob, JobDeploymentStatus::Initializing) {
        mutated.status.as_mut().unwrap().job_deployment_status = JobDeploymentStatus::Suspending;
        return Ok((mutated, Action::requeue(util::probe_interval())));
    }

    let cluster = resources::get_or_create_cluster(client.clone(), recorder, rayjob).await?;
    if cluster.status.as_ref().map(|s| s.state).unwrap_or_default() != ClusterState::Ready {
        return Ok((mutated, Action::requeue(util::probe_interval())));
    }

    let cluster_name = &rayjob.status.as_ref().unwrap().ray_cluster_name;
    let Some(dashboard_url) = resources::head_service_url(client.clone(), rayjob, cluster_name).await? else {
        return Ok((mutated, Action::requeue(util::probe_interval())));
    };

    let status = mutated.status.as_mut().unwrap();
    status.dashboard_url = dashboard_url.clone();
    status.ray_cluster_status = cluster.status.as_ref().map(|s| serde_json::to_value(s).unwrap());

    resources::ensure_submitter_workload(client, recorder, rayjob, &dashboard_url, &status.job_id).await?;

    status.job_deployment_status = JobDeploymentStatus::Running;
    status.job_status = JobStatus::Pending;
    Ok((mutated, Action::requeue(util::probe_interval())))
}

/// `Running` → `Suspending`/`Complete`, or stays `Running` while the job is in progress.
pub async fn drive_running(
    client: Client,
    recorder: &Recorder,
    dashboard: &dyn DashboardGateway,
    rayjob: &RayJob,
) -> Result<(RayJob, Action), Error> {
    let mut mutated = rayjob.clone();
    let status = mutated.status.as_mut().unwrap();

    if rayjob.spec.suspend && selector_mode(rayjob) {
        println!(
            "{}",
            format!(
                "RayJob {} requested suspend while in cluster-selector mode; rejecting",
                rayjob.name_any()
            )
            .yellow()
        );
    }
    if suspend_allowed(rayjob, JobDeploymentStatus::Running) {
        status.job_deployment_status = JobDeploymentStatus::Suspending;
        return Ok((mutated, Action::requeue(util::probe_interval())));
    }

    dashboard.init_client(&status.dashboard_url);
    let info = match dashboard.get_job_info(&status.job_id).await {
        Ok(info) => info,
        // Dashboard errors are transient; the tick stays Running untouched (spec.md §4.3).
        Err(_) => return Ok((rayjob.clone(), Action::requeue(util::probe_interval()))),
    };

    status.job_status = info.job_status;
    status.message = info.message;
    if status.start_time.is_none() {
        if let Some(ms) = info.start_time_ms {
            status.start_time = Some(millis_to_time(ms));
        }
    }

    // Refresh the copy of cluster status and re-check spec drift on every Running tick.
    if let Ok(cluster) = resources::get_or_create_cluster(client, recorder, rayjob).await {
        status.ray_cluster_status = cluster.status.as_ref().map(|s| serde_json::to_value(s).unwrap());
    }

    if info.job_status.is_terminal() {
        status.end_time = Some(
            info.end_time_ms
                .map(millis_to_time)
                .unwrap_or_else(|| Time(Utc::now())),
        );
        status.job_deployment_status = JobDeploymentStatus::Complete;
        return Ok((mutated, Action::requeue(util::probe_interval())));
    }

    Ok((mutated, Action::requeue(util::probe_interval())))
}

fn millis_to_time(ms: i64) -> Time {
    Time(chrono::DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now))
}

/// `Suspending` → `Suspended` once release is confirmed complete; otherwise stays `Suspending`.
pub async fn drive_suspending(
    client: Client,
    recorder: &Recorder,
    rayjob: &RayJob,
) -> Result<(RayJob, Action), Error> {
    let mut mutated = rayjob.clone();
    let complete = resources::release(client, recorder, rayjob, true).await?;
    if complete {
        let status = mutated.status.as_mut().unwrap();
        status.job_deployment_status = JobDeploymentStatus::Suspended;
        status.job_status = JobStatus::New;
        status.job_id = String::new();
        status.ray_cluster_name = String::new();
        status.dashboard_url = String::new();
        status.start_time = None;
        status.end_time = None;
        status.message = None;
        status.ray_cluster_status = None;
    }
    Ok((mutated, Action::requeue(util::probe_interval())))
}

/// `Suspended` → `New` once `Spec.Suspend` is lowered; otherwise idles.
pub fn drive_suspended(rayjob: &RayJob) -> (RayJob, Action) {
    if rayjob.spec.suspend {
        return (rayjob.clone(), Action::await_change());
    }
    let mut mutated = rayjob.clone();
    mutated.status.as_mut().unwrap().job_deployment_status = JobDeploymentStatus::New;
    (mutated, Action::requeue(util::probe_interval()))
}

/// `Complete` is terminal; `TerminationPolicy` governs whether a TTL-delayed cleanup requeue
/// is still outstanding (spec.md §4.6).
pub async fn drive_complete(
    client: Client,
    recorder: &Recorder,
    rayjob: &RayJob,
) -> Result<(RayJob, Action), Error> {
    if !rayjob.spec.shutdown_after_job_finishes || selector_mode(rayjob) {
        return Ok((rayjob.clone(), Action::await_change()));
    }
    let action = termination::apply(client, recorder, rayjob, Utc::now()).await?;
    Ok((rayjob.clone(), action))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn base_rayjob() -> RayJob {
        RayJob::new("demo", RayJobSpec::default())
    }

    #[test]
    fn enter_initializing_assigns_generated_ids_when_absent() {
        let rayjob = base_rayjob();
        let mutated = enter_initializing(&rayjob).unwrap();
        let status = mutated.status.unwrap();
        assert!(status.job_id.starts_with("demo-"));
        assert!(status.ray_cluster_name.starts_with("demo-raycluster-"));
        assert_eq!(status.job_deployment_status, JobDeploymentStatus::Initializing);
    }

    #[test]
    fn enter_initializing_honors_explicit_job_id() {
        let mut rayjob = base_rayjob();
        rayjob.spec.job_id = Some("custom-id".to_string());
        let mutated = enter_initializing(&rayjob).unwrap();
        assert_eq!(mutated.status.unwrap().job_id, "custom-id");
    }

    #[test]
    fn enter_initializing_uses_selector_key_in_selector_mode() {
        let mut rayjob = base_rayjob();
        let mut selector = BTreeMap::new();
        selector.insert(CLUSTER_SELECTOR_KEY.to_string(), "pre-existing".to_string());
        rayjob.spec.cluster_selector = Some(selector);
        let mutated = enter_initializing(&rayjob).unwrap();
        assert_eq!(mutated.status.unwrap().ray_cluster_name, "pre-existing");
    }

    #[test]
    fn enter_initializing_fails_without_selector_key() {
        let mut rayjob = base_rayjob();
        let mut selector = BTreeMap::new();
        selector.insert("other-key".to_string(), "value".to_string());
        rayjob.spec.cluster_selector = Some(selector);
        assert!(enter_initializing(&rayjob).is_err());
    }

    #[test]
    fn suspend_is_rejected_in_selector_mode() {
        let mut rayjob = base_rayjob();
        rayjob.spec.suspend = true;
        let mut selector = BTreeMap::new();
        selector.insert(CLUSTER_SELECTOR_KEY.to_string(), "pre-existing".to_string());
        rayjob.spec.cluster_selector = Some(selector);
        assert!(!suspend_allowed(&rayjob, JobDeploymentStatus::Running));
    }

    #[test]
    fn suspend_is_rejected_outside_running_or_initializing() {
        let mut rayjob = base_rayjob();
        rayjob.spec.suspend = true;
        assert!(!suspend_allowed(&rayjob, JobDeploymentStatus::Suspended));
        assert!(!suspend_allowed(&rayjob, JobDeploymentStatus::Complete));
    }

    #[test]
    fn suspend_is_accepted_from_running() {
        let mut rayjob = base_rayjob();
        rayjob.spec.suspend = true;
        assert!(suspend_allowed(&rayjob, JobDeploymentStatus::Running));
    }

    #[test]
    fn drive_suspended_idles_while_suspend_still_set() {
        let mut rayjob = base_rayjob();
        rayjob.spec.suspend = true;
        rayjob.status = Some(RayJobStatus {
            job_deployment_status: JobDeploymentStatus::Suspended,
            ..Default::default()
        });
        let (_mutated, action) = drive_suspended(&rayjob);
        assert_eq!(action, Action::await_change());
    }

    #[test]
    fn drive_suspended_resets_to_new_once_suspend_is_lowered() {
        let mut rayjob = base_rayjob();
        rayjob.spec.suspend = false;
        rayjob.status = Some(RayJobStatus {
            job_deployment_status: JobDeploymentStatus::Suspended,
            ..Default::default()
        });
        let (mutated, _action) = drive_suspended(&rayjob);
        assert_eq!(
            mutated.status.unwrap().job_deployment_status,
            JobDeploymentStatus::New
        );
    }
}
