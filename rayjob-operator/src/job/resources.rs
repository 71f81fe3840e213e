//! ResourceReconciler: idempotent create/read/delete of the RayCluster and the submitter
//! workload (spec.md §4.2).

use k8s_openapi::api::batch::v1::{Job as K8sJob, JobSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodTemplateSpec, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::events::{Event, EventType, Recorder};
use kube::{
    Api, Client, ResourceExt,
    api::{DeleteParams, ListParams, PostParams, PropagationPolicy, Resource},
};
use rayjob_common::annotations;
use rayjob_types::*;
use std::collections::BTreeMap;

use crate::util::{self, Error};

const HEAD_NODE_TYPE_LABEL: &str = "ray.io/node-type";
const DASHBOARD_PORT_NAME: &str = "dashboard";

pub(crate) async fn emit(recorder: &Recorder, rayjob: &RayJob, reason: &str, note: String, action: &str) {
    emit_typed(recorder, rayjob, EventType::Normal, reason, note, action).await
}

/// Publishes a Kubernetes event of the given `type_` against `rayjob`, so it shows up under
/// `kubectl describe rayjob`. Failures to publish are logged, never propagated.
pub(crate) async fn emit_typed(
    recorder: &Recorder,
    rayjob: &RayJob,
    type_: EventType,
    reason: &str,
    note: String,
    action: &str,
) {
    let event = Event {
        type_,
        reason: reason.to_string(),
        note: Some(note),
        action: action.to_string(),
        secondary: None,
    };
    if let Err(e) = recorder.publish(&event, &rayjob.object_ref(&())).await {
        eprintln!("failed to publish event {reason} for {}: {e}", rayjob.name_any());
    }
}

fn namespace(rayjob: &RayJob) -> Result<String, Error> {
    rayjob
        .namespace()
        .ok_or_else(|| Error::UserInput("RayJob is missing metadata.namespace".to_string()))
}

fn not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Returns the target cluster, creating it in inline-spec mode if absent. Never creates or
/// reconciles spec drift in cluster-selector mode (spec.md §4.2 and Invariant 7).
pub async fn get_or_create_cluster(
    client: Client,
    recorder: &Recorder,
    rayjob: &RayJob,
) -> Result<RayCluster, Error> {
    let ns = namespace(rayjob)?;
    let status = rayjob
        .status
        .as_ref()
        .ok_or_else(|| Error::UserInput("RayJob has no status yet".to_string()))?;
    let name = status.ray_cluster_name.clone();
    let api: Api<RayCluster> = Api::namespaced(client, &ns);

    match api.get(&name).await {
        Ok(cluster) => {
            log_drift_if_inline(rayjob, &cluster);
            Ok(cluster)
        }
        Err(e) if not_found(&e) => {
            let selector_mode = rayjob
                .spec
                .cluster_selector
                .as_ref()
                .is_some_and(|m| !m.is_empty());
            if selector_mode {
                return Err(Error::ClusterSelectorNotFound(name));
            }
            let Some(config) = rayjob.spec.ray_cluster_spec.clone() else {
                return Err(Error::UserInput(
                    "one of ClusterSelector or RayClusterSpec must be set".to_string(),
                ));
            };
            let cluster = construct_cluster(rayjob, &name, config)?;
            let created = api.create(&PostParams::default(), &cluster).await?;
            emit(
                recorder,
                rayjob,
                "RayClusterCreated",
                format!("created RayCluster {name}"),
                "Create",
            )
            .await;
            Ok(created)
        }
        Err(e) => Err(e.into()),
    }
}

fn construct_cluster(rayjob: &RayJob, name: &str, config: serde_json::Value) -> Result<RayCluster, Error> {
    let mut labels = rayjob.labels().clone();
    labels.insert(annotations::RAYJOB_LABEL.to_string(), rayjob.name_any());
    let owner_ref = rayjob
        .controller_owner_ref(&())
        .ok_or_else(|| Error::UserInput("RayJob is missing a uid; cannot set owner reference".to_string()))?;

    Ok(RayCluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: rayjob.namespace(),
            labels: Some(labels),
            annotations: Some(rayjob.annotations().clone()),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        spec: RayClusterSpec { config },
        status: None,
    })
}

/// Logs (never acts on) drift between the RayJob's inline spec and the live cluster's spec.
/// spec.md §9 Open Question 3: preserved as log-and-ignore.
fn log_drift_if_inline(rayjob: &RayJob, cluster: &RayCluster) {
    if rayjob
        .spec
        .cluster_selector
        .as_ref()
        .is_some_and(|m| !m.is_empty())
    {
        return;
    }
    let Some(desired) = &rayjob.spec.ray_cluster_spec else {
        return;
    };
    if util::hash_spec(desired) != util::hash_spec(&cluster.spec.config) {
        println!(
            "RayJob {} disregards RayClusterSpec drift for RayCluster {}",
            rayjob.name_any(),
            cluster.name_any()
        );
    }
}

/// Idempotent get-then-create of the submitter workload. `dashboard_url` and `job_id` are the
/// in-memory values for this tick, since they may not be persisted to status yet.
pub async fn ensure_submitter_workload(
    client: Client,
    recorder: &Recorder,
    rayjob: &RayJob,
    dashboard_url: &str,
    job_id: &str,
) -> Result<(), Error> {
    let ns = namespace(rayjob)?;
    let name = rayjob.name_any();
    let api: Api<K8sJob> = Api::namespaced(client, &ns);

    if api.get(&name).await.is_ok() {
        return Ok(());
    }

    let template = submitter_template(rayjob, dashboard_url, job_id)?;
    let job = build_submitter_job(rayjob, &name, template)?;
    match api.create(&PostParams::default(), &job).await {
        Ok(_) => {
            emit(
                recorder,
                rayjob,
                "SubmitterJobCreated",
                format!("created submitter workload {name}"),
                "Create",
            )
            .await;
            Ok(())
        }
        // Someone else (or a prior partial tick) created it first; idempotent no-op.
        Err(e) if matches!(&e, kube::Error::Api(ae) if ae.code == 409) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

const PYTHON_UNBUFFERED_ENV: &str = "PYTHONUNBUFFERED";
const DEFAULT_SUBMITTER_IMAGE: &str = "rayproject/ray:2.9.0";

fn submitter_template(
    rayjob: &RayJob,
    dashboard_url: &str,
    job_id: &str,
) -> Result<PodTemplateSpec, Error> {
    let mut template = rayjob
        .spec
        .submitter_pod_template
        .clone()
        .unwrap_or_else(|| default_submitter_template(rayjob));

    let spec = template
        .spec
        .get_or_insert_with(Default::default);
    if spec.containers.is_empty() {
        spec.containers.push(Container {
            name: "ray-job-submitter".to_string(),
            ..Default::default()
        });
    }
    let submitter = &mut spec.containers[0];

    if submitter.command.as_ref().is_none_or(|c| c.is_empty()) {
        submitter.command = Some(default_submit_command(rayjob, dashboard_url, job_id));
    }

    submitter.env.get_or_insert_with(Vec::new).push(EnvVar {
        name: PYTHON_UNBUFFERED_ENV.to_string(),
        value: Some("1".to_string()),
        ..Default::default()
    });

    Ok(template)
}

fn default_submitter_template(_rayjob: &RayJob) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta::default()),
        spec: Some(k8s_openapi::api::core::v1::PodSpec {
            restart_policy: Some("Never".to_string()),
            containers: vec![Container {
                name: "ray-job-submitter".to_string(),
                image: Some(DEFAULT_SUBMITTER_IMAGE.to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }),
    }
}

fn default_submit_command(rayjob: &RayJob, dashboard_url: &str, job_id: &str) -> Vec<String> {
    vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        format!(
            "ray job submit --address={dashboard_url} --submission-id={job_id} -- {}",
            rayjob.spec.entrypoint
        ),
    ]
}

fn build_submitter_job(
    rayjob: &RayJob,
    name: &str,
    template: PodTemplateSpec,
) -> Result<K8sJob, Error> {
    let mut labels = BTreeMap::new();
    labels.insert(annotations::RAYJOB_LABEL.to_string(), rayjob.name_any());
    labels.insert(
        annotations::CREATED_BY.to_string(),
        rayjob_common::COMPONENT_NAME.to_string(),
    );
    let owner_ref = rayjob
        .controller_owner_ref(&())
        .ok_or_else(|| Error::UserInput("RayJob is missing a uid; cannot set owner reference".to_string()))?;

    Ok(K8sJob {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: rayjob.namespace(),
            labels: Some(labels),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            // The submission command is attempted at most 3 times total; unrecoverable
            // application errors shouldn't burn the default 6 retries for no benefit.
            backoff_limit: Some(2),
            template,
            ttl_seconds_after_finished: rayjob
                .spec
                .shutdown_after_job_finishes
                .then_some(rayjob.spec.ttl_seconds_after_finished),
            ..Default::default()
        }),
        status: None,
    })
}

/// Discovers the dashboard URL by finding the cluster's head service and reading its named
/// "dashboard" port. Returns `Ok(None)` if the service isn't provisioned yet, so the caller can
/// requeue instead of treating it as an error (spec.md §6 "Head-service lookup").
pub async fn head_service_url(
    client: Client,
    rayjob: &RayJob,
    cluster_name: &str,
) -> Result<Option<String>, Error> {
    let ns = namespace(rayjob)?;
    let api: Api<Service> = Api::namespaced(client, &ns);
    let selector = format!("{CLUSTER_SELECTOR_KEY}={cluster_name},{HEAD_NODE_TYPE_LABEL}=head");
    let services = api.list(&ListParams::default().labels(&selector)).await?;

    let Some(svc) = services.items.into_iter().next() else {
        return Ok(None);
    };
    let Some(name) = svc.metadata.name.clone() else {
        return Ok(None);
    };
    let port = svc
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|ports| ports.iter().find(|p| p.name.as_deref() == Some(DASHBOARD_PORT_NAME)))
        .map(|p| p.port);
    let Some(port) = port else {
        return Ok(None);
    };

    Ok(Some(format!("http://{name}.{ns}.svc:{port}")))
}

/// Deletes the owned cluster (unless in selector mode) and, if `suspend`, also deletes the
/// submitter workload. Returns `true` only once both are confirmed absent on this same tick.
/// Never retries a delete within a tick; the next tick re-observes (spec.md §4.2).
pub async fn release(
    client: Client,
    recorder: &Recorder,
    rayjob: &RayJob,
    suspend: bool,
) -> Result<bool, Error> {
    let ns = namespace(rayjob)?;
    let cluster_name = rayjob
        .status
        .as_ref()
        .map(|s| s.ray_cluster_name.clone())
        .unwrap_or_default();

    let selector_mode = rayjob
        .spec
        .cluster_selector
        .as_ref()
        .is_some_and(|m| !m.is_empty());

    let mut cluster_absent = true;
    if !selector_mode && !cluster_name.is_empty() {
        let api: Api<RayCluster> = Api::namespaced(client.clone(), &ns);
        cluster_absent = match api.get(&cluster_name).await {
            Err(e) if not_found(&e) => true,
            Err(e) => return Err(e.into()),
            Ok(existing) => {
                if existing.meta().deletion_timestamp.is_none() {
                    api.delete(&cluster_name, &DeleteParams::default()).await?;
                    emit(
                        recorder,
                        rayjob,
                        "RayClusterDeleted",
                        format!("deleted RayCluster {cluster_name}"),
                        "Delete",
                    )
                    .await;
                }
                false
            }
        };
    }

    let mut job_absent = !suspend;
    if suspend {
        let name = rayjob.name_any();
        let api: Api<K8sJob> = Api::namespaced(client, &ns);
        job_absent = match api.get(&name).await {
            Err(e) if not_found(&e) => true,
            Err(e) => return Err(e.into()),
            Ok(existing) => {
                if existing.meta().deletion_timestamp.is_none() {
                    let dp = DeleteParams {
                        propagation_policy: Some(PropagationPolicy::Background),
                        ..Default::default()
                    };
                    api.delete(&name, &dp).await?;
                    emit(
                        recorder,
                        rayjob,
                        "SubmitterJobDeleted",
                        format!("deleted submitter workload {name}"),
                        "Delete",
                    )
                    .await;
                }
                false
            }
        };
    }

    Ok(cluster_absent && job_absent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_submit_command_uses_dashboard_url_and_job_id_and_entrypoint() {
        let mut rayjob = RayJob::new("demo", RayJobSpec::default());
        rayjob.spec.entrypoint = "python script.py".to_string();
        let cmd = default_submit_command(&rayjob, "http://dash:8265", "demo-abc123");
        assert_eq!(cmd[0], "/bin/sh");
        assert!(cmd[2].contains("--address=http://dash:8265"));
        assert!(cmd[2].contains("--submission-id=demo-abc123"));
        assert!(cmd[2].contains("python script.py"));
    }

    #[test]
    fn submitter_template_always_appends_pythonunbuffered() {
        let rayjob = RayJob::new("demo", RayJobSpec::default());
        let template = submitter_template(&rayjob, "http://dash:8265", "demo-abc").unwrap();
        let env = template.spec.unwrap().containers[0].env.clone().unwrap();
        assert!(env.iter().any(|e| e.name == PYTHON_UNBUFFERED_ENV && e.value.as_deref() == Some("1")));
    }

    #[test]
    fn user_provided_command_is_preserved() {
        let mut rayjob = RayJob::new("demo", RayJobSpec::default());
        rayjob.spec.submitter_pod_template = Some(PodTemplateSpec {
            metadata: None,
            spec: Some(k8s_openapi::api::core::v1::PodSpec {
                containers: vec![Container {
                    name: "submitter".to_string(),
                    command: Some(vec!["custom".to_string()]),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        });
        let template = submitter_template(&rayjob, "http://dash:8265", "demo-abc").unwrap();
        let containers = template.spec.unwrap().containers;
        assert_eq!(containers[0].command, Some(vec!["custom".to_string()]));
    }
}
