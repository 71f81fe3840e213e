use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key inside `Spec.ClusterSelector` that names the pre-existing cluster to adopt.
pub const CLUSTER_SELECTOR_KEY: &str = "ray.io/cluster";

fn default_ttl_seconds() -> i32 {
    0
}

/// A user-declared request to run a Ray job on a (possibly controller-managed) Ray cluster.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "ray.io",
    version = "v1",
    kind = "RayJob",
    plural = "rayjobs",
    derive = "PartialEq",
    status = "RayJobStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.jobDeploymentStatus\", \"name\": \"STATUS\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.jobStatus\", \"name\": \"JOB STATUS\", \"type\": \"string\" }"
)]
pub struct RayJobSpec {
    /// Inline RayCluster spec to create when not adopting an existing cluster.
    /// Carried opaquely: the RayCluster controller's schema is out of scope here.
    #[serde(rename = "rayClusterSpec", default, skip_serializing_if = "Option::is_none")]
    pub ray_cluster_spec: Option<serde_json::Value>,

    /// When non-empty, adopt the cluster named `ClusterSelector[CLUSTER_SELECTOR_KEY]`
    /// instead of creating one.
    #[serde(rename = "clusterSelector", default, skip_serializing_if = "Option::is_none")]
    pub cluster_selector: Option<BTreeMap<String, String>>,

    /// Release all owned resources and idle.
    #[serde(default)]
    pub suspend: bool,

    /// Delete the cluster after the job reaches a terminal state.
    #[serde(rename = "shutdownAfterJobFinishes", default)]
    pub shutdown_after_job_finishes: bool,

    /// Delay between job end and cluster deletion, once `ShutdownAfterJobFinishes` is set.
    #[serde(rename = "ttlSecondsAfterFinished", default = "default_ttl_seconds")]
    pub ttl_seconds_after_finished: i32,

    /// Template for the workload that submits the job. First container is the submitter.
    #[serde(
        rename = "submitterPodTemplate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub submitter_pod_template: Option<PodTemplateSpec>,

    /// Externally chosen job identifier; generated if absent.
    #[serde(rename = "jobId", default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,

    /// The `ray job submit` entrypoint command to run against the dashboard.
    #[serde(default)]
    pub entrypoint: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum JobDeploymentStatus {
    #[default]
    New,
    Initializing,
    Running,
    Suspending,
    Suspended,
    Complete,
}

impl std::fmt::Display for JobDeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum JobStatus {
    #[default]
    New,
    Pending,
    Running,
    Stopped,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn is_pending_or_running(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct RayJobStatus {
    #[serde(rename = "jobDeploymentStatus", default)]
    pub job_deployment_status: JobDeploymentStatus,

    #[serde(rename = "jobStatus", default)]
    pub job_status: JobStatus,

    #[serde(rename = "jobId", default)]
    pub job_id: String,

    #[serde(rename = "rayClusterName", default)]
    pub ray_cluster_name: String,

    #[serde(rename = "dashboardURL", default)]
    pub dashboard_url: String,

    #[serde(rename = "startTime", default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Time>,

    #[serde(rename = "endTime", default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Time>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Verbatim copy of the owned RayCluster's status, refreshed every `Running` tick.
    #[serde(
        rename = "rayClusterStatus",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ray_cluster_status: Option<serde_json::Value>,
}

/// The RayCluster resource. Its controller and spec schema are out of scope here: we only
/// create, read, and delete instances of it.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "ray.io",
    version = "v1",
    kind = "RayCluster",
    plural = "rayclusters",
    derive = "PartialEq",
    status = "RayClusterStatus",
    namespaced
)]
#[kube(derive = "Default")]
pub struct RayClusterSpec {
    /// Opaque cluster configuration, copied verbatim from `RayJobSpec.ray_cluster_spec`.
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum ClusterState {
    #[default]
    Unknown,
    Waiting,
    Ready,
    Failed,
    Suspended,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct RayClusterStatus {
    #[serde(default)]
    pub state: ClusterState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(rename = "head", default, skip_serializing_if = "Option::is_none")]
    pub head_service_name: Option<String>,
}
