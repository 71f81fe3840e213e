//! Wires the JobStateMachine dispatch into a `kube::runtime::Controller`, gated by leader
//! election so exactly one replica drives reconciliation at a time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job as K8sJob;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::runtime::finalizer::{Error as FinalizerError, Event as FinalizerEvent, finalizer};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use owo_colors::OwoColorize;
use rayjob_types::{JobDeploymentStatus, RayCluster, RayJob};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::dashboard::DashboardGateway;
use super::{actions, finalizer as job_finalizer, resources, status};
use crate::util::Error;
#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

/// How often the same unchanged `JobDeploymentStatus` is allowed to print a log line, so a
/// RayJob idling in `Running` doesn't spam the console every `PROBE_INTERVAL`.
const LOG_THROTTLE: Duration = Duration::from_secs(300);

pub struct ContextData {
    pub client: Client,
    pub dashboard: Arc<dyn DashboardGateway>,
    pub recorder: Recorder,
    #[cfg(feature = "metrics")]
    pub metrics: Option<Arc<ControllerMetrics>>,
    last_action: Mutex<HashMap<(String, String), (JobDeploymentStatus, Instant)>>,
}

/// Dispatches on `JobDeploymentStatus`, mutates an in-memory copy, and persists the diff at
/// most once (spec.md §2 "Data flow per reconcile tick").
async fn apply(rayjob: Arc<RayJob>, ctx: Arc<ContextData>) -> Result<Action, Error> {
    let snapshot = (*rayjob).clone();
    let name = snapshot.name_any();
    let ns = snapshot.namespace().unwrap_or_default();
    let deployment_status = snapshot
        .status
        .as_ref()
        .map(|s| s.job_deployment_status)
        .unwrap_or_default();
    let transition = deployment_status.to_string();

    #[cfg(feature = "metrics")]
    if let Some(metrics) = &ctx.metrics {
        metrics.reconcile_counter.with_label_values(&[&name, &ns]).inc();
    }

    #[cfg(feature = "metrics")]
    let read_start = Instant::now();

    let (mutated, action) = match deployment_status {
        JobDeploymentStatus::New => (
            actions::enter_initializing(&snapshot)?,
            Action::requeue(crate::util::probe_interval()),
        ),
        JobDeploymentStatus::Initializing => {
            actions::drive_initializing(ctx.client.clone(), &ctx.recorder, &snapshot).await?
        }
        JobDeploymentStatus::Running => {
            actions::drive_running(ctx.client.clone(), &ctx.recorder, ctx.dashboard.as_ref(), &snapshot)
                .await?
        }
        JobDeploymentStatus::Suspending => {
            actions::drive_suspending(ctx.client.clone(), &ctx.recorder, &snapshot).await?
        }
        JobDeploymentStatus::Suspended => actions::drive_suspended(&snapshot),
        JobDeploymentStatus::Complete => {
            actions::drive_complete(ctx.client.clone(), &ctx.recorder, &snapshot).await?
        }
    };

    #[cfg(feature = "metrics")]
    if let Some(metrics) = &ctx.metrics {
        metrics
            .read_histogram
            .with_label_values(&[&name, &ns, &transition])
            .observe(read_start.elapsed().as_secs_f64());
        metrics
            .action_counter
            .with_label_values(&[&name, &ns, &transition])
            .inc();
    }

    log_transition_if_due(&ctx, &name, &ns, deployment_status).await;

    #[cfg(feature = "metrics")]
    let write_timer = ctx
        .metrics
        .as_ref()
        .map(|metrics| metrics.write_histogram.with_label_values(&[&name, &ns, &transition]).start_timer());

    status::write_if_changed(ctx.client.clone(), &snapshot, &mutated).await?;

    #[cfg(feature = "metrics")]
    if let Some(timer) = write_timer {
        timer.observe_duration();
    }

    Ok(action)
}

/// Prints a transition log line only when it differs from the last one logged for this object,
/// or `LOG_THROTTLE` has elapsed since — keeps a RayJob idling unchanged from spamming the
/// console every `PROBE_INTERVAL`.
async fn log_transition_if_due(ctx: &ContextData, name: &str, ns: &str, deployment_status: JobDeploymentStatus) {
    let key = (ns.to_string(), name.to_string());
    let mut last_action = ctx.last_action.lock().await;
    let previous = last_action.insert(key, (deployment_status, Instant::now()));
    let should_log = match previous {
        Some((last_status, last_instant)) => {
            last_status != deployment_status || last_instant.elapsed() > LOG_THROTTLE
        }
        None => true,
    };
    if should_log {
        println!(
            "🔧 {}{}{}{}{}",
            ns.color(crate::util::colors::FG2),
            "/".color(crate::util::colors::FG1),
            name.color(crate::util::colors::FG2),
            " STATE: ".color(crate::util::colors::FG1),
            deployment_status.to_string().color(crate::util::colors::FG2),
        );
    }
}

/// Best-effort `StopJob` then hands control back to `kube::runtime::finalizer`, which removes
/// the token regardless of whether the stop succeeded (spec.md §4.4). Both the stop attempt and
/// the finalizer removal are recorded as a Kubernetes event, so `kubectl describe rayjob` shows
/// what happened during deletion.
async fn cleanup(rayjob: Arc<RayJob>, ctx: Arc<ContextData>) -> Result<Action, Error> {
    if job_finalizer::needs_stop(&rayjob) {
        let job_id = rayjob.status.as_ref().map(|s| s.job_id.clone()).unwrap_or_default();
        ctx.dashboard.stop_job(&job_id).await;
        resources::emit(
            &ctx.recorder,
            &rayjob,
            "StopJobRequested",
            format!("requested dashboard stop for job {job_id}"),
            "Delete",
        )
        .await;
    }
    resources::emit(
        &ctx.recorder,
        &rayjob,
        "FinalizerRemoved",
        format!("removed finalizer {}", job_finalizer::FINALIZER),
        "Delete",
    )
    .await;
    Ok(Action::await_change())
}

async fn reconcile(rayjob: Arc<RayJob>, ctx: Arc<ContextData>) -> Result<Action, Error> {
    let ns = rayjob
        .namespace()
        .ok_or_else(|| Error::UserInput("RayJob is missing metadata.namespace".to_string()))?;
    let api: Api<RayJob> = Api::namespaced(ctx.client.clone(), &ns);

    finalizer(&api, job_finalizer::FINALIZER, rayjob, |event| async {
        match event {
            FinalizerEvent::Apply(rayjob) => apply(rayjob, ctx.clone()).await,
            FinalizerEvent::Cleanup(rayjob) => cleanup(rayjob, ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| match e {
        FinalizerError::ApplyFailed(inner) | FinalizerError::CleanupFailed(inner) => inner,
        other => Error::UserInput(other.to_string()),
    })
}

/// Transient errors (Kubernetes API hiccups, dashboard timeouts) get a flat requeue and stay
/// off the event stream; non-transient ones (bad spec, a selector naming a cluster that doesn't
/// exist) are surfaced as a Warning event, since stderr alone won't reach `kubectl describe
/// rayjob` (spec.md §7).
fn on_error(rayjob: Arc<RayJob>, error: &Error, ctx: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!("reconcile of RayJob {} failed: {error}", rayjob.name_any()).red()
    );
    if !error.is_transient() {
        let note = error.to_string();
        tokio::spawn(async move {
            resources::emit_typed(
                &ctx.recorder,
                &rayjob,
                EventType::Warning,
                "ReconcileFailed",
                note,
                "Reconcile",
            )
            .await;
        });
    }
    Action::requeue(Duration::from_secs(5))
}

async fn run_controller(ctx: Arc<ContextData>, shutdown: CancellationToken) {
    let rayjobs: Api<RayJob> = Api::all(ctx.client.clone());
    let clusters: Api<RayCluster> = Api::all(ctx.client.clone());
    let jobs: Api<K8sJob> = Api::all(ctx.client.clone());

    Controller::new(rayjobs, watcher::Config::default())
        .owns(clusters, watcher::Config::default())
        .owns(jobs, watcher::Config::default())
        .graceful_shutdown_on(async move { shutdown.cancelled().await })
        .run(reconcile, on_error, ctx)
        .for_each(|result| async move {
            if let Err(e) = result {
                eprintln!("{}", format!("controller stream error: {e}").red());
            }
        })
        .await;
}

/// Runs the controller for as long as this replica holds the leader lease, renewing or
/// reacquiring it until `shutdown` fires.
pub async fn run(
    client: Client,
    namespace: String,
    dashboard: Arc<dyn DashboardGateway>,
    #[cfg(feature = "metrics")] metrics: Option<Arc<ControllerMetrics>>,
    shutdown: CancellationToken,
) {
    let recorder = Recorder::new(
        client.clone(),
        Reporter::from(rayjob_common::COMPONENT_NAME.to_owned()),
    );
    let ctx = Arc::new(ContextData {
        client: client.clone(),
        dashboard,
        recorder,
        #[cfg(feature = "metrics")]
        metrics,
        last_action: Mutex::new(HashMap::new()),
    });

    let lease = LeaseLock::new(
        client,
        &namespace,
        LeaseLockParams {
            holder_id: format!("{}-{}", rayjob_common::COMPONENT_NAME, uuid::Uuid::new_v4()),
            lease_name: format!("{}-leader", rayjob_common::COMPONENT_NAME),
            lease_ttl: Duration::from_secs(15),
        },
    );

    while !shutdown.is_cancelled() {
        let acquired = tokio::select! {
            () = shutdown.cancelled() => break,
            result = lease.try_acquire_or_renew() => result,
        };

        match acquired {
            Ok(LeaseLockResult { acquired_lease: true }) => {
                println!("{}", "🏆 acquired leader lease; starting controller".green());
                run_controller(ctx.clone(), shutdown.clone()).await;
            }
            Ok(_) => {}
            Err(e) => eprintln!("{}", format!("leader election error: {e}").red()),
        }

        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(Duration::from_secs(5)) => {}
        }
    }
}
