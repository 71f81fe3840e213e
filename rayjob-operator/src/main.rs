use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use owo_colors::OwoColorize;
use rayjob_operator::job::dashboard::HttpDashboardGateway;
use rayjob_operator::job::reconcile;
#[cfg(feature = "metrics")]
use rayjob_operator::util::metrics::{ControllerMetrics, run_metrics_server};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "rayjob-operator", about = "Controller for the RayJob custom resource")]
struct Cli {
    /// Namespace the leader-election Lease object lives in.
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Port the Prometheus metrics endpoint listens on.
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    metrics_port: u16,

    /// Interval an in-flight RayJob is requeued at absent a more specific decision.
    #[arg(long, env = "REQUEUE_INTERVAL_SECS", default_value_t = 3)]
    requeue_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rayjob_common::init();
    let cli = Cli::parse();
    rayjob_operator::util::set_probe_interval(Duration::from_secs(cli.requeue_interval_secs));

    let client = Client::try_default().await?;
    let dashboard = Arc::new(HttpDashboardGateway::new());

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        rayjob_common::shutdown::shutdown_signal().await;
        signal_shutdown.cancel();
    });

    #[cfg(feature = "metrics")]
    let metrics = Arc::new(ControllerMetrics::new("rayjob"));
    #[cfg(feature = "metrics")]
    {
        let metrics = metrics.clone();
        let port = cli.metrics_port;
        tokio::spawn(async move { run_metrics_server(port, metrics).await });
    }

    rayjob_common::signal_ready();
    println!("{}", "🚀 rayjob-operator starting".green());

    reconcile::run(
        client,
        cli.namespace,
        dashboard,
        #[cfg(feature = "metrics")]
        Some(metrics),
        shutdown,
    )
    .await;

    Ok(())
}
