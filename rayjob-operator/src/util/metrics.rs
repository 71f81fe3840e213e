//! Prometheus metrics for the RayJob controller, served over a bare `hyper` endpoint
//! (no `axum`/`tower` pulled in just for a `/metrics` route).

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Request, Response, service::service_fn};
use hyper_util::rt::TokioIo;
use owo_colors::OwoColorize;
use prometheus::{Encoder, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;

pub struct ControllerMetrics {
    registry: Registry,
    pub reconcile_counter: IntCounterVec,
    pub action_counter: IntCounterVec,
    pub read_histogram: HistogramVec,
    pub write_histogram: HistogramVec,
}

impl ControllerMetrics {
    pub fn new(subsystem: &str) -> Self {
        let registry = Registry::new();

        let reconcile_counter = IntCounterVec::new(
            Opts::new("reconcile_total", "Total number of reconciles")
                .namespace("rayjob_controller")
                .subsystem(subsystem),
            &["name", "namespace"],
        )
        .unwrap();

        let action_counter = IntCounterVec::new(
            Opts::new("action_total", "Total number of actions taken per transition")
                .namespace("rayjob_controller")
                .subsystem(subsystem),
            &["name", "namespace", "action"],
        )
        .unwrap();

        let read_histogram = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "read_phase_seconds",
                "Time spent determining the next action",
            )
            .namespace("rayjob_controller")
            .subsystem(subsystem),
            &["name", "namespace", "action"],
        )
        .unwrap();

        let write_histogram = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "write_phase_seconds",
                "Time spent performing the chosen action",
            )
            .namespace("rayjob_controller")
            .subsystem(subsystem),
            &["name", "namespace", "action"],
        )
        .unwrap();

        registry
            .register(Box::new(reconcile_counter.clone()))
            .unwrap();
        registry
            .register(Box::new(action_counter.clone()))
            .unwrap();
        registry
            .register(Box::new(read_histogram.clone()))
            .unwrap();
        registry
            .register(Box::new(write_histogram.clone()))
            .unwrap();

        Self {
            registry,
            reconcile_counter,
            action_counter,
            read_histogram,
            write_histogram,
        }
    }

    fn render(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .unwrap();
        buf
    }
}

/// Serves `/metrics` and `/healthz` on `port` until the process exits. Spawned as a background
/// task from `main`; a bind failure is fatal since it means the pod can never become observable.
pub async fn run_metrics_server(port: u16, metrics: std::sync::Arc<ControllerMetrics>) {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind metrics server to {addr}: {e}"));
    println!(
        "{}{}",
        "📈 Starting metrics server • port=".green(),
        port.to_string().green().dimmed(),
    );
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                eprintln!("metrics server accept error: {e}");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let metrics = metrics.clone();
                async move {
                    let body = match req.uri().path() {
                        "/metrics" => metrics.render(),
                        "/healthz" | "/readyz" => b"ok".to_vec(),
                        _ => b"not found".to_vec(),
                    };
                    Ok::<_, std::convert::Infallible>(Response::new(Full::new(Bytes::from(body))))
                }
            });
            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, service)
                .await
            {
                eprintln!("metrics server connection error: {e}");
            }
        });
    }
}
