//! ---
//! chaos_section: "03-observability"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Metrics collection and export utilities."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
    TEXT_FORMAT,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Shared registry type used across the coordinator and the CLI.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Serve `registry` at `/metrics` for the lifetime of a chaos run.
///
/// Binding happens before returning so a busy port fails the run up front;
/// port `0` is allowed and [`MetricsServer::addr`] reports the chosen port.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let (listener, bound) = bind(addr)?;
    let app = Router::new()
        .route("/metrics", get(scrape))
        .with_state(registry);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("chaos metrics exporter stopped with an error")
    });
    info!(target: "r_chaos::metrics", address = %bound, "chaos metrics exporter listening");

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task,
    })
}

fn bind(addr: SocketAddr) -> Result<(TcpListener, SocketAddr)> {
    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("metrics listener {} is unavailable", addr))?;
    listener
        .set_nonblocking(true)
        .context("metrics listener cannot be made non-blocking")?;
    let bound = listener.local_addr()?;
    Ok((TcpListener::from_std(listener)?, bound))
}

async fn scrape(State(registry): State<SharedRegistry>) -> Response {
    let mut body = Vec::new();
    match TextEncoder::new().encode(&registry.gather(), &mut body) {
        Ok(()) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(err) => {
            error!(target: "r_chaos::metrics", error = %err, "metric families failed to encode");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error").into_response()
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting scrapes and wait for in-flight ones to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            if tx.send(()).is_err() {
                warn!(target: "r_chaos::metrics", "metrics exporter already stopped");
            }
        }
        self.task
            .await
            .context("metrics exporter task did not join")?
    }
}

/// Metrics recorded by the `r-chaosctl` process itself.
#[derive(Clone)]
pub struct CtlMetrics {
    registry: SharedRegistry,
    runs_total: IntCounterVec,
    config_load_seconds: Histogram,
    build_info: IntGaugeVec,
}

impl CtlMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let runs_total = IntCounterVec::new(
            Opts::new(
                "r_chaosctl_runs_total",
                "Experiments driven by the CLI, partitioned by verdict",
            ),
            &["verdict"],
        )?;
        registry.register(Box::new(runs_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "r_chaosctl_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = IntGaugeVec::new(
            Opts::new("r_chaosctl_build_info", "Build metadata for the running binary"),
            &["version"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            runs_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_run(&self, verdict: &str) {
        self.runs_total.with_label_values(&[verdict]).inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str) {
        self.build_info.with_label_values(&[version]).set(1);
    }
}

impl std::fmt::Debug for CtlMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CtlMetrics").finish_non_exhaustive()
    }
}

pub use prometheus;
