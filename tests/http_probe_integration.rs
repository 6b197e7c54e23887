//! ---
//! chaos_section: "05-testing"
//! chaos_subsection: "integration-tests"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "HTTP probes against a live local endpoint."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use r_chaos_core::probe::PhaseStatus;
use r_chaos_core::{ChaosPhase, ChaosRunner, ErrorCode, ProbeDescriptor, ProbeMode, Verdict};
use r_chaos_testharness::{fast_spec, init_test_tracing, pods, FakePlatform};

async fn serve(status: StatusCode) -> SocketAddr {
    let router = Router::new().route("/health", get(move || async move { status }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn edge_probe_on_500_fails_before_any_injection() {
    init_test_tracing();
    let addr = serve(StatusCode::INTERNAL_SERVER_ERROR).await;
    let platform = Arc::new(FakePlatform::default());
    let mut runner = ChaosRunner::new(fast_spec("edge-down"), platform.clone()).unwrap();
    runner
        .register_probe(
            ProbeDescriptor::http_get(
                "frontend",
                ProbeMode::Edge,
                &format!("http://{}/health", addr),
                200,
            )
            .unwrap(),
        )
        .unwrap();

    let report = runner.run(&pods(3)).await;

    let result = report.result;
    assert_eq!(result.verdict, Verdict::Failed);
    let step = result.fail_step.as_ref().unwrap();
    assert_eq!(step.phase, ChaosPhase::PreChaos);
    assert_eq!(step.code, ErrorCode::Probe);
    assert!(platform.operations().is_empty());
    assert_eq!(
        result.probe("frontend").unwrap().state.pre_chaos,
        PhaseStatus::Failed
    );
}

#[tokio::test]
async fn healthy_endpoint_passes_both_edges() {
    let addr = serve(StatusCode::OK).await;
    let platform = Arc::new(FakePlatform::default());
    let mut runner = ChaosRunner::new(fast_spec("edge-up"), platform.clone()).unwrap();
    runner
        .register_probe(
            ProbeDescriptor::http_get(
                "frontend",
                ProbeMode::Edge,
                &format!("http://{}/health", addr),
                200,
            )
            .unwrap(),
        )
        .unwrap();

    let report = runner.run(&pods(2)).await;

    let result = report.result;
    assert_eq!(result.verdict, Verdict::Passed, "{:?}", result.fail_step);
    let summary = result.probe("frontend").unwrap();
    assert_eq!(summary.evaluations, 2);
    assert_eq!(summary.state.pre_chaos, PhaseStatus::Passed);
    assert_eq!(summary.state.post_chaos, PhaseStatus::Passed);
    assert!(platform.faulted().is_empty());
}
