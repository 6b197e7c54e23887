//! ---
//! chaos_section: "02-chaos-lifecycle"
//! chaos_subsection: "tests"
//! chaos_type: "test"
//! chaos_scope: "code"
//! chaos_description: "End-to-end runs through the runner with fakes."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use r_chaos_core::probe::PhaseStatus;
use r_chaos_core::{
    AbortReason, ChaosMetrics, ChaosPhase, ChaosRunner, Comparator, ErrorCode, MemorySink,
    ProbeDescriptor, ProbeMode, RunProperties, TargetState, Verdict,
};
use r_chaos_testharness::{fast_spec, init_test_tracing, pods, FakePlatform, ScriptedTransport};

fn cmd_probe(name: &str, mode: ProbeMode) -> ProbeDescriptor {
    ProbeDescriptor::cmd(name, mode, "true", Comparator::string_equal("ok")).with_run(
        RunProperties::default()
            .with_timeout(Duration::from_millis(100))
            .with_interval(Duration::from_millis(5))
            .with_polling_interval(Duration::from_millis(20)),
    )
}

#[tokio::test]
async fn healthy_run_passes_with_every_probe_mode() {
    init_test_tracing();
    let platform = Arc::new(FakePlatform::default());
    let transport = Arc::new(ScriptedTransport::new("ok"));
    let sink = Arc::new(MemorySink::new());
    let registry = r_chaos_metrics::new_registry();
    let metrics = ChaosMetrics::new(registry.clone()).unwrap();

    let mut runner = ChaosRunner::new(fast_spec("healthy"), platform.clone())
        .unwrap()
        .with_transport(transport.clone())
        .with_sink(sink.clone())
        .with_metrics(Some(metrics));
    for (name, mode) in [
        ("sot", ProbeMode::Sot),
        ("edge", ProbeMode::Edge),
        ("continuous", ProbeMode::Continuous),
        ("on-chaos", ProbeMode::OnChaos),
        ("eot", ProbeMode::Eot),
    ] {
        runner.register_probe(cmd_probe(name, mode)).unwrap();
    }
    let phase = runner.phase();

    let report = runner.run(&pods(2)).await;

    let result = report.result;
    assert_eq!(result.verdict, Verdict::Passed, "{:?}", result.fail_step);
    assert!(report.error.is_none());
    assert_eq!(result.probe_success_percentage, 100.0);
    assert_eq!(phase.current(), ChaosPhase::Completed);
    assert!(platform.faulted().is_empty());
    assert!(result
        .targets
        .iter()
        .all(|record| record.state == TargetState::Reverted));

    let edge = result.probe("edge").unwrap();
    assert_eq!(edge.evaluations, 2);
    assert_eq!(edge.state.during_chaos, PhaseStatus::NotApplicable);
    assert!(result.probe("continuous").unwrap().evaluations >= 1);
    assert!(transport.calls("on-chaos") >= 1);
    assert_eq!(sink.verdicts(), vec![Verdict::Passed]);

    let text = r_chaos_metrics::prometheus::TextEncoder::new()
        .encode_to_string(&registry.gather())
        .unwrap();
    assert!(text.contains("r_chaos_verdicts_total"));
}

#[tokio::test]
async fn failing_edge_probe_stops_before_injection() {
    let platform = Arc::new(FakePlatform::default());
    let transport = Arc::new(ScriptedTransport::new("200").respond("frontend", "500"));
    let mut runner = ChaosRunner::new(fast_spec("edge-500"), platform.clone())
        .unwrap()
        .with_transport(transport.clone());
    runner
        .register_probe(
            ProbeDescriptor::http_get("frontend", ProbeMode::Edge, "http://frontend/health", 200)
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
    assert_eq!(transport.calls("frontend"), 1);
    let summary = result.probe("frontend").unwrap();
    assert_eq!(summary.state.pre_chaos, PhaseStatus::Failed);
    assert_eq!(summary.state.post_chaos, PhaseStatus::Awaited);
    assert_eq!(result.probe_success_percentage, 0.0);
}

#[tokio::test]
async fn stop_on_failure_probe_aborts_and_reverts() {
    let platform = Arc::new(FakePlatform::default());
    let transport = Arc::new(ScriptedTransport::new("ok").fail("guard", "connection refused"));
    let spec = fast_spec("guarded").with_duration(Duration::from_secs(5));
    let mut runner = ChaosRunner::new(spec, platform.clone())
        .unwrap()
        .with_transport(transport);
    let guard = cmd_probe("guard", ProbeMode::OnChaos);
    let run = guard.run.with_stop_on_failure(true);
    runner.register_probe(guard.with_run(run)).unwrap();

    let report = runner.run(&pods(3)).await;

    let result = report.result;
    assert_eq!(result.verdict, Verdict::Failed);
    let abort = result.abort.as_ref().unwrap();
    assert_eq!(
        abort.reason,
        AbortReason::ProbeFailure {
            probe: "guard".into()
        }
    );
    assert_eq!(result.fail_step.as_ref().unwrap().code, ErrorCode::Probe);
    assert!(platform.faulted().is_empty());
    assert!(report.error.unwrap().is_abort());
}

#[tokio::test]
async fn abort_during_slow_inject_leaves_nothing_faulted() {
    let platform = Arc::new(FakePlatform::default().with_latency(Duration::from_millis(300)));
    let spec = fast_spec("slow-inject").with_abort_grace(Duration::from_millis(50));
    let runner = ChaosRunner::new(spec, platform.clone()).unwrap();
    let abort = runner.abort_handle();
    let targets = pods(1);

    let interrupter = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        abort.trigger(AbortReason::Interrupt)
    });
    let report = runner.run(&targets).await;
    assert!(interrupter.await.unwrap());

    let result = report.result;
    assert_eq!(result.verdict, Verdict::Stopped);
    assert!(platform.faulted().is_empty(), "{:?}", platform.faulted());
    assert_eq!(platform.injections_of(&targets[0]), 1);
    assert_eq!(platform.reverts_of(&targets[0]), 1);
    assert_eq!(
        result.target_state(&targets[0]),
        Some(TargetState::Reverted)
    );
    let abort = result.abort.as_ref().unwrap();
    assert_eq!(abort.reverted, targets);
    assert!(abort.failures.is_empty());
}

#[tokio::test]
async fn deferred_probe_failure_fails_after_full_run() {
    let platform = Arc::new(FakePlatform::default());
    let transport = Arc::new(ScriptedTransport::new("ok").fail("watch", "timeout exceeded"));
    let mut runner = ChaosRunner::new(fast_spec("deferred"), platform.clone())
        .unwrap()
        .with_transport(transport);
    runner
        .register_probe(cmd_probe("watch", ProbeMode::Continuous))
        .unwrap();
    let targets = pods(2);

    let report = runner.run(&targets).await;

    let result = report.result;
    assert_eq!(result.verdict, Verdict::Failed);
    for target in &targets {
        assert!(platform.injections_of(target) >= 1);
    }
    let summary = result.probe("watch").unwrap();
    assert_eq!(summary.state.during_chaos, PhaseStatus::Failed);
    assert!(report.sequencer.is_some());
}

#[tokio::test]
async fn empty_candidate_pool_is_a_selection_error() {
    let platform = Arc::new(FakePlatform::default());
    let sink = Arc::new(MemorySink::new());
    let runner = ChaosRunner::new(fast_spec("empty"), platform)
        .unwrap()
        .with_sink(sink.clone());

    let report = runner.run(&[]).await;

    assert_eq!(report.result.verdict, Verdict::Failed);
    assert_eq!(
        report.result.fail_step.unwrap().code,
        ErrorCode::TargetSelection
    );
    assert_eq!(sink.verdicts(), vec![Verdict::Failed]);
}

#[test]
fn duplicate_probe_names_are_rejected() {
    let platform = Arc::new(FakePlatform::default());
    let mut runner = ChaosRunner::new(fast_spec("dupes"), platform).unwrap();
    runner.register_probe(cmd_probe("p", ProbeMode::Sot)).unwrap();
    assert!(runner.register_probe(cmd_probe("p", ProbeMode::Eot)).is_err());
}
