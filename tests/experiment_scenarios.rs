//! ---
//! chaos_section: "05-testing"
//! chaos_subsection: "integration-tests"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Full experiments driven from configuration files and interrupts."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use r_chaos_common::AppConfig;
use r_chaos_core::{
    AbortReason, ChaosPhase, ChaosRunner, ChaosSpec, ErrorCode, ExecutionMode, ProbeDescriptor,
    TargetId, TargetState, Verdict,
};
use r_chaos_testharness::{fast_spec, init_test_tracing, FakePlatform, ScriptedTransport};

const EXPERIMENT: &str = r#"
[experiment]
name = "cart-pod-delete"
candidates = ["shop/cart-0", "shop/cart-1", "shop/cart-2", "shop/cart-3", "shop/cart-4"]
duration = 0.3
interval = 0.05
sequence = "serial"
affected_percentage = 40
seed = 11
status_timeout = 0.5
status_delay = 0.005
abort_grace = 0.5

[[probes]]
name = "checkout"
type = "cmd"
mode = "Edge"
[probes.run]
probe_timeout = 0.2
interval = 0.01
[probes.cmd]
command = "curl -s checkout/health"
comparator = { criteria = "equal", value = "ok" }
"#;

fn candidates(config: &AppConfig) -> Vec<TargetId> {
    config
        .experiment
        .candidates
        .iter()
        .map(|raw| raw.parse().unwrap())
        .collect()
}

#[tokio::test]
async fn configured_serial_experiment_runs_to_a_pass() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("r-chaos.toml");
    std::fs::File::create(&path)
        .unwrap()
        .write_all(EXPERIMENT.as_bytes())
        .unwrap();

    let loaded = AppConfig::load_with_source(&[path.clone()]).unwrap();
    assert_eq!(loaded.source, path);
    let spec = ChaosSpec::from_config(&loaded.config.experiment).unwrap();
    assert_eq!(spec.mode, ExecutionMode::Serial);
    assert_eq!(spec.affected_percentage, 40);
    let duration = spec.duration;

    let platform = Arc::new(FakePlatform::default());
    let transport = Arc::new(ScriptedTransport::new("ok"));
    let mut runner = ChaosRunner::new(spec, platform.clone())
        .unwrap()
        .with_transport(transport.clone());
    for probe in &loaded.config.probes {
        runner
            .register_probe(ProbeDescriptor::try_from(probe).unwrap())
            .unwrap();
    }
    let pool = candidates(&loaded.config);

    let started = Instant::now();
    let report = runner.run(&pool).await;
    let elapsed = started.elapsed();

    let result = report.result;
    assert_eq!(result.verdict, Verdict::Passed, "{:?}", result.fail_step);
    assert!(elapsed >= duration);
    assert_eq!(platform.max_concurrent_faulted(), 1);

    let targeted: Vec<_> = pool
        .iter()
        .filter(|target| platform.injections_of(target) > 0)
        .collect();
    assert_eq!(targeted.len(), 2);
    for target in &targeted {
        assert_eq!(
            platform.injections_of(target),
            platform.reverts_of(target)
        );
        assert_eq!(result.target_state(target), Some(TargetState::Reverted));
    }
    let untouched = pool
        .iter()
        .filter(|target| result.target_state(target) == Some(TargetState::NotTargeted))
        .count();
    assert_eq!(untouched, 3);
    assert_eq!(transport.calls("checkout"), 2);

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["verdict"], "Pass");
    assert_eq!(json["probe_success_percentage"], 100.0);
}

#[tokio::test]
async fn interrupt_mid_serial_reverts_the_current_target_only() {
    init_test_tracing();
    let targets: Vec<TargetId> = (0..4)
        .map(|idx| TargetId::namespaced("chaos", format!("svc-{}", idx)))
        .collect();
    let spec = fast_spec("interrupted")
        .with_duration(Duration::from_secs(10))
        .with_interval(Duration::from_millis(60));
    let platform = Arc::new(FakePlatform::default());
    let runner = ChaosRunner::new(spec, platform.clone()).unwrap();
    let abort = runner.abort_handle();
    let phase = runner.phase();

    let watched = platform.clone();
    let third = targets[2].clone();
    let interrupter = tokio::spawn(async move {
        let deadline = Instant::now() + Duration::from_secs(5);
        while watched.injections_of(&third) == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        abort.trigger(AbortReason::Interrupt)
    });

    let report = runner.run(&targets).await;
    assert!(interrupter.await.unwrap());

    let result = report.result;
    assert_eq!(result.verdict, Verdict::Stopped);
    assert_eq!(
        result.fail_step.as_ref().unwrap().code,
        ErrorCode::ExperimentAborted
    );
    assert!(result.abort.is_some());
    assert_eq!(phase.current(), ChaosPhase::Completed);

    assert!(platform.faulted().is_empty());
    assert_eq!(platform.reverts_of(&targets[0]), 1);
    assert_eq!(platform.reverts_of(&targets[1]), 1);
    assert_eq!(platform.reverts_of(&targets[2]), 1);
    assert_eq!(platform.injections_of(&targets[3]), 0);
    assert_eq!(platform.reverts_of(&targets[3]), 0);
    assert_eq!(
        result.target_state(&targets[2]),
        Some(TargetState::Reverted)
    );
}

#[tokio::test]
async fn failing_inject_fails_the_run_and_leaves_nothing_faulted() {
    let targets: Vec<TargetId> = (0..3)
        .map(|idx| TargetId::namespaced("chaos", format!("db-{}", idx)))
        .collect();
    let spec = fast_spec("inject-refused").with_mode(ExecutionMode::Parallel);
    let platform = Arc::new(FakePlatform::default().fail_inject_on(targets[2].clone()));
    let runner = ChaosRunner::new(spec, platform.clone()).unwrap();

    let report = runner.run(&targets).await;

    let result = report.result;
    assert_eq!(result.verdict, Verdict::Failed);
    let step = result.fail_step.unwrap();
    assert_eq!(step.phase, ChaosPhase::ChaosInject);
    assert_eq!(step.code, ErrorCode::ChaosInject);
    assert_eq!(step.target, Some(targets[2].clone()));
    assert!(platform.faulted().is_empty());
}
