//! ---
//! chaos_section: "02-chaos-lifecycle"
//! chaos_subsection: "tests"
//! chaos_type: "test"
//! chaos_scope: "code"
//! chaos_description: "Sequencer behaviour against the in-memory platform."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use r_chaos_core::{
    AbortHandle, AbortReason, ChaosError, ChaosSpec, ErrorCode, ExecutionMode, MemorySink,
    Sequencer, SequencerState, TargetActions, TargetLedger, TargetSet, TargetState,
};
use r_chaos_testharness::{fast_spec, pods, FakePlatform};

struct Fixture {
    platform: Arc<FakePlatform>,
    ledger: TargetLedger,
    sink: Arc<MemorySink>,
    abort: AbortHandle,
    sequencer: Sequencer,
}

fn fixture(spec: ChaosSpec, platform: FakePlatform, targets: &TargetSet) -> Fixture {
    let platform = Arc::new(platform);
    let ledger = TargetLedger::new();
    let sink = Arc::new(MemorySink::new());
    let actions = TargetActions::new(
        &spec,
        platform.clone(),
        ledger.clone(),
        sink.clone(),
        None,
    );
    actions.mark_targeted(targets);
    let abort = AbortHandle::new();
    let sequencer = Sequencer::new(Arc::new(spec), actions, abort.signal());
    Fixture {
        platform,
        ledger,
        sink,
        abort,
        sequencer,
    }
}

#[tokio::test]
async fn serial_mode_faults_one_target_at_a_time() {
    let targets = TargetSet::new(pods(3));
    let fx = fixture(fast_spec("serial"), FakePlatform::default(), &targets);

    let report = fx.sequencer.run(&targets).await.unwrap();

    assert_eq!(fx.platform.max_concurrent_faulted(), 1);
    assert!(report.iterations >= 1);
    assert!(report.elapsed >= Duration::from_millis(200));
    for target in &targets {
        assert_eq!(
            fx.platform.injections_of(target),
            fx.platform.reverts_of(target)
        );
        assert_eq!(fx.ledger.state(target), Some(TargetState::Reverted));
        let states = fx.sink.states_of(target);
        assert_eq!(states.first(), Some(&TargetState::Targeted));
        assert_eq!(states.last(), Some(&TargetState::Reverted));
    }
    assert!(fx.platform.faulted().is_empty());
    assert_eq!(fx.sequencer.state(), SequencerState::Completed);
}

#[tokio::test]
async fn parallel_mode_faults_every_target_together() {
    let targets = TargetSet::new(pods(3));
    let spec = fast_spec("parallel").with_mode(ExecutionMode::Parallel);
    let fx = fixture(spec, FakePlatform::default(), &targets);

    fx.sequencer.run(&targets).await.unwrap();

    assert_eq!(fx.platform.max_concurrent_faulted(), 3);
    assert!(fx.platform.faulted().is_empty());
}

#[tokio::test]
async fn abort_before_start_touches_nothing() {
    let targets = TargetSet::new(pods(2));
    let fx = fixture(fast_spec("early-abort"), FakePlatform::default(), &targets);
    fx.abort.trigger(AbortReason::Interrupt);

    let err = fx.sequencer.run(&targets).await.unwrap_err();

    assert!(err.is_abort());
    assert_eq!(fx.sequencer.state(), SequencerState::Aborted);
    assert!(fx.platform.operations().is_empty());
}

#[tokio::test]
async fn inject_failure_cleans_up_and_names_the_target() {
    let candidates = pods(3);
    let targets = TargetSet::new(candidates.clone());
    let spec = fast_spec("inject-failure").with_mode(ExecutionMode::Parallel);
    let platform = FakePlatform::default().fail_inject_on(candidates[1].clone());
    let fx = fixture(spec, platform, &targets);

    let err = fx.sequencer.run(&targets).await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::ChaosInject);
    assert_eq!(err.target(), Some(&candidates[1]));
    assert!(fx.platform.faulted().is_empty());
    assert_eq!(fx.platform.reverts_of(&candidates[0]), 1);
    assert_eq!(fx.sequencer.state(), SequencerState::Failed);
}

#[tokio::test]
async fn settle_timeout_is_target_scoped() {
    let candidates = pods(2);
    let targets = TargetSet::new(candidates.clone());
    let platform = FakePlatform::default().stuck_on(candidates[0].clone());
    let fx = fixture(fast_spec("stuck"), platform, &targets);

    let err = fx.sequencer.run(&targets).await.unwrap_err();

    match err {
        ChaosError::StatusCheck { ref target, .. } => assert_eq!(target, &candidates[0]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(fx.platform.faulted().is_empty());
}

#[tokio::test]
async fn partial_parallel_revert_failure_is_recorded() {
    let candidates = pods(3);
    let targets = TargetSet::new(candidates.clone());
    let spec = fast_spec("partial-revert").with_mode(ExecutionMode::Parallel);
    let platform = FakePlatform::default().fail_revert_on(candidates[2].clone());
    let fx = fixture(spec, platform, &targets);

    let report = fx.sequencer.run(&targets).await.unwrap();

    assert!(!report.revert_failures.is_empty());
    assert!(report
        .revert_failures
        .iter()
        .all(|failure| failure.target == candidates[2]));
    assert_eq!(fx.ledger.state(&candidates[0]), Some(TargetState::Reverted));
}

#[tokio::test]
async fn revert_failure_on_every_target_fails_the_run() {
    let candidates = pods(2);
    let targets = TargetSet::new(candidates.clone());
    let spec = fast_spec("total-revert").with_mode(ExecutionMode::Parallel);
    let platform = FakePlatform::default()
        .fail_revert_on(candidates[0].clone())
        .fail_revert_on(candidates[1].clone());
    let fx = fixture(spec, platform, &targets);

    let err = fx.sequencer.run(&targets).await.unwrap_err();

    match err {
        ChaosError::ChaosRevert(failures) => assert_eq!(failures.len(), 2),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn revert_is_idempotent() {
    let candidates = pods(1);
    let spec = fast_spec("idempotent");
    let platform = Arc::new(FakePlatform::default());
    let ledger = TargetLedger::new();
    let sink = Arc::new(MemorySink::new());
    let actions = TargetActions::new(&spec, platform.clone(), ledger.clone(), sink.clone(), None);

    actions.inject(&candidates[0]).await.unwrap();
    assert!(actions.revert(&candidates[0]).await.unwrap());
    assert!(!actions.revert(&candidates[0]).await.unwrap());

    assert_eq!(platform.reverts_of(&candidates[0]), 1);
    assert_eq!(
        sink.states_of(&candidates[0]),
        vec![TargetState::Injected, TargetState::Reverted]
    );
}

#[tokio::test]
async fn already_faulted_target_is_not_injected_again() {
    let candidates = pods(1);
    let spec = fast_spec("already-faulted");
    let platform = Arc::new(FakePlatform::default());
    platform.set_state(&candidates[0], r_chaos_core::ResourceState::Faulted);
    let actions = TargetActions::new(
        &spec,
        platform.clone(),
        TargetLedger::new(),
        Arc::new(MemorySink::new()),
        None,
    );

    actions.inject(&candidates[0]).await.unwrap();

    assert_eq!(platform.injections_of(&candidates[0]), 0);
    assert_eq!(
        actions.ledger().state(&candidates[0]),
        Some(TargetState::Injected)
    );
}
