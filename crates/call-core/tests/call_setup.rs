//! Setup, start and cancellation behaviour

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use common::*;
use mobicall_call_core::loopback::{LoopbackHarness, LoopbackInitiator, StaticCredentials};
use mobicall_call_core::{
    Call, CallDirection, CallSlotRegistry, CallStatus, ControllerPhase, RetryConfig,
    SessionSetupFlow, SetupError, SetupTrigger, SignalingUpdate,
};

fn setup_flow(registry: &CallSlotRegistry) -> SessionSetupFlow {
    SessionSetupFlow::new(
        config(),
        registry.clone(),
        Arc::new(StaticCredentials::new(Some("api".into()))),
        Arc::new(LoopbackInitiator::new()),
    )
}

#[tokio::test]
async fn test_second_trigger_rejected_while_call_active() {
    let registry = CallSlotRegistry::new();
    let setup = setup_flow(&registry);
    let harness = LoopbackHarness::new();
    let controller = controller(&harness, config());

    let init = setup.resolve(SetupTrigger::push(INBOUND_PUSH)).await.unwrap();
    controller.start(Call::new(init)).await.unwrap();
    let before = controller.snapshot().unwrap();

    let err = setup
        .resolve(SetupTrigger::dial("+98913"))
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::CallAlreadyActive { .. }));
    let err = setup
        .resolve(SetupTrigger::push(INBOUND_PUSH))
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::CallAlreadyActive { .. }));

    let after = controller.snapshot().unwrap();
    assert_eq!(before.status, after.status);
    assert_eq!(before.id, after.id);

    controller.request_hangup();
    controller.closed().await;
    assert!(registry.is_vacant());
    assert!(setup.resolve(SetupTrigger::dial("+98913")).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_push_during_slow_dial_is_rejected() {
    let registry = CallSlotRegistry::new();
    let initiator = Arc::new(LoopbackInitiator::new());
    initiator.respond_with("out-1", "tok-out");
    initiator.respond_after(Duration::from_millis(50));
    let setup = SessionSetupFlow::new(
        config(),
        registry.clone(),
        Arc::new(StaticCredentials::new(Some("api".into()))),
        initiator.clone(),
    );

    let (dial, push) = tokio::join!(setup.resolve(SetupTrigger::dial("+98913")), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        setup.resolve(SetupTrigger::push(INBOUND_PUSH)).await
    });

    let err = push.unwrap_err();
    assert!(matches!(err, SetupError::CallAlreadyActive { .. }));
    assert_eq!(initiator.requests().len(), 1);

    let harness = LoopbackHarness::new();
    let controller = controller(&harness, config());
    controller.start(Call::new(dial.unwrap())).await.unwrap();
    assert_eq!(controller.call_id(), Some(mobicall_call_core::CallId::new("out-1")));
    assert_eq!(registry.active(), Some(mobicall_call_core::CallId::new("out-1")));

    controller.request_hangup();
    controller.closed().await;
    assert!(registry.is_vacant());
}

#[tokio::test]
async fn test_controller_runs_only_one_call() {
    let registry = CallSlotRegistry::new();
    let harness = LoopbackHarness::new();
    let controller = controller(&harness, config());
    controller
        .start(new_call(&registry, "c1", CallDirection::Inbound))
        .await
        .unwrap();

    let other = CallSlotRegistry::new();
    let err = controller
        .start(new_call(&other, "c2", CallDirection::Outbound))
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::CallAlreadyActive { .. }));
    assert!(other.is_vacant());
    assert_eq!(controller.phase(), ControllerPhase::Running);
}

#[tokio::test]
async fn test_rejected_handshake_is_unreachable() {
    let registry = CallSlotRegistry::new();
    let harness = LoopbackHarness::new();
    harness.signaling.reject_next_open();
    let controller = controller(&harness, config());

    let err = controller
        .start(new_call(&registry, "c1", CallDirection::Outbound))
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::UnreachableSignalingEndpoint { .. }));
    assert_eq!(harness.signaling.open_requests().len(), 1);
    assert!(registry.is_vacant());
    assert_eq!(harness.telephony.presented_count(), 0);
    assert!(controller.snapshot().is_none());
    assert_eq!(controller.phase(), ControllerPhase::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_handshake_retried_on_connection_error() {
    let registry = CallSlotRegistry::new();
    let harness = LoopbackHarness::new();
    harness.signaling.fail_next_open();
    harness.signaling.fail_next_open();
    let controller = controller(&harness, config());

    controller
        .start(new_call(&registry, "c1", CallDirection::Outbound))
        .await
        .unwrap();
    assert_eq!(harness.signaling.open_requests().len(), 3);
    assert_eq!(controller.snapshot().unwrap().status, CallStatus::Trying);
}

#[tokio::test(start_paused = true)]
async fn test_handshake_gives_up_after_retries() {
    let registry = CallSlotRegistry::new();
    let harness = LoopbackHarness::new();
    for _ in 0..3 {
        harness.signaling.fail_next_open();
    }
    let controller = controller(
        &harness,
        config().with_signaling_retry(RetryConfig {
            max_attempts: 3,
            use_jitter: false,
            ..RetryConfig::default()
        }),
    );

    let err = controller
        .start(new_call(&registry, "c1", CallDirection::Outbound))
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::UnreachableSignalingEndpoint { .. }));
    assert!(registry.is_vacant());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_handshake_times_out() {
    let registry = CallSlotRegistry::new();
    let harness = LoopbackHarness::new();
    harness.signaling.stall_open();
    let controller = controller(&harness, config());

    let started = tokio::time::Instant::now();
    let err = controller
        .start(new_call(&registry, "c1", CallDirection::Inbound))
        .await
        .unwrap_err();
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(matches!(err, SetupError::UnreachableSignalingEndpoint { .. }));
    assert!(registry.is_vacant());
}

#[tokio::test(start_paused = true)]
async fn test_hangup_during_handshake_cancels_start() {
    let registry = CallSlotRegistry::new();
    let harness = LoopbackHarness::new();
    harness.signaling.stall_open();
    let controller = controller(&harness, config());

    let (result, _) = tokio::join!(
        controller.start(new_call(&registry, "c1", CallDirection::Inbound)),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            controller.hangup();
        }
    );

    assert_eq!(result.unwrap_err(), SetupError::Cancelled);
    assert!(registry.is_vacant());
    assert!(controller.snapshot().is_none());
    assert_eq!(controller.phase(), ControllerPhase::Closed);
    assert_eq!(harness.telephony.presented_count(), 0);
    assert!(harness.signaling.sent().is_empty());
    controller.closed().await;
}

#[tokio::test]
async fn test_remote_terminate_before_start_cancels() {
    let registry = CallSlotRegistry::new();
    let harness = LoopbackHarness::new();
    let controller = controller(&harness, config());

    controller
        .signaling_sender()
        .deliver(SignalingUpdate::Terminate { rejected: false });
    let err = controller
        .start(new_call(&registry, "c1", CallDirection::Inbound))
        .await
        .unwrap_err();

    assert_eq!(err, SetupError::Cancelled);
    assert!(registry.is_vacant());
    assert_eq!(harness.telephony.presented_count(), 0);
}

#[tokio::test]
async fn test_dispose_before_start() {
    let registry = CallSlotRegistry::new();
    let harness = LoopbackHarness::new();
    let controller = controller(&harness, config());

    controller.dispose();
    controller.dispose();
    controller.closed().await;

    let err = controller
        .start(new_call(&registry, "c1", CallDirection::Inbound))
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::CallAlreadyActive { .. }));
    assert!(registry.is_vacant());
    assert_eq!(controller.request_mute(true).await, Err(mobicall_call_core::ActionError::CallFinished));
}

#[tokio::test]
async fn test_dialed_call_starts_outbound() {
    let registry = CallSlotRegistry::new();
    let setup = setup_flow(&registry);
    let harness = LoopbackHarness::new();
    let controller = controller(&harness, config());

    let init = setup.resolve(SetupTrigger::dial("+98913")).await.unwrap();
    controller.start(Call::new(init)).await.unwrap();

    let snapshot = controller.snapshot().unwrap();
    assert_eq!(snapshot.direction, CallDirection::Outbound);
    assert_eq!(snapshot.status, CallStatus::Trying);
    assert_eq!(snapshot.receptor.handle, "+98913");
    assert_eq!(
        harness.signaling.open_requests()[0].remote_handle,
        "+98913"
    );
}
