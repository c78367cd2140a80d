//! Mute consistency between the native UI and the audio path, and speaker/
//! audio-session handling

mod common;

use pretty_assertions::assert_eq;

use common::*;
use mobicall_call_core::loopback::{AudioOp, TelephonyOp};
use mobicall_call_core::{
    ActionError, CallDirection, CallId, LifecycleEvent, NativeUiAction,
};

fn muted(call: &StartedCall) -> bool {
    call.controller.snapshot().unwrap().muted
}

#[tokio::test]
async fn test_confirmed_mute_is_applied() {
    let mut call = StartedCall::new(CallDirection::Inbound).await;
    call.establish().await;
    call.drain_events();

    assert_eq!(call.controller.request_mute(true).await, Ok(true));
    assert!(muted(&call));
    assert!(call.harness.telephony.ops().contains(&TelephonyOp::ReflectMute {
        call_id: CallId::new("c1"),
        muted: true,
    }));
    assert_eq!(call.harness.audio.count(&AudioOp::SetMute(true)), 1);

    let events = call.drain_events();
    assert!(events.contains(&LifecycleEvent::MuteChanged {
        call_id: CallId::new("c1"),
        muted: true,
    }));
}

#[tokio::test]
async fn test_failed_reflection_reverts_mute() {
    let mut call = StartedCall::new(CallDirection::Outbound).await;
    call.establish().await;
    call.drain_events();
    call.harness.telephony.fail_next_reflect("call UI unavailable");

    let result = call.controller.request_mute(true).await;
    assert!(matches!(
        result,
        Err(ActionError::NativeUiRequestFailed { .. })
    ));
    assert!(!muted(&call));

    let audio = call.harness.audio.ops();
    let mute_ops: Vec<_> = audio
        .iter()
        .filter(|op| matches!(op, AudioOp::SetMute(_)))
        .collect();
    assert_eq!(mute_ops, vec![&AudioOp::SetMute(true), &AudioOp::SetMute(false)]);

    let events = call.drain_events();
    assert_eq!(action_failures(&events), 1);
    assert!(!events
        .iter()
        .any(|e| matches!(e, LifecycleEvent::MuteChanged { .. })));

    // the call is still up
    assert_eq!(
        call.controller.snapshot().unwrap().status,
        mobicall_call_core::CallStatus::Conversation
    );
}

#[tokio::test]
async fn test_toggle_sequence_with_failures_tracks_confirmed_state() {
    let call = StartedCall::new(CallDirection::Outbound).await;
    call.establish().await;

    assert_eq!(call.controller.toggle_mute().await, Ok(true));
    call.harness.telephony.fail_next_reflect("denied");
    assert!(call.controller.toggle_mute().await.is_err());
    assert!(muted(&call));
    assert_eq!(call.controller.toggle_mute().await, Ok(false));
    assert!(!muted(&call));
    call.harness.telephony.fail_next_reflect("denied");
    assert!(call.controller.toggle_mute().await.is_err());
    assert!(!muted(&call));
}

#[tokio::test]
async fn test_concurrent_mute_requests_settle_on_last() {
    let call = StartedCall::new(CallDirection::Outbound).await;
    call.establish().await;

    let (first, second, third) = tokio::join!(
        call.controller.request_mute(true),
        call.controller.request_mute(false),
        call.controller.request_mute(true),
    );
    assert_eq!(first, Ok(true));
    assert_eq!(third, Ok(true));
    assert_eq!(second, Ok(true));
    assert!(muted(&call));
}

#[tokio::test]
async fn test_native_mute_is_authoritative() {
    let call = StartedCall::new(CallDirection::Inbound).await;
    call.establish().await;

    call.controller
        .native_ui_sender()
        .deliver(NativeUiAction::SetMuted(true));
    assert_eq!(call.controller.request_mute(true).await, Ok(true));
    assert!(muted(&call));
    // already muted natively: nothing to reflect
    assert!(!call
        .harness
        .telephony
        .ops()
        .iter()
        .any(|op| matches!(op, TelephonyOp::ReflectMute { .. })));
}

#[tokio::test]
async fn test_mute_after_finish_fails() {
    let call = StartedCall::new(CallDirection::Inbound).await;
    call.controller.request_hangup();
    call.controller.closed().await;

    assert_eq!(
        call.controller.request_mute(true).await,
        Err(ActionError::CallFinished)
    );
}

#[tokio::test]
async fn test_speaker_toggle_and_audio_session() {
    let mut call = StartedCall::new(CallDirection::Outbound).await;
    call.establish().await;
    call.drain_events();

    call.controller.toggle_speaker();
    call.controller
        .native_ui_sender()
        .deliver(NativeUiAction::AudioSessionDeactivated);
    call.controller.toggle_speaker();
    call.controller.request_hangup();
    call.controller.closed().await;

    let audio = call.harness.audio.ops();
    assert!(audio.contains(&AudioOp::SetSessionActive(true)));
    assert!(audio.contains(&AudioOp::SetSessionActive(false)));
    assert_eq!(call.harness.audio.count(&AudioOp::SetSpeaker(true)), 1);
    assert_eq!(call.harness.audio.count(&AudioOp::SetSpeaker(false)), 1);

    let speaker: Vec<bool> = call
        .drain_events()
        .iter()
        .filter_map(|e| match e {
            LifecycleEvent::SpeakerChanged { enabled, .. } => Some(*enabled),
            _ => None,
        })
        .collect();
    assert_eq!(speaker, vec![true, false]);
    assert!(!call.controller.snapshot().unwrap().speaker);
}
