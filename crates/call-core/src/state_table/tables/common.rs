use crate::audio::IndicatorSound;
use crate::call::{CallStatus, FinishReason};
use crate::events::TimerKind;
use crate::signaling::SignalingAction;
use crate::state_table::{
    Action, EventKind, EventTemplate, Guard, NextState, Role, StateTableBuilder, Transition,
};

/// Transitions shared by both directions
pub fn add_common_transitions(builder: &mut StateTableBuilder) {
    add_media_transitions(builder);
    add_hold_transitions(builder);
    add_flush_transitions(builder);
    add_termination_transitions(builder);
}

fn add_media_transitions(builder: &mut StateTableBuilder) {
    // Accepted -> Conversation once both legs are up
    builder.add_transition(
        Role::Both,
        CallStatus::Accepted,
        EventKind::MediaBothConnected,
        Transition::to(
            CallStatus::Conversation,
            vec![
                Action::ApplyAudioProfile,
                Action::PlayIndicator(IndicatorSound::MediaConnected),
            ],
        ),
    );

    // Legs came back during a conversation
    builder.add_transition(
        Role::Both,
        CallStatus::Conversation,
        EventKind::MediaBothConnected,
        Transition::stay(vec![Action::PlayIndicator(IndicatorSound::MediaConnected)]),
    );

    builder.add_transitions(
        Role::Both,
        &[
            CallStatus::Accepted,
            CallStatus::Conversation,
            CallStatus::Paused,
            CallStatus::Flushed,
        ],
        EventKind::MediaTimeout,
        Transition::to(
            CallStatus::Finished,
            vec![
                Action::SendSignaling(SignalingAction::Hangup),
                Action::Finish(FinishReason::MediaTimeout),
            ],
        ),
    );
}

fn add_hold_transitions(builder: &mut StateTableBuilder) {
    // Conversation -> Paused
    builder.add_transition(
        Role::Both,
        CallStatus::Conversation,
        EventKind::RemotePaused,
        Transition::to(CallStatus::Paused, vec![Action::ApplyAudioProfile]),
    );

    // Paused -> Conversation, only with both legs up
    builder.add_transition(
        Role::Both,
        CallStatus::Paused,
        EventKind::RemoteResumed,
        Transition::to(
            CallStatus::Conversation,
            vec![Action::ClearResumePending, Action::ApplyAudioProfile],
        )
        .guarded(Guard::BothLegsConnected),
    );

    // Deferred resume applied once media is back
    builder.add_transition(
        Role::Both,
        CallStatus::Paused,
        EventKind::MediaBothConnected,
        Transition::to(
            CallStatus::Conversation,
            vec![Action::ClearResumePending, Action::ApplyAudioProfile],
        )
        .guarded(Guard::ResumePending),
    );
}

fn add_flush_transitions(builder: &mut StateTableBuilder) {
    // Any live status -> Flushed; audio is left alone
    builder.add_wildcard(
        Role::Both,
        EventKind::TransportFlush,
        Transition::to(
            CallStatus::Flushed,
            vec![Action::ArmTimer(TimerKind::FlushRecovery)],
        ),
    );

    // A second flush while flushed changes nothing
    builder.add_transition(
        Role::Both,
        CallStatus::Flushed,
        EventKind::TransportFlush,
        Transition::stay(vec![]),
    );

    // Flushed -> interrupted status
    builder.add_transition(
        Role::Both,
        CallStatus::Flushed,
        EventKind::TransportRecovered,
        Transition {
            guards: vec![],
            actions: vec![
                Action::CancelTimer(TimerKind::FlushRecovery),
                Action::ApplyAudioProfile,
            ],
            next_state: Some(NextState::Interrupted),
            publish_events: vec![EventTemplate::StateChanged],
        },
    );

    builder.add_transition(
        Role::Both,
        CallStatus::Flushed,
        EventKind::FlushTimeout,
        Transition::to(
            CallStatus::Finished,
            vec![
                Action::SendSignaling(SignalingAction::Hangup),
                Action::Finish(FinishReason::SignalingLost),
            ],
        ),
    );
}

fn add_termination_transitions(builder: &mut StateTableBuilder) {
    let finish = |signal: Option<SignalingAction>, reason: FinishReason| {
        let mut actions = Vec::new();
        if let Some(signal) = signal {
            actions.push(Action::SendSignaling(signal));
        }
        actions.push(Action::Finish(reason));
        Transition::to(CallStatus::Finished, actions)
    };

    builder.add_wildcard(
        Role::Both,
        EventKind::RemoteEnded,
        finish(None, FinishReason::RemoteEnded),
    );
    builder.add_wildcard(
        Role::Both,
        EventKind::RemoteRejected,
        finish(None, FinishReason::RemoteRejected),
    );
    builder.add_wildcard(
        Role::Both,
        EventKind::LocalHangup,
        finish(Some(SignalingAction::Hangup), FinishReason::LocalHangup),
    );
    builder.add_wildcard(
        Role::Both,
        EventKind::NativeReset,
        finish(Some(SignalingAction::Hangup), FinishReason::LocalHangup),
    );
    builder.add_wildcard(
        Role::Both,
        EventKind::NativeEndFailed,
        finish(Some(SignalingAction::Hangup), FinishReason::LocalFallback),
    );
    builder.add_wildcard(
        Role::Both,
        EventKind::EndConfirmTimeout,
        finish(Some(SignalingAction::Hangup), FinishReason::LocalFallback),
    );

    // UI hangup: ask the native layer, confirm or fall back later
    builder.add_wildcard(
        Role::Both,
        EventKind::HangupRequested,
        Transition::stay(vec![
            Action::RequestNativeEnd,
            Action::ArmTimer(TimerKind::EndConfirm),
        ])
        .guarded(Guard::EndNotRequested),
    );
}
