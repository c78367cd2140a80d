use crate::call::{CallStatus, FinishReason};
use crate::events::TimerKind;
use crate::signaling::SignalingAction;
use crate::state_table::{Action, EventKind, Role, StateTableBuilder, Transition};

/// Transitions specific to calls delivered to this device
pub fn add_inbound_transitions(builder: &mut StateTableBuilder) {
    // (init) -> Ringing
    builder.add_initial(
        Role::Inbound,
        Transition::to(
            CallStatus::Ringing,
            vec![
                Action::PresentIncoming,
                Action::SendSignaling(SignalingAction::Ringing),
                Action::ApplyAudioProfile,
                Action::ArmTimer(TimerKind::NoAnswer),
            ],
        ),
    );

    // Ringing -> Accepted
    builder.add_transition(
        Role::Inbound,
        CallStatus::Ringing,
        EventKind::LocalAccept,
        Transition::to(
            CallStatus::Accepted,
            vec![
                Action::CancelTimer(TimerKind::NoAnswer),
                Action::SendSignaling(SignalingAction::Accept),
                Action::ApplyAudioProfile,
            ],
        ),
    );

    // Declining while ringing is a reject, not a hangup
    let reject = |reason: FinishReason| {
        Transition::to(
            CallStatus::Finished,
            vec![
                Action::SendSignaling(SignalingAction::Reject),
                Action::Finish(reason),
            ],
        )
    };
    builder.add_transition(
        Role::Inbound,
        CallStatus::Ringing,
        EventKind::LocalHangup,
        reject(FinishReason::LocalReject),
    );
    for event in [EventKind::NativeEndFailed, EventKind::EndConfirmTimeout] {
        builder.add_transition(
            Role::Inbound,
            CallStatus::Ringing,
            event,
            reject(FinishReason::LocalFallback),
        );
    }
    builder.add_transitions(
        Role::Inbound,
        &[CallStatus::Ringing, CallStatus::Flushed],
        EventKind::NoAnswerTimeout,
        reject(FinishReason::NoAnswer),
    );
}
