use crate::audio::IndicatorSound;
use crate::call::{CallStatus, FinishReason};
use crate::events::TimerKind;
use crate::signaling::SignalingAction;
use crate::state_table::{Action, EventKind, Role, StateTableBuilder, Transition};

/// Transitions specific to calls placed from this device
pub fn add_outbound_transitions(builder: &mut StateTableBuilder) {
    // (init) -> Trying
    builder.add_initial(
        Role::Outbound,
        Transition::to(
            CallStatus::Trying,
            vec![
                Action::PresentOutgoing,
                Action::ApplyAudioProfile,
                Action::ArmTimer(TimerKind::NoAnswer),
            ],
        ),
    );

    // Remote alerting: switch to ringback, status unchanged
    builder.add_transition(
        Role::Outbound,
        CallStatus::Trying,
        EventKind::RemoteRinging,
        Transition::stay(vec![Action::PlayIndicator(IndicatorSound::Ringback)]),
    );

    // Trying -> Accepted
    builder.add_transition(
        Role::Outbound,
        CallStatus::Trying,
        EventKind::RemoteAccepted,
        Transition::to(
            CallStatus::Accepted,
            vec![
                Action::CancelTimer(TimerKind::NoAnswer),
                Action::ApplyAudioProfile,
            ],
        ),
    );

    // Trying -> Finished: nobody answered
    builder.add_transitions(
        Role::Outbound,
        &[CallStatus::Trying, CallStatus::Flushed],
        EventKind::NoAnswerTimeout,
        Transition::to(
            CallStatus::Finished,
            vec![
                Action::SendSignaling(SignalingAction::Hangup),
                Action::Finish(FinishReason::NoAnswer),
            ],
        ),
    );
}
