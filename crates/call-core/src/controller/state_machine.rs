//! Pure call state machine
//!
//! [`CallStateMachine::handle`] consumes one event and returns the effects
//! it requires. It never awaits and never touches a collaborator; the event
//! loop hands the effects to the executor.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::audio::IndicatorSound;
use crate::call::{Call, CallSnapshot, CallStatus, FinishReason, MediaLeg, MediaState};
use crate::error::{ActionError, InvariantViolation};
use crate::events::{CallCommand, CallEvent, Completion, EventSource, MuteReply, TimerKind};
use crate::lifecycle::LifecycleEvent;
use crate::signaling::{RemoteStatus, SignalingAction, SignalingUpdate};
use crate::state_table::{
    Action, EventKind, EventTemplate, Guard, MasterStateTable, NextState, Role, StateKey,
};
use crate::telephony::NativeUiAction;

/// Audio work, applied synchronously by the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCommand {
    ApplyStatus(CallStatus),
    PlayIndicator(IndicatorSound),
    SetMute(bool),
    SetSpeaker(bool),
    SetSessionActive(bool),
}

/// Side effects requested by the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Audio(AudioCommand),
    PresentOutgoing,
    PresentIncoming,
    ReflectMute { seq: u64, muted: bool },
    RequestNativeEnd,
    Signal(SignalingAction),
    ArmTimer(TimerKind),
    CancelTimer(TimerKind),
    Notify(LifecycleEvent),
    /// Tear the call down: stop audio and timers, report the end natively,
    /// send `final_signal` if any and close signaling
    Finish {
        reason: FinishReason,
        final_signal: Option<SignalingAction>,
    },
}

#[derive(Debug)]
struct PendingMute {
    seq: u64,
    muted: bool,
    replies: Vec<MuteReply>,
}

/// Mute bookkeeping: one reflect request in flight, later requests
/// collapse into one queued target
#[derive(Debug, Default)]
struct MuteTracker {
    confirmed: bool,
    in_flight: Option<PendingMute>,
    queued: Option<(bool, Vec<MuteReply>)>,
    next_seq: u64,
}

impl MuteTracker {
    /// State the user will end up with once every request is applied
    fn target(&self) -> bool {
        if let Some((muted, _)) = &self.queued {
            return *muted;
        }
        self.in_flight
            .as_ref()
            .map(|p| p.muted)
            .unwrap_or(self.confirmed)
    }

    fn fail_all(&mut self, error: ActionError) {
        let in_flight = self.in_flight.take().map(|p| p.replies).unwrap_or_default();
        let queued = self.queued.take().map(|(_, r)| r).unwrap_or_default();
        for reply in in_flight.into_iter().chain(queued) {
            let _ = reply.send(Err(error.clone()));
        }
    }
}

/// Interpreter of the master state table for one call
#[derive(Debug)]
pub struct CallStateMachine {
    call: Call,
    table: Arc<MasterStateTable>,
    mute: MuteTracker,
    speaker: bool,
    end_requested: bool,
    resume_pending: bool,
    media_timer_armed: bool,
}

impl CallStateMachine {
    pub fn new(call: Call, table: Arc<MasterStateTable>) -> Self {
        Self {
            call,
            table,
            mute: MuteTracker::default(),
            speaker: false,
            end_requested: false,
            resume_pending: false,
            media_timer_armed: false,
        }
    }

    pub fn call(&self) -> &Call {
        &self.call
    }

    pub fn is_finished(&self) -> bool {
        self.call.is_finished()
    }

    /// Confirmed mute state
    pub fn muted(&self) -> bool {
        self.mute.confirmed
    }

    pub fn speaker(&self) -> bool {
        self.speaker
    }

    pub fn snapshot(&self) -> Option<CallSnapshot> {
        self.call.snapshot(self.mute.confirmed, self.speaker)
    }

    /// Enter the first status of the call
    pub fn start(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        if self.call.is_started() {
            warn!(call_id = %self.call.id(), "Call already started");
            return fx;
        }
        self.apply(EventKind::Start, true, &mut fx);
        fx
    }

    /// Apply one event. Events for a finished call are discarded.
    pub fn handle(&mut self, source: EventSource, event: CallEvent) -> Vec<Effect> {
        let mut fx = Vec::new();

        if self.call.is_finished() || !self.call.is_started() {
            let violation = InvariantViolation::EventAfterDispose {
                call_id: self.call.id().clone(),
                event: event.name(),
            };
            debug!(%violation, "Discarding event");
            event.reject_replies(ActionError::CallFinished);
            return fx;
        }

        debug!(call_id = %self.call.id(), source = ?source, event = %event.name(), "Handling event");
        let is_local = source.is_local();
        match event {
            CallEvent::Signaling(update) => self.on_signaling(update, &mut fx),
            CallEvent::Native(action) => self.on_native(action, &mut fx),
            CallEvent::Command(command) => self.on_command(command, &mut fx),
            CallEvent::Timer { kind, .. } => {
                let event = match kind {
                    TimerKind::NoAnswer => EventKind::NoAnswerTimeout,
                    TimerKind::MediaDisconnect => {
                        self.media_timer_armed = false;
                        EventKind::MediaTimeout
                    }
                    TimerKind::FlushRecovery => EventKind::FlushTimeout,
                    TimerKind::EndConfirm => EventKind::EndConfirmTimeout,
                };
                self.apply(event, is_local, &mut fx);
            }
            CallEvent::Completion(completion) => self.on_completion(completion, &mut fx),
        }
        fx
    }

    fn on_signaling(&mut self, update: SignalingUpdate, fx: &mut Vec<Effect>) {
        let event = match update {
            SignalingUpdate::StatusUpdate { status } => match status {
                RemoteStatus::Ringing => EventKind::RemoteRinging,
                RemoteStatus::Accepted => EventKind::RemoteAccepted,
                RemoteStatus::Paused => EventKind::RemotePaused,
                RemoteStatus::Resumed => EventKind::RemoteResumed,
            },
            SignalingUpdate::MediaUpdate { leg, state } => {
                self.on_media(leg, state, fx);
                return;
            }
            SignalingUpdate::Terminate { rejected: true } => EventKind::RemoteRejected,
            SignalingUpdate::Terminate { rejected: false } => EventKind::RemoteEnded,
            SignalingUpdate::Flush => EventKind::TransportFlush,
            SignalingUpdate::Recovered => EventKind::TransportRecovered,
        };
        self.apply(event, false, fx);
    }

    fn on_native(&mut self, action: NativeUiAction, fx: &mut Vec<Effect>) {
        match action {
            NativeUiAction::Accept => {
                self.apply(EventKind::LocalAccept, true, fx);
            }
            NativeUiAction::End => {
                self.apply(EventKind::LocalHangup, true, fx);
            }
            NativeUiAction::Reset => {
                warn!(call_id = %self.call.id(), "Native telephony layer reset");
                self.apply(EventKind::NativeReset, true, fx);
            }
            NativeUiAction::Start => {
                debug!(call_id = %self.call.id(), "Native layer started the call");
            }
            NativeUiAction::SetMuted(muted) => self.native_mute(muted, fx),
            NativeUiAction::AudioSessionActivated => {
                fx.push(Effect::Audio(AudioCommand::SetSessionActive(true)));
            }
            NativeUiAction::AudioSessionDeactivated => {
                fx.push(Effect::Audio(AudioCommand::SetSessionActive(false)));
            }
        }
    }

    fn on_command(&mut self, command: CallCommand, fx: &mut Vec<Effect>) {
        match command {
            CallCommand::Answer => {
                self.apply(EventKind::LocalAccept, true, fx);
            }
            CallCommand::Hangup => {
                self.apply(EventKind::HangupRequested, true, fx);
            }
            CallCommand::RequestHangup | CallCommand::Dispose => {
                self.apply(EventKind::LocalHangup, true, fx);
            }
            CallCommand::SetMute { muted, reply } => self.request_mute(muted, reply, fx),
            CallCommand::ToggleMute { reply } => {
                let muted = !self.mute.target();
                self.request_mute(muted, reply, fx);
            }
            CallCommand::ToggleSpeaker => {
                self.speaker = !self.speaker;
                fx.push(Effect::Audio(AudioCommand::SetSpeaker(self.speaker)));
                fx.push(Effect::Notify(LifecycleEvent::SpeakerChanged {
                    call_id: self.call.id().clone(),
                    enabled: self.speaker,
                }));
            }
        }
    }

    fn on_completion(&mut self, completion: Completion, fx: &mut Vec<Effect>) {
        match completion {
            Completion::Presented(Ok(())) => {
                fx.push(Effect::Audio(AudioCommand::SetSessionActive(true)));
            }
            Completion::MuteReflected { seq, muted, result } => {
                self.complete_mute(seq, muted, result, fx);
            }
            Completion::EndRequested(Ok(())) => {
                debug!(call_id = %self.call.id(), "Awaiting native end confirmation");
            }
            Completion::EndRequested(Err(error)) => {
                self.action_failed(error, fx);
                self.apply(EventKind::NativeEndFailed, true, fx);
            }
            Completion::Presented(Err(error))
            | Completion::SignalingSent {
                result: Err(error), ..
            } => self.action_failed(error, fx),
            Completion::SignalingSent { action, result: Ok(()) } => {
                debug!(call_id = %self.call.id(), action = action.name(), "Signaling action acknowledged");
            }
            Completion::EndReported(_) => {}
        }
    }

    fn on_media(&mut self, leg: MediaLeg, state: MediaState, fx: &mut Vec<Effect>) {
        let Some(status) = self.call.status() else {
            return;
        };
        if !self.call.tracks_media() {
            let violation = InvariantViolation::MediaUpdateOutsideCall { status };
            debug!(call_id = %self.call.id(), %leg, %state, %violation, "Discarding media update");
            return;
        }

        let old = self.call.set_media_state(leg, state);
        if old == state {
            return;
        }
        info!(call_id = %self.call.id(), %leg, %old, new = %state, "Media leg changed");
        fx.push(Effect::Notify(LifecycleEvent::MediaStateChanged {
            call_id: self.call.id().clone(),
            leg,
            old,
            new: state,
        }));

        match state {
            MediaState::Disconnected => {
                fx.push(Effect::Audio(AudioCommand::PlayIndicator(
                    IndicatorSound::MediaDisconnected,
                )));
                if !self.media_timer_armed {
                    self.media_timer_armed = true;
                    fx.push(Effect::ArmTimer(TimerKind::MediaDisconnect));
                }
            }
            MediaState::Connected => {
                let any_down = [MediaLeg::Caller, MediaLeg::Receptor]
                    .iter()
                    .any(|l| self.call.media_state(*l) == MediaState::Disconnected);
                if self.media_timer_armed && !any_down {
                    self.media_timer_armed = false;
                    fx.push(Effect::CancelTimer(TimerKind::MediaDisconnect));
                }
                if self.call.both_legs_connected() {
                    self.apply(EventKind::MediaBothConnected, false, fx);
                }
            }
            MediaState::Connecting => {}
        }
    }

    /// Look up and apply a table transition; returns whether one was applied
    fn apply(&mut self, event: EventKind, is_local: bool, fx: &mut Vec<Effect>) -> bool {
        let key = StateKey {
            role: Role::from(self.call.direction()),
            state: self.call.status(),
            event,
        };
        let Some(transition) = self.table.get(&key).cloned() else {
            debug!(call_id = %self.call.id(), status = ?key.state, %event, "No transition, ignoring");
            return false;
        };

        if let Some(guard) = transition.guards.iter().find(|g| !self.check_guard(**g)) {
            debug!(call_id = %self.call.id(), status = ?key.state, %event, ?guard, "Guard not satisfied");
            if event == EventKind::RemoteResumed {
                self.resume_pending = true;
            }
            return false;
        }

        let old = self.call.status();
        let next = match transition.next_state {
            Some(NextState::Status(status)) => Some(status),
            Some(NextState::Interrupted) => Some(self.interrupted_status()),
            None => None,
        };
        // media came up while the channel was down
        let connected_while_flushed = old == Some(CallStatus::Flushed)
            && self.call.flushed_from() == Some(CallStatus::Accepted)
            && next == Some(CallStatus::Conversation);
        if let Some(next) = next {
            self.call.set_status(next);
            if next != CallStatus::Paused {
                self.resume_pending = false;
            }
            info!(
                call_id = %self.call.id(),
                old = ?old,
                new = %next,
                %event,
                is_local,
                "Call state transition"
            );
        }
        let current = self.call.status().unwrap_or(CallStatus::Finished);

        let mut final_signal = None;
        let mut finish_reason = None;
        for action in &transition.actions {
            match action {
                Action::PresentOutgoing => fx.push(Effect::PresentOutgoing),
                Action::PresentIncoming => fx.push(Effect::PresentIncoming),
                Action::ApplyAudioProfile => {
                    fx.push(Effect::Audio(AudioCommand::ApplyStatus(current)));
                }
                Action::PlayIndicator(sound) => {
                    fx.push(Effect::Audio(AudioCommand::PlayIndicator(*sound)));
                }
                Action::SendSignaling(signal) if transition.is_terminal() => {
                    final_signal = Some(*signal);
                }
                Action::SendSignaling(signal) => fx.push(Effect::Signal(*signal)),
                Action::ArmTimer(kind) => fx.push(Effect::ArmTimer(*kind)),
                Action::CancelTimer(kind) => {
                    if *kind == TimerKind::MediaDisconnect {
                        self.media_timer_armed = false;
                    }
                    fx.push(Effect::CancelTimer(*kind));
                }
                Action::RequestNativeEnd => {
                    self.end_requested = true;
                    fx.push(Effect::RequestNativeEnd);
                }
                Action::ClearResumePending => self.resume_pending = false,
                Action::Finish(reason) => finish_reason = Some(reason.clone()),
            }
        }

        if connected_while_flushed {
            fx.push(Effect::Audio(AudioCommand::PlayIndicator(
                IndicatorSound::MediaConnected,
            )));
        }

        if let Some(next) = next {
            if transition.publish_events.contains(&EventTemplate::StateChanged) && old != Some(next)
            {
                fx.push(Effect::Notify(LifecycleEvent::StateChanged {
                    call_id: self.call.id().clone(),
                    old,
                    new: next,
                    is_local,
                }));
            }
        }

        if let Some(reason) = finish_reason {
            self.finish(reason, final_signal, fx);
        }
        true
    }

    fn check_guard(&self, guard: Guard) -> bool {
        match guard {
            Guard::BothLegsConnected => self.call.both_legs_connected(),
            Guard::ResumePending => self.resume_pending,
            Guard::EndNotRequested => !self.end_requested,
        }
    }

    /// Status to return to when a flushed channel recovers
    fn interrupted_status(&self) -> CallStatus {
        match self.call.flushed_from() {
            Some(CallStatus::Accepted) if self.call.both_legs_connected() => {
                CallStatus::Conversation
            }
            Some(status) => status,
            None => CallStatus::Flushed,
        }
    }

    fn finish(
        &mut self,
        reason: FinishReason,
        final_signal: Option<SignalingAction>,
        fx: &mut Vec<Effect>,
    ) {
        self.call.mark_finished(reason.clone());
        self.mute.fail_all(ActionError::CallFinished);
        self.call.release_slot();
        info!(call_id = %self.call.id(), %reason, "Call finished");

        fx.push(Effect::Finish {
            reason: reason.clone(),
            final_signal,
        });
        fx.push(Effect::Notify(LifecycleEvent::Finished {
            call_id: self.call.id().clone(),
            reason,
        }));
    }

    fn action_failed(&self, error: ActionError, fx: &mut Vec<Effect>) {
        warn!(call_id = %self.call.id(), error = %error, "Call action failed");
        fx.push(Effect::Notify(LifecycleEvent::ActionFailed {
            call_id: self.call.id().clone(),
            error,
        }));
    }

    fn request_mute(&mut self, muted: bool, reply: Option<MuteReply>, fx: &mut Vec<Effect>) {
        let replies: Vec<MuteReply> = reply.into_iter().collect();
        if self.mute.in_flight.is_some() {
            // latest request wins; earlier callers learn the final outcome
            let mut pending = self.mute.queued.take().map(|(_, r)| r).unwrap_or_default();
            pending.extend(replies);
            self.mute.queued = Some((muted, pending));
            return;
        }
        self.issue_mute(muted, replies, fx);
    }

    fn issue_mute(&mut self, muted: bool, replies: Vec<MuteReply>, fx: &mut Vec<Effect>) {
        if muted == self.mute.confirmed {
            for reply in replies {
                let _ = reply.send(Ok(muted));
            }
            return;
        }

        self.mute.next_seq += 1;
        let seq = self.mute.next_seq;
        fx.push(Effect::Audio(AudioCommand::SetMute(muted)));
        fx.push(Effect::ReflectMute { seq, muted });
        self.mute.in_flight = Some(PendingMute {
            seq,
            muted,
            replies,
        });
    }

    fn complete_mute(
        &mut self,
        seq: u64,
        muted: bool,
        result: Result<(), ActionError>,
        fx: &mut Vec<Effect>,
    ) {
        let Some(pending) = self.mute.in_flight.take_if(|p| p.seq == seq) else {
            debug!(call_id = %self.call.id(), seq, "Stale mute completion");
            return;
        };

        match result {
            Ok(()) => {
                let changed = self.mute.confirmed != muted;
                self.mute.confirmed = muted;
                for reply in pending.replies {
                    let _ = reply.send(Ok(muted));
                }
                if changed {
                    fx.push(Effect::Notify(LifecycleEvent::MuteChanged {
                        call_id: self.call.id().clone(),
                        muted,
                    }));
                }
            }
            Err(error) => {
                fx.push(Effect::Audio(AudioCommand::SetMute(self.mute.confirmed)));
                for reply in pending.replies {
                    let _ = reply.send(Err(error.clone()));
                }
                self.action_failed(error, fx);
            }
        }

        if let Some((next, replies)) = self.mute.queued.take() {
            self.issue_mute(next, replies, fx);
        }
    }

    /// The native UI changed mute on its own; it is authoritative
    fn native_mute(&mut self, muted: bool, fx: &mut Vec<Effect>) {
        if self.mute.in_flight.as_ref().is_some_and(|p| p.muted == muted) {
            debug!(call_id = %self.call.id(), muted, "Native echo of pending mute request");
            return;
        }
        fx.push(Effect::Audio(AudioCommand::SetMute(muted)));
        if self.mute.confirmed != muted {
            self.mute.confirmed = muted;
            fx.push(Effect::Notify(LifecycleEvent::MuteChanged {
                call_id: self.call.id().clone(),
                muted,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{AccessToken, CallDirection, CallId, CallInit, Party};
    use crate::registry::CallSlotRegistry;
    use crate::state_table::MASTER_TABLE;
    use pretty_assertions::assert_eq;
    use tokio::sync::oneshot;

    fn machine(registry: &CallSlotRegistry, direction: CallDirection) -> CallStateMachine {
        let slot = registry.acquire(&CallId::new("c1")).unwrap();
        let call = Call::new(CallInit::new(
            slot,
            direction,
            AccessToken::new("tok1"),
            Party::new("+98912"),
            Party::new("+98935"),
        ));
        CallStateMachine::new(call, MASTER_TABLE.clone())
    }

    fn signal(m: &mut CallStateMachine, update: SignalingUpdate) -> Vec<Effect> {
        m.handle(EventSource::Signaling, CallEvent::Signaling(update))
    }

    fn media(m: &mut CallStateMachine, leg: MediaLeg, state: MediaState) -> Vec<Effect> {
        signal(m, SignalingUpdate::MediaUpdate { leg, state })
    }

    fn native(m: &mut CallStateMachine, action: NativeUiAction) -> Vec<Effect> {
        m.handle(EventSource::NativeUi, CallEvent::Native(action))
    }

    fn status(m: &CallStateMachine) -> Option<CallStatus> {
        m.call().status()
    }

    #[test]
    fn test_inbound_start_effects() {
        let registry = CallSlotRegistry::new();
        let mut m = machine(&registry, CallDirection::Inbound);
        let fx = m.start();

        assert_eq!(
            fx,
            vec![
                Effect::PresentIncoming,
                Effect::Signal(SignalingAction::Ringing),
                Effect::Audio(AudioCommand::ApplyStatus(CallStatus::Ringing)),
                Effect::ArmTimer(TimerKind::NoAnswer),
                Effect::Notify(LifecycleEvent::StateChanged {
                    call_id: CallId::new("c1"),
                    old: None,
                    new: CallStatus::Ringing,
                    is_local: true,
                }),
            ]
        );
        assert!(m.start().is_empty());
    }

    #[test]
    fn test_conversation_requires_both_legs() {
        let registry = CallSlotRegistry::new();
        let mut m = machine(&registry, CallDirection::Inbound);
        m.start();
        native(&mut m, NativeUiAction::Accept);
        assert_eq!(status(&m), Some(CallStatus::Accepted));

        media(&mut m, MediaLeg::Caller, MediaState::Connected);
        assert_eq!(status(&m), Some(CallStatus::Accepted));

        let fx = media(&mut m, MediaLeg::Receptor, MediaState::Connected);
        assert_eq!(status(&m), Some(CallStatus::Conversation));
        assert!(fx.contains(&Effect::Audio(AudioCommand::ApplyStatus(
            CallStatus::Conversation
        ))));
    }

    #[test]
    fn test_media_updates_ignored_while_ringing() {
        let registry = CallSlotRegistry::new();
        let mut m = machine(&registry, CallDirection::Inbound);
        m.start();
        let fx = media(&mut m, MediaLeg::Caller, MediaState::Connected);
        assert!(fx.is_empty());
        assert_eq!(m.call().caller_media_state(), MediaState::Connecting);
    }

    #[test]
    fn test_finish_is_applied_once() {
        let registry = CallSlotRegistry::new();
        let mut m = machine(&registry, CallDirection::Outbound);
        m.start();

        let fx = native(&mut m, NativeUiAction::End);
        let finishes = fx
            .iter()
            .filter(|e| matches!(e, Effect::Finish { .. }))
            .count();
        assert_eq!(finishes, 1);
        assert!(fx.contains(&Effect::Finish {
            reason: FinishReason::LocalHangup,
            final_signal: Some(SignalingAction::Hangup),
        }));
        assert!(registry.is_vacant());

        let fx = signal(&mut m, SignalingUpdate::Terminate { rejected: false });
        assert!(fx.is_empty());
        assert_eq!(m.call().finish_reason(), Some(&FinishReason::LocalHangup));
    }

    #[test]
    fn test_ringing_decline_sends_reject() {
        let registry = CallSlotRegistry::new();
        let mut m = machine(&registry, CallDirection::Inbound);
        m.start();
        let fx = native(&mut m, NativeUiAction::End);
        assert!(fx.contains(&Effect::Finish {
            reason: FinishReason::LocalReject,
            final_signal: Some(SignalingAction::Reject),
        }));
    }

    #[test]
    fn test_remote_ringing_switches_to_ringback() {
        let registry = CallSlotRegistry::new();
        let mut m = machine(&registry, CallDirection::Outbound);
        m.start();
        let fx = signal(
            &mut m,
            SignalingUpdate::StatusUpdate {
                status: RemoteStatus::Ringing,
            },
        );
        assert_eq!(
            fx,
            vec![Effect::Audio(AudioCommand::PlayIndicator(
                IndicatorSound::Ringback
            ))]
        );
        assert_eq!(status(&m), Some(CallStatus::Trying));
    }

    #[test]
    fn test_resume_deferred_until_media_returns() {
        let registry = CallSlotRegistry::new();
        let mut m = machine(&registry, CallDirection::Inbound);
        m.start();
        native(&mut m, NativeUiAction::Accept);
        media(&mut m, MediaLeg::Caller, MediaState::Connected);
        media(&mut m, MediaLeg::Receptor, MediaState::Connected);
        signal(&mut m, SignalingUpdate::StatusUpdate { status: RemoteStatus::Paused });
        assert_eq!(status(&m), Some(CallStatus::Paused));

        media(&mut m, MediaLeg::Caller, MediaState::Disconnected);
        signal(&mut m, SignalingUpdate::StatusUpdate { status: RemoteStatus::Resumed });
        assert_eq!(status(&m), Some(CallStatus::Paused));

        media(&mut m, MediaLeg::Caller, MediaState::Connected);
        assert_eq!(status(&m), Some(CallStatus::Conversation));
    }

    #[test]
    fn test_flush_returns_to_interrupted_status() {
        let registry = CallSlotRegistry::new();
        let mut m = machine(&registry, CallDirection::Outbound);
        m.start();
        signal(&mut m, SignalingUpdate::StatusUpdate { status: RemoteStatus::Accepted });

        let fx = signal(&mut m, SignalingUpdate::Flush);
        assert_eq!(status(&m), Some(CallStatus::Flushed));
        assert!(fx.contains(&Effect::ArmTimer(TimerKind::FlushRecovery)));
        assert!(!fx.iter().any(|e| matches!(e, Effect::Audio(_))));

        let fx = signal(&mut m, SignalingUpdate::Recovered);
        assert_eq!(status(&m), Some(CallStatus::Accepted));
        assert!(fx.contains(&Effect::CancelTimer(TimerKind::FlushRecovery)));
    }

    #[test]
    fn test_media_legs_tracked_while_flushed() {
        let registry = CallSlotRegistry::new();
        let mut m = machine(&registry, CallDirection::Outbound);
        m.start();
        signal(&mut m, SignalingUpdate::StatusUpdate { status: RemoteStatus::Accepted });
        signal(&mut m, SignalingUpdate::Flush);

        let fx = media(&mut m, MediaLeg::Caller, MediaState::Connected);
        assert!(fx.iter().any(|e| matches!(e, Effect::Notify(LifecycleEvent::MediaStateChanged { .. }))));
        media(&mut m, MediaLeg::Receptor, MediaState::Connected);
        assert_eq!(status(&m), Some(CallStatus::Flushed));
        assert!(m.call().both_legs_connected());

        let fx = signal(&mut m, SignalingUpdate::Recovered);
        assert_eq!(status(&m), Some(CallStatus::Conversation));
        assert!(fx.contains(&Effect::Audio(AudioCommand::PlayIndicator(
            IndicatorSound::MediaConnected
        ))));
        assert!(fx.contains(&Effect::Notify(LifecycleEvent::StateChanged {
            call_id: CallId::new("c1"),
            old: Some(CallStatus::Flushed),
            new: CallStatus::Conversation,
            is_local: false,
        })));
    }

    #[test]
    fn test_leg_back_during_flush_disarms_media_timer() {
        let registry = CallSlotRegistry::new();
        let mut m = machine(&registry, CallDirection::Inbound);
        m.start();
        native(&mut m, NativeUiAction::Accept);
        media(&mut m, MediaLeg::Caller, MediaState::Connected);
        media(&mut m, MediaLeg::Receptor, MediaState::Connected);
        let fx = media(&mut m, MediaLeg::Caller, MediaState::Disconnected);
        assert!(fx.contains(&Effect::ArmTimer(TimerKind::MediaDisconnect)));

        signal(&mut m, SignalingUpdate::Flush);
        let fx = media(&mut m, MediaLeg::Caller, MediaState::Connected);
        assert!(fx.contains(&Effect::CancelTimer(TimerKind::MediaDisconnect)));

        signal(&mut m, SignalingUpdate::Recovered);
        assert_eq!(status(&m), Some(CallStatus::Conversation));
    }

    #[test]
    fn test_media_ignored_while_flushed_before_answer() {
        let registry = CallSlotRegistry::new();
        let mut m = machine(&registry, CallDirection::Outbound);
        m.start();
        signal(&mut m, SignalingUpdate::Flush);

        assert!(media(&mut m, MediaLeg::Caller, MediaState::Connected).is_empty());
        assert_eq!(m.call().caller_media_state(), MediaState::Connecting);
        signal(&mut m, SignalingUpdate::Recovered);
        assert_eq!(status(&m), Some(CallStatus::Trying));
    }

    #[test]
    fn test_first_connection_plays_connected_cue() {
        let registry = CallSlotRegistry::new();
        let mut m = machine(&registry, CallDirection::Outbound);
        m.start();
        signal(&mut m, SignalingUpdate::StatusUpdate { status: RemoteStatus::Accepted });
        media(&mut m, MediaLeg::Caller, MediaState::Connected);

        let fx = media(&mut m, MediaLeg::Receptor, MediaState::Connected);
        assert_eq!(status(&m), Some(CallStatus::Conversation));
        assert!(fx.contains(&Effect::Audio(AudioCommand::ApplyStatus(
            CallStatus::Conversation
        ))));
        assert!(fx.contains(&Effect::Audio(AudioCommand::PlayIndicator(
            IndicatorSound::MediaConnected
        ))));
    }

    #[test]
    fn test_mute_failure_reverts_to_confirmed() {
        let registry = CallSlotRegistry::new();
        let mut m = machine(&registry, CallDirection::Outbound);
        m.start();

        let (tx, mut rx) = oneshot::channel();
        let fx = m.handle(
            EventSource::Command,
            CallEvent::Command(CallCommand::ToggleMute { reply: Some(tx) }),
        );
        assert!(fx.contains(&Effect::ReflectMute { seq: 1, muted: true }));
        assert!(!m.muted());

        let fx = m.handle(
            EventSource::Completion,
            CallEvent::Completion(Completion::MuteReflected {
                seq: 1,
                muted: true,
                result: Err(ActionError::native("reflect_mute", "denied")),
            }),
        );
        assert!(fx.contains(&Effect::Audio(AudioCommand::SetMute(false))));
        assert!(!m.muted());
        assert!(matches!(rx.try_recv(), Ok(Err(ActionError::NativeUiRequestFailed { .. }))));
    }

    #[test]
    fn test_queued_mute_requests_collapse() {
        let registry = CallSlotRegistry::new();
        let mut m = machine(&registry, CallDirection::Outbound);
        m.start();

        let toggle = |m: &mut CallStateMachine| {
            m.handle(
                EventSource::Command,
                CallEvent::Command(CallCommand::ToggleMute { reply: None }),
            )
        };
        toggle(&mut m);
        assert!(toggle(&mut m).is_empty());
        assert!(toggle(&mut m).is_empty());

        let fx = m.handle(
            EventSource::Completion,
            CallEvent::Completion(Completion::MuteReflected {
                seq: 1,
                muted: true,
                result: Ok(()),
            }),
        );
        assert!(m.muted());
        // toggled three times: target is muted, already confirmed
        assert!(!fx.iter().any(|e| matches!(e, Effect::ReflectMute { .. })));
    }
}
