//! Call event source
//!
//! Every input to a call (remote signaling, native UI callbacks, local
//! commands, timers and completions of asynchronous requests) is normalized
//! into a [`CallEvent`] and pushed onto one queue that only the controller's
//! event loop reads. Producers get cheap cloneable senders, one per source;
//! each sender stamps events with a receive time and a per-source sequence
//! number so delivery order within a source is preserved. Nothing here makes
//! decisions about the call.

use std::fmt;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::call::CallId;
use crate::error::{ActionError, ActionResult, InvariantViolation, SignalingError};
use crate::signaling::{SignalingAction, SignalingUpdate};
use crate::telephony::NativeUiAction;

/// Reply channel for mute commands; resolves with the confirmed mute state
pub type MuteReply = oneshot::Sender<ActionResult<bool>>;

/// Where an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    Signaling,
    NativeUi,
    Command,
    Timer,
    Completion,
}

impl EventSource {
    /// Whether the event originated on this device
    pub fn is_local(&self) -> bool {
        !matches!(self, EventSource::Signaling)
    }
}

/// Timers owned by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// trying/ringing without an answer
    NoAnswer,
    /// a media leg stays disconnected
    MediaDisconnect,
    /// flushed without recovery
    FlushRecovery,
    /// native layer has not confirmed an end request
    EndConfirm,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimerKind::NoAnswer => "no_answer",
            TimerKind::MediaDisconnect => "media_disconnect",
            TimerKind::FlushRecovery => "flush_recovery",
            TimerKind::EndConfirm => "end_confirm",
        };
        write!(f, "{}", name)
    }
}

/// Commands issued by the UI layer through the controller
#[derive(Debug)]
pub enum CallCommand {
    /// Answer a ringing inbound call from the app UI
    Answer,
    /// End the call through the native UI, falling back to a local hangup
    Hangup,
    /// End the call locally right away
    RequestHangup,
    SetMute {
        muted: bool,
        reply: Option<MuteReply>,
    },
    ToggleMute {
        reply: Option<MuteReply>,
    },
    ToggleSpeaker,
    /// Tear the call down and stop the event loop
    Dispose,
}

/// Outcome of an asynchronous request, re-injected as an event
#[derive(Debug, Clone)]
pub enum Completion {
    /// present_outgoing / present_incoming finished
    Presented(ActionResult<()>),
    /// reflect_mute for request `seq` finished
    MuteReflected {
        seq: u64,
        muted: bool,
        result: ActionResult<()>,
    },
    /// request_end finished
    EndRequested(ActionResult<()>),
    /// A non-terminal signaling action finished
    SignalingSent {
        action: SignalingAction,
        result: ActionResult<()>,
    },
    /// report_ended finished; only ever seen after the call is over
    EndReported(ActionResult<()>),
}

/// One normalized input to the call state machine
#[derive(Debug)]
pub enum CallEvent {
    Signaling(SignalingUpdate),
    Native(NativeUiAction),
    Command(CallCommand),
    Timer { kind: TimerKind, generation: u64 },
    Completion(Completion),
}

impl CallEvent {
    /// Short name for logs
    pub fn name(&self) -> String {
        match self {
            CallEvent::Signaling(update) => match update {
                SignalingUpdate::StatusUpdate { status } => format!("signaling:{:?}", status),
                SignalingUpdate::MediaUpdate { leg, state } => {
                    format!("signaling:media:{}:{}", leg, state)
                }
                SignalingUpdate::Terminate { rejected } => {
                    format!("signaling:terminate(rejected={})", rejected)
                }
                SignalingUpdate::Flush => "signaling:flush".to_string(),
                SignalingUpdate::Recovered => "signaling:recovered".to_string(),
            },
            CallEvent::Native(action) => format!("native:{}", action),
            CallEvent::Command(command) => match command {
                CallCommand::Answer => "command:answer".to_string(),
                CallCommand::Hangup => "command:hangup".to_string(),
                CallCommand::RequestHangup => "command:request_hangup".to_string(),
                CallCommand::SetMute { muted, .. } => format!("command:set_mute({})", muted),
                CallCommand::ToggleMute { .. } => "command:toggle_mute".to_string(),
                CallCommand::ToggleSpeaker => "command:toggle_speaker".to_string(),
                CallCommand::Dispose => "command:dispose".to_string(),
            },
            CallEvent::Timer { kind, .. } => format!("timer:{}", kind),
            CallEvent::Completion(completion) => match completion {
                Completion::Presented(_) => "completion:presented".to_string(),
                Completion::MuteReflected { seq, .. } => format!("completion:mute_reflected#{}", seq),
                Completion::EndRequested(_) => "completion:end_requested".to_string(),
                Completion::SignalingSent { action, .. } => {
                    format!("completion:signaling:{}", action.name())
                }
                Completion::EndReported(_) => "completion:end_reported".to_string(),
            },
        }
    }

    /// Whether the event ends the call (or a setup in flight) no matter the status
    pub fn is_hangup_equivalent(&self) -> bool {
        matches!(
            self,
            CallEvent::Signaling(SignalingUpdate::Terminate { .. })
                | CallEvent::Native(NativeUiAction::End)
                | CallEvent::Native(NativeUiAction::Reset)
                | CallEvent::Command(CallCommand::Hangup)
                | CallEvent::Command(CallCommand::RequestHangup)
                | CallEvent::Command(CallCommand::Dispose)
        )
    }

    /// Resolve any reply channel carried by the event with `error`
    pub(crate) fn reject_replies(self, error: ActionError) {
        if let CallEvent::Command(
            CallCommand::SetMute { reply, .. } | CallCommand::ToggleMute { reply },
        ) = self
        {
            if let Some(reply) = reply {
                let _ = reply.send(Err(error));
            }
        }
    }
}

/// A [`CallEvent`] stamped by its sender
#[derive(Debug)]
pub struct SourcedEvent {
    pub source: EventSource,
    /// Position within `source`, starting at 1
    pub seq: u64,
    pub received_at: DateTime<Utc>,
    pub event: CallEvent,
}

pub(crate) type EventReceiver = mpsc::UnboundedReceiver<SourcedEvent>;

/// Sender for one source; assigns sequence numbers under a lock so that
/// sequence order and queue order agree even with concurrent producers.
#[derive(Clone)]
pub(crate) struct SourceSender {
    source: EventSource,
    tx: mpsc::UnboundedSender<SourcedEvent>,
    seq: Arc<Mutex<u64>>,
    call_id: Arc<OnceLock<CallId>>,
}

impl SourceSender {
    /// Enqueue an event; returns false when the call is gone and the event was dropped
    pub(crate) fn send(&self, event: CallEvent) -> bool {
        let mut seq = self.seq.lock();
        *seq += 1;
        let sourced = SourcedEvent {
            source: self.source,
            seq: *seq,
            received_at: Utc::now(),
            event,
        };

        match self.tx.send(sourced) {
            Ok(()) => true,
            Err(mpsc::error::SendError(rejected)) => {
                let violation = InvariantViolation::EventAfterDispose {
                    call_id: self.call_id(),
                    event: rejected.event.name(),
                };
                debug!(source = ?self.source, %violation, "Discarding event");
                rejected.event.reject_replies(ActionError::CallFinished);
                false
            }
        }
    }

    fn call_id(&self) -> CallId {
        self.call_id
            .get()
            .cloned()
            .unwrap_or_else(|| CallId::new("<unstarted>"))
    }
}

impl fmt::Debug for SourceSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceSender")
            .field("source", &self.source)
            .field("call_id", &self.call_id.get())
            .finish()
    }
}

/// Handed to the signaling transport; delivers remote notifications
#[derive(Debug, Clone)]
pub struct SignalingSender {
    inner: SourceSender,
}

impl SignalingSender {
    pub fn deliver(&self, update: SignalingUpdate) -> bool {
        self.inner.send(CallEvent::Signaling(update))
    }

    /// Parse and deliver a raw channel message.
    ///
    /// A frame keyed by a different call than the one this queue is bound to
    /// is dropped and `Ok(false)` returned.
    pub fn deliver_json(&self, raw: &str) -> Result<bool, SignalingError> {
        let (call_id, update) = SignalingUpdate::from_frame(raw)?;
        if let (Some(frame_call), Some(bound)) = (call_id.as_ref(), self.inner.call_id.get()) {
            if frame_call != bound {
                debug!(call_id = %bound, frame_call_id = %frame_call, "Dropping signaling frame for another call");
                return Ok(false);
            }
        }
        Ok(self.deliver(update))
    }
}

/// Handed to the native telephony adapter; delivers UI callbacks
#[derive(Debug, Clone)]
pub struct NativeUiSender {
    inner: SourceSender,
}

impl NativeUiSender {
    pub fn deliver(&self, action: NativeUiAction) -> bool {
        self.inner.send(CallEvent::Native(action))
    }
}

/// The single event queue of one call
pub struct CallEventSource {
    rx: Option<EventReceiver>,
    call_id: Arc<OnceLock<CallId>>,
    signaling: SourceSender,
    native: SourceSender,
    command: SourceSender,
    timer: SourceSender,
    completion: SourceSender,
}

impl CallEventSource {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let call_id = Arc::new(OnceLock::new());
        let sender = |source| SourceSender {
            source,
            tx: tx.clone(),
            seq: Arc::new(Mutex::new(0)),
            call_id: call_id.clone(),
        };

        Self {
            signaling: sender(EventSource::Signaling),
            native: sender(EventSource::NativeUi),
            command: sender(EventSource::Command),
            timer: sender(EventSource::Timer),
            completion: sender(EventSource::Completion),
            rx: Some(rx),
            call_id,
        }
    }

    /// Attach the queue to a call id for diagnostics; only the first bind sticks
    pub fn bind(&self, call_id: &CallId) {
        let _ = self.call_id.set(call_id.clone());
    }

    pub fn signaling_sender(&self) -> SignalingSender {
        SignalingSender {
            inner: self.signaling.clone(),
        }
    }

    pub fn native_ui_sender(&self) -> NativeUiSender {
        NativeUiSender {
            inner: self.native.clone(),
        }
    }

    pub(crate) fn sender(&self, source: EventSource) -> SourceSender {
        match source {
            EventSource::Signaling => self.signaling.clone(),
            EventSource::NativeUi => self.native.clone(),
            EventSource::Command => self.command.clone(),
            EventSource::Timer => self.timer.clone(),
            EventSource::Completion => self.completion.clone(),
        }
    }

    /// The consumer side; can be taken once
    pub(crate) fn take_receiver(&mut self) -> Option<EventReceiver> {
        self.rx.take()
    }
}

impl Default for CallEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallEventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallEventSource")
            .field("call_id", &self.call_id.get())
            .field("receiver_taken", &self.rx.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{MediaLeg, MediaState};
    use crate::signaling::RemoteStatus;

    #[tokio::test]
    async fn test_sequence_numbers_are_per_source() {
        let mut source = CallEventSource::new();
        let mut rx = source.take_receiver().expect("Should have a receiver");

        let signaling = source.signaling_sender();
        let native = source.native_ui_sender();
        signaling.deliver(SignalingUpdate::StatusUpdate {
            status: RemoteStatus::Ringing,
        });
        native.deliver(NativeUiAction::Accept);
        signaling.deliver(SignalingUpdate::MediaUpdate {
            leg: MediaLeg::Caller,
            state: MediaState::Connected,
        });

        let first = rx.recv().await.expect("Should have first event");
        let second = rx.recv().await.expect("Should have second event");
        let third = rx.recv().await.expect("Should have third event");

        assert_eq!((first.source, first.seq), (EventSource::Signaling, 1));
        assert_eq!((second.source, second.seq), (EventSource::NativeUi, 1));
        assert_eq!((third.source, third.seq), (EventSource::Signaling, 2));
        assert!(first.received_at <= third.received_at);
    }

    #[tokio::test]
    async fn test_events_after_receiver_dropped_are_discarded() {
        let mut source = CallEventSource::new();
        source.bind(&CallId::new("c1"));
        drop(source.take_receiver());

        assert!(!source.native_ui_sender().deliver(NativeUiAction::End));
    }

    #[tokio::test]
    async fn test_mute_reply_resolved_when_call_gone() {
        let mut source = CallEventSource::new();
        drop(source.take_receiver());

        let (tx, rx) = oneshot::channel();
        let sent = source.sender(EventSource::Command).send(CallEvent::Command(
            CallCommand::ToggleMute { reply: Some(tx) },
        ));
        assert!(!sent);
        assert_eq!(rx.await.expect("Should have a reply"), Err(ActionError::CallFinished));
    }

    #[test]
    fn test_deliver_json_rejects_garbage() {
        let source = CallEventSource::new();
        let err = source.signaling_sender().deliver_json("not json").unwrap_err();
        assert!(matches!(err, SignalingError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_deliver_json_drops_frames_for_other_calls() {
        let mut source = CallEventSource::new();
        source.bind(&CallId::new("c1"));
        let mut rx = source.take_receiver().expect("Should have a receiver");
        let signaling = source.signaling_sender();

        assert_eq!(
            signaling.deliver_json(r#"{"type":"terminate","callId":"c2"}"#),
            Ok(false)
        );
        assert_eq!(
            signaling.deliver_json(r#"{"type":"flush","callId":"c1"}"#),
            Ok(true)
        );
        assert_eq!(signaling.deliver_json(r#"{"type":"recovered"}"#), Ok(true));

        let first = rx.recv().await.expect("Should have first event");
        let second = rx.recv().await.expect("Should have second event");
        assert_eq!(first.event.name(), CallEvent::Signaling(SignalingUpdate::Flush).name());
        assert_eq!(
            second.event.name(),
            CallEvent::Signaling(SignalingUpdate::Recovered).name()
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_hangup_equivalents() {
        assert!(CallEvent::Native(NativeUiAction::End).is_hangup_equivalent());
        assert!(
            CallEvent::Signaling(SignalingUpdate::Terminate { rejected: true })
                .is_hangup_equivalent()
        );
        assert!(!CallEvent::Native(NativeUiAction::Accept).is_hangup_equivalent());
        assert!(!CallEvent::Signaling(SignalingUpdate::Flush).is_hangup_equivalent());
    }
}
