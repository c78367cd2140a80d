//! Lifecycle notifications for the UI layer
//!
//! Two delivery paths exist for the same [`LifecycleEvent`]s:
//!
//! - a [`CallLifecycleListener`] registered on the controller, called inline
//!   from the event loop (implementations must not block)
//! - a `tokio::sync::broadcast` stream from
//!   [`CallSessionController::subscribe`](crate::controller::CallSessionController::subscribe)

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::call::{CallId, CallStatus, FinishReason, MediaLeg, MediaState};
use crate::error::ActionError;

/// Something the UI may want to render
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    StateChanged {
        call_id: CallId,
        /// `None` for the first status of a call
        old: Option<CallStatus>,
        new: CallStatus,
        /// Caused by this device rather than the remote side
        is_local: bool,
    },
    MediaStateChanged {
        call_id: CallId,
        leg: MediaLeg,
        old: MediaState,
        new: MediaState,
    },
    /// Confirmed mute state changed
    MuteChanged { call_id: CallId, muted: bool },
    SpeakerChanged { call_id: CallId, enabled: bool },
    /// A mid-call request failed; the call goes on
    ActionFailed { call_id: CallId, error: ActionError },
    Finished { call_id: CallId, reason: FinishReason },
}

impl LifecycleEvent {
    pub fn call_id(&self) -> &CallId {
        match self {
            LifecycleEvent::StateChanged { call_id, .. }
            | LifecycleEvent::MediaStateChanged { call_id, .. }
            | LifecycleEvent::MuteChanged { call_id, .. }
            | LifecycleEvent::SpeakerChanged { call_id, .. }
            | LifecycleEvent::ActionFailed { call_id, .. }
            | LifecycleEvent::Finished { call_id, .. } => call_id,
        }
    }
}

/// Callback interface for the UI layer.
///
/// All methods default to no-ops.
pub trait CallLifecycleListener: Send + Sync {
    fn on_state_changed(&self, _old: Option<CallStatus>, _new: CallStatus, _is_local: bool) {}

    fn on_media_state_changed(&self, _leg: MediaLeg, _old: MediaState, _new: MediaState) {}

    fn on_mute_changed(&self, _muted: bool) {}

    fn on_speaker_changed(&self, _enabled: bool) {}

    fn on_action_failed(&self, _error: &ActionError) {}

    fn on_finished(&self, _reason: &FinishReason) {}
}

/// Fans lifecycle events out to the listener and the broadcast channel
#[derive(Clone)]
pub(crate) struct LifecycleDispatcher {
    listener: Option<Arc<dyn CallLifecycleListener>>,
    tx: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleDispatcher {
    pub(crate) fn new(capacity: usize, listener: Option<Arc<dyn CallLifecycleListener>>) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { listener, tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn publish(&self, event: LifecycleEvent) {
        trace!(?event, "Publishing lifecycle event");
        if let Some(listener) = &self.listener {
            match &event {
                LifecycleEvent::StateChanged {
                    old, new, is_local, ..
                } => listener.on_state_changed(*old, *new, *is_local),
                LifecycleEvent::MediaStateChanged { leg, old, new, .. } => {
                    listener.on_media_state_changed(*leg, *old, *new)
                }
                LifecycleEvent::MuteChanged { muted, .. } => listener.on_mute_changed(*muted),
                LifecycleEvent::SpeakerChanged { enabled, .. } => {
                    listener.on_speaker_changed(*enabled)
                }
                LifecycleEvent::ActionFailed { error, .. } => listener.on_action_failed(error),
                LifecycleEvent::Finished { reason, .. } => listener.on_finished(reason),
            }
        }

        if self.tx.send(event).is_err() {
            debug!("No lifecycle subscribers");
        }
    }
}

impl std::fmt::Debug for LifecycleDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleDispatcher")
            .field("has_listener", &self.listener.is_some())
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}
