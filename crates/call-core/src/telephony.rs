//! Native telephony boundary
//!
//! The platform call UI (CallKit, ConnectionService, a desktop shell...) is
//! driven through [`NativeTelephonyAdapter`]. User gestures made in that UI
//! come back as [`NativeUiAction`]s, delivered through the
//! [`NativeUiSender`](crate::events::NativeUiSender) handed out by the
//! controller. Adapter callbacks must do nothing but deliver the action.

use std::fmt;

use async_trait::async_trait;

use crate::call::{CallId, FinishReason, Party};
use crate::error::NativeUiError;

/// Requests the core makes to the platform call UI.
///
/// Every method may suspend; the controller bounds each call with a timeout
/// and feeds the outcome back into the call's event queue.
#[async_trait]
pub trait NativeTelephonyAdapter: Send + Sync {
    /// Show an outgoing call to `receptor`
    async fn present_outgoing(&self, call_id: &CallId, receptor: &Party)
        -> Result<(), NativeUiError>;

    /// Show an incoming call from `caller`
    async fn present_incoming(&self, call_id: &CallId, caller: &Party)
        -> Result<(), NativeUiError>;

    /// Tell the platform the call is over
    async fn report_ended(&self, call_id: &CallId, reason: &FinishReason)
        -> Result<(), NativeUiError>;

    /// Mirror the local mute state in the platform UI
    async fn reflect_mute(&self, call_id: &CallId, muted: bool) -> Result<(), NativeUiError>;

    /// Ask the platform to end the call.
    ///
    /// On success the platform confirms by delivering [`NativeUiAction::End`].
    /// Adapters without an end transaction keep the default, which makes the
    /// controller fall back to a local hangup immediately.
    async fn request_end(&self, call_id: &CallId) -> Result<(), NativeUiError> {
        let _ = call_id;
        Err(NativeUiError::new("end requests are not supported"))
    }
}

/// User actions and platform notifications reported by the native layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeUiAction {
    /// The user answered
    Accept,
    /// The user ended or declined the call
    End,
    /// The platform started the outgoing call
    Start,
    /// The user toggled mute in the platform UI
    SetMuted(bool),
    AudioSessionActivated,
    AudioSessionDeactivated,
    /// The platform dropped all of its calls
    Reset,
}

impl fmt::Display for NativeUiAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeUiAction::Accept => write!(f, "accept"),
            NativeUiAction::End => write!(f, "end"),
            NativeUiAction::Start => write!(f, "start"),
            NativeUiAction::SetMuted(muted) => write!(f, "set_muted({})", muted),
            NativeUiAction::AudioSessionActivated => write!(f, "audio_session_activated"),
            NativeUiAction::AudioSessionDeactivated => write!(f, "audio_session_deactivated"),
            NativeUiAction::Reset => write!(f, "reset"),
        }
    }
}
