//! Call data model
//!
//! Identifiers, enums and read-only views used throughout the crate. The
//! mutable [`Call`](super::Call) entity itself lives in the parent module so
//! that its setters stay crate-private.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque session identifier assigned by the call backend.
///
/// Unique per call attempt and immutable once the call exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who placed the call relative to this device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    /// This device dialed out
    Outbound,
    /// The call was delivered to this device by push
    Inbound,
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallDirection::Outbound => write!(f, "outbound"),
            CallDirection::Inbound => write!(f, "inbound"),
        }
    }
}

/// Lifecycle status of a call.
///
/// Moves forward only; see [`CallStatus::rank`]. `Finished` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Outbound call sent, remote not answered yet
    Trying,
    /// Inbound call alerting on this device
    Ringing,
    /// Answered, media not yet established on both legs
    Accepted,
    /// Both media legs connected and audio routed
    Conversation,
    /// Remote put the call on hold
    Paused,
    /// Signaling channel reset without termination
    Flushed,
    /// Terminal
    Finished,
}

impl CallStatus {
    /// Position of the status in the forward order of the lifecycle.
    ///
    /// `Flushed` returns `None`: it takes the rank of whatever status it
    /// interrupted.
    pub fn rank(&self) -> Option<u8> {
        match self {
            CallStatus::Trying | CallStatus::Ringing => Some(0),
            CallStatus::Accepted => Some(1),
            CallStatus::Conversation | CallStatus::Paused => Some(2),
            CallStatus::Flushed => None,
            CallStatus::Finished => Some(3),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Finished)
    }

    /// Whether media leg updates are tracked in this status
    pub fn tracks_media(&self) -> bool {
        matches!(
            self,
            CallStatus::Accepted | CallStatus::Conversation | CallStatus::Paused
        )
    }

    /// Every status, in lifecycle order
    pub const ALL: [CallStatus; 7] = [
        CallStatus::Trying,
        CallStatus::Ringing,
        CallStatus::Accepted,
        CallStatus::Conversation,
        CallStatus::Paused,
        CallStatus::Flushed,
        CallStatus::Finished,
    ];
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallStatus::Trying => "trying",
            CallStatus::Ringing => "ringing",
            CallStatus::Accepted => "accepted",
            CallStatus::Conversation => "conversation",
            CallStatus::Paused => "paused",
            CallStatus::Flushed => "flushed",
            CallStatus::Finished => "finished",
        };
        write!(f, "{}", name)
    }
}

/// State of one media leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaState {
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for MediaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaState::Connecting => write!(f, "connecting"),
            MediaState::Connected => write!(f, "connected"),
            MediaState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// One side of the media path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaLeg {
    Caller,
    Receptor,
}

impl fmt::Display for MediaLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaLeg::Caller => write!(f, "caller"),
            MediaLeg::Receptor => write!(f, "receptor"),
        }
    }
}

/// Identity of a call participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    /// Routable handle (phone number or user name)
    pub handle: String,
    /// Optional human-readable name
    pub display_name: Option<String>,
}

impl Party {
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Name to show in the UI
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.handle)
    }
}

/// Credential used by the signaling transport for one call.
///
/// The value never appears in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Expose the raw token to a transport
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken(***)")
    }
}

/// Why a call reached `Finished`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The remote side ended the call
    RemoteEnded,
    /// The remote side declined the call
    RemoteRejected,
    /// The local user hung up
    LocalHangup,
    /// The local user declined an inbound call while it was ringing
    LocalReject,
    /// Nobody answered before the no-answer timer expired
    NoAnswer,
    /// A media leg stayed disconnected past the media timeout
    MediaTimeout,
    /// The signaling channel did not recover after a flush
    SignalingLost,
    /// The native layer never confirmed an end request; ended locally
    LocalFallback,
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FinishReason::RemoteEnded => "remote ended",
            FinishReason::RemoteRejected => "remote rejected",
            FinishReason::LocalHangup => "local hangup",
            FinishReason::LocalReject => "local reject",
            FinishReason::NoAnswer => "no answer",
            FinishReason::MediaTimeout => "media timeout",
            FinishReason::SignalingLost => "signaling lost",
            FinishReason::LocalFallback => "local fallback",
        };
        write!(f, "{}", text)
    }
}

/// Immutable view of a call handed to the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSnapshot {
    pub id: CallId,
    pub direction: CallDirection,
    pub caller: Party,
    pub receptor: Party,
    pub status: CallStatus,
    pub caller_media_state: MediaState,
    pub receptor_media_state: MediaState,
    /// Last mute state confirmed by the native layer
    pub muted: bool,
    pub speaker: bool,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub finish_reason: Option<FinishReason>,
}

impl CallSnapshot {
    /// The party on the other end from this device's point of view
    pub fn remote_party(&self) -> &Party {
        match self.direction {
            CallDirection::Outbound => &self.receptor,
            CallDirection::Inbound => &self.caller,
        }
    }
}
