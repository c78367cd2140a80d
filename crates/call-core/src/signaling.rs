//! Signaling transport boundary
//!
//! The signaling channel carries call status and media notifications between
//! this device and the call backend. Its implementation (websocket, MQTT,
//! vendor SDK) is external; the core only depends on the traits here.
//!
//! Two collaborators are defined:
//!
//! - [`SignalingTransport`] - opens the per-call channel, sends call actions
//!   and pushes [`SignalingUpdate`]s into the call's event queue through a
//!   [`SignalingSender`](crate::events::SignalingSender)
//! - [`CallInitiator`] - the REST "create call" endpoint used when the user
//!   dials out; returns the id and access token of the new call

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::call::{AccessToken, CallDirection, CallId, MediaLeg, MediaState};
use crate::error::SignalingError;
use crate::events::SignalingSender;

/// Opaque handle for an open signaling channel.
///
/// Owned by the `Call` for its lifetime and closed exactly once on dispose.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalingHandle(String);

impl SignalingHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignalingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Call actions this device sends to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalingAction {
    /// The inbound call is alerting on this device
    Ringing,
    /// The local user answered
    Accept,
    /// The local user declined a ringing inbound call
    Reject,
    /// End an established or outgoing call
    Hangup,
}

impl SignalingAction {
    pub fn name(&self) -> &'static str {
        match self {
            SignalingAction::Ringing => "ringing",
            SignalingAction::Accept => "accept",
            SignalingAction::Reject => "reject",
            SignalingAction::Hangup => "hangup",
        }
    }
}

/// Status reported by the remote side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Ringing,
    Accepted,
    Paused,
    Resumed,
}

/// A notification received on the signaling channel.
///
/// The JSON form is internally tagged by `type`, e.g.
/// `{"type":"media_update","leg":"caller","state":"connected"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingUpdate {
    /// Remote status change
    StatusUpdate { status: RemoteStatus },
    /// One media leg changed state
    MediaUpdate { leg: MediaLeg, state: MediaState },
    /// The remote side ended the call
    Terminate {
        /// True when the remote declined before answering
        #[serde(default)]
        rejected: bool,
    },
    /// The channel was reset but the call is still alive
    Flush,
    /// The channel recovered after a flush
    Recovered,
}

impl SignalingUpdate {
    /// Parse a raw channel message
    pub fn from_json(raw: &str) -> Result<Self, SignalingError> {
        Self::from_frame(raw).map(|(_, update)| update)
    }

    /// Parse a raw channel message along with the call id it is keyed by,
    /// if the frame carries one (`callId` or `call_id`)
    pub fn from_frame(raw: &str) -> Result<(Option<CallId>, Self), SignalingError> {
        let invalid = |e: serde_json::Error| SignalingError::InvalidResponse(e.to_string());
        let mut value: serde_json::Value = serde_json::from_str(raw).map_err(invalid)?;

        let mut call_id = None;
        if let Some(fields) = value.as_object_mut() {
            for key in ["callId", "call_id"] {
                match fields.remove(key) {
                    Some(serde_json::Value::String(id)) => call_id = Some(CallId::new(id)),
                    Some(_) => {
                        return Err(SignalingError::InvalidResponse(format!(
                            "field '{}' must be a string",
                            key
                        )));
                    }
                    None => {}
                }
            }
        }

        let update = serde_json::from_value(value).map_err(invalid)?;
        Ok((call_id, update))
    }
}

/// Parameters for opening the signaling channel of one call
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub call_id: CallId,
    pub direction: CallDirection,
    pub access_token: AccessToken,
    pub remote_handle: String,
}

/// Per-call signaling channel provider
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Perform the initial handshake for a call.
    ///
    /// Updates for the call must be delivered through `updates` from then on,
    /// in the order they were received.
    async fn open(
        &self,
        request: OpenRequest,
        updates: SignalingSender,
    ) -> Result<SignalingHandle, SignalingError>;

    /// Send a call action on an open channel
    async fn send(
        &self,
        handle: &SignalingHandle,
        action: SignalingAction,
    ) -> Result<(), SignalingError>;

    /// Release the channel; must tolerate being called on a dead channel
    async fn close(&self, handle: &SignalingHandle);
}

/// Result of asking the backend to place a call
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InitiatedCall {
    #[serde(alias = "callId", alias = "id")]
    pub call_id: String,
    #[serde(alias = "accessToken")]
    pub access_token: String,
}

/// REST boundary for user-initiated calls
#[async_trait]
pub trait CallInitiator: Send + Sync {
    /// Ask the backend to create a call from this device to `receptor`
    async fn initiate(
        &self,
        api_token: &str,
        receptor: &str,
    ) -> Result<InitiatedCall, SignalingError>;
}
