//! Audio coordination
//!
//! [`AudioCoordinator`] translates call status and media changes into audio
//! actions on an [`AudioBackend`], the port implemented by the platform's
//! audio routing layer. Every coordinator operation is idempotent: the
//! backend is only touched when the requested configuration differs from the
//! one already applied.

pub mod coordinator;

pub use coordinator::{AudioCoordinator, AudioState};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AudioError;

/// Short tones and cues played outside of routed conversation audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorSound {
    /// Outbound call placed, remote not alerting yet
    Connecting,
    /// Remote party is alerting
    Ringback,
    /// Inbound call alerting on this device
    IncomingRing,
    /// Both media legs came (back) up
    MediaConnected,
    /// A media leg dropped
    MediaDisconnected,
}

impl IndicatorSound {
    /// Whether the sound repeats until stopped
    pub fn is_looping(&self) -> bool {
        matches!(
            self,
            IndicatorSound::Connecting | IndicatorSound::Ringback | IndicatorSound::IncomingRing
        )
    }
}

impl fmt::Display for IndicatorSound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndicatorSound::Connecting => "connecting",
            IndicatorSound::Ringback => "ringback",
            IndicatorSound::IncomingRing => "incoming_ring",
            IndicatorSound::MediaConnected => "media_connected",
            IndicatorSound::MediaDisconnected => "media_disconnected",
        };
        write!(f, "{}", name)
    }
}

/// Platform audio primitives.
///
/// Calls are synchronous and expected to return quickly; failures are
/// logged by the coordinator and never abort a call.
pub trait AudioBackend: Send + Sync {
    fn play_indicator(&self, sound: IndicatorSound) -> Result<(), AudioError>;

    fn stop_indicator(&self) -> Result<(), AudioError>;

    /// Route conversation audio between the microphone and the media transport
    fn start_routed_audio(&self) -> Result<(), AudioError>;

    /// Tear down every audio output for the call
    fn stop_all(&self) -> Result<(), AudioError>;

    fn set_speaker(&self, enabled: bool) -> Result<(), AudioError>;

    /// Mute the local microphone
    fn set_mute(&self, muted: bool) -> Result<(), AudioError>;

    /// Silence audio coming from the remote party (hold)
    fn set_remote_path_muted(&self, muted: bool) -> Result<(), AudioError>;

    /// Configure or release the platform audio session
    fn set_session_active(&self, active: bool) -> Result<(), AudioError>;
}
