use std::sync::Arc;

use tracing::{debug, warn};

use super::{AudioBackend, IndicatorSound};
use crate::call::{CallDirection, CallStatus};
use crate::error::AudioError;

/// Audio configuration currently applied to the backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioState {
    /// Looping indicator currently playing
    pub indicator: Option<IndicatorSound>,
    pub routed: bool,
    pub speaker: bool,
    pub muted: bool,
    pub remote_path_muted: bool,
    pub session_active: bool,
}

/// Idempotent front for an [`AudioBackend`].
///
/// Owned by the controller's event loop, so it is never touched concurrently.
pub struct AudioCoordinator {
    backend: Arc<dyn AudioBackend>,
    state: AudioState,
}

impl AudioCoordinator {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend,
            state: AudioState::default(),
        }
    }

    pub fn state(&self) -> &AudioState {
        &self.state
    }

    /// Bring audio in line with the call entering `status`
    pub fn apply_status(&mut self, status: CallStatus, direction: CallDirection) {
        match status {
            CallStatus::Trying => {
                if self.state.indicator.is_none() {
                    self.play_indicator_sound(IndicatorSound::Connecting);
                }
            }
            CallStatus::Ringing => {
                if direction == CallDirection::Inbound {
                    self.play_indicator_sound(IndicatorSound::IncomingRing);
                }
            }
            CallStatus::Accepted => self.stop_indicator(),
            CallStatus::Conversation => {
                self.set_remote_path_muted(false);
                self.start_routed_audio();
            }
            CallStatus::Paused => self.set_remote_path_muted(true),
            CallStatus::Flushed => {}
            CallStatus::Finished => self.stop(),
        }
    }

    /// Play a tone or cue.
    ///
    /// A looping indicator that is already playing is left alone; one-shot
    /// cues are played every time.
    pub fn play_indicator_sound(&mut self, sound: IndicatorSound) {
        if sound.is_looping() && self.state.indicator == Some(sound) {
            return;
        }
        if self.state.routed && sound.is_looping() {
            debug!(sound = %sound, "Skipping looping indicator while audio is routed");
            return;
        }
        if self.report("play_indicator", self.backend.play_indicator(sound)) {
            if sound.is_looping() {
                self.state.indicator = Some(sound);
            }
        }
    }

    pub fn stop_indicator(&mut self) {
        if self.state.indicator.is_none() {
            return;
        }
        if self.report("stop_indicator", self.backend.stop_indicator()) {
            self.state.indicator = None;
        }
    }

    /// Switch from indicators to conversation audio
    pub fn start_routed_audio(&mut self) {
        if self.state.routed {
            return;
        }
        self.stop_indicator();
        if self.report("start_routed_audio", self.backend.start_routed_audio()) {
            self.state.routed = true;
        }
    }

    /// Tear down all call audio and release the session.
    ///
    /// A no-op when nothing is applied. State is reset even if the backend
    /// reports a failure, since the call is over either way.
    pub fn stop(&mut self) {
        if self.state == AudioState::default() {
            return;
        }
        self.report("stop_all", self.backend.stop_all());
        if self.state.session_active {
            self.report("set_session_active", self.backend.set_session_active(false));
        }
        self.state = AudioState::default();
    }

    pub fn set_speaker(&mut self, enabled: bool) {
        if self.state.speaker == enabled {
            return;
        }
        if self.report("set_speaker", self.backend.set_speaker(enabled)) {
            self.state.speaker = enabled;
        }
    }

    pub fn set_mute(&mut self, muted: bool) {
        if self.state.muted == muted {
            return;
        }
        if self.report("set_mute", self.backend.set_mute(muted)) {
            self.state.muted = muted;
        }
    }

    pub fn set_remote_path_muted(&mut self, muted: bool) {
        if self.state.remote_path_muted == muted {
            return;
        }
        if self.report(
            "set_remote_path_muted",
            self.backend.set_remote_path_muted(muted),
        ) {
            self.state.remote_path_muted = muted;
        }
    }

    pub fn set_session_active(&mut self, active: bool) {
        if self.state.session_active == active {
            return;
        }
        if self.report("set_session_active", self.backend.set_session_active(active)) {
            self.state.session_active = active;
        }
    }

    fn report(&self, operation: &str, result: Result<(), AudioError>) -> bool {
        match result {
            Ok(()) => {
                debug!(operation, "Audio operation applied");
                true
            }
            Err(e) => {
                warn!(operation, error = %e, "Audio operation failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for AudioCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioCoordinator")
            .field("state", &self.state)
            .finish()
    }
}
