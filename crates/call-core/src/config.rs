//! Call configuration
//!
//! All timeouts are in milliseconds so the TOML form stays flat:
//!
//! ```toml
//! local_handle = "+98935"
//! no_answer_timeout_ms = 45000
//!
//! [signaling_retry]
//! max_attempts = 5
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::events::TimerKind;
use crate::recovery::RetryConfig;

/// Tunables for setup and the per-call controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Identity of the user on this device
    pub local_handle: String,
    /// Trying/ringing without an answer
    pub no_answer_timeout_ms: u64,
    /// A media leg disconnected this long ends the call
    pub media_disconnect_timeout_ms: u64,
    /// Flushed without recovery this long ends the call
    pub flush_recovery_timeout_ms: u64,
    /// Wait for the native layer to confirm a hangup
    pub end_confirm_timeout_ms: u64,
    pub native_request_timeout_ms: u64,
    pub signaling_request_timeout_ms: u64,
    /// Bound on the whole initial handshake, retries included
    pub signaling_connect_timeout_ms: u64,
    pub signaling_retry: RetryConfig,
    pub lifecycle_channel_capacity: usize,
    /// Longest call id accepted from a trigger
    pub max_call_id_len: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            local_handle: "me".to_string(),
            no_answer_timeout_ms: 60_000,
            media_disconnect_timeout_ms: 20_000,
            flush_recovery_timeout_ms: 30_000,
            end_confirm_timeout_ms: 5_000,
            native_request_timeout_ms: 5_000,
            signaling_request_timeout_ms: 5_000,
            signaling_connect_timeout_ms: 10_000,
            signaling_retry: RetryConfig::default(),
            lifecycle_channel_capacity: 64,
            max_call_id_len: 128,
        }
    }
}

impl CallConfig {
    pub fn new(local_handle: impl Into<String>) -> Self {
        Self {
            local_handle: local_handle.into(),
            ..Self::default()
        }
    }

    pub fn with_no_answer_timeout(mut self, timeout: Duration) -> Self {
        self.no_answer_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_media_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.media_disconnect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_flush_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.flush_recovery_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_end_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.end_confirm_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_native_request_timeout(mut self, timeout: Duration) -> Self {
        self.native_request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_signaling_request_timeout(mut self, timeout: Duration) -> Self {
        self.signaling_request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_signaling_retry(mut self, retry: RetryConfig) -> Self {
        self.signaling_retry = retry;
        self
    }

    /// Parse from TOML text and validate
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: CallConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading call configuration");
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_handle.trim().is_empty() {
            return Err(ConfigError::Invalid("local_handle must not be empty".into()));
        }

        let timeouts = [
            ("no_answer_timeout_ms", self.no_answer_timeout_ms),
            ("media_disconnect_timeout_ms", self.media_disconnect_timeout_ms),
            ("flush_recovery_timeout_ms", self.flush_recovery_timeout_ms),
            ("end_confirm_timeout_ms", self.end_confirm_timeout_ms),
            ("native_request_timeout_ms", self.native_request_timeout_ms),
            ("signaling_request_timeout_ms", self.signaling_request_timeout_ms),
            ("signaling_connect_timeout_ms", self.signaling_connect_timeout_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{} must be greater than zero", name)));
        }

        if self.signaling_retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "signaling_retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.signaling_retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "signaling_retry.backoff_multiplier must be >= 1.0".into(),
            ));
        }
        if self.lifecycle_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "lifecycle_channel_capacity must be greater than zero".into(),
            ));
        }
        if self.max_call_id_len == 0 {
            return Err(ConfigError::Invalid("max_call_id_len must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn timer_duration(&self, kind: TimerKind) -> Duration {
        let ms = match kind {
            TimerKind::NoAnswer => self.no_answer_timeout_ms,
            TimerKind::MediaDisconnect => self.media_disconnect_timeout_ms,
            TimerKind::FlushRecovery => self.flush_recovery_timeout_ms,
            TimerKind::EndConfirm => self.end_confirm_timeout_ms,
        };
        Duration::from_millis(ms)
    }

    pub fn native_request_timeout(&self) -> Duration {
        Duration::from_millis(self.native_request_timeout_ms)
    }

    pub fn signaling_request_timeout(&self) -> Duration {
        Duration::from_millis(self.signaling_request_timeout_ms)
    }

    pub fn signaling_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.signaling_connect_timeout_ms)
    }
}
