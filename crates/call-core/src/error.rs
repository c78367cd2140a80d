//! Error types for the call core
//!
//! Errors are split by how far they are allowed to travel:
//!
//! - [`SetupError`] - fatal to a session attempt, raised before any `Call` exists
//! - [`ActionError`] - a mid-call command failed; reported to whoever issued it
//! - [`InvariantViolation`] - an event arrived that the machine cannot apply;
//!   logged and discarded, never returned to a caller
//!
//! Collaborator errors ([`NativeUiError`], [`SignalingError`], [`AudioError`])
//! are produced by the external adapters and converted at the controller boundary.

use std::time::Duration;

use thiserror::Error;

use crate::call::{CallId, CallStatus};

/// Result type for session setup
pub type SetupResult<T> = Result<T, SetupError>;

/// Result type for mid-call commands
pub type ActionResult<T> = Result<T, ActionError>;

/// Errors that abort a session attempt.
///
/// None of these are ever partially applied: when one is returned no `Call`
/// has been started and the call slot is free again.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SetupError {
    /// The trigger (push payload or dial request) could not be validated
    #[error("Malformed trigger: {reason}")]
    MalformedTrigger { reason: String },

    /// Another call already holds the single call slot
    #[error("A call is already active: {active}")]
    CallAlreadyActive { active: CallId },

    /// A credential needed for this trigger is missing
    #[error("Missing credential: {credential}")]
    CredentialMissing { credential: String },

    /// The signaling endpoint (or call-initiation API) could not be reached
    #[error("Signaling endpoint unreachable: {reason}")]
    UnreachableSignalingEndpoint { reason: String },

    /// The setup was cancelled by a hangup-equivalent signal before it completed
    #[error("Call setup cancelled")]
    Cancelled,
}

impl SetupError {
    /// Create a malformed-trigger error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedTrigger {
            reason: reason.into(),
        }
    }

    /// Create a credential-missing error
    pub fn credential_missing(credential: impl Into<String>) -> Self {
        Self::CredentialMissing {
            credential: credential.into(),
        }
    }

    /// Create an unreachable-endpoint error
    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self::UnreachableSignalingEndpoint {
            reason: reason.into(),
        }
    }
}

/// Errors returned to the issuer of a mid-call command.
///
/// These never move the call status by themselves.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    /// A request to the native telephony layer failed
    #[error("Native UI request '{operation}' failed: {reason}")]
    NativeUiRequestFailed { operation: String, reason: String },

    /// A request to the signaling transport failed
    #[error("Signaling request '{operation}' failed: {reason}")]
    SignalingRequestFailed { operation: String, reason: String },

    /// A request did not complete within its bound
    #[error("Operation '{operation}' timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// The call finished before the command could be applied
    #[error("Call already finished")]
    CallFinished,
}

impl ActionError {
    /// Create a native UI failure
    pub fn native(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NativeUiRequestFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a signaling failure
    pub fn signaling(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SignalingRequestFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// Events the state machine refuses to apply.
///
/// Only ever logged; the call they refer to is gone or not in a state
/// where the event means anything.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    /// An event arrived after the call was disposed
    #[error("Event '{event}' received for disposed call {call_id}")]
    EventAfterDispose { call_id: CallId, event: String },

    /// A media leg update arrived while media is not tracked
    #[error("Media update discarded while call is {status:?}")]
    MediaUpdateOutsideCall { status: CallStatus },
}

/// Error reported by a native telephony adapter
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct NativeUiError {
    pub message: String,
}

impl NativeUiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error reported by the signaling transport or call-initiation API
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignalingError {
    /// The endpoint could not be reached at all
    #[error("Connection error: {0}")]
    Connection(String),

    /// The endpoint answered with a failure
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The response could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The signaling channel for this call is already closed
    #[error("Signaling channel closed")]
    Closed,
}

/// Error reported by an audio backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Audio backend error in {operation}: {message}")]
pub struct AudioError {
    pub operation: String,
    pub message: String,
}

impl AudioError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Configuration loading, validation and logging setup errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration text is not valid TOML for [`crate::config::CallConfig`]
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// A global log subscriber is already installed
    #[error("Failed to install log subscriber: {0}")]
    Subscriber(String),
}
