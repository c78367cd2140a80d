//! Call-core: call session orchestration for mobile voice clients
//!
//! This crate runs one voice call at a time on a device, from the trigger
//! that creates it to its teardown. It never talks to a network or a
//! platform API directly; those live behind the collaborator traits it
//! consumes.
//!
//! ## Flow
//!
//! ```text
//! push payload / dial ─► SessionSetupFlow::resolve ─► CallInit
//!                                                         │
//!                             Call::new ◄─────────────────┘
//!                                 │
//!                 CallSessionController::start ─► event loop ─► finished
//! ```
//!
//! ## Collaborators
//!
//! - [`NativeTelephonyAdapter`] - the platform call UI
//! - [`SignalingTransport`] - the per-call signaling channel
//! - [`CallInitiator`] - the backend API that places outgoing calls
//! - [`AudioBackend`] - platform audio routing
//! - [`CredentialProvider`] - app API token storage
//!
//! In-memory versions of all of them live in [`loopback`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mobicall_call_core::{
//!     Call, CallConfig, CallSessionController, CallSlotRegistry, SessionSetupFlow, SetupTrigger,
//! };
//! use mobicall_call_core::loopback::{LoopbackHarness, LoopbackInitiator, StaticCredentials};
//!
//! # async fn example(push: &str) -> anyhow::Result<()> {
//! let config = CallConfig::new("+98935");
//! let setup = SessionSetupFlow::new(
//!     config.clone(),
//!     CallSlotRegistry::new(),
//!     Arc::new(StaticCredentials::new(None)),
//!     Arc::new(LoopbackInitiator::new()),
//! );
//! let init = setup.resolve(SetupTrigger::push(push)).await?;
//!
//! let harness = LoopbackHarness::new();
//! let controller = CallSessionController::new(
//!     config,
//!     harness.telephony.clone(),
//!     harness.signaling.clone(),
//!     harness.audio.clone(),
//! );
//! controller.start(Call::new(init)).await?;
//! controller.closed().await;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod call;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod logging;
pub mod loopback;
pub mod recovery;
pub mod registry;
pub mod setup;
pub mod signaling;
pub mod state_table;
pub mod telephony;

pub use audio::{AudioBackend, AudioCoordinator, AudioState, IndicatorSound};
pub use call::{
    AccessToken, Call, CallDirection, CallId, CallInit, CallSnapshot, CallStatus, FinishReason,
    MediaLeg, MediaState, Party,
};
pub use config::CallConfig;
pub use controller::{CallSessionController, ControllerPhase};
pub use error::{
    ActionError, ActionResult, AudioError, ConfigError, InvariantViolation, NativeUiError,
    SetupError, SetupResult, SignalingError,
};
pub use events::{
    CallCommand, CallEvent, CallEventSource, EventSource, NativeUiSender, SignalingSender,
    SourcedEvent, TimerKind,
};
pub use lifecycle::{CallLifecycleListener, LifecycleEvent};
pub use logging::{LoggingConfig, setup_logging};
pub use recovery::RetryConfig;
pub use registry::{CallSlot, CallSlotRegistry};
pub use setup::{CredentialProvider, PushPayload, SessionSetupFlow, SetupTrigger};
pub use signaling::{
    CallInitiator, InitiatedCall, OpenRequest, RemoteStatus, SignalingAction, SignalingHandle,
    SignalingTransport, SignalingUpdate,
};
pub use telephony::{NativeTelephonyAdapter, NativeUiAction};

/// Call-core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
