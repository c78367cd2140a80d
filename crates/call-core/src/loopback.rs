//! In-memory collaborators
//!
//! Stand-ins for the native telephony layer, the signaling transport, the
//! audio backend and the call-initiation API. Every request is recorded so
//! callers can assert how often a side effect happened, and each one can be
//! told to fail. Used by the test suites and the `mobicall` demo binary.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::audio::{AudioBackend, IndicatorSound};
use crate::call::{CallId, FinishReason, Party};
use crate::error::{AudioError, NativeUiError, SignalingError};
use crate::events::{NativeUiSender, SignalingSender};
use crate::setup::CredentialProvider;
use crate::signaling::{
    CallInitiator, InitiatedCall, OpenRequest, SignalingAction, SignalingHandle,
    SignalingTransport,
};
use crate::telephony::{NativeTelephonyAdapter, NativeUiAction};

/// One call made on a [`RecordingAudioBackend`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioOp {
    PlayIndicator(IndicatorSound),
    StopIndicator,
    StartRoutedAudio,
    StopAll,
    SetSpeaker(bool),
    SetMute(bool),
    SetRemotePathMuted(bool),
    SetSessionActive(bool),
}

impl AudioOp {
    fn operation(&self) -> &'static str {
        match self {
            AudioOp::PlayIndicator(_) => "play_indicator",
            AudioOp::StopIndicator => "stop_indicator",
            AudioOp::StartRoutedAudio => "start_routed_audio",
            AudioOp::StopAll => "stop_all",
            AudioOp::SetSpeaker(_) => "set_speaker",
            AudioOp::SetMute(_) => "set_mute",
            AudioOp::SetRemotePathMuted(_) => "set_remote_path_muted",
            AudioOp::SetSessionActive(_) => "set_session_active",
        }
    }
}

/// Audio backend that only records what it was asked to do
#[derive(Debug, Default)]
pub struct RecordingAudioBackend {
    ops: Mutex<Vec<AudioOp>>,
    fail_next: Mutex<Vec<&'static str>>,
}

impl RecordingAudioBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<AudioOp> {
        self.ops.lock().clone()
    }

    pub fn count(&self, op: &AudioOp) -> usize {
        self.ops.lock().iter().filter(|o| *o == op).count()
    }

    /// Make the next call of `operation` fail once
    pub fn fail_next(&self, operation: &'static str) {
        self.fail_next.lock().push(operation);
    }

    fn record(&self, op: AudioOp) -> Result<(), AudioError> {
        self.ops.lock().push(op);
        let mut failing = self.fail_next.lock();
        if let Some(pos) = failing.iter().position(|o| *o == op.operation()) {
            failing.remove(pos);
            return Err(AudioError::new(op.operation(), "injected failure"));
        }
        Ok(())
    }
}

impl AudioBackend for RecordingAudioBackend {
    fn play_indicator(&self, sound: IndicatorSound) -> Result<(), AudioError> {
        self.record(AudioOp::PlayIndicator(sound))
    }

    fn stop_indicator(&self) -> Result<(), AudioError> {
        self.record(AudioOp::StopIndicator)
    }

    fn start_routed_audio(&self) -> Result<(), AudioError> {
        self.record(AudioOp::StartRoutedAudio)
    }

    fn stop_all(&self) -> Result<(), AudioError> {
        self.record(AudioOp::StopAll)
    }

    fn set_speaker(&self, enabled: bool) -> Result<(), AudioError> {
        self.record(AudioOp::SetSpeaker(enabled))
    }

    fn set_mute(&self, muted: bool) -> Result<(), AudioError> {
        self.record(AudioOp::SetMute(muted))
    }

    fn set_remote_path_muted(&self, muted: bool) -> Result<(), AudioError> {
        self.record(AudioOp::SetRemotePathMuted(muted))
    }

    fn set_session_active(&self, active: bool) -> Result<(), AudioError> {
        self.record(AudioOp::SetSessionActive(active))
    }
}

/// One request made on a [`LoopbackTelephony`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelephonyOp {
    PresentOutgoing { call_id: CallId, receptor: String },
    PresentIncoming { call_id: CallId, caller: String },
    ReportEnded { call_id: CallId, reason: FinishReason },
    ReflectMute { call_id: CallId, muted: bool },
    RequestEnd { call_id: CallId },
}

/// How [`LoopbackTelephony`] answers an end request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndBehavior {
    /// Accept the request and deliver `End` back, like a working call UI
    Confirm,
    /// Accept the request but never confirm it
    Ignore,
    /// Refuse the request
    Fail,
    /// Never answer the request
    Stall,
}

/// Native telephony layer that records requests
pub struct LoopbackTelephony {
    ops: Mutex<Vec<TelephonyOp>>,
    reflect_failures: Mutex<VecDeque<String>>,
    end_behavior: Mutex<EndBehavior>,
    callbacks: Mutex<Option<NativeUiSender>>,
}

impl LoopbackTelephony {
    pub fn new() -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
            reflect_failures: Mutex::new(VecDeque::new()),
            end_behavior: Mutex::new(EndBehavior::Confirm),
            callbacks: Mutex::new(None),
        }
    }

    /// Where confirmed end requests are delivered
    pub fn connect(&self, callbacks: NativeUiSender) {
        *self.callbacks.lock() = Some(callbacks);
    }

    pub fn set_end_behavior(&self, behavior: EndBehavior) {
        *self.end_behavior.lock() = behavior;
    }

    /// Make the next `reflect_mute` fail with `reason`
    pub fn fail_next_reflect(&self, reason: impl Into<String>) {
        self.reflect_failures.lock().push_back(reason.into());
    }

    pub fn ops(&self) -> Vec<TelephonyOp> {
        self.ops.lock().clone()
    }

    pub fn report_ended_count(&self) -> usize {
        self.count(|op| matches!(op, TelephonyOp::ReportEnded { .. }))
    }

    pub fn presented_count(&self) -> usize {
        self.count(|op| {
            matches!(
                op,
                TelephonyOp::PresentIncoming { .. } | TelephonyOp::PresentOutgoing { .. }
            )
        })
    }

    pub fn end_reasons(&self) -> Vec<FinishReason> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                TelephonyOp::ReportEnded { reason, .. } => Some(reason.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, predicate: impl Fn(&TelephonyOp) -> bool) -> usize {
        self.ops.lock().iter().filter(|op| predicate(op)).count()
    }

    fn record(&self, op: TelephonyOp) {
        debug!(?op, "Loopback telephony request");
        self.ops.lock().push(op);
    }
}

impl Default for LoopbackTelephony {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NativeTelephonyAdapter for LoopbackTelephony {
    async fn present_outgoing(
        &self,
        call_id: &CallId,
        receptor: &Party,
    ) -> Result<(), NativeUiError> {
        self.record(TelephonyOp::PresentOutgoing {
            call_id: call_id.clone(),
            receptor: receptor.handle.clone(),
        });
        Ok(())
    }

    async fn present_incoming(&self, call_id: &CallId, caller: &Party) -> Result<(), NativeUiError> {
        self.record(TelephonyOp::PresentIncoming {
            call_id: call_id.clone(),
            caller: caller.handle.clone(),
        });
        Ok(())
    }

    async fn report_ended(
        &self,
        call_id: &CallId,
        reason: &FinishReason,
    ) -> Result<(), NativeUiError> {
        self.record(TelephonyOp::ReportEnded {
            call_id: call_id.clone(),
            reason: reason.clone(),
        });
        Ok(())
    }

    async fn reflect_mute(&self, call_id: &CallId, muted: bool) -> Result<(), NativeUiError> {
        self.record(TelephonyOp::ReflectMute {
            call_id: call_id.clone(),
            muted,
        });
        match self.reflect_failures.lock().pop_front() {
            Some(reason) => Err(NativeUiError::new(reason)),
            None => Ok(()),
        }
    }

    async fn request_end(&self, call_id: &CallId) -> Result<(), NativeUiError> {
        self.record(TelephonyOp::RequestEnd {
            call_id: call_id.clone(),
        });
        let behavior = *self.end_behavior.lock();
        match behavior {
            EndBehavior::Confirm => {
                if let Some(callbacks) = self.callbacks.lock().as_ref() {
                    callbacks.deliver(NativeUiAction::End);
                }
                Ok(())
            }
            EndBehavior::Ignore => Ok(()),
            EndBehavior::Fail => Err(NativeUiError::new("end transaction refused")),
            EndBehavior::Stall => std::future::pending().await,
        }
    }
}

impl std::fmt::Debug for LoopbackTelephony {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTelephony")
            .field("ops", &self.ops.lock().len())
            .field("end_behavior", &*self.end_behavior.lock())
            .finish()
    }
}

/// Signaling transport that keeps everything in memory.
///
/// Remote updates are injected through [`LoopbackSignaling::remote`], which
/// hands back the sender the controller passed to `open`.
#[derive(Debug, Default)]
pub struct LoopbackSignaling {
    opened: Mutex<Vec<OpenRequest>>,
    sent: Mutex<Vec<SignalingAction>>,
    closed: Mutex<Vec<SignalingHandle>>,
    remote: Mutex<Option<SignalingSender>>,
    open_failures: Mutex<VecDeque<SignalingError>>,
    stall_open: AtomicBool,
}

impl LoopbackSignaling {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `open` with a connection error
    pub fn fail_next_open(&self) {
        self.open_failures
            .lock()
            .push_back(SignalingError::Connection("loopback endpoint down".into()));
    }

    /// Fail the next `open` with an error that is not worth retrying
    pub fn reject_next_open(&self) {
        self.open_failures
            .lock()
            .push_back(SignalingError::Rejected("call unknown".into()));
    }

    /// Make `open` hang until the caller gives up
    pub fn stall_open(&self) {
        self.stall_open.store(true, Ordering::SeqCst);
    }

    /// Sender for remote updates of the opened call
    pub fn remote(&self) -> Option<SignalingSender> {
        self.remote.lock().clone()
    }

    pub fn open_requests(&self) -> Vec<OpenRequest> {
        self.opened.lock().clone()
    }

    pub fn sent(&self) -> Vec<SignalingAction> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self, action: SignalingAction) -> usize {
        self.sent.lock().iter().filter(|a| **a == action).count()
    }

    pub fn close_count(&self) -> usize {
        self.closed.lock().len()
    }
}

#[async_trait]
impl SignalingTransport for LoopbackSignaling {
    async fn open(
        &self,
        request: OpenRequest,
        updates: SignalingSender,
    ) -> Result<SignalingHandle, SignalingError> {
        let handle = SignalingHandle::new(format!("loopback/{}", request.call_id));
        self.opened.lock().push(request);

        if self.stall_open.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        if let Some(error) = self.open_failures.lock().pop_front() {
            return Err(error);
        }
        *self.remote.lock() = Some(updates);
        Ok(handle)
    }

    async fn send(
        &self,
        handle: &SignalingHandle,
        action: SignalingAction,
    ) -> Result<(), SignalingError> {
        if self.closed.lock().contains(handle) {
            return Err(SignalingError::Closed);
        }
        debug!(%handle, action = action.name(), "Loopback signaling send");
        self.sent.lock().push(action);
        Ok(())
    }

    async fn close(&self, handle: &SignalingHandle) {
        self.closed.lock().push(handle.clone());
    }
}

/// Call-initiation API answering from memory
#[derive(Debug, Default)]
pub struct LoopbackInitiator {
    response: Mutex<Option<Result<InitiatedCall, SignalingError>>>,
    requests: Mutex<Vec<(String, String)>>,
    latency: Mutex<Duration>,
}

impl LoopbackInitiator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_with(&self, call_id: impl Into<String>, access_token: impl Into<String>) {
        *self.response.lock() = Some(Ok(InitiatedCall {
            call_id: call_id.into(),
            access_token: access_token.into(),
        }));
    }

    pub fn fail_with_connection_error(&self) {
        *self.response.lock() = Some(Err(SignalingError::Connection(
            "call backend unreachable".into(),
        )));
    }

    /// Delay every answer by `latency`
    pub fn respond_after(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// `(api_token, receptor)` of every request so far
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CallInitiator for LoopbackInitiator {
    async fn initiate(
        &self,
        api_token: &str,
        receptor: &str,
    ) -> Result<InitiatedCall, SignalingError> {
        self.requests
            .lock()
            .push((api_token.to_string(), receptor.to_string()));
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match self.response.lock().clone() {
            Some(response) => response,
            None => Ok(InitiatedCall {
                call_id: Uuid::new_v4().to_string(),
                access_token: Uuid::new_v4().simple().to_string(),
            }),
        }
    }
}

/// Credential provider returning a fixed token
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    api_token: Option<String>,
}

impl StaticCredentials {
    pub fn new(api_token: Option<String>) -> Self {
        Self { api_token }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn api_token(&self) -> Option<String> {
        self.api_token.clone()
    }
}

/// Every loopback collaborator needed to run a controller
#[derive(Debug, Clone)]
pub struct LoopbackHarness {
    pub telephony: Arc<LoopbackTelephony>,
    pub signaling: Arc<LoopbackSignaling>,
    pub audio: Arc<RecordingAudioBackend>,
}

impl LoopbackHarness {
    pub fn new() -> Self {
        Self {
            telephony: Arc::new(LoopbackTelephony::new()),
            signaling: Arc::new(LoopbackSignaling::new()),
            audio: Arc::new(RecordingAudioBackend::new()),
        }
    }
}

impl Default for LoopbackHarness {
    fn default() -> Self {
        Self::new()
    }
}
