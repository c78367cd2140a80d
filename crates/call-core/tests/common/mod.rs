//! Shared fixtures for the call-core integration tests

#![allow(dead_code)]

use tokio::sync::broadcast;

use mobicall_call_core::loopback::LoopbackHarness;
use mobicall_call_core::{
    AccessToken, Call, CallConfig, CallDirection, CallId, CallInit, CallSessionController,
    CallSlotRegistry, CallStatus, LifecycleEvent, MediaLeg, MediaState, Party, SignalingSender,
    SignalingUpdate,
};

pub const LOCAL_HANDLE: &str = "+98935";
pub const REMOTE_HANDLE: &str = "+98912";

/// Push payload of the documented inbound scenario
pub const INBOUND_PUSH: &str =
    r#"{"direction":"inbound","callerHandle":"+98912","accessToken":"tok1","id":"c1"}"#;

pub fn config() -> CallConfig {
    CallConfig::new(LOCAL_HANDLE)
}

pub fn new_call(registry: &CallSlotRegistry, id: &str, direction: CallDirection) -> Call {
    let slot = registry
        .acquire(&CallId::new(id))
        .expect("Slot should be free");
    let (caller, receptor) = match direction {
        CallDirection::Inbound => (Party::new(REMOTE_HANDLE), Party::new(LOCAL_HANDLE)),
        CallDirection::Outbound => (Party::new(LOCAL_HANDLE), Party::new(REMOTE_HANDLE)),
    };
    Call::new(CallInit::new(
        slot,
        direction,
        AccessToken::new("tok1"),
        caller,
        receptor,
    ))
}

pub fn controller(harness: &LoopbackHarness, config: CallConfig) -> CallSessionController {
    let controller = CallSessionController::new(
        config,
        harness.telephony.clone(),
        harness.signaling.clone(),
        harness.audio.clone(),
    );
    harness.telephony.connect(controller.native_ui_sender());
    controller
}

/// A controller with a started call and a lifecycle subscription taken
/// before the start
pub struct StartedCall {
    pub harness: LoopbackHarness,
    pub registry: CallSlotRegistry,
    pub controller: CallSessionController,
    pub events: broadcast::Receiver<LifecycleEvent>,
}

impl StartedCall {
    pub async fn new(direction: CallDirection) -> Self {
        Self::with_config(direction, config()).await
    }

    pub async fn with_config(direction: CallDirection, config: CallConfig) -> Self {
        let harness = LoopbackHarness::new();
        let registry = CallSlotRegistry::new();
        let controller = controller(&harness, config);
        let events = controller.subscribe();
        controller
            .start(new_call(&registry, "c1", direction))
            .await
            .expect("Call should start");
        Self {
            harness,
            registry,
            controller,
            events,
        }
    }

    pub fn remote(&self) -> SignalingSender {
        self.harness
            .signaling
            .remote()
            .expect("Signaling should be open")
    }

    pub fn status(&self) -> Option<CallStatus> {
        self.controller.snapshot().map(|s| s.status)
    }

    /// Drive the call into `conversation`
    pub async fn establish(&self) {
        match self.controller.snapshot().map(|s| s.direction) {
            Some(CallDirection::Inbound) => {
                self.controller.accept();
            }
            _ => {
                self.remote().deliver(SignalingUpdate::StatusUpdate {
                    status: mobicall_call_core::RemoteStatus::Accepted,
                });
            }
        }
        self.controller
            .wait_for_status(CallStatus::Accepted)
            .await
            .expect("Call should be accepted");
        connect_both_legs(&self.remote());
        self.controller
            .wait_for_status(CallStatus::Conversation)
            .await
            .expect("Call should reach conversation");
    }

    pub fn drain_events(&mut self) -> Vec<LifecycleEvent> {
        drain(&mut self.events)
    }
}

pub fn connect_both_legs(remote: &SignalingSender) {
    for leg in [MediaLeg::Caller, MediaLeg::Receptor] {
        remote.deliver(SignalingUpdate::MediaUpdate {
            leg,
            state: MediaState::Connected,
        });
    }
}

pub fn drain(rx: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Statuses entered, in order
pub fn statuses(events: &[LifecycleEvent]) -> Vec<CallStatus> {
    events
        .iter()
        .filter_map(|e| match e {
            LifecycleEvent::StateChanged { new, .. } => Some(*new),
            _ => None,
        })
        .collect()
}

pub fn action_failures(events: &[LifecycleEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, LifecycleEvent::ActionFailed { .. }))
        .count()
}

pub fn finished_count(events: &[LifecycleEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, LifecycleEvent::Finished { .. }))
        .count()
}
