use std::collections::HashMap;
use std::fmt;

use crate::audio::IndicatorSound;
use crate::call::{CallDirection, CallStatus, FinishReason};
use crate::events::TimerKind;
use crate::signaling::SignalingAction;

/// Key for looking up transitions in the state table
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct StateKey {
    pub role: Role,
    /// `None` until the call has been started
    pub state: Option<CallStatus>,
    pub event: EventKind,
}

/// Direction a transition applies to
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum Role {
    Outbound,
    Inbound,
    /// Applies to both directions
    Both,
}

impl From<CallDirection> for Role {
    fn from(direction: CallDirection) -> Self {
        match direction {
            CallDirection::Outbound => Role::Outbound,
            CallDirection::Inbound => Role::Inbound,
        }
    }
}

/// Normalized events that can drive a status transition
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventKind {
    Start,
    RemoteRinging,
    RemoteAccepted,
    RemotePaused,
    RemoteResumed,
    RemoteEnded,
    RemoteRejected,
    LocalAccept,
    /// End right now (native end callback, direct request)
    LocalHangup,
    /// UI hangup; goes through the native layer first
    HangupRequested,
    NativeEndFailed,
    NativeReset,
    /// Derived from media updates: both legs are connected
    MediaBothConnected,
    TransportFlush,
    TransportRecovered,
    NoAnswerTimeout,
    MediaTimeout,
    FlushTimeout,
    EndConfirmTimeout,
}

impl EventKind {
    pub const ALL: [EventKind; 19] = [
        EventKind::Start,
        EventKind::RemoteRinging,
        EventKind::RemoteAccepted,
        EventKind::RemotePaused,
        EventKind::RemoteResumed,
        EventKind::RemoteEnded,
        EventKind::RemoteRejected,
        EventKind::LocalAccept,
        EventKind::LocalHangup,
        EventKind::HangupRequested,
        EventKind::NativeEndFailed,
        EventKind::NativeReset,
        EventKind::MediaBothConnected,
        EventKind::TransportFlush,
        EventKind::TransportRecovered,
        EventKind::NoAnswerTimeout,
        EventKind::MediaTimeout,
        EventKind::FlushTimeout,
        EventKind::EndConfirmTimeout,
    ];
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Conditions checked before a transition is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    BothLegsConnected,
    /// A remote resume arrived while media was still down
    ResumePending,
    /// No native end request is outstanding
    EndNotRequested,
}

/// Declarative side effects of a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    PresentOutgoing,
    PresentIncoming,
    /// Bring audio in line with the status being entered
    ApplyAudioProfile,
    PlayIndicator(IndicatorSound),
    SendSignaling(SignalingAction),
    ArmTimer(TimerKind),
    CancelTimer(TimerKind),
    RequestNativeEnd,
    ClearResumePending,
    /// Record the reason, report the end natively and dispose the call
    Finish(FinishReason),
}

/// Where a transition leads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextState {
    Status(CallStatus),
    /// Back to the status a flush interrupted
    Interrupted,
}

/// Lifecycle notifications a transition publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTemplate {
    StateChanged,
}

/// A transition definition
#[derive(Debug, Clone)]
pub struct Transition {
    pub guards: Vec<Guard>,
    pub actions: Vec<Action>,
    /// `None` keeps the current status
    pub next_state: Option<NextState>,
    pub publish_events: Vec<EventTemplate>,
}

impl Transition {
    /// Move to `status` with the given actions
    pub fn to(status: CallStatus, actions: Vec<Action>) -> Self {
        Self {
            guards: vec![],
            actions,
            next_state: Some(NextState::Status(status)),
            publish_events: vec![EventTemplate::StateChanged],
        }
    }

    /// Run actions without a status change
    pub fn stay(actions: Vec<Action>) -> Self {
        Self {
            guards: vec![],
            actions,
            next_state: None,
            publish_events: vec![],
        }
    }

    pub fn guarded(mut self, guard: Guard) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.next_state == Some(NextState::Status(CallStatus::Finished))
    }
}

/// Master state table containing all transitions
#[derive(Debug, Default)]
pub struct MasterStateTable {
    transitions: HashMap<StateKey, Transition>,
    /// Transitions that apply to every started, non-finished status
    wildcard_transitions: HashMap<(Role, EventKind), Transition>,
}

/// Statuses that must always be able to reach `Finished`
const STATUSES_REQUIRING_EXITS: &[CallStatus] = &[
    CallStatus::Trying,
    CallStatus::Ringing,
    CallStatus::Accepted,
    CallStatus::Conversation,
    CallStatus::Paused,
    CallStatus::Flushed,
];

impl MasterStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: StateKey, transition: Transition) {
        self.transitions.insert(key, transition);
    }

    pub fn insert_wildcard(&mut self, role: Role, event: EventKind, transition: Transition) {
        self.wildcard_transitions.insert((role, event), transition);
    }

    /// Find the transition for `key`.
    ///
    /// Lookup order: exact role and state, `Both` and state, wildcard for
    /// the role, wildcard for `Both`. Wildcards never match an unstarted or
    /// finished call.
    pub fn get(&self, key: &StateKey) -> Option<&Transition> {
        let both = StateKey {
            role: Role::Both,
            ..*key
        };
        if let Some(transition) = self
            .transitions
            .get(key)
            .or_else(|| self.transitions.get(&both))
        {
            return Some(transition);
        }

        match key.state {
            Some(state) if !state.is_terminal() => self
                .wildcard_transitions
                .get(&(key.role, key.event))
                .or_else(|| self.wildcard_transitions.get(&(Role::Both, key.event))),
            _ => None,
        }
    }

    pub fn has_transition(&self, key: &StateKey) -> bool {
        self.get(key).is_some()
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.len() + self.wildcard_transitions.len()
    }

    /// Check the structural rules of the lifecycle:
    /// nothing leaves `Finished`, no transition moves backward, only a
    /// flushed call may return to an interrupted status, and every live
    /// status can reach `Finished`.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for (key, transition) in &self.transitions {
            match key.state {
                Some(CallStatus::Finished) => {
                    errors.push(format!("Transition out of Finished on {}", key.event));
                }
                None if key.event != EventKind::Start => {
                    errors.push(format!("Unstarted call handles {}", key.event));
                }
                Some(_) if key.event == EventKind::Start => {
                    errors.push(format!("Start handled in {:?}", key.state));
                }
                _ => {}
            }

            match (key.state, transition.next_state) {
                (Some(from), Some(NextState::Status(to))) => {
                    if let (Some(a), Some(b)) = (from.rank(), to.rank()) {
                        if b < a {
                            errors.push(format!(
                                "Backward transition {} -> {} on {}",
                                from, to, key.event
                            ));
                        }
                    }
                }
                (state, Some(NextState::Interrupted)) if state != Some(CallStatus::Flushed) => {
                    errors.push(format!(
                        "Return to interrupted status from {:?} on {}",
                        state, key.event
                    ));
                }
                _ => {}
            }
        }

        for ((_, event), transition) in &self.wildcard_transitions {
            if transition.next_state == Some(NextState::Interrupted) {
                errors.push(format!("Wildcard return to interrupted status on {}", event));
            }
            if let Some(NextState::Status(to)) = transition.next_state {
                if to.rank() == Some(0) {
                    errors.push(format!("Wildcard transition back to {} on {}", to, event));
                }
            }
        }

        for status in STATUSES_REQUIRING_EXITS {
            let can_finish = [Role::Outbound, Role::Inbound].iter().all(|role| {
                EventKind::ALL.iter().any(|event| {
                    self.get(&StateKey {
                        role: *role,
                        state: Some(*status),
                        event: *event,
                    })
                    .is_some_and(Transition::is_terminal)
                })
            });
            if !can_finish {
                errors.push(format!("Status {} cannot reach Finished", status));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
