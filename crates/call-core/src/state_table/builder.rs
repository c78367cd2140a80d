use super::types::{EventKind, MasterStateTable, Role, StateKey, Transition};
use crate::call::CallStatus;

/// Incremental construction of a [`MasterStateTable`]
#[derive(Debug, Default)]
pub struct StateTableBuilder {
    table: MasterStateTable,
}

impl StateTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition out of a started status
    pub fn add_transition(
        &mut self,
        role: Role,
        state: CallStatus,
        event: EventKind,
        transition: Transition,
    ) -> &mut Self {
        self.table.insert(
            StateKey {
                role,
                state: Some(state),
                event,
            },
            transition,
        );
        self
    }

    /// Same transition for several statuses
    pub fn add_transitions(
        &mut self,
        role: Role,
        states: &[CallStatus],
        event: EventKind,
        transition: Transition,
    ) -> &mut Self {
        for state in states {
            self.add_transition(role, *state, event, transition.clone());
        }
        self
    }

    /// Transition for a call that has not been started yet
    pub fn add_initial(&mut self, role: Role, transition: Transition) -> &mut Self {
        self.table.insert(
            StateKey {
                role,
                state: None,
                event: EventKind::Start,
            },
            transition,
        );
        self
    }

    /// Transition from any started, non-finished status
    pub fn add_wildcard(&mut self, role: Role, event: EventKind, transition: Transition) -> &mut Self {
        self.table.insert_wildcard(role, event, transition);
        self
    }

    pub fn build(self) -> MasterStateTable {
        self.table
    }
}
