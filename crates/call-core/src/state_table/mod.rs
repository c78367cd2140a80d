//! Declarative call lifecycle
//!
//! Each `(direction, status, event)` triple maps to a [`Transition`]: the
//! guards it needs, the actions it triggers, the status it moves to and the
//! lifecycle notifications it publishes. The controller's state machine is a
//! thin interpreter over [`MASTER_TABLE`].

pub mod builder;
pub mod tables;
pub mod types;

pub use builder::StateTableBuilder;
pub use types::*;

use std::sync::Arc;

use lazy_static::lazy_static;

lazy_static! {
    /// The master state table - single source of truth for all transitions
    pub static ref MASTER_TABLE: Arc<MasterStateTable> = Arc::new(build_master_table());
}

fn build_master_table() -> MasterStateTable {
    let table = tables::build_default_table();
    if let Err(errors) = table.validate() {
        tracing::error!(?errors, "Default state table failed validation");
    } else {
        tracing::debug!(
            transitions = table.transition_count(),
            "Loaded default state table"
        );
    }
    table
}
