mod common;
mod inbound;
mod outbound;

pub use common::add_common_transitions;
pub use inbound::add_inbound_transitions;
pub use outbound::add_outbound_transitions;

use super::{MasterStateTable, StateTableBuilder};

/// The call lifecycle as shipped
pub fn build_default_table() -> MasterStateTable {
    let mut builder = StateTableBuilder::new();
    add_outbound_transitions(&mut builder);
    add_inbound_transitions(&mut builder);
    add_common_transitions(&mut builder);
    builder.build()
}
