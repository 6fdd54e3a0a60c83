//! Core data model of a state hierarchy.
//!
//! This module contains the plain data the rest of the crate operates on:
//! - Values and declared data types with their compatibility predicate
//! - Data ports and scoped variables
//! - Outcomes, including the reserved universal ones
//! - Transitions and data flows
//! - The polymorphic [`State`] node and [`StatePath`] addressing
//!
//! Everything here is serializable and free of runtime behaviour.

mod elements;
mod error;
mod ids;
mod outcome;
mod port;
mod state;
mod value;

pub use elements::{DataFlow, Transition};
pub use error::ModelError;
pub use ids::{
    generate_state_id, DataFlowId, OutcomeId, PortId, StateId, StatePath, TransitionId,
};
pub use outcome::{default_outcomes, is_declarable, Outcome, Termination, ABORTED, PREEMPTED, SUCCESS};
pub use port::{check_default_value, DataPort, PortKind, ScopedVariable};
pub use state::{Container, LibraryRef, State, StateKind, StateType};
pub use value::{DataType, Value, DEFERRED_SIGIL};
