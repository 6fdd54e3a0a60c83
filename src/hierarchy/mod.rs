//! Editing and consistency of the state hierarchy.
//!
//! - [`State`](crate::core::State) editing methods enforce the per-container
//!   invariants: one transition per `(state, outcome)`, one data flow per sink,
//!   type-compatible data flows, no state inside its own subtree
//! - [`validate`] re-checks a whole tree and accumulates every violation
//! - [`heal_dangling_transitions`] repairs transitions whose target vanished
//! - [`plan_group`] and [`plan_ungroup`] compute the primitive actions of the
//!   two composite restructuring edits

mod container;
mod group;
mod validate;

pub use container::RemovedState;
pub use group::{plan_group, plan_ungroup, GroupPlan};
pub use validate::{heal_dangling_transitions, validate, validate_all};
