//! Undo/redo of structural edits.
//!
//! Mutations are explicit command values ([`Action`]) rather than intercepted
//! method calls. The editing surface applies one action per call and records
//! it in a [`HistoryLog`]; composite edits such as grouping are a single
//! [`Action::Batch`] and undo/redo as one unit.
//!
//! Execution never touches the log. Replaying history and loading a tree
//! happen in replay mode, which suppresses recording.

mod action;
mod log;

pub use action::Action;
pub use log::{HistoryEntry, HistoryLog};
