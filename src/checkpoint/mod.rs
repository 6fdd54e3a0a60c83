//! Saving and restoring state trees.
//!
//! A [`Checkpoint`] is a versioned, timestamped snapshot of a machine's tree
//! and, optionally, of the global variables. It encodes to JSON for humans and
//! to bincode for compact storage. Restoring goes through
//! [`StateMachine::load`], so libraries are expanded, dangling transitions are
//! healed and the result is validated without recording any undo history.
//!
//! # Example
//!
//! ```rust
//! use statecraft::checkpoint::Checkpoint;
//! use statecraft::core::{LibraryRef, State};
//! use statecraft::machine::StateMachine;
//!
//! let machine = StateMachine::new(State::hierarchy("ROOT", "root"));
//! let json = Checkpoint::capture(&machine).to_json().unwrap();
//!
//! let restored = Checkpoint::from_json(&json).unwrap();
//! let resolver = |_: &LibraryRef| -> Option<State> { None };
//! let machine = restored.restore(&resolver).unwrap();
//! assert_eq!(machine.root().id(), "ROOT");
//! assert!(machine.history().is_empty());
//! ```

use crate::core::{ModelError, State, Value};
use crate::globals::{GlobalVariableError, GlobalVariableManager};
use crate::machine::{LibraryResolver, StateMachine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Version identifier for checkpoint format
pub const CHECKPOINT_VERSION: u32 = 1;

/// Why a checkpoint could not be written, read or restored.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("checkpoint is not a valid binary snapshot: {0}")]
    Binary(#[from] bincode::Error),

    #[error("checkpoint format version {found} is not readable, expected {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// The stored tree failed library expansion or validation.
    #[error("stored state tree cannot be restored: {0}")]
    InvalidTree(#[from] ModelError),

    #[error("global variable '{key}' cannot be restored: {source}")]
    GlobalRejected {
        key: String,
        #[source]
        source: GlobalVariableError,
    },
}

/// Serializable snapshot of a state tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint format version
    pub version: u32,

    /// Unique checkpoint identifier
    pub id: Uuid,

    /// When the checkpoint was taken
    pub timestamp: DateTime<Utc>,

    /// Id of the machine the tree was taken from
    pub machine_id: Uuid,

    pub root: State,

    /// Global variable values at capture time; empty unless requested
    pub globals: BTreeMap<String, Value>,
}

impl Checkpoint {
    pub fn capture(machine: &StateMachine) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            machine_id: machine.id(),
            root: machine.root().clone(),
            globals: BTreeMap::new(),
        }
    }

    /// Also store a copy of every global variable.
    pub fn with_globals(mut self, globals: &GlobalVariableManager) -> Self {
        self.globals = globals.snapshot();
        self
    }

    pub fn to_json(&self) -> Result<String, CheckpointError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CheckpointError> {
        let checkpoint: Self = serde_json::from_str(json)?;
        checkpoint.check_version()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CheckpointError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CheckpointError> {
        let checkpoint: Self = bincode::deserialize(bytes)?;
        checkpoint.check_version()
    }

    fn check_version(self) -> Result<Self, CheckpointError> {
        if self.version == CHECKPOINT_VERSION {
            Ok(self)
        } else {
            Err(CheckpointError::UnsupportedVersion {
                found: self.version,
                supported: CHECKPOINT_VERSION,
            })
        }
    }

    /// Rebuild a machine from the stored tree.
    pub fn restore(self, resolver: &dyn LibraryResolver) -> Result<StateMachine, CheckpointError> {
        debug!(checkpoint = %self.id, taken = %self.timestamp, "restoring checkpoint");
        Ok(StateMachine::load(self.root, resolver)?)
    }

    /// Write the stored global variables back, overwriting current values.
    ///
    /// Stops at the first key another holder has locked.
    pub fn restore_globals(&self, globals: &GlobalVariableManager) -> Result<(), CheckpointError> {
        for (key, value) in &self.globals {
            globals.set(key, value.clone()).map_err(|source| {
                warn!(key = %key, error = %source, "global variable not restored");
                CheckpointError::GlobalRejected {
                    key: key.clone(),
                    source,
                }
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataPort, DataType, LibraryRef, PortKind, SUCCESS};

    fn machine() -> StateMachine {
        let mut root = State::hierarchy("ROOT", "root");
        let mut leaf = State::execution("A", "a", "noop");
        leaf.add_port(
            PortKind::Input,
            DataPort::new(0, "speed", DataType::Float, 1.5).unwrap(),
        )
        .unwrap();
        root.add_child(leaf).unwrap();
        root.set_start_state(Some("A".into())).unwrap();
        root.add_transition("A", SUCCESS, "ROOT", Some(SUCCESS)).unwrap();
        StateMachine::new(root)
    }

    fn no_libraries(_: &LibraryRef) -> Option<State> {
        None
    }

    #[test]
    fn json_and_bincode_preserve_the_tree() {
        let machine = machine();
        let checkpoint = Checkpoint::capture(&machine);

        let from_json = Checkpoint::from_json(&checkpoint.to_json().unwrap()).unwrap();
        assert_eq!(from_json, checkpoint);

        let from_bytes = Checkpoint::from_bytes(&checkpoint.to_bytes().unwrap()).unwrap();
        assert_eq!(from_bytes.root, *machine.root());

        let restored = from_bytes.restore(&no_libraries).unwrap();
        assert_eq!(restored.root(), machine.root());
    }

    #[test]
    fn foreign_versions_are_rejected() {
        let mut checkpoint = Checkpoint::capture(&machine());
        checkpoint.version = 99;
        let json = serde_json::to_string(&checkpoint).unwrap();
        assert!(matches!(
            Checkpoint::from_json(&json),
            Err(CheckpointError::UnsupportedVersion { found: 99, .. })
        ));
    }

    #[test]
    fn globals_round_trip() {
        let globals = GlobalVariableManager::new();
        globals.set("count", 3).unwrap();
        let checkpoint = Checkpoint::capture(&machine()).with_globals(&globals);

        let fresh = GlobalVariableManager::new();
        checkpoint.restore_globals(&fresh).unwrap();
        assert_eq!(fresh.get("count").unwrap(), Some(Value::Int(3)));
    }

    #[test]
    fn garbage_is_a_deserialization_error() {
        assert!(matches!(
            Checkpoint::from_json("{"),
            Err(CheckpointError::Json(_))
        ));
        assert!(matches!(
            Checkpoint::from_bytes(&[1, 2, 3]),
            Err(CheckpointError::Binary(_))
        ));
    }

    #[test]
    fn broken_tree_fails_to_restore() {
        let mut root = State::hierarchy("ROOT", "root");
        root.add_child(State::execution("A", "a", "noop")).unwrap();
        let checkpoint = Checkpoint::capture(&StateMachine::new(root));

        assert!(matches!(
            checkpoint.restore(&no_libraries),
            Err(CheckpointError::InvalidTree(ModelError::Validation(_)))
        ));
    }

    #[test]
    fn locked_global_is_not_overwritten() {
        let saved = GlobalVariableManager::new();
        saved.set("count", 3).unwrap();
        let checkpoint = Checkpoint::capture(&machine()).with_globals(&saved);

        let target = GlobalVariableManager::new();
        target.set("count", 1).unwrap();
        let token = target.lock("count").unwrap();
        match checkpoint.restore_globals(&target) {
            Err(CheckpointError::GlobalRejected { key, source }) => {
                assert_eq!(key, "count");
                assert!(matches!(source, GlobalVariableError::LockConflict { .. }));
            }
            other => panic!("Expected a rejected global, got {other:?}"),
        }
        target.unlock("count", token).unwrap();
        assert_eq!(target.get("count").unwrap(), Some(Value::Int(1)));
    }
}
