//! Identifiers and hierarchical paths.

use super::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a state, unique within its state machine.
pub type StateId = String;
/// Identifier of a data port or scoped variable, unique within its owning state.
pub type PortId = u32;
/// Identifier of an outcome. Negative values are reserved.
pub type OutcomeId = i64;
/// Identifier of a transition, unique within its container.
pub type TransitionId = u32;
/// Identifier of a data flow, unique within its container.
pub type DataFlowId = u32;

const PATH_SEPARATOR: char = '/';
const STATE_ID_LENGTH: usize = 6;

/// Generate a fresh random state id made of uppercase letters.
pub fn generate_state_id() -> StateId {
    Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(STATE_ID_LENGTH)
        .map(|b| char::from(b'A' + b % 26))
        .collect()
}

/// Location of a state in the hierarchy: the ids from the root down to it.
///
/// A path is never empty. It is the upward-lookup mechanism of the model:
/// the parent of a state is found by dropping the last segment.
///
/// # Example
///
/// ```rust
/// use statecraft::core::StatePath;
///
/// let path: StatePath = "ROOT/GROUP/LEAF".parse().unwrap();
/// assert_eq!(path.depth(), 2);
/// assert_eq!(path.last(), "LEAF");
/// assert_eq!(path.parent().unwrap().to_string(), "ROOT/GROUP");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatePath(Vec<StateId>);

impl StatePath {
    /// Path consisting of the root state only.
    pub fn root(id: impl Into<StateId>) -> Self {
        Self(vec![id.into()])
    }

    /// Path of a direct child of this path.
    pub fn child(&self, id: &str) -> Self {
        let mut ids = self.0.clone();
        ids.push(id.to_string());
        Self(ids)
    }

    /// Path of the enclosing container, `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.len() > 1 {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        } else {
            None
        }
    }

    /// Id of the addressed state.
    pub fn last(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    /// Id of the root state.
    pub fn first(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or_default()
    }

    pub fn ids(&self) -> &[StateId] {
        &self.0
    }

    /// Nesting depth; the root has depth 0.
    pub fn depth(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    /// True if `other` lies strictly below this path.
    pub fn is_ancestor_of(&self, other: &StatePath) -> bool {
        other.0.len() > self.0.len() && other.0.starts_with(&self.0)
    }
}

impl fmt::Display for StatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl FromStr for StatePath {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ids: Vec<StateId> = s
            .split(PATH_SEPARATOR)
            .map(|segment| segment.trim().to_string())
            .collect();
        if ids.iter().any(String::is_empty) {
            return Err(ModelError::Validation(format!(
                "malformed state path '{s}'"
            )));
        }
        Ok(Self(ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_uppercase_letters() {
        let id = generate_state_id();
        assert_eq!(id.len(), STATE_ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn parse_rejects_empty_segments() {
        assert!("ROOT//A".parse::<StatePath>().is_err());
        assert!("".parse::<StatePath>().is_err());
    }

    #[test]
    fn child_and_parent_are_inverse() {
        let root = StatePath::root("ROOT");
        let child = root.child("A");
        assert_eq!(child.parent(), Some(root.clone()));
        assert!(root.is_ancestor_of(&child));
        assert!(!child.is_ancestor_of(&root));
        assert_eq!(root.parent(), None);
        assert_eq!(child.to_string(), "ROOT/A");
    }
}
