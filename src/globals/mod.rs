//! Global variables shared across executing branches.
//!
//! The [`GlobalVariableManager`] is the only state mutated across branch
//! boundaries during a run. Access is serialized per key; explicit
//! [`lock`](GlobalVariableManager::lock)/[`unlock`](GlobalVariableManager::unlock)
//! pairs with an [`AccessToken`] give callers read-modify-write sections.

mod error;
mod manager;

pub use error::GlobalVariableError;
pub use manager::{
    AccessToken, GetOptions, GlobalValue, GlobalVariableManager, SetOptions, SharedValue,
};
