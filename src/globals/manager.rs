//! The locked key/value store shared by all executing branches.

use super::error::GlobalVariableError;
use crate::core::Value;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Capability returned by [`GlobalVariableManager::lock`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessToken(Uuid);

impl AccessToken {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// A value stored by reference: every reader sees writes through the same cell.
pub type SharedValue = Arc<RwLock<Value>>;

#[derive(Debug)]
enum Slot {
    Owned(Value),
    Shared(SharedValue),
}

/// Result of a read: a private copy or the live shared cell.
#[derive(Clone, Debug)]
pub enum GlobalValue {
    Value(Value),
    Reference(SharedValue),
}

impl GlobalValue {
    /// A copy of the current value.
    pub fn into_value(self) -> Value {
        match self {
            Self::Value(value) => value,
            Self::Reference(cell) => cell.read().clone(),
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Reference(_))
    }
}

/// Options of [`GlobalVariableManager::set_with`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SetOptions {
    /// Store the value in a shared cell that readers may borrow.
    pub by_reference: bool,
    /// Token of a lock the caller already holds on the key.
    pub token: Option<AccessToken>,
}

/// Options of [`GlobalVariableManager::get_with`].
#[derive(Clone, Copy, Debug, Default)]
pub struct GetOptions {
    /// `Some(true)` demands the shared cell, `Some(false)` demands a copy,
    /// `None` returns the cell only if the key is stored by reference.
    pub by_reference: Option<bool>,
    /// Token of a lock the caller already holds on the key.
    pub token: Option<AccessToken>,
}

#[derive(Debug, Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    holders: HashMap<String, AccessToken>,
}

/// Process-wide keyed store with per-key locks and access tokens.
///
/// Every operation runs under one internal mutex, so each call is atomic with
/// respect to every other call on the same key. [`lock`](Self::lock) and
/// [`unlock`](Self::unlock) extend that to read-modify-write sequences:
/// while a key is locked, writes without the matching token fail with
/// [`GlobalVariableError::LockConflict`] and token-less reads wait for the
/// release.
///
/// The manager is an explicit dependency: create one, wrap it in an `Arc`
/// and hand it to the [`ExecutionEngine`](crate::engine::ExecutionEngine).
///
/// # Example
///
/// ```rust
/// use statecraft::core::Value;
/// use statecraft::globals::{GlobalVariableManager, SetOptions};
///
/// let globals = GlobalVariableManager::new();
/// globals.set("counter", Value::Int(1)).unwrap();
///
/// let token = globals.lock("counter").unwrap();
/// let current = globals.get_locked("counter", token).unwrap().and_then(|v| v.as_i64());
/// globals
///     .set_with(
///         "counter",
///         Value::Int(current.unwrap_or_default() + 1),
///         SetOptions { by_reference: false, token: Some(token) },
///     )
///     .unwrap();
/// globals.unlock("counter", token).unwrap();
///
/// assert_eq!(globals.get("counter").unwrap(), Some(Value::Int(2)));
/// ```
#[derive(Debug, Default)]
pub struct GlobalVariableManager {
    inner: Mutex<Inner>,
    released: Condvar,
    wait_timeout: Option<Duration>,
}

impl GlobalVariableManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager whose token-less waits give up with `LockConflict` after `timeout`.
    pub fn with_wait_timeout(timeout: Option<Duration>) -> Self {
        Self {
            wait_timeout: timeout,
            ..Self::default()
        }
    }

    /// Store a copy of `value`.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), GlobalVariableError> {
        self.set_with(key, value, SetOptions::default())
    }

    /// Store a value while holding the key's lock.
    pub fn set_locked(
        &self,
        key: &str,
        value: impl Into<Value>,
        token: AccessToken,
    ) -> Result<(), GlobalVariableError> {
        self.set_with(
            key,
            value,
            SetOptions {
                by_reference: false,
                token: Some(token),
            },
        )
    }

    /// Store a value by copy or in a shared cell.
    ///
    /// Storing by reference into a key that already holds a shared cell writes
    /// through the cell, so outstanding references observe the new value.
    pub fn set_with(
        &self,
        key: &str,
        value: impl Into<Value>,
        options: SetOptions,
    ) -> Result<(), GlobalVariableError> {
        let value = value.into();
        let mut inner = self.inner.lock();
        check_holder(&inner, key, options.token)?;

        if !options.by_reference {
            inner.slots.insert(key.to_string(), Slot::Owned(value));
        } else if let Some(Slot::Shared(cell)) = inner.slots.get(key) {
            *cell.write() = value;
        } else {
            inner
                .slots
                .insert(key.to_string(), Slot::Shared(Arc::new(RwLock::new(value))));
        }
        debug!(key, by_reference = options.by_reference, "set global variable");
        Ok(())
    }

    /// Install an existing shared cell under `key`.
    pub fn set_shared(
        &self,
        key: &str,
        cell: SharedValue,
        token: Option<AccessToken>,
    ) -> Result<(), GlobalVariableError> {
        let mut inner = self.inner.lock();
        check_holder(&inner, key, token)?;
        inner.slots.insert(key.to_string(), Slot::Shared(cell));
        debug!(key, "set shared global variable");
        Ok(())
    }

    /// A copy of the value under `key`, waiting while another caller holds its lock.
    pub fn get(&self, key: &str) -> Result<Option<Value>, GlobalVariableError> {
        Ok(self
            .get_with(
                key,
                GetOptions {
                    by_reference: Some(false),
                    token: None,
                },
            )?
            .map(GlobalValue::into_value))
    }

    /// Like [`get`](Self::get), falling back to `default` for absent keys.
    pub fn get_or(&self, key: &str, default: impl Into<Value>) -> Result<Value, GlobalVariableError> {
        Ok(self.get(key)?.unwrap_or_else(|| default.into()))
    }

    /// A copy of the value under a key the caller has locked.
    pub fn get_locked(
        &self,
        key: &str,
        token: AccessToken,
    ) -> Result<Option<Value>, GlobalVariableError> {
        Ok(self
            .get_with(
                key,
                GetOptions {
                    by_reference: Some(false),
                    token: Some(token),
                },
            )?
            .map(GlobalValue::into_value))
    }

    /// Read a value, by copy or as the live shared cell.
    ///
    /// A token that does not hold the key's lock fails with `LockConflict`;
    /// no token at all waits for the lock to be released.
    pub fn get_with(
        &self,
        key: &str,
        options: GetOptions,
    ) -> Result<Option<GlobalValue>, GlobalVariableError> {
        let mut inner = self.inner.lock();
        match options.token {
            Some(_) => check_holder(&inner, key, options.token)?,
            None => self.wait_for_release(&mut inner, key)?,
        }

        let value = match (inner.slots.get(key), options.by_reference) {
            (None, _) => None,
            (Some(Slot::Owned(_)), Some(true)) => {
                return Err(GlobalVariableError::NotReferenceable {
                    key: key.to_string(),
                })
            }
            (Some(Slot::Owned(value)), _) => Some(GlobalValue::Value(value.clone())),
            (Some(Slot::Shared(cell)), Some(false)) => {
                Some(GlobalValue::Value(cell.read().clone()))
            }
            (Some(Slot::Shared(cell)), _) => Some(GlobalValue::Reference(Arc::clone(cell))),
        };
        Ok(value)
    }

    /// Acquire the key's lock, waiting for a current holder to release it.
    pub fn lock(&self, key: &str) -> Result<AccessToken, GlobalVariableError> {
        let mut inner = self.inner.lock();
        if !inner.slots.contains_key(key) {
            return Err(GlobalVariableError::NotFound {
                key: key.to_string(),
            });
        }
        self.wait_for_release(&mut inner, key)?;
        let token = AccessToken::new();
        inner.holders.insert(key.to_string(), token);
        debug!(key, "locked global variable");
        Ok(token)
    }

    pub fn unlock(&self, key: &str, token: AccessToken) -> Result<(), GlobalVariableError> {
        let mut inner = self.inner.lock();
        if inner.holders.get(key) != Some(&token) {
            return Err(GlobalVariableError::WrongToken {
                key: key.to_string(),
            });
        }
        inner.holders.remove(key);
        drop(inner);
        self.released.notify_all();
        debug!(key, "unlocked global variable");
        Ok(())
    }

    /// Remove a key, waiting for a current holder to release it.
    pub fn delete(&self, key: &str) -> Result<Value, GlobalVariableError> {
        self.delete_with(key, None)
    }

    /// Remove a key. With the holding token the key is removed together with its lock.
    pub fn delete_with(
        &self,
        key: &str,
        token: Option<AccessToken>,
    ) -> Result<Value, GlobalVariableError> {
        let mut inner = self.inner.lock();
        if !inner.slots.contains_key(key) {
            return Err(GlobalVariableError::NotFound {
                key: key.to_string(),
            });
        }
        match token {
            Some(_) => {
                check_holder(&inner, key, token)?;
                inner.holders.remove(key);
            }
            None => self.wait_for_release(&mut inner, key)?,
        }
        let removed = match inner.slots.remove(key) {
            Some(Slot::Owned(value)) => value,
            Some(Slot::Shared(cell)) => cell.read().clone(),
            None => Value::Null,
        };
        drop(inner);
        self.released.notify_all();
        debug!(key, "deleted global variable");
        Ok(removed)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.inner.lock().slots.contains_key(key)
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.inner.lock().holders.contains_key(key)
    }

    pub fn can_be_referenced(&self, key: &str) -> bool {
        matches!(self.inner.lock().slots.get(key), Some(Slot::Shared(_)))
    }

    /// All keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.lock().slots.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Copies of all current values, ignoring locks.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.inner
            .lock()
            .slots
            .iter()
            .map(|(key, slot)| {
                let value = match slot {
                    Slot::Owned(value) => value.clone(),
                    Slot::Shared(cell) => cell.read().clone(),
                };
                (key.clone(), value)
            })
            .collect()
    }

    /// Drop every key and lock.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.slots.clear();
        inner.holders.clear();
        drop(inner);
        self.released.notify_all();
        debug!("reset global variables");
    }

    fn wait_for_release(
        &self,
        inner: &mut MutexGuard<'_, Inner>,
        key: &str,
    ) -> Result<(), GlobalVariableError> {
        let deadline = self.wait_timeout.map(|timeout| Instant::now() + timeout);
        while inner.holders.contains_key(key) {
            match deadline {
                Some(deadline) => {
                    let timed_out = self.released.wait_until(inner, deadline).timed_out();
                    if timed_out && inner.holders.contains_key(key) {
                        return Err(GlobalVariableError::LockConflict {
                            key: key.to_string(),
                        });
                    }
                }
                None => self.released.wait(inner),
            }
        }
        Ok(())
    }
}

fn check_holder(
    inner: &Inner,
    key: &str,
    token: Option<AccessToken>,
) -> Result<(), GlobalVariableError> {
    match inner.holders.get(key) {
        Some(holder) if Some(*holder) != token => Err(GlobalVariableError::LockConflict {
            key: key.to_string(),
        }),
        _ => Ok(()),
    }
}
