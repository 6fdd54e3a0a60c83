//! Registry of the state machines open in one process.

use super::StateMachine;
use crate::core::ModelError;
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

/// State machines keyed by id, one of them active.
///
/// The first machine added becomes the active one.
#[derive(Debug, Default)]
pub struct StateMachineManager {
    machines: BTreeMap<Uuid, StateMachine>,
    active: Option<Uuid>,
}

impl StateMachineManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, machine: StateMachine) -> Uuid {
        let id = machine.id();
        self.machines.insert(id, machine);
        if self.active.is_none() {
            self.active = Some(id);
        }
        debug!(machine = %id, "added state machine");
        id
    }

    /// Remove a machine that is not running.
    pub fn remove(&mut self, id: Uuid) -> Result<StateMachine, ModelError> {
        match self.machines.get(&id) {
            None => return Err(ModelError::NotFound(format!("state machine {id}"))),
            Some(machine) if machine.is_running() => return Err(ModelError::MachineRunning),
            Some(_) => {}
        }
        if self.active == Some(id) {
            self.active = None;
        }
        debug!(machine = %id, "removed state machine");
        self.machines
            .remove(&id)
            .ok_or_else(|| ModelError::NotFound(format!("state machine {id}")))
    }

    pub fn get(&self, id: Uuid) -> Option<&StateMachine> {
        self.machines.get(&id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut StateMachine> {
        self.machines.get_mut(&id)
    }

    pub fn set_active(&mut self, id: Uuid) -> Result<(), ModelError> {
        if !self.machines.contains_key(&id) {
            return Err(ModelError::NotFound(format!("state machine {id}")));
        }
        self.active = Some(id);
        Ok(())
    }

    pub fn active_id(&self) -> Option<Uuid> {
        self.active
    }

    pub fn active(&self) -> Option<&StateMachine> {
        self.active.and_then(|id| self.machines.get(&id))
    }

    pub fn active_mut(&mut self) -> Option<&mut StateMachine> {
        self.active.and_then(|id| self.machines.get_mut(&id))
    }

    pub fn ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.machines.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }
}
