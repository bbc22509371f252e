use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::instance::{ScriptInstance, ScriptState};

/// Live script instances keyed by a monotonically increasing handle.
///
/// Handle order is creation order, which is the order instances are
/// scheduled within a tick. A script number has at most one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceTable {
    next_handle: u32,
    records: BTreeMap<u32, ScriptInstance>,
}

impl InstanceTable {
    pub fn new() -> Self {
        InstanceTable {
            next_handle: 1,
            records: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, instance: ScriptInstance) -> u32 {
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        self.records.insert(handle, instance);
        handle
    }

    pub fn find_handle(&self, number: i32) -> Option<u32> {
        self.records
            .iter()
            .find_map(|(handle, instance)| (instance.number == number).then_some(*handle))
    }

    pub fn state_of(&self, number: i32) -> Option<ScriptState> {
        self.records
            .values()
            .find(|instance| instance.number == number)
            .map(|instance| instance.state)
    }

    /// Handle the next insert will be given.
    pub fn next_handle(&self) -> u32 {
        self.next_handle
    }

    pub fn get(&self, handle: u32) -> Option<&ScriptInstance> {
        self.records.get(&handle)
    }

    pub fn get_mut(&mut self, handle: u32) -> Option<&mut ScriptInstance> {
        self.records.get_mut(&handle)
    }

    pub fn remove(&mut self, handle: u32) -> Option<ScriptInstance> {
        self.records.remove(&handle)
    }

    /// Snapshot of the handles alive right now. Instances created while the
    /// snapshot is walked are not part of it.
    pub fn active_handles(&self) -> Vec<u32> {
        self.records.keys().copied().collect()
    }

    pub fn contains_script(&self, number: i32) -> bool {
        self.find_handle(number).is_some()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &ScriptInstance)> {
        self.records.iter()
    }
}
