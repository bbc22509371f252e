use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use acs_formats::MAX_SPECIAL_ARGS;

use crate::instance::Trigger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Execute,
    Suspend,
    Terminate,
}

/// Start/suspend/terminate raised by a running script through a
/// script-control special.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRequest {
    pub kind: ActionKind,
    pub script: i32,
    pub map: i32,
    pub args: [i32; MAX_SPECIAL_ARGS],
    pub trigger: Trigger,
}

/// A request aimed at a map that is not currently loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredAction {
    pub script: i32,
    pub map: i32,
    pub kind: ActionKind,
    pub args: [i32; MAX_SPECIAL_ARGS],
}

/// Persistent store of actions waiting for their map. Survives map changes
/// within a game and is cleared by a new game.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeferredQueue {
    entries: VecDeque<DeferredAction>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `action`. A second execute for the same script and map is
    /// rejected; returns whether the action was stored.
    pub fn enqueue(&mut self, action: DeferredAction) -> bool {
        if action.kind == ActionKind::Execute
            && self.entries.iter().any(|queued| {
                queued.kind == ActionKind::Execute
                    && queued.script == action.script
                    && queued.map == action.map
            })
        {
            log::debug!(
                "script {} already queued for map {}",
                action.script,
                action.map
            );
            return false;
        }
        self.entries.push_back(action);
        true
    }

    /// Removes and returns every action for `map`, in arrival order.
    pub fn drain_for(&mut self, map: i32) -> Vec<DeferredAction> {
        let (matching, rest): (VecDeque<_>, VecDeque<_>) =
            self.entries.drain(..).partition(|action| action.map == map);
        self.entries = rest;
        matching.into_iter().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeferredAction> {
        self.entries.iter()
    }
}
