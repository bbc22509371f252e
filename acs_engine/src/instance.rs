use serde::{Deserialize, Serialize};

use acs_formats::{ScriptInfo, MAX_SPECIAL_ARGS};

use crate::stack::OperandStack;
use crate::vars::ScriptVars;

/// Opaque handle the host uses for a simulation entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub u32);

/// Opaque handle the host uses for a map line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineId(pub u32);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineSide {
    #[default]
    Front,
    Back,
}

impl LineSide {
    pub fn as_int(self) -> i32 {
        match self {
            LineSide::Front => 0,
            LineSide::Back => 1,
        }
    }
}

/// Who or what caused a script to start. Open scripts have no trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub activator: Option<ActorId>,
    pub line: Option<LineId>,
    pub side: LineSide,
}

impl Trigger {
    pub fn none() -> Self {
        Trigger::default()
    }

    pub fn actor(activator: ActorId) -> Self {
        Trigger {
            activator: Some(activator),
            ..Trigger::default()
        }
    }

    pub fn line(activator: Option<ActorId>, line: LineId, side: LineSide) -> Self {
        Trigger {
            activator,
            line: Some(line),
            side,
        }
    }
}

/// Run state of a live instance. `Stopped` is represented by the absence of
/// an instance; see [`ScriptStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "on", rename_all = "snake_case")]
pub enum ScriptState {
    Running,
    Suspended,
    WaitingOnTag(i32),
    WaitingOnPoly(i32),
    WaitingOnScript(i32),
    /// Teardown requested; honoured at the next scheduling pass.
    Terminating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptStatus {
    Stopped,
    Running,
    Suspended,
    Waiting,
    Terminating,
}

impl From<Option<ScriptState>> for ScriptStatus {
    fn from(state: Option<ScriptState>) -> Self {
        match state {
            None => ScriptStatus::Stopped,
            Some(ScriptState::Running) => ScriptStatus::Running,
            Some(ScriptState::Suspended) => ScriptStatus::Suspended,
            Some(ScriptState::Terminating) => ScriptStatus::Terminating,
            Some(_) => ScriptStatus::Waiting,
        }
    }
}

/// One execution of a script definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptInstance {
    pub number: i32,
    /// Index of the definition in the loaded image.
    pub definition: usize,
    /// Cell index of the next instruction to execute.
    pub pc: usize,
    pub stack: OperandStack,
    pub locals: ScriptVars,
    pub state: ScriptState,
    pub delay: u32,
    pub trigger: Trigger,
}

impl ScriptInstance {
    pub fn new(
        definition: usize,
        info: &ScriptInfo,
        args: &[i32; MAX_SPECIAL_ARGS],
        trigger: Trigger,
    ) -> Self {
        let mut locals = ScriptVars::default();
        for (index, value) in args.iter().take(info.arg_count).enumerate() {
            locals.set(index, *value);
        }
        ScriptInstance {
            number: info.number,
            definition,
            pc: info.entry,
            stack: OperandStack::new(),
            locals,
            state: ScriptState::Running,
            delay: 0,
            trigger,
        }
    }
}
