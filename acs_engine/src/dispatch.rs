//! Instruction dispatcher.
//!
//! Executes decoded instructions for one script instance until the instance
//! yields, terminates or faults. The dispatcher never removes instances; it
//! only reports what happened through [`Step`] and leaves teardown to the
//! scheduler.

use rand::rngs::SmallRng;
use rand::Rng;
use thiserror::Error;

use acs_formats::{BinaryOp, Instruction, ScriptImage, UnaryOp, VarOp, VarScope, MAX_SPECIAL_ARGS};

use crate::deferred::{ActionKind, ScriptRequest};
use crate::host::{PrintStyle, ScriptHost, SoundOrigin};
use crate::instance::{ScriptInstance, ScriptState};
use crate::vars::{MapVars, ScriptVars, WorldVars};

/// Line specials that control other scripts. The VM services these itself
/// instead of forwarding them to the host.
pub const SPECIAL_SCRIPT_EXECUTE: i32 = 80;
pub const SPECIAL_SCRIPT_SUSPEND: i32 = 81;
pub const SPECIAL_SCRIPT_TERMINATE: i32 = 82;

/// Script-level fatal conditions. The owning instance is terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("unknown opcode {0}")]
    UnknownOpcode(i32),
    #[error("division by zero")]
    DivideByZero,
    #[error("modulus by zero")]
    ModuloByZero,
    #[error("runaway script: more than {0} instructions in one tick")]
    Runaway(u32),
    #[error("operand stack overflow")]
    StackOverflow,
    #[error("operand stack underflow")]
    StackUnderflow,
    #[error("string index {0} is not in the string table")]
    BadString(i32),
    #[error("instruction pointer {0} does not address an instruction")]
    BadInstructionPointer(usize),
}

/// Result of executing one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// The instance stays alive but gives up the rest of this tick.
    Yield,
    Terminate,
    Fault(Fault),
}

/// Accumulates text between BeginPrint and EndPrint.
#[derive(Debug, Clone, Default)]
pub struct PrintBuffer {
    text: String,
    limit: usize,
}

impl PrintBuffer {
    pub fn new(limit: usize) -> Self {
        PrintBuffer {
            text: String::new(),
            limit,
        }
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    /// Appends as much of `text` as fits; the remainder is dropped.
    pub fn append(&mut self, text: &str) {
        for ch in text.chars() {
            if self.text.len() + ch.len_utf8() > self.limit {
                log::debug!("print buffer full at {} bytes", self.limit);
                break;
            }
            self.text.push(ch);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// Everything an instruction can touch besides its own instance.
pub struct Dispatcher<'a> {
    pub image: &'a ScriptImage,
    pub world: &'a mut WorldVars,
    pub map: &'a mut MapVars,
    pub print: &'a mut PrintBuffer,
    pub rng: &'a mut SmallRng,
    pub host: &'a mut dyn ScriptHost,
    /// Script-control requests raised during the slice, applied by the
    /// scheduler once the slice ends.
    pub requests: &'a mut Vec<ScriptRequest>,
}

impl<'a> Dispatcher<'a> {
    /// Runs instructions until the instance stops being runnable. More than
    /// `limit` instructions in one slice is a runaway fault.
    pub fn run_slice(&mut self, instance: &mut ScriptInstance, limit: u32) -> Step {
        let mut executed: u32 = 0;
        loop {
            if executed >= limit {
                return Step::Fault(Fault::Runaway(limit));
            }
            executed += 1;
            match self.step(instance) {
                Step::Continue => {}
                outcome => return outcome,
            }
        }
    }

    pub fn step(&mut self, instance: &mut ScriptInstance) -> Step {
        match self.execute(instance) {
            Ok(step) => step,
            Err(fault) => Step::Fault(fault),
        }
    }

    fn execute(&mut self, instance: &mut ScriptInstance) -> Result<Step, Fault> {
        let image = self.image;
        let decoded = *image
            .program()
            .fetch(instance.pc)
            .ok_or(Fault::BadInstructionPointer(instance.pc))?;
        let mut next = decoded.next;
        let mut step = Step::Continue;

        match decoded.instruction {
            Instruction::Nop => {}
            Instruction::Terminate => step = Step::Terminate,
            Instruction::Suspend => {
                instance.state = ScriptState::Suspended;
                step = Step::Yield;
            }
            Instruction::PushNumber { value } => instance.stack.push(value)?,
            Instruction::LineSpecial { special, argc } => {
                let mut args = [0; MAX_SPECIAL_ARGS];
                for slot in args[..argc as usize].iter_mut().rev() {
                    *slot = instance.stack.pop()?;
                }
                self.line_special(instance, special, args);
            }
            Instruction::LineSpecialDirect { special, args, .. } => {
                self.line_special(instance, special, args);
            }
            Instruction::Binary { op } => {
                let right = instance.stack.pop()?;
                let left = instance.stack.pop()?;
                instance.stack.push(binary(op, left, right)?)?;
            }
            Instruction::Unary { op } => {
                let value = instance.stack.pop()?;
                let result = match op {
                    UnaryOp::NegateLogical => (value == 0) as i32,
                    UnaryOp::Minus => value.wrapping_neg(),
                };
                instance.stack.push(result)?;
            }
            Instruction::Variable { op, scope, index } => {
                self.variable(instance, op, scope, index)?;
            }
            Instruction::Goto { target } => next = target,
            Instruction::IfGoto { target } => {
                if instance.stack.pop()? != 0 {
                    next = target;
                }
            }
            Instruction::IfNotGoto { target } => {
                if instance.stack.pop()? == 0 {
                    next = target;
                }
            }
            Instruction::CaseGoto { value, target } => {
                if instance.stack.top()? == value {
                    instance.stack.pop()?;
                    next = target;
                }
            }
            Instruction::Drop => {
                instance.stack.pop()?;
            }
            Instruction::Delay => {
                let ticks = instance.stack.pop()?;
                step = delay(instance, ticks);
            }
            Instruction::DelayDirect { ticks } => step = delay(instance, ticks),
            Instruction::Random => {
                let max = instance.stack.pop()?;
                let min = instance.stack.pop()?;
                instance.stack.push(self.random(min, max))?;
            }
            Instruction::RandomDirect { min, max } => {
                instance.stack.push(self.random(min, max))?;
            }
            Instruction::ThingCount => {
                let tid = instance.stack.pop()?;
                let thing_type = instance.stack.pop()?;
                instance.stack.push(self.host.thing_count(thing_type, tid))?;
            }
            Instruction::ThingCountDirect { thing_type, tid } => {
                instance.stack.push(self.host.thing_count(thing_type, tid))?;
            }
            Instruction::TagWait => {
                let tag = instance.stack.pop()?;
                step = wait(instance, ScriptState::WaitingOnTag(tag));
            }
            Instruction::TagWaitDirect { tag } => {
                step = wait(instance, ScriptState::WaitingOnTag(tag));
            }
            Instruction::PolyWait => {
                let poly = instance.stack.pop()?;
                step = wait(instance, ScriptState::WaitingOnPoly(poly));
            }
            Instruction::PolyWaitDirect { poly } => {
                step = wait(instance, ScriptState::WaitingOnPoly(poly));
            }
            Instruction::ScriptWait => {
                let script = instance.stack.pop()?;
                step = wait(instance, ScriptState::WaitingOnScript(script));
            }
            Instruction::ScriptWaitDirect { script } => {
                step = wait(instance, ScriptState::WaitingOnScript(script));
            }
            Instruction::ChangeFlat { surface } => {
                let flat = string(image, instance.stack.pop()?)?;
                let tag = instance.stack.pop()?;
                self.host.change_flat(tag, surface, flat);
            }
            Instruction::ChangeFlatDirect { surface, tag, flat } => {
                let flat = string(image, flat)?;
                self.host.change_flat(tag, surface, flat);
            }
            Instruction::Restart => {
                next = image
                    .scripts()
                    .get(instance.definition)
                    .map(|info| info.entry)
                    .ok_or(Fault::BadInstructionPointer(instance.pc))?;
            }
            Instruction::LineSide => instance.stack.push(instance.trigger.side.as_int())?,
            Instruction::ClearLineSpecial => {
                if let Some(line) = instance.trigger.line {
                    self.host.clear_line_special(line);
                }
            }
            Instruction::BeginPrint => self.print.clear(),
            Instruction::PrintString => {
                let text = string(image, instance.stack.pop()?)?;
                self.print.append(text);
            }
            Instruction::PrintNumber => {
                let value = instance.stack.pop()?;
                self.print.append(&value.to_string());
            }
            Instruction::PrintCharacter => {
                let value = instance.stack.pop()?;
                let mut utf8 = [0; 4];
                self.print.append(char::from(value as u8).encode_utf8(&mut utf8));
            }
            Instruction::EndPrint => {
                self.host.print(
                    self.print.as_str(),
                    instance.trigger.activator,
                    PrintStyle::Normal,
                );
            }
            Instruction::EndPrintBold => {
                self.host.print(self.print.as_str(), None, PrintStyle::Bold);
            }
            Instruction::PlayerCount => instance.stack.push(self.host.player_count())?,
            Instruction::GameType => instance.stack.push(self.host.game_type().as_int())?,
            Instruction::GameSkill => instance.stack.push(self.host.game_skill())?,
            Instruction::Timer => instance.stack.push(self.host.level_time())?,
            Instruction::SectorSound => {
                let volume = instance.stack.pop()?;
                let sound = string(image, instance.stack.pop()?)?;
                self.host.start_sound(sound, volume, sector_origin(instance));
            }
            Instruction::AmbientSound => {
                let volume = instance.stack.pop()?;
                let sound = string(image, instance.stack.pop()?)?;
                self.host.start_sound(sound, volume, SoundOrigin::Ambient);
            }
            Instruction::SoundSequence => {
                let sequence = string(image, instance.stack.pop()?)?;
                self.host.start_sound_sequence(sequence, sector_origin(instance));
            }
            Instruction::ThingSound => {
                let volume = instance.stack.pop()?;
                let sound = string(image, instance.stack.pop()?)?;
                let tid = instance.stack.pop()?;
                self.host.start_sound(sound, volume, SoundOrigin::Things(tid));
            }
            Instruction::SetLineTexture => {
                let texture = string(image, instance.stack.pop()?)?;
                let position = instance.stack.pop()?;
                let side = instance.stack.pop()?;
                let line_tag = instance.stack.pop()?;
                self.host.set_line_texture(line_tag, side, position, texture);
            }
            Instruction::SetLineBlocking => {
                let blocking = instance.stack.pop()? != 0;
                let line_tag = instance.stack.pop()?;
                self.host.set_line_blocking(line_tag, blocking);
            }
            Instruction::SetLineSpecial => {
                let args = instance.stack.pop_array::<MAX_SPECIAL_ARGS>()?;
                let special = instance.stack.pop()?;
                let line_tag = instance.stack.pop()?;
                self.host.set_line_special(line_tag, special, args);
            }
            Instruction::Unknown { code } => return Err(Fault::UnknownOpcode(code)),
        }

        instance.pc = next;
        Ok(step)
    }

    fn line_special(&mut self, instance: &ScriptInstance, special: i32, args: [i32; 5]) {
        let kind = match special {
            SPECIAL_SCRIPT_EXECUTE => ActionKind::Execute,
            SPECIAL_SCRIPT_SUSPEND => ActionKind::Suspend,
            SPECIAL_SCRIPT_TERMINATE => ActionKind::Terminate,
            _ => {
                self.host.execute_special(special, args, &instance.trigger);
                return;
            }
        };
        self.requests.push(ScriptRequest {
            kind,
            script: args[0],
            map: args[1],
            args: [args[2], args[3], args[4], 0, 0],
            trigger: instance.trigger,
        });
    }

    fn variable(
        &mut self,
        instance: &mut ScriptInstance,
        op: VarOp,
        scope: VarScope,
        index: usize,
    ) -> Result<(), Fault> {
        let current = self.load(&instance.locals, scope, index);
        let updated = match op {
            VarOp::Push => return instance.stack.push(current),
            VarOp::Assign => instance.stack.pop()?,
            VarOp::Inc => current.wrapping_add(1),
            VarOp::Dec => current.wrapping_sub(1),
            VarOp::Add => binary(BinaryOp::Add, current, instance.stack.pop()?)?,
            VarOp::Sub => binary(BinaryOp::Subtract, current, instance.stack.pop()?)?,
            VarOp::Mul => binary(BinaryOp::Multiply, current, instance.stack.pop()?)?,
            VarOp::Div => binary(BinaryOp::Divide, current, instance.stack.pop()?)?,
            VarOp::Mod => binary(BinaryOp::Modulus, current, instance.stack.pop()?)?,
        };
        self.store(&mut instance.locals, scope, index, updated);
        Ok(())
    }

    fn load(&self, locals: &ScriptVars, scope: VarScope, index: usize) -> i32 {
        match scope {
            VarScope::Script => locals.get(index),
            VarScope::Map => self.map.get(index),
            VarScope::World => self.world.get(index),
        }
    }

    fn store(&mut self, locals: &mut ScriptVars, scope: VarScope, index: usize, value: i32) {
        match scope {
            VarScope::Script => locals.set(index, value),
            VarScope::Map => self.map.set(index, value),
            VarScope::World => self.world.set(index, value),
        }
    }

    fn random(&mut self, min: i32, max: i32) -> i32 {
        if max <= min {
            return min;
        }
        self.rng.gen_range(min..=max)
    }
}

fn binary(op: BinaryOp, left: i32, right: i32) -> Result<i32, Fault> {
    let value = match op {
        BinaryOp::Add => left.wrapping_add(right),
        BinaryOp::Subtract => left.wrapping_sub(right),
        BinaryOp::Multiply => left.wrapping_mul(right),
        BinaryOp::Divide => {
            if right == 0 {
                return Err(Fault::DivideByZero);
            }
            left.wrapping_div(right)
        }
        BinaryOp::Modulus => {
            if right == 0 {
                return Err(Fault::ModuloByZero);
            }
            left.wrapping_rem(right)
        }
        BinaryOp::Eq => (left == right) as i32,
        BinaryOp::Ne => (left != right) as i32,
        BinaryOp::Lt => (left < right) as i32,
        BinaryOp::Gt => (left > right) as i32,
        BinaryOp::Le => (left <= right) as i32,
        BinaryOp::Ge => (left >= right) as i32,
        BinaryOp::AndLogical => (left != 0 && right != 0) as i32,
        BinaryOp::OrLogical => (left != 0 || right != 0) as i32,
        BinaryOp::AndBitwise => left & right,
        BinaryOp::OrBitwise => left | right,
        BinaryOp::EorBitwise => left ^ right,
        BinaryOp::LShift => left.wrapping_shl(right as u32),
        BinaryOp::RShift => left.wrapping_shr(right as u32),
    };
    Ok(value)
}

fn delay(instance: &mut ScriptInstance, ticks: i32) -> Step {
    instance.delay = ticks.max(0) as u32;
    Step::Yield
}

fn wait(instance: &mut ScriptInstance, state: ScriptState) -> Step {
    instance.state = state;
    Step::Yield
}

fn string(image: &ScriptImage, index: i32) -> Result<&str, Fault> {
    image.string(index).ok_or(Fault::BadString(index))
}

fn sector_origin(instance: &ScriptInstance) -> SoundOrigin {
    instance
        .trigger
        .line
        .map(SoundOrigin::LineSector)
        .unwrap_or(SoundOrigin::Ambient)
}
