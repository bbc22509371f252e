use serde::{Deserialize, Serialize};

use crate::dispatch::Fault;

pub const STACK_DEPTH: usize = 32;

/// Bounded operand stack owned by one script instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperandStack {
    cells: Vec<i32>,
}

impl OperandStack {
    pub fn new() -> Self {
        OperandStack {
            cells: Vec::with_capacity(STACK_DEPTH),
        }
    }

    pub fn push(&mut self, value: i32) -> Result<(), Fault> {
        if self.cells.len() >= STACK_DEPTH {
            return Err(Fault::StackOverflow);
        }
        self.cells.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<i32, Fault> {
        self.cells.pop().ok_or(Fault::StackUnderflow)
    }

    pub fn top(&self) -> Result<i32, Fault> {
        self.cells.last().copied().ok_or(Fault::StackUnderflow)
    }

    /// Pops `N` values and returns them in push order.
    pub fn pop_array<const N: usize>(&mut self) -> Result<[i32; N], Fault> {
        let mut values = [0; N];
        for slot in values.iter_mut().rev() {
            *slot = self.pop()?;
        }
        Ok(values)
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.cells
    }

    pub(crate) fn validate(&self) -> bool {
        self.cells.len() <= STACK_DEPTH
    }
}
