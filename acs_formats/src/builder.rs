//! Small assembler for script images.
//!
//! Used by tests and tooling to produce images byte-compatible with the
//! compiler's output without shipping binary fixtures.

use crate::image::{HEADER_SIZE, IMAGE_MAGIC};
use crate::pcode::Opcode;

/// Forward-referencable code position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug, Default)]
pub struct ImageBuilder {
    code: Vec<i32>,
    scripts: Vec<(i32, usize, i32)>,
    strings: Vec<String>,
    labels: Vec<Option<usize>>,
    fixups: Vec<(usize, Label)>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a script whose entry point is the next emitted cell.
    pub fn script(&mut self, number: i32, arg_count: i32) -> &mut Self {
        self.scripts.push((number, self.code.len(), arg_count));
        self
    }

    /// Interns a string and returns its table index.
    pub fn string(&mut self, text: &str) -> i32 {
        if let Some(index) = self.strings.iter().position(|s| s == text) {
            return index as i32;
        }
        self.strings.push(text.to_string());
        (self.strings.len() - 1) as i32
    }

    pub fn raw(&mut self, cell: i32) -> &mut Self {
        self.code.push(cell);
        self
    }

    pub fn op(&mut self, opcode: Opcode) -> &mut Self {
        self.raw(opcode as i32)
    }

    pub fn op1(&mut self, opcode: Opcode, operand: i32) -> &mut Self {
        self.op(opcode).raw(operand)
    }

    pub fn ops(&mut self, opcode: Opcode, operands: &[i32]) -> &mut Self {
        self.op(opcode);
        for operand in operands {
            self.raw(*operand);
        }
        self
    }

    pub fn push(&mut self, value: i32) -> &mut Self {
        self.op1(Opcode::PushNumber, value)
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.code.len());
        self
    }

    /// Emits a Goto/IfGoto/IfNotGoto to `label`.
    pub fn branch(&mut self, opcode: Opcode, label: Label) -> &mut Self {
        self.op(opcode);
        self.fixups.push((self.code.len(), label));
        self.raw(0)
    }

    pub fn case_goto(&mut self, value: i32, label: Label) -> &mut Self {
        self.op1(Opcode::CaseGoto, value);
        self.fixups.push((self.code.len(), label));
        self.raw(0)
    }

    /// Byte offset from the image base of a code cell.
    pub fn cell_offset(cell: usize) -> i32 {
        (HEADER_SIZE + cell * 4) as i32
    }

    pub fn build(&self) -> Vec<u8> {
        let mut code = self.code.clone();
        for (cell, label) in &self.fixups {
            let target = self.labels[label.0]
                .unwrap_or_else(|| panic!("label {} never bound", label.0));
            code[*cell] = Self::cell_offset(target);
        }

        let mut out = Vec::new();
        out.extend_from_slice(IMAGE_MAGIC);
        out.extend_from_slice(&0u32.to_le_bytes());
        for cell in &code {
            out.extend_from_slice(&cell.to_le_bytes());
        }

        let mut string_offsets = Vec::with_capacity(self.strings.len());
        for text in &self.strings {
            string_offsets.push(out.len() as i32);
            out.extend_from_slice(text.as_bytes());
            out.push(0);
        }
        while out.len() % 4 != 0 {
            out.push(0);
        }

        let info_offset = out.len() as u32;
        out[4..8].copy_from_slice(&info_offset.to_le_bytes());
        out.extend_from_slice(&(self.scripts.len() as i32).to_le_bytes());
        for (number, entry, arg_count) in &self.scripts {
            out.extend_from_slice(&number.to_le_bytes());
            out.extend_from_slice(&Self::cell_offset(*entry).to_le_bytes());
            out.extend_from_slice(&arg_count.to_le_bytes());
        }
        out.extend_from_slice(&(string_offsets.len() as i32).to_le_bytes());
        for offset in string_offsets {
            out.extend_from_slice(&offset.to_le_bytes());
        }
        out
    }
}
