use std::convert::TryFrom;
use std::fs::File;
use std::io::{Cursor, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail, ensure};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use memmap2::MmapOptions;
use serde::Serialize;

use crate::pcode::{
    self, Decoded, Instruction, MAX_SCRIPT_VARS, MAX_SPECIAL_ARGS, Opcode, Surface,
};

pub const IMAGE_MAGIC: &[u8; 4] = b"ACS\0";
/// Magic plus the info table offset; bytecode starts right after.
pub const HEADER_SIZE: usize = 8;
/// Script numbers at or above this are started automatically on map load.
pub const OPEN_SCRIPTS_BASE: i32 = 1000;

const CELL_SIZE: usize = 4;
const SCRIPT_RECORD_SIZE: usize = 12;

/// Static description of one script declared by the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptInfo {
    pub number: i32,
    /// Cell index of the first instruction.
    pub entry: usize,
    pub arg_count: usize,
    /// Declared as an open script (number offset by [`OPEN_SCRIPTS_BASE`]).
    pub open: bool,
}

/// Decoded instructions addressed by cell index.
#[derive(Debug, Clone, Default)]
pub struct Program {
    slots: Vec<Option<Decoded>>,
}

impl Program {
    pub fn fetch(&self, pc: usize) -> Option<&Decoded> {
        self.slots.get(pc).and_then(|slot| slot.as_ref())
    }

    pub fn is_instruction_boundary(&self, pc: usize) -> bool {
        self.fetch(pc).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Decoded)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(pc, slot)| slot.as_ref().map(|decoded| (pc, decoded)))
    }
}

/// A loaded script image: definitions, string table and decoded bytecode.
#[derive(Debug, Clone, Default)]
pub struct ScriptImage {
    scripts: Vec<ScriptInfo>,
    strings: Vec<String>,
    program: Program,
    byte_len: usize,
}

impl ScriptImage {
    /// Image that declares nothing; used when a map has no scripts.
    pub fn empty() -> Self {
        ScriptImage::default()
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("opening script image {}", path.display()))?;
        let length = file
            .metadata()
            .with_context(|| format!("reading metadata for {}", path.display()))?
            .len();
        if length == 0 {
            return Ok(ScriptImage::empty());
        }
        let mmap = unsafe { MmapOptions::new().map(&file) }
            .with_context(|| format!("memory-mapping script image {}", path.display()))?;
        ScriptImage::parse(&mmap).with_context(|| format!("parsing script image {}", path.display()))
    }

    /// Parses an image. Buffers too short to hold a header disable scripting
    /// rather than failing.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Ok(ScriptImage::empty());
        }
        ensure!(
            &bytes[0..4] == IMAGE_MAGIC,
            "script image missing ACS signature"
        );

        let cells: Vec<i32> = bytes
            .chunks_exact(CELL_SIZE)
            .map(LittleEndian::read_i32)
            .collect();

        let info_offset = LittleEndian::read_u32(&bytes[4..8]) as usize;
        ensure!(
            info_offset >= HEADER_SIZE && info_offset < bytes.len(),
            "info table offset {info_offset} outside image of {} bytes",
            bytes.len()
        );
        let code_end = info_offset / CELL_SIZE;

        let mut cursor = Cursor::new(bytes);
        cursor.seek(SeekFrom::Start(info_offset as u64))?;

        let script_count = read_count(&mut cursor, "script")?;
        ensure!(
            script_count
                .checked_mul(SCRIPT_RECORD_SIZE)
                .is_some_and(|size| info_offset + 4 + size <= bytes.len()),
            "script table with {script_count} entries runs past end of image"
        );

        let mut scripts = Vec::with_capacity(script_count);
        for index in 0..script_count {
            let raw_number = cursor.read_i32::<LittleEndian>()?;
            let offset = cursor.read_i32::<LittleEndian>()?;
            let arg_count = cursor.read_i32::<LittleEndian>()?;

            let entry = code_cell(offset, code_end)
                .with_context(|| format!("entry point of script record {index}"))?;
            let arg_count = usize::try_from(arg_count)
                .ok()
                .filter(|count| *count <= MAX_SCRIPT_VARS)
                .ok_or_else(|| anyhow!("script record {index} declares {arg_count} arguments"))?;

            let (number, open) = if raw_number >= OPEN_SCRIPTS_BASE {
                (raw_number - OPEN_SCRIPTS_BASE, true)
            } else {
                (raw_number, false)
            };
            ensure!(
                scripts.iter().all(|info: &ScriptInfo| info.number != number),
                "script {number} declared more than once"
            );

            scripts.push(ScriptInfo {
                number,
                entry,
                arg_count,
                open,
            });
        }

        let strings = if script_count == 0 && cursor.position() as usize + 4 > bytes.len() {
            Vec::new()
        } else {
            let string_count = read_count(&mut cursor, "string")?;
            ensure!(
                string_count
                    .checked_mul(CELL_SIZE)
                    .is_some_and(|size| cursor.position() as usize + size <= bytes.len()),
                "string table with {string_count} entries runs past end of image"
            );
            let mut strings = Vec::with_capacity(string_count);
            for index in 0..string_count {
                let offset = cursor
                    .read_u32::<LittleEndian>()
                    .with_context(|| format!("reading offset of string {index}"))?
                    as usize;
                let text = read_c_string(bytes, offset)
                    .with_context(|| format!("reading string {index}"))?;
                strings.push(text);
            }
            strings
        };

        let program = decode_reachable(&cells, code_end, &scripts)?;

        Ok(ScriptImage {
            scripts,
            strings,
            program,
            byte_len: bytes.len(),
        })
    }

    pub fn scripts(&self) -> &[ScriptInfo] {
        &self.scripts
    }

    pub fn find_script(&self, number: i32) -> Option<(usize, &ScriptInfo)> {
        self.scripts
            .iter()
            .enumerate()
            .find(|(_, info)| info.number == number)
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    pub fn string(&self, index: i32) -> Option<&str> {
        usize::try_from(index)
            .ok()
            .and_then(|index| self.strings.get(index))
            .map(String::as_str)
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

fn read_count(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<usize> {
    let count = cursor
        .read_i32::<LittleEndian>()
        .with_context(|| format!("reading {what} count"))?;
    usize::try_from(count).map_err(|_| anyhow!("negative {what} count {count}"))
}

/// Converts a byte offset from the image base into a cell index inside the
/// code area.
fn code_cell(offset: i32, code_end: usize) -> Result<usize> {
    let offset = usize::try_from(offset).map_err(|_| anyhow!("negative code offset {offset}"))?;
    ensure!(
        offset % CELL_SIZE == 0,
        "code offset {offset} is not cell aligned"
    );
    let cell = offset / CELL_SIZE;
    ensure!(
        cell >= HEADER_SIZE / CELL_SIZE && cell < code_end,
        "code offset {offset} outside code area"
    );
    Ok(cell)
}

fn read_c_string(bytes: &[u8], offset: usize) -> Result<String> {
    if offset >= bytes.len() {
        bail!("string offset {offset} beyond image length {}", bytes.len());
    }
    let end = bytes[offset..]
        .iter()
        .position(|&b| b == 0)
        .map(|len| offset + len)
        .unwrap_or(bytes.len());
    Ok(String::from_utf8_lossy(&bytes[offset..end]).into_owned())
}

/// Walks every path reachable from the declared entry points, decoding each
/// instruction once and checking its operands and branch targets.
fn decode_reachable(cells: &[i32], code_end: usize, scripts: &[ScriptInfo]) -> Result<Program> {
    let mut slots: Vec<Option<Decoded>> = vec![None; code_end];
    let mut pending: Vec<usize> = scripts.iter().map(|info| info.entry).collect();

    while let Some(pc) = pending.pop() {
        if slots[pc].is_some() {
            continue;
        }
        let decoded = decode_at(cells, pc, code_end)?;
        if decoded.instruction.falls_through() {
            ensure!(
                decoded.next < code_end,
                "execution falls off the end of the code area after cell {pc}"
            );
            pending.push(decoded.next);
        }
        if let Some(target) = decoded.instruction.branch_target() {
            pending.push(target);
        }
        slots[pc] = Some(decoded);
    }

    Ok(Program { slots })
}

fn decode_at(cells: &[i32], pc: usize, code_end: usize) -> Result<Decoded> {
    let code = cells[pc];
    let opcode = match Opcode::try_from(code) {
        Ok(opcode) => opcode,
        Err(code) => {
            return Ok(Decoded {
                instruction: Instruction::Unknown { code },
                next: pc + 1,
            });
        }
    };

    let width = opcode.operand_cells();
    ensure!(
        pc + width < code_end,
        "{opcode:?} at cell {pc} truncated by end of code area"
    );
    let operands = &cells[pc + 1..pc + 1 + width];
    let next = pc + 1 + width;

    let instruction = if let Some(simple) = pcode::simple(opcode) {
        simple
    } else if let Some((op, scope)) = pcode::variable_access(opcode) {
        let index = usize::try_from(operands[0])
            .ok()
            .filter(|index| *index < scope.capacity())
            .ok_or_else(|| {
                anyhow!(
                    "{opcode:?} at cell {pc} addresses {scope:?} variable {} of {}",
                    operands[0],
                    scope.capacity()
                )
            })?;
        Instruction::Variable { op, scope, index }
    } else {
        match opcode {
            Opcode::PushNumber => Instruction::PushNumber { value: operands[0] },
            Opcode::LSpec1 | Opcode::LSpec2 | Opcode::LSpec3 | Opcode::LSpec4 | Opcode::LSpec5 => {
                Instruction::LineSpecial {
                    special: operands[0],
                    argc: (opcode as i32 - Opcode::LSpec1 as i32 + 1) as u8,
                }
            }
            Opcode::LSpec1Direct
            | Opcode::LSpec2Direct
            | Opcode::LSpec3Direct
            | Opcode::LSpec4Direct
            | Opcode::LSpec5Direct => {
                let argc = width - 1;
                let mut args = [0; MAX_SPECIAL_ARGS];
                args[..argc].copy_from_slice(&operands[1..]);
                Instruction::LineSpecialDirect {
                    special: operands[0],
                    argc: argc as u8,
                    args,
                }
            }
            Opcode::Goto | Opcode::IfGoto | Opcode::IfNotGoto => {
                let target = code_cell(operands[0], code_end)
                    .with_context(|| format!("{opcode:?} at cell {pc}"))?;
                pcode::branch(opcode, target, 0)
            }
            Opcode::CaseGoto => {
                let target = code_cell(operands[1], code_end)
                    .with_context(|| format!("{opcode:?} at cell {pc}"))?;
                pcode::branch(opcode, target, operands[0])
            }
            Opcode::DelayDirect => Instruction::DelayDirect { ticks: operands[0] },
            Opcode::RandomDirect => Instruction::RandomDirect {
                min: operands[0],
                max: operands[1],
            },
            Opcode::ThingCountDirect => Instruction::ThingCountDirect {
                thing_type: operands[0],
                tid: operands[1],
            },
            Opcode::TagWaitDirect => Instruction::TagWaitDirect { tag: operands[0] },
            Opcode::PolyWaitDirect => Instruction::PolyWaitDirect { poly: operands[0] },
            Opcode::ScriptWaitDirect => Instruction::ScriptWaitDirect {
                script: operands[0],
            },
            Opcode::ChangeFloorDirect | Opcode::ChangeCeilingDirect => {
                let surface = if opcode == Opcode::ChangeFloorDirect {
                    Surface::Floor
                } else {
                    Surface::Ceiling
                };
                Instruction::ChangeFlatDirect {
                    surface,
                    tag: operands[0],
                    flat: operands[1],
                }
            }
            other => bail!("{other:?} at cell {pc} has no decoder"),
        }
    };

    Ok(Decoded { instruction, next })
}
