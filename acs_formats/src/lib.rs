pub mod builder;
pub mod image;
pub mod pcode;

pub use builder::{ImageBuilder, Label};
pub use image::{OPEN_SCRIPTS_BASE, Program, ScriptImage, ScriptInfo};
pub use pcode::{
    BinaryOp, Decoded, Instruction, MAP_VAR_COUNT, MAX_SCRIPT_VARS, MAX_SPECIAL_ARGS, Opcode,
    Surface, UnaryOp, VarOp, VarScope, WORLD_VAR_COUNT,
};
