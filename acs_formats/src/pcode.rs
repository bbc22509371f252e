use std::convert::TryFrom;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Local variable slots per script instance (arguments come first).
pub const MAX_SCRIPT_VARS: usize = 10;
/// Map-scope variables, zeroed on every map load.
pub const MAP_VAR_COUNT: usize = 32;
/// World-scope variables, kept for the whole session.
pub const WORLD_VAR_COUNT: usize = 64;
/// Arguments accepted by a parameterized line special.
pub const MAX_SPECIAL_ARGS: usize = 5;

macro_rules! pcodes {
    ($($name:ident = $value:literal),* $(,)?) => {
        /// One-cell opcodes as emitted by the script compiler.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[repr(i32)]
        pub enum Opcode {
            $($name = $value),*
        }

        impl TryFrom<i32> for Opcode {
            type Error = i32;

            fn try_from(value: i32) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok(Opcode::$name),)*
                    other => Err(other),
                }
            }
        }
    };
}

pcodes! {
    Nop = 0,
    Terminate = 1,
    Suspend = 2,
    PushNumber = 3,
    LSpec1 = 4,
    LSpec2 = 5,
    LSpec3 = 6,
    LSpec4 = 7,
    LSpec5 = 8,
    LSpec1Direct = 9,
    LSpec2Direct = 10,
    LSpec3Direct = 11,
    LSpec4Direct = 12,
    LSpec5Direct = 13,
    Add = 14,
    Subtract = 15,
    Multiply = 16,
    Divide = 17,
    Modulus = 18,
    Eq = 19,
    Ne = 20,
    Lt = 21,
    Gt = 22,
    Le = 23,
    Ge = 24,
    AssignScriptVar = 25,
    AssignMapVar = 26,
    AssignWorldVar = 27,
    PushScriptVar = 28,
    PushMapVar = 29,
    PushWorldVar = 30,
    AddScriptVar = 31,
    AddMapVar = 32,
    AddWorldVar = 33,
    SubScriptVar = 34,
    SubMapVar = 35,
    SubWorldVar = 36,
    MulScriptVar = 37,
    MulMapVar = 38,
    MulWorldVar = 39,
    DivScriptVar = 40,
    DivMapVar = 41,
    DivWorldVar = 42,
    ModScriptVar = 43,
    ModMapVar = 44,
    ModWorldVar = 45,
    IncScriptVar = 46,
    IncMapVar = 47,
    IncWorldVar = 48,
    DecScriptVar = 49,
    DecMapVar = 50,
    DecWorldVar = 51,
    Goto = 52,
    IfGoto = 53,
    Drop = 54,
    Delay = 55,
    DelayDirect = 56,
    Random = 57,
    RandomDirect = 58,
    ThingCount = 59,
    ThingCountDirect = 60,
    TagWait = 61,
    TagWaitDirect = 62,
    PolyWait = 63,
    PolyWaitDirect = 64,
    ChangeFloor = 65,
    ChangeFloorDirect = 66,
    ChangeCeiling = 67,
    ChangeCeilingDirect = 68,
    Restart = 69,
    AndLogical = 70,
    OrLogical = 71,
    AndBitwise = 72,
    OrBitwise = 73,
    EorBitwise = 74,
    NegateLogical = 75,
    LShift = 76,
    RShift = 77,
    UnaryMinus = 78,
    IfNotGoto = 79,
    LineSide = 80,
    ScriptWait = 81,
    ScriptWaitDirect = 82,
    ClearLineSpecial = 83,
    CaseGoto = 84,
    BeginPrint = 85,
    EndPrint = 86,
    PrintString = 87,
    PrintNumber = 88,
    PrintCharacter = 89,
    PlayerCount = 90,
    GameType = 91,
    GameSkill = 92,
    Timer = 93,
    SectorSound = 94,
    AmbientSound = 95,
    SoundSequence = 96,
    SetLineTexture = 97,
    SetLineBlocking = 98,
    SetLineSpecial = 99,
    ThingSound = 100,
    EndPrintBold = 101,
}

impl Opcode {
    /// Number of inline operand cells that follow the opcode cell.
    pub fn operand_cells(self) -> usize {
        use Opcode::*;
        match self {
            PushNumber | LSpec1 | LSpec2 | LSpec3 | LSpec4 | LSpec5 => 1,
            LSpec1Direct => 2,
            LSpec2Direct => 3,
            LSpec3Direct => 4,
            LSpec4Direct => 5,
            LSpec5Direct => 6,
            AssignScriptVar | AssignMapVar | AssignWorldVar | PushScriptVar | PushMapVar
            | PushWorldVar | AddScriptVar | AddMapVar | AddWorldVar | SubScriptVar | SubMapVar
            | SubWorldVar | MulScriptVar | MulMapVar | MulWorldVar | DivScriptVar | DivMapVar
            | DivWorldVar | ModScriptVar | ModMapVar | ModWorldVar | IncScriptVar | IncMapVar
            | IncWorldVar | DecScriptVar | DecMapVar | DecWorldVar => 1,
            Goto | IfGoto | IfNotGoto => 1,
            DelayDirect | TagWaitDirect | PolyWaitDirect | ScriptWaitDirect => 1,
            RandomDirect | ThingCountDirect | ChangeFloorDirect | ChangeCeilingDirect
            | CaseGoto => 2,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VarScope {
    Script,
    Map,
    World,
}

impl VarScope {
    pub fn capacity(self) -> usize {
        match self {
            VarScope::Script => MAX_SCRIPT_VARS,
            VarScope::Map => MAP_VAR_COUNT,
            VarScope::World => WORLD_VAR_COUNT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VarOp {
    Assign,
    Push,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Inc,
    Dec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    AndLogical,
    OrLogical,
    AndBitwise,
    OrBitwise,
    EorBitwise,
    LShift,
    RShift,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    NegateLogical,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    Floor,
    Ceiling,
}

/// A fully decoded instruction. Branch targets are cell indices into the
/// image that were checked against the code area when the image was loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "insn", rename_all = "snake_case")]
pub enum Instruction {
    Nop,
    Terminate,
    Suspend,
    PushNumber {
        value: i32,
    },
    /// Arguments are popped, last argument first.
    LineSpecial {
        special: i32,
        argc: u8,
    },
    /// Arguments are stored inline, first argument first.
    LineSpecialDirect {
        special: i32,
        argc: u8,
        args: [i32; MAX_SPECIAL_ARGS],
    },
    Binary {
        op: BinaryOp,
    },
    Unary {
        op: UnaryOp,
    },
    Variable {
        op: VarOp,
        scope: VarScope,
        index: usize,
    },
    Goto {
        target: usize,
    },
    IfGoto {
        target: usize,
    },
    IfNotGoto {
        target: usize,
    },
    CaseGoto {
        value: i32,
        target: usize,
    },
    Drop,
    Delay,
    DelayDirect {
        ticks: i32,
    },
    /// Pops the maximum, then the minimum.
    Random,
    RandomDirect {
        min: i32,
        max: i32,
    },
    ThingCount,
    ThingCountDirect {
        thing_type: i32,
        tid: i32,
    },
    TagWait,
    TagWaitDirect {
        tag: i32,
    },
    PolyWait,
    PolyWaitDirect {
        poly: i32,
    },
    ScriptWait,
    ScriptWaitDirect {
        script: i32,
    },
    ChangeFlat {
        surface: Surface,
    },
    ChangeFlatDirect {
        surface: Surface,
        tag: i32,
        flat: i32,
    },
    Restart,
    LineSide,
    ClearLineSpecial,
    BeginPrint,
    PrintString,
    PrintNumber,
    PrintCharacter,
    EndPrint,
    EndPrintBold,
    PlayerCount,
    GameType,
    GameSkill,
    Timer,
    SectorSound,
    AmbientSound,
    SoundSequence,
    ThingSound,
    SetLineTexture,
    SetLineBlocking,
    SetLineSpecial,
    Unknown {
        code: i32,
    },
}

impl Instruction {
    /// Whether execution can continue with the following cell.
    pub fn falls_through(&self) -> bool {
        !matches!(
            self,
            Instruction::Terminate
                | Instruction::Restart
                | Instruction::Goto { .. }
                | Instruction::Unknown { .. }
        )
    }

    /// Branch target, if the instruction can transfer control elsewhere.
    pub fn branch_target(&self) -> Option<usize> {
        match *self {
            Instruction::Goto { target }
            | Instruction::IfGoto { target }
            | Instruction::IfNotGoto { target }
            | Instruction::CaseGoto { target, .. } => Some(target),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::PushNumber { value } => write!(f, "push {value}"),
            Instruction::LineSpecial { special, argc } => write!(f, "lspec{argc} {special}"),
            Instruction::LineSpecialDirect {
                special,
                argc,
                args,
            } => {
                write!(f, "lspec{argc}direct {special}")?;
                for arg in &args[..*argc as usize] {
                    write!(f, " {arg}")?;
                }
                Ok(())
            }
            Instruction::Binary { op } => write!(f, "{op:?}"),
            Instruction::Unary { op } => write!(f, "{op:?}"),
            Instruction::Variable { op, scope, index } => write!(f, "{op:?} {scope:?}[{index}]"),
            Instruction::Goto { target } => write!(f, "goto @{target}"),
            Instruction::IfGoto { target } => write!(f, "ifgoto @{target}"),
            Instruction::IfNotGoto { target } => write!(f, "ifnotgoto @{target}"),
            Instruction::CaseGoto { value, target } => write!(f, "casegoto {value} @{target}"),
            Instruction::DelayDirect { ticks } => write!(f, "delay {ticks}"),
            Instruction::RandomDirect { min, max } => write!(f, "random {min} {max}"),
            Instruction::ThingCountDirect { thing_type, tid } => {
                write!(f, "thingcount {thing_type} {tid}")
            }
            Instruction::TagWaitDirect { tag } => write!(f, "tagwait {tag}"),
            Instruction::PolyWaitDirect { poly } => write!(f, "polywait {poly}"),
            Instruction::ScriptWaitDirect { script } => write!(f, "scriptwait {script}"),
            Instruction::ChangeFlat { surface } => write!(f, "change {surface:?}"),
            Instruction::ChangeFlatDirect { surface, tag, flat } => {
                write!(f, "change {surface:?} tag {tag} str#{flat}")
            }
            Instruction::Unknown { code } => write!(f, "<unknown {code}>"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Pair of a decoded instruction and the cell index of its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decoded {
    pub instruction: Instruction,
    pub next: usize,
}

/// Maps a branch-class opcode to the instruction constructor for a target.
pub(crate) fn branch(opcode: Opcode, target: usize, value: i32) -> Instruction {
    match opcode {
        Opcode::Goto => Instruction::Goto { target },
        Opcode::IfGoto => Instruction::IfGoto { target },
        Opcode::IfNotGoto => Instruction::IfNotGoto { target },
        _ => Instruction::CaseGoto { value, target },
    }
}

/// Splits a variable opcode into its operation and scope.
pub(crate) fn variable_access(opcode: Opcode) -> Option<(VarOp, VarScope)> {
    let code = opcode as i32;
    if !(Opcode::AssignScriptVar as i32..=Opcode::DecWorldVar as i32).contains(&code) {
        return None;
    }
    let relative = code - Opcode::AssignScriptVar as i32;
    let op = match relative / 3 {
        0 => VarOp::Assign,
        1 => VarOp::Push,
        2 => VarOp::Add,
        3 => VarOp::Sub,
        4 => VarOp::Mul,
        5 => VarOp::Div,
        6 => VarOp::Mod,
        7 => VarOp::Inc,
        _ => VarOp::Dec,
    };
    let scope = match relative % 3 {
        0 => VarScope::Script,
        1 => VarScope::Map,
        _ => VarScope::World,
    };
    Some((op, scope))
}

/// Instructions that need no operand cells and carry no payload.
pub(crate) fn simple(opcode: Opcode) -> Option<Instruction> {
    use Opcode::*;
    let instruction = match opcode {
        Nop => Instruction::Nop,
        Terminate => Instruction::Terminate,
        Suspend => Instruction::Suspend,
        Add => Instruction::Binary { op: BinaryOp::Add },
        Subtract => Instruction::Binary {
            op: BinaryOp::Subtract,
        },
        Multiply => Instruction::Binary {
            op: BinaryOp::Multiply,
        },
        Divide => Instruction::Binary {
            op: BinaryOp::Divide,
        },
        Modulus => Instruction::Binary {
            op: BinaryOp::Modulus,
        },
        Eq => Instruction::Binary { op: BinaryOp::Eq },
        Ne => Instruction::Binary { op: BinaryOp::Ne },
        Lt => Instruction::Binary { op: BinaryOp::Lt },
        Gt => Instruction::Binary { op: BinaryOp::Gt },
        Le => Instruction::Binary { op: BinaryOp::Le },
        Ge => Instruction::Binary { op: BinaryOp::Ge },
        AndLogical => Instruction::Binary {
            op: BinaryOp::AndLogical,
        },
        OrLogical => Instruction::Binary {
            op: BinaryOp::OrLogical,
        },
        AndBitwise => Instruction::Binary {
            op: BinaryOp::AndBitwise,
        },
        OrBitwise => Instruction::Binary {
            op: BinaryOp::OrBitwise,
        },
        EorBitwise => Instruction::Binary {
            op: BinaryOp::EorBitwise,
        },
        LShift => Instruction::Binary {
            op: BinaryOp::LShift,
        },
        RShift => Instruction::Binary {
            op: BinaryOp::RShift,
        },
        NegateLogical => Instruction::Unary {
            op: UnaryOp::NegateLogical,
        },
        UnaryMinus => Instruction::Unary { op: UnaryOp::Minus },
        Drop => Instruction::Drop,
        Delay => Instruction::Delay,
        Random => Instruction::Random,
        ThingCount => Instruction::ThingCount,
        TagWait => Instruction::TagWait,
        PolyWait => Instruction::PolyWait,
        ScriptWait => Instruction::ScriptWait,
        ChangeFloor => Instruction::ChangeFlat {
            surface: Surface::Floor,
        },
        ChangeCeiling => Instruction::ChangeFlat {
            surface: Surface::Ceiling,
        },
        Restart => Instruction::Restart,
        LineSide => Instruction::LineSide,
        ClearLineSpecial => Instruction::ClearLineSpecial,
        BeginPrint => Instruction::BeginPrint,
        EndPrint => Instruction::EndPrint,
        EndPrintBold => Instruction::EndPrintBold,
        PrintString => Instruction::PrintString,
        PrintNumber => Instruction::PrintNumber,
        PrintCharacter => Instruction::PrintCharacter,
        PlayerCount => Instruction::PlayerCount,
        GameType => Instruction::GameType,
        GameSkill => Instruction::GameSkill,
        Timer => Instruction::Timer,
        SectorSound => Instruction::SectorSound,
        AmbientSound => Instruction::AmbientSound,
        SoundSequence => Instruction::SoundSequence,
        ThingSound => Instruction::ThingSound,
        SetLineTexture => Instruction::SetLineTexture,
        SetLineBlocking => Instruction::SetLineBlocking,
        SetLineSpecial => Instruction::SetLineSpecial,
        _ => return None,
    };
    Some(instruction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_numbering_is_dense() {
        for code in 0..=101 {
            let opcode = Opcode::try_from(code).expect("opcode in range");
            assert_eq!(opcode as i32, code);
        }
        assert_eq!(Opcode::try_from(102), Err(102));
        assert_eq!(Opcode::try_from(-1), Err(-1));
    }

    #[test]
    fn variable_opcodes_split_into_op_and_scope() {
        assert_eq!(
            variable_access(Opcode::AssignScriptVar),
            Some((VarOp::Assign, VarScope::Script))
        );
        assert_eq!(
            variable_access(Opcode::ModMapVar),
            Some((VarOp::Mod, VarScope::Map))
        );
        assert_eq!(
            variable_access(Opcode::DecWorldVar),
            Some((VarOp::Dec, VarScope::World))
        );
        assert_eq!(variable_access(Opcode::Goto), None);
    }

    #[test]
    fn every_opcode_has_a_decoding() {
        for code in 0..=101 {
            let opcode = Opcode::try_from(code).unwrap();
            let covered = simple(opcode).is_some()
                || variable_access(opcode).is_some()
                || opcode.operand_cells() > 0;
            assert!(covered, "{opcode:?} has no decoding");
        }
    }

    #[test]
    fn decoded_instructions_serialize_with_operator_fields() {
        let binary = Decoded {
            instruction: Instruction::Binary {
                op: BinaryOp::Subtract,
            },
            next: 3,
        };
        let variable = Decoded {
            instruction: Instruction::Variable {
                op: VarOp::Inc,
                scope: VarScope::World,
                index: 4,
            },
            next: 5,
        };

        let json = serde_json::to_value(binary).unwrap();
        assert_eq!(json["instruction"]["insn"], "binary");
        assert_eq!(json["instruction"]["op"], "subtract");
        assert_eq!(json["next"], 3);

        let json = serde_json::to_value(variable).unwrap();
        assert_eq!(json["instruction"]["insn"], "variable");
        assert_eq!(json["instruction"]["op"], "inc");
        assert_eq!(json["instruction"]["scope"], "world");
        assert_eq!(json["instruction"]["index"], 4);
    }
}
