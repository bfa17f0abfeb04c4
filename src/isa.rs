//! The fixed instruction table shared by assembler, encoder and processor.
//!
//! Opcodes `0x00..0x20` are the one-address forms working on the
//! accumulator. Opcodes from `0x20` up are register file forms, written with a
//! register as first operand (`ADD R5, R4, 1`).

use std::convert::TryFrom;
use std::fmt;

use num_enum::IntoPrimitive;
use num_enum::TryFromPrimitive;

pub mod encoding;

pub use encoding::{decode, encode, encode_mnemonic, encode_wide, MachineWord};

/// How the operand field of an instruction is interpreted
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(TryFromPrimitive, IntoPrimitive)]
pub enum AddressingMode {
    /// The operand is a literal value
    Immediate = 0,
    /// The operand is an address, the value is the contents of that cell
    Direct = 1,
    /// The operand names a general purpose register
    Register = 2,
}

impl fmt::Display for AddressingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AddressingMode::Immediate => "immediate",
            AddressingMode::Direct => "direct",
            AddressingMode::Register => "register",
        })
    }
}

/// One of the general purpose registers `R0..R7`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Register(u8);

impl Register {
    pub const COUNT: usize = 8;

    pub fn new(index: u8) -> Option<Self> {
        if (index as usize) < Self::COUNT {
            Some(Self(index))
        } else {
            None
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u32> for Register {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .and_then(Register::new)
            .ok_or(value)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

macro_rules! instructions {
    ( $(
        $( #[doc = $doc:expr] )+
        $name:ident = $repr:literal => $mnemonic:literal / $arity:literal [ $( $mode:ident ),+ ],
    )+ ) => {
        /// Defines the instructions
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[derive(TryFromPrimitive, IntoPrimitive)]
        pub enum Opcode {
            $(
                $( #[doc = $doc] )+
                $name = $repr,
            )+
        }

        impl Opcode {
            pub const ALL: &'static [Self] = &[
                $( Self::$name , )+
            ];

            pub fn name(&self) -> &'static str {
                match self {
                    $( Self::$name => stringify!($name) , )+
                }
            }

            /// The mnemonic as written in assembly source
            pub fn mnemonic(&self) -> &'static str {
                match self {
                    $( Self::$name => $mnemonic , )+
                }
            }

            /// Number of operands written in assembly source
            pub fn arity(&self) -> usize {
                match self {
                    $( Self::$name => $arity , )+
                }
            }

            /// Addressing modes the operand may be encoded with. The first
            /// one is the default.
            pub fn modes(&self) -> &'static [AddressingMode] {
                match self {
                    $( Self::$name => &[ $( AddressingMode::$mode , )+ ] , )+
                }
            }
        }

        impl ::std::fmt::Display for Opcode {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    $( Self::$name => f.write_str($mnemonic) , )+
                }
            }
        }
    }
}

instructions! {
    /// No operation
    NOP = 0x00 => "NOP" / 0 [Immediate],
    /// Stop the execution of the program
    HALT = 0x01 => "HALT" / 0 [Immediate],
    /// Load a literal into the accumulator
    LDI = 0x02 => "LDI" / 1 [Immediate],
    /// Load a memory cell into the accumulator
    LDA = 0x03 => "LDA" / 1 [Direct],
    /// Store the accumulator into a memory cell
    STA = 0x04 => "STA" / 1 [Direct],
    /// ACC = ACC + [addr]
    ADD = 0x05 => "ADD" / 1 [Direct],
    /// ACC = ACC - [addr]
    SUB = 0x06 => "SUB" / 1 [Direct],
    /// ACC = ACC * [addr]
    MUL = 0x07 => "MUL" / 1 [Direct],
    /// ACC = ACC / [addr], unsigned
    DIV = 0x08 => "DIV" / 1 [Direct],
    /// ACC = ACC & [addr]
    AND = 0x09 => "AND" / 1 [Direct],
    /// ACC = ACC | [addr]
    OR = 0x0A => "OR" / 1 [Direct],
    /// ACC = ACC ^ [addr]
    XOR = 0x0B => "XOR" / 1 [Direct],
    /// Bitwise complement of the accumulator
    NOT = 0x0C => "NOT" / 0 [Immediate],
    /// Set the flags of ACC - [addr] without storing the difference
    CMP = 0x0D => "CMP" / 1 [Direct],
    /// Jump to an address
    JMP = 0x10 => "JMP" / 1 [Immediate],
    /// Jump if zero is set
    JZ = 0x11 => "JZ" / 1 [Immediate],
    /// Jump if zero is clear
    JNZ = 0x12 => "JNZ" / 1 [Immediate],
    /// Jump if carry is set (unsigned less-than after CMP)
    JC = 0x13 => "JC" / 1 [Immediate],
    /// Jump if carry is clear
    JNC = 0x14 => "JNC" / 1 [Immediate],
    /// Jump if overflow is set
    JV = 0x15 => "JV" / 1 [Immediate],
    /// Jump if overflow is clear
    JNV = 0x16 => "JNV" / 1 [Immediate],
    /// Jump if negative is set
    JN = 0x17 => "JN" / 1 [Immediate],
    /// Jump if negative is clear
    JNN = 0x18 => "JNN" / 1 [Immediate],
    /// Rd = literal
    LDRI = 0x20 => "LDI" / 2 [Immediate],
    /// Rd = [addr]
    LDR = 0x21 => "LDR" / 2 [Direct],
    /// [addr] = Rs
    STR = 0x22 => "STR" / 2 [Direct],
    /// Rd = [Rs]
    LDRR = 0x23 => "LDRR" / 2 [Register],
    /// [Ra] = Rs
    STRR = 0x24 => "STRR" / 2 [Register],
    /// Rd = Rs + Rt or Rd = Rs + literal
    ADDR = 0x25 => "ADD" / 3 [Register, Immediate],
    /// Rd = Rs - Rt or Rd = Rs - literal
    SUBR = 0x26 => "SUB" / 3 [Register, Immediate],
    /// Rd = Rs * Rt or Rd = Rs * literal
    MULR = 0x27 => "MUL" / 3 [Register, Immediate],
    /// Rd = Rs / Rt or Rd = Rs / literal, unsigned
    DIVR = 0x28 => "DIV" / 3 [Register, Immediate],
    /// Rd = Rs & Rt or Rd = Rs & literal
    ANDR = 0x29 => "AND" / 3 [Register, Immediate],
    /// Rd = Rs | Rt or Rd = Rs | literal
    ORR = 0x2A => "OR" / 3 [Register, Immediate],
    /// Rd = Rs ^ Rt or Rd = Rs ^ literal
    XORR = 0x2B => "XOR" / 3 [Register, Immediate],
    /// Set the flags of Ra - Rb or Ra - literal
    CMPR = 0x2D => "CMP" / 2 [Register, Immediate],
}

const REGISTER_FORM: u8 = 0x20;

impl Opcode {
    /// Finds the opcode written as `mnemonic`, in its accumulator or
    /// register file form
    pub fn lookup(mnemonic: &str, register_form: bool) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| {
                op.is_register_form() == register_form
                    && op.mnemonic().eq_ignore_ascii_case(mnemonic)
            })
    }

    /// Operates on the register file instead of the accumulator
    pub fn is_register_form(&self) -> bool {
        u8::from(*self) & REGISTER_FORM != 0
    }

    /// Overwrites the program counter with its operand
    pub fn is_branch(&self) -> bool {
        (Opcode::JMP..=Opcode::JNN).contains(self)
    }

    /// The mode used when the source gives no hint
    pub fn default_mode(&self) -> AddressingMode {
        self.modes()[0]
    }

    pub fn allows(&self, mode: AddressingMode) -> bool {
        self.modes().contains(&mode)
    }

    pub fn info(&self) -> InstructionInfo {
        InstructionInfo {
            mnemonic: self.mnemonic(),
            opcode: *self,
            arity: self.arity(),
            modes: self.modes(),
        }
    }
}

/// Static description of an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstructionInfo {
    pub mnemonic: &'static str,
    pub opcode: Opcode,
    pub arity: usize,
    pub modes: &'static [AddressingMode],
}

/// A fully resolved instruction: what the encoder consumes and the decoder
/// produces.
///
/// `target` and `source` are only meaningful for register file forms and are
/// `R0` otherwise. Register forms with a single register operand besides the
/// target (`LDRR`, `STRR`, `CMP Ra, Rb`) keep that register in `operand`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub opcode: Opcode,
    pub mode: AddressingMode,
    pub operand: u32,
    pub target: Register,
    pub source: Register,
}

impl Instruction {
    /// Creates an instruction using the default addressing mode of `opcode`
    pub fn new(opcode: Opcode, operand: u32) -> Self {
        Self {
            opcode,
            mode: opcode.default_mode(),
            operand,
            target: Register::default(),
            source: Register::default(),
        }
    }

    pub fn with_mode(mut self, mode: AddressingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_registers(mut self, target: Register, source: Register) -> Self {
        self.target = target;
        self.source = source;
        self
    }

    /// The operand as register, for register addressed operands
    pub fn operand_register(&self) -> Option<Register> {
        Register::try_from(self.operand).ok()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Opcode::*;

        let operand = self.operand;
        let reg = |value: u32| match Register::try_from(value) {
            Ok(register) => register.to_string(),
            Err(value) => format!("R{}", value),
        };
        // third operand of the register forms
        let value = || match self.mode {
            AddressingMode::Register => reg(operand),
            AddressingMode::Direct => format!("[0x{:04X}]", operand),
            AddressingMode::Immediate => operand.to_string(),
        };

        match self.opcode {
            NOP | HALT | NOT => write!(f, "{}", self.opcode),
            LDI => write!(f, "LDI {}", operand),
            op if op.is_branch() => write!(f, "{} 0x{:04X}", op, operand),
            LDA | STA | ADD | SUB | MUL | DIV | AND | OR | XOR | CMP => {
                write!(f, "{} 0x{:04X}", self.opcode, operand)
            }
            LDRI | LDR | STR | CMPR => write!(f, "{} {}, {}", self.opcode, self.target, value()),
            LDRR | STRR => write!(f, "{} {}, [{}]", self.opcode, self.target, reg(operand)),
            _ => write!(
                f,
                "{} {}, {}, {}",
                self.opcode,
                self.target,
                self.source,
                value()
            ),
        }
    }
}
