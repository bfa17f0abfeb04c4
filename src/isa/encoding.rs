//! Bit level encoding of instructions into machine words.
//!
//! ```text
//!  15      10 9    8   7    6          0
//! +----------+------+------+------------+
//! |  opcode  | mode | wide |  operand   |   short form
//! +----------+------+------+------------+
//! |  opcode  | mode |  1   |0| Rd  | Rs |   register form, first word
//! +----------+------+------+------------+
//! |              operand                |   second word of any wide form
//! +-------------------------------------+
//! ```
//!
//! A wide instruction occupies two consecutive cells, the first word at the
//! lower address. Read as one 32-bit value the first word is the low half.
//! Register file forms are always wide.

use std::convert::TryFrom;
use std::error;
use std::fmt;

use crate::memory::Word;

use super::{AddressingMode, Instruction, Opcode, Register};

const OPCODE_SHIFT: u32 = 10;
const MODE_SHIFT: u32 = 8;
const MODE_MASK: Word = 0b11;
const WIDE_FLAG: Word = 1 << 7;
const TARGET_SHIFT: u32 = 3;
const REGISTER_MASK: Word = 0b111;
const LOW_MASK: Word = 0x7F;

/// Largest operand that fits into a single word
pub const SHORT_OPERAND_MAX: u32 = LOW_MASK as u32;

/// Largest operand that can be encoded at all
pub const OPERAND_MAX: u32 = Word::MAX as u32;

/// An encoded instruction, one or two words long
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineWord {
    Short(Word),
    /// First word in the low half, operand word in the high half
    Wide(u32),
}

impl MachineWord {
    /// Joins the words as fetched from memory
    pub fn from_words(first: Word, second: Option<Word>) -> Self {
        match second {
            Some(high) => MachineWord::Wide((high as u32) << 16 | first as u32),
            None => MachineWord::Short(first),
        }
    }

    /// The word stored at the lower address
    pub fn first(&self) -> Word {
        match *self {
            MachineWord::Short(word) => word,
            MachineWord::Wide(value) => value as Word,
        }
    }

    /// The word stored at the higher address, if any
    pub fn second(&self) -> Option<Word> {
        match *self {
            MachineWord::Short(_) => None,
            MachineWord::Wide(value) => Some((value >> 16) as Word),
        }
    }

    /// Number of memory cells taken
    pub fn len(&self) -> usize {
        match self {
            MachineWord::Short(_) => 1,
            MachineWord::Wide(_) => 2,
        }
    }

    pub fn is_wide(&self) -> bool {
        matches!(self, MachineWord::Wide(_))
    }

    pub fn value(&self) -> u32 {
        match *self {
            MachineWord::Short(word) => word as u32,
            MachineWord::Wide(value) => value,
        }
    }

    /// The words in memory order
    pub fn words(&self) -> impl Iterator<Item = Word> {
        std::iter::once(self.first()).chain(self.second())
    }
}

impl fmt::Display for MachineWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.second() {
            Some(second) => write!(f, "{:04X} {:04X}", self.first(), second),
            None => write!(f, "{:04X}", self.first()),
        }
    }
}

/// Whether a word fetched as first word announces a second one
pub fn is_wide(first: Word) -> bool {
    first & WIDE_FLAG != 0
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// No instruction has this mnemonic
    InvalidInstruction { mnemonic: String },
    /// Operand does not fit even the wide form
    EncodingOverflow { operand: u32 },
    /// The opcode takes several modes and this is not one of them
    InvalidMode { opcode: Opcode, mode: AddressingMode },
    /// A register operand outside of `R0..R7`
    InvalidRegister { operand: u32 },
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::InvalidInstruction { mnemonic } => {
                write!(f, "invalid instruction `{}`", mnemonic)
            }
            EncodeError::EncodingOverflow { operand } => write!(
                f,
                "operand `0x{:X}` does not fit into 0x{:X}",
                operand, OPERAND_MAX
            ),
            EncodeError::InvalidMode { opcode, mode } => {
                write!(f, "{} has no {} addressing", opcode, mode)
            }
            EncodeError::InvalidRegister { operand } => write!(f, "no register R{}", operand),
        }
    }
}

impl error::Error for EncodeError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeError {
    UnknownOpcode { opcode: u8 },
    InvalidMode { bits: u8 },
    ModeNotAllowed { opcode: Opcode, mode: AddressingMode },
    /// Width or reserved bits do not match the opcode
    Malformed { word: u32 },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownOpcode { opcode } => {
                write!(f, "unknown opcode `0x{:02X}`", opcode)
            }
            DecodeError::InvalidMode { bits } => {
                write!(f, "invalid addressing mode `{:02b}`", bits)
            }
            DecodeError::ModeNotAllowed { opcode, mode } => {
                write!(f, "{} has no {} addressing", opcode, mode)
            }
            DecodeError::Malformed { word } => write!(f, "malformed instruction `0x{:X}`", word),
        }
    }
}

impl error::Error for DecodeError {}

/// Brings an instruction into the one form the decoder gives back.
///
/// Modes of single-mode opcodes are forced, whatever the caller asked for;
/// instructions without operand encode operand 0.
fn canonical(instruction: &Instruction) -> Result<Instruction, EncodeError> {
    let opcode = instruction.opcode;
    let mut canonical = *instruction;

    if opcode.modes().len() == 1 {
        canonical.mode = opcode.default_mode();
    } else if !opcode.allows(instruction.mode) {
        return Err(EncodeError::InvalidMode {
            opcode,
            mode: instruction.mode,
        });
    }

    if opcode.arity() == 0 {
        canonical.operand = 0;
    }

    if !opcode.is_register_form() {
        canonical.target = Register::default();
        canonical.source = Register::default();
    } else if opcode.arity() < 3 {
        canonical.source = Register::default();
    }

    if canonical.operand > OPERAND_MAX {
        return Err(EncodeError::EncodingOverflow {
            operand: canonical.operand,
        });
    }

    if canonical.mode == AddressingMode::Register && canonical.operand_register().is_none() {
        return Err(EncodeError::InvalidRegister {
            operand: canonical.operand,
        });
    }

    Ok(canonical)
}

fn header(instruction: &Instruction) -> Word {
    (u8::from(instruction.opcode) as Word) << OPCODE_SHIFT
        | (u8::from(instruction.mode) as Word) << MODE_SHIFT
}

fn encode_with(instruction: &Instruction, force_wide: bool) -> Result<MachineWord, EncodeError> {
    let instruction = canonical(instruction)?;
    let header = header(&instruction);
    let operand = instruction.operand as Word;

    if instruction.opcode.is_register_form() {
        let registers = (instruction.target.index() as Word) << TARGET_SHIFT
            | instruction.source.index() as Word;
        let first = header | WIDE_FLAG | registers;
        Ok(MachineWord::from_words(first, Some(operand)))
    } else if force_wide || instruction.operand > SHORT_OPERAND_MAX {
        Ok(MachineWord::from_words(header | WIDE_FLAG, Some(operand)))
    } else {
        Ok(MachineWord::Short(header | operand))
    }
}

/// Encodes `instruction` into as few words as possible
pub fn encode(instruction: &Instruction) -> Result<MachineWord, EncodeError> {
    encode_with(instruction, false)
}

/// Encodes `instruction` into two words even when the operand would fit one.
///
/// The assembler uses this for operands whose value is not known when the
/// space for them gets reserved.
pub fn encode_wide(instruction: &Instruction) -> Result<MachineWord, EncodeError> {
    encode_with(instruction, true)
}

/// Encodes the accumulator form of `mnemonic`
pub fn encode_mnemonic(
    mnemonic: &str,
    operand: u32,
    mode: AddressingMode,
) -> Result<MachineWord, EncodeError> {
    let opcode =
        Opcode::lookup(mnemonic, false).ok_or_else(|| EncodeError::InvalidInstruction {
            mnemonic: mnemonic.to_string(),
        })?;
    encode(&Instruction::new(opcode, operand).with_mode(mode))
}

/// Decodes one or two words back into an instruction.
///
/// Only words produced by [`encode`] or [`encode_wide`] are accepted; reserved
/// bits must be zero and the width must match the wide flag.
pub fn decode(word: MachineWord) -> Result<Instruction, DecodeError> {
    let first = word.first();
    let malformed = DecodeError::Malformed { word: word.value() };

    let bits = (first >> OPCODE_SHIFT) as u8;
    let opcode = Opcode::try_from(bits).map_err(|_| DecodeError::UnknownOpcode { opcode: bits })?;

    let bits = ((first >> MODE_SHIFT) & MODE_MASK) as u8;
    let mode = AddressingMode::try_from(bits).map_err(|_| DecodeError::InvalidMode { bits })?;
    if !opcode.allows(mode) {
        return Err(DecodeError::ModeNotAllowed { opcode, mode });
    }

    if is_wide(first) != word.is_wide() {
        return Err(malformed);
    }

    let low = first & LOW_MASK;
    let mut instruction = Instruction::new(opcode, 0).with_mode(mode);

    match word.second() {
        Some(operand) if opcode.is_register_form() => {
            if low & !(REGISTER_MASK << TARGET_SHIFT | REGISTER_MASK) != 0 {
                return Err(malformed);
            }
            let register = |bits: Word| Register::new(bits as u8).ok_or(malformed);
            instruction.target = register((low >> TARGET_SHIFT) & REGISTER_MASK)?;
            instruction.source = register(low & REGISTER_MASK)?;
            instruction.operand = operand as u32;
        }
        Some(operand) if low == 0 => instruction.operand = operand as u32,
        None if !opcode.is_register_form() => instruction.operand = low as u32,
        _ => return Err(malformed),
    }

    if opcode.arity() == 0 && instruction.operand != 0 {
        return Err(malformed);
    }
    if opcode.is_register_form()
        && opcode.arity() < 3
        && instruction.source != Register::default()
    {
        return Err(malformed);
    }
    if mode == AddressingMode::Register && instruction.operand_register().is_none() {
        return Err(malformed);
    }

    Ok(instruction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::Result;

    fn r(index: u8) -> Register {
        Register::new(index).unwrap()
    }

    #[test]
    fn test_short_layout() -> Result<()> {
        // 0x02 << 10 | immediate << 8 | 5
        assert_eq!(encode(&Instruction::new(Opcode::LDI, 5))?, MachineWord::Short(0x0805));
        // 0x01 << 10
        assert_eq!(encode(&Instruction::new(Opcode::HALT, 0))?, MachineWord::Short(0x0400));
        // 0x03 << 10 | direct << 8 | 0x10
        assert_eq!(encode(&Instruction::new(Opcode::LDA, 0x10))?, MachineWord::Short(0x0D10));

        Ok(())
    }

    #[test]
    fn test_wide_layout() -> Result<()> {
        let word = encode(&Instruction::new(Opcode::STA, 0x0200))?;
        assert_eq!(word, MachineWord::Wide(0x0200_1180));
        assert_eq!(word.words().collect::<Vec<_>>(), vec![0x1180, 0x0200]);
        assert_eq!(word.len(), 2);

        let word = encode(
            &Instruction::new(Opcode::LDR, 0x0200).with_registers(r(4), Register::default()),
        )?;
        // 0x21 << 10 | direct << 8 | wide | R4 << 3
        assert_eq!(word.first(), 0x8000 | 0x0400 | 0x0100 | 0x0080 | 0x0020);
        assert_eq!(word.second(), Some(0x0200));

        Ok(())
    }

    #[test]
    fn test_round_trip() -> Result<()> {
        let operands = [0, 1, 0x7F, 0x80, 0x0200, 0xFFFF];

        for op in Opcode::ALL {
            for mode in op.modes() {
                for &operand in &operands {
                    let operand = if *mode == AddressingMode::Register {
                        operand % 8
                    } else if op.arity() == 0 {
                        0
                    } else {
                        operand
                    };
                    let mut instruction = Instruction::new(*op, operand).with_mode(*mode);
                    if op.is_register_form() {
                        let source = if op.arity() == 3 { r(2) } else { r(0) };
                        instruction = instruction.with_registers(r(5), source);
                    }

                    assert_eq!(decode(encode(&instruction)?)?, instruction, "{}", instruction);
                    assert_eq!(decode(encode_wide(&instruction)?)?, instruction);
                }
            }
        }

        Ok(())
    }

    #[test]
    fn test_canonical_forms() -> Result<()> {
        // modes of single mode opcodes are forced
        let jump = Instruction::new(Opcode::JMP, 0x10).with_mode(AddressingMode::Direct);
        assert_eq!(decode(encode(&jump)?)?.mode, AddressingMode::Immediate);

        let halt = Instruction::new(Opcode::HALT, 42).with_mode(AddressingMode::Direct);
        assert_eq!(decode(encode(&halt)?)?, Instruction::new(Opcode::HALT, 0));

        assert_eq!(
            encode_mnemonic("lda", 0x0200, AddressingMode::Immediate)?,
            encode(&Instruction::new(Opcode::LDA, 0x0200))?
        );

        Ok(())
    }

    #[test]
    fn test_encode_errors() -> Result<()> {
        assert_eq!(
            encode_mnemonic("PUSH", 1, AddressingMode::Immediate),
            Err(EncodeError::InvalidInstruction {
                mnemonic: "PUSH".into()
            })
        );
        assert_eq!(
            encode(&Instruction::new(Opcode::LDA, 0x1_0000)),
            Err(EncodeError::EncodingOverflow { operand: 0x1_0000 })
        );
        assert_eq!(
            encode(&Instruction::new(Opcode::ADDR, 0).with_mode(AddressingMode::Direct)),
            Err(EncodeError::InvalidMode {
                opcode: Opcode::ADDR,
                mode: AddressingMode::Direct
            })
        );
        assert_eq!(
            encode(&Instruction::new(Opcode::LDRR, 8)),
            Err(EncodeError::InvalidRegister { operand: 8 })
        );

        Ok(())
    }

    #[test]
    fn test_decode_errors() -> Result<()> {
        assert_eq!(
            decode(MachineWord::Short(0xFC00)),
            Err(DecodeError::UnknownOpcode { opcode: 0x3F })
        );
        assert_eq!(
            decode(MachineWord::Short(0x0B00)),
            Err(DecodeError::InvalidMode { bits: 0b11 })
        );
        assert_eq!(
            decode(MachineWord::Short(0x0D00 & !0x0300 | 0x0200)),
            Err(DecodeError::ModeNotAllowed {
                opcode: Opcode::LDA,
                mode: AddressingMode::Register
            })
        );
        // wide flag without second word
        assert!(decode(MachineWord::Short(0x1180)).is_err());
        // register form in a single word
        assert!(decode(MachineWord::Short(0x8400)).is_err());
        // HALT with an operand
        assert!(decode(MachineWord::Short(0x0401)).is_err());

        Ok(())
    }

    #[test]
    fn test_is_wide() -> Result<()> {
        assert!(!is_wide(0x0805));
        assert!(is_wide(0x1180));
        assert_eq!(MachineWord::from_words(0x1180, Some(0x0200)).value(), 0x0200_1180);

        Ok(())
    }
}
