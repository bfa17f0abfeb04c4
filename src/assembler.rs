//! Two-pass assembler.
//!
//! The first pass parses every line, binds labels and reserves the address
//! range of each instruction. The second pass resolves labels and encodes.
//! Operands whose value is unknown in the first pass (labels) always get the
//! wide form reserved, so addresses never move between the passes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::config::{ADDRESS_SPACE, DEFAULT_ENTRYPOINT};
use crate::isa::encoding::{self, EncodeError, MachineWord, OPERAND_MAX, SHORT_OPERAND_MAX};
use crate::isa::{AddressingMode, Instruction, InstructionInfo, Opcode, Register};
use crate::memory::Word;
use log::*;

mod parse;

pub use parse::{AssemblyError, AssemblyErrorKind, Operand, Result, Value};

use parse::{Failure, Statement};

/// One encoded instruction together with where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineCodeLine {
    pub address: Word,
    pub word: MachineWord,
    pub instruction: Instruction,
    /// 1-based source line
    pub line_nr: usize,
    /// First label bound to `address`, if any
    pub label: Option<String>,
}

/// The output of the assembler: encoded lines in source order plus the
/// symbol table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
    origin: Word,
    lines: Vec<MachineCodeLine>,
    labels: BTreeMap<String, Word>,
}

impl Assembly {
    /// Address of the first instruction
    pub fn origin(&self) -> Word {
        self.origin
    }

    pub fn lines(&self) -> &[MachineCodeLine] {
        &self.lines
    }

    pub fn labels(&self) -> &BTreeMap<String, Word> {
        &self.labels
    }

    /// The program as it is laid out in memory, starting at `origin`
    pub fn words(&self) -> Vec<Word> {
        self.lines.iter().flat_map(|line| line.word.words()).collect()
    }

    /// Number of memory cells the program takes
    pub fn len(&self) -> usize {
        self.lines.iter().map(|line| line.word.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl FromStr for Assembly {
    type Err = AssemblyError;

    fn from_str(s: &str) -> Result<Self> {
        assemble(s)
    }
}

impl fmt::Display for Assembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            if let Some(label) = &line.label {
                writeln!(f, "{}:", label)?;
            }
            writeln!(
                f,
                "0x{:04X}  {:<9}  {}",
                line.address,
                line.word.to_string(),
                line.instruction
            )?;
        }
        Ok(())
    }
}

/// What the first pass decided about an instruction
#[derive(Debug, Clone)]
struct Reserved {
    address: Word,
    line_nr: usize,
    label: Option<String>,
    opcode: Opcode,
    mode: AddressingMode,
    target: Register,
    source: Register,
    operand: Value,
    wide: bool,
}

/// Assembles `source` to start at address zero
pub fn assemble(source: &str) -> Result<Assembly> {
    assemble_at(source, DEFAULT_ENTRYPOINT)
}

/// Assembles `source` to start at `origin`
pub fn assemble_at(source: &str, origin: Word) -> Result<Assembly> {
    let mut labels = BTreeMap::new();
    let mut reserved = Vec::new();
    let mut unbound: Option<String> = None;
    let mut address = origin as usize;

    // first pass: layout and labels
    for (i, line) in source.lines().enumerate() {
        let statement = parse::parse_line(line, i + 1)?;
        let line_nr = statement.line_nr;

        if let Some(label) = &statement.label {
            if address >= ADDRESS_SPACE {
                return Err(AssemblyError::new(
                    AssemblyErrorKind::ProgramTooLarge,
                    format!("label `{}` lies past 0x{:04X}", label, Word::MAX),
                    line_nr,
                ));
            }
            if labels.insert(label.clone(), address as Word).is_some() {
                return Err(AssemblyError::new(
                    AssemblyErrorKind::DuplicateLabel,
                    format!("`{}` is already defined", label),
                    line_nr,
                ));
            }
            unbound.get_or_insert_with(|| label.clone());
        }

        let mnemonic = match &statement.mnemonic {
            Some(mnemonic) => mnemonic,
            None => continue,
        };

        let mut entry = reserve(mnemonic, &statement)
            .map_err(|(kind, context)| AssemblyError::new(kind, context, line_nr))?;
        entry.address = address as Word;
        entry.label = unbound.take();

        address += if entry.wide { 2 } else { 1 };
        if address > ADDRESS_SPACE {
            return Err(AssemblyError::new(
                AssemblyErrorKind::ProgramTooLarge,
                format!("`{}` ends past 0x{:04X}", mnemonic, Word::MAX),
                line_nr,
            ));
        }

        debug!(
            "[{}] reserved {} word(s) at 0x{:04X} for {}",
            line_nr,
            if entry.wide { 2 } else { 1 },
            entry.address,
            entry.opcode.name()
        );
        reserved.push(entry);
    }

    // second pass: resolve and encode
    let lines = reserved
        .into_iter()
        .map(|entry| emit(entry, &labels))
        .collect::<Result<Vec<_>>>()?;

    info!(
        "assembled {} instructions, {} labels, 0x{:04X}..0x{:04X}",
        lines.len(),
        labels.len(),
        origin,
        address
    );

    Ok(Assembly {
        origin,
        lines,
        labels,
    })
}

/// Chooses opcode, mode and width of a statement from its operands
fn reserve(mnemonic: &str, statement: &Statement) -> Result<Reserved, Failure> {
    let operands = &statement.operands;
    let register_form = matches!(operands.first(), Some(Operand::Register(_)));

    let opcode = match Opcode::lookup(mnemonic, register_form) {
        Some(opcode) => opcode,
        None => {
            return Err(match Opcode::lookup(mnemonic, !register_form) {
                Some(other) if other.arity() != operands.len() => (
                    AssemblyErrorKind::ArityMismatch {
                        expected: other.arity(),
                        found: operands.len(),
                    },
                    format!("`{}`", mnemonic),
                ),
                Some(_) if register_form => (
                    AssemblyErrorKind::InvalidOperand,
                    format!("`{}` does not take a register", mnemonic),
                ),
                Some(_) => (
                    AssemblyErrorKind::InvalidOperand,
                    format!("`{}` takes a register as first operand", mnemonic),
                ),
                None => (
                    AssemblyErrorKind::UnknownMnemonic,
                    format!("`{}`", mnemonic),
                ),
            })
        }
    };

    if operands.len() != opcode.arity() {
        return Err((
            AssemblyErrorKind::ArityMismatch {
                expected: opcode.arity(),
                found: operands.len(),
            },
            format!("`{}`", mnemonic),
        ));
    }

    let mut entry = Reserved {
        address: 0,
        line_nr: statement.line_nr,
        label: None,
        opcode,
        mode: opcode.default_mode(),
        target: Register::default(),
        source: Register::default(),
        operand: Value::Number(0),
        wide: opcode.is_register_form(),
    };

    if !opcode.is_register_form() {
        if let Some(operand) = operands.first() {
            entry.operand = if opcode.is_branch() {
                target_value(operand)?
            } else {
                value(opcode, operand, opcode.default_mode())?
            };
        }
        entry.wide = match &entry.operand {
            Value::Symbol(_) => true,
            Value::Number(n) => *n > SHORT_OPERAND_MAX,
        };
    } else {
        entry.target = register(opcode, &operands[0])?;

        match opcode {
            Opcode::LDRI => entry.operand = value(opcode, &operands[1], AddressingMode::Immediate)?,
            Opcode::LDR | Opcode::STR => {
                entry.operand = value(opcode, &operands[1], AddressingMode::Direct)?
            }
            Opcode::LDRR | Opcode::STRR => match &operands[1] {
                Operand::Indirect(address) | Operand::Register(address) => {
                    entry.operand = Value::Number(address.index() as u32)
                }
                _ => {
                    return Err((
                        AssemblyErrorKind::InvalidOperand,
                        format!("`{}` takes its address as `[Rn]`", mnemonic),
                    ))
                }
            },
            Opcode::CMPR => {
                let (mode, operand) = register_or_literal(opcode, &operands[1])?;
                entry.mode = mode;
                entry.operand = operand;
            }
            _ => {
                entry.source = register(opcode, &operands[1])?;
                let (mode, operand) = register_or_literal(opcode, &operands[2])?;
                entry.mode = mode;
                entry.operand = operand;
            }
        }
    }

    if let Value::Number(n) = entry.operand {
        if n > OPERAND_MAX {
            return Err((
                AssemblyErrorKind::EncodingOverflow,
                format!("`0x{:X}` is larger than 0x{:X}", n, OPERAND_MAX),
            ));
        }
    }

    Ok(entry)
}

/// Jump targets are absolute addresses whatever notation is used
fn target_value(operand: &Operand) -> Result<Value, Failure> {
    match operand {
        Operand::Plain(value) | Operand::Immediate(value) | Operand::Direct(value) => {
            Ok(value.clone())
        }
        Operand::Register(_) | Operand::Indirect(_) => Err((
            AssemblyErrorKind::InvalidOperand,
            "jump targets are addresses or labels".to_string(),
        )),
    }
}

/// A value operand in `mode`. Unmarked operands take the mode of the opcode.
fn value(opcode: Opcode, operand: &Operand, mode: AddressingMode) -> Result<Value, Failure> {
    match (operand, mode) {
        (Operand::Plain(value), _)
        | (Operand::Immediate(value), AddressingMode::Immediate)
        | (Operand::Direct(value), AddressingMode::Direct) => Ok(value.clone()),
        (Operand::Immediate(_), _) | (Operand::Direct(_), _) => Err((
            AssemblyErrorKind::ModeNotAllowed,
            format!("`{}` only takes {} operands", opcode, mode),
        )),
        (Operand::Register(_), _) | (Operand::Indirect(_), _) => Err((
            AssemblyErrorKind::InvalidOperand,
            format!("`{}` expects a {} operand", opcode, mode),
        )),
    }
}

fn register(opcode: Opcode, operand: &Operand) -> Result<Register, Failure> {
    match operand {
        Operand::Register(register) => Ok(*register),
        _ => Err((
            AssemblyErrorKind::InvalidOperand,
            format!("`{}` expects a register", opcode),
        )),
    }
}

fn register_or_literal(
    opcode: Opcode,
    operand: &Operand,
) -> Result<(AddressingMode, Value), Failure> {
    match operand {
        Operand::Register(register) => Ok((
            AddressingMode::Register,
            Value::Number(register.index() as u32),
        )),
        _ => Ok((
            AddressingMode::Immediate,
            value(opcode, operand, AddressingMode::Immediate)?,
        )),
    }
}

fn emit(entry: Reserved, labels: &BTreeMap<String, Word>) -> Result<MachineCodeLine> {
    let line_nr = entry.line_nr;

    let operand = match &entry.operand {
        Value::Number(n) => *n,
        Value::Symbol(name) => *labels.get(name).ok_or_else(|| {
            AssemblyError::new(
                AssemblyErrorKind::UndefinedLabel,
                format!("`{}`", entry.operand),
                line_nr,
            )
        })? as u32,
    };

    let instruction = Instruction::new(entry.opcode, operand)
        .with_mode(entry.mode)
        .with_registers(entry.target, entry.source);

    let word = if entry.wide {
        encoding::encode_wide(&instruction)
    } else {
        encoding::encode(&instruction)
    }
    .map_err(|err| {
        let kind = match err {
            EncodeError::InvalidInstruction { .. } => AssemblyErrorKind::UnknownMnemonic,
            EncodeError::EncodingOverflow { .. } => AssemblyErrorKind::EncodingOverflow,
            EncodeError::InvalidMode { .. } => AssemblyErrorKind::ModeNotAllowed,
            EncodeError::InvalidRegister { .. } => AssemblyErrorKind::InvalidRegister,
        };
        AssemblyError::new(kind, err.to_string(), line_nr)
    })?;

    Ok(MachineCodeLine {
        address: entry.address,
        word,
        instruction,
        line_nr,
        label: entry.label,
    })
}

/// Describes the accumulator form of `mnemonic`
pub fn instruction_info(mnemonic: &str) -> Option<InstructionInfo> {
    Opcode::lookup(mnemonic, false).map(|opcode| opcode.info())
}

/// Describes the register file form of `mnemonic`, if it has one
pub fn register_info(mnemonic: &str) -> Option<InstructionInfo> {
    Opcode::lookup(mnemonic, true).map(|opcode| opcode.info())
}

/// Renders assembled lines back to text, one instruction per line
pub fn disassemble(lines: &[MachineCodeLine]) -> String {
    lines
        .iter()
        .map(|line| format!("0x{:04X}: {}\n", line.address, line.instruction))
        .collect()
}

/// Best effort disassembly of raw memory starting at `base`. Words that do
/// not decode are shown as `.word`.
pub fn disassemble_words(words: &[Word], base: Word) -> String {
    let mut out = String::new();
    let mut i = 0;

    while i < words.len() {
        let first = words[i];
        let second = if encoding::is_wide(first) {
            words.get(i + 1).copied()
        } else {
            None
        };
        let address = base.wrapping_add(i as Word);

        let decoded = match second {
            None if encoding::is_wide(first) => None,
            _ => {
                let word = MachineWord::from_words(first, second);
                encoding::decode(word).ok().map(|instruction| (word, instruction))
            }
        };

        match decoded {
            Some((word, instruction)) => {
                out.push_str(&format!("0x{:04X}: {}\n", address, instruction));
                i += word.len();
            }
            None => {
                out.push_str(&format!("0x{:04X}: .word 0x{:04X}\n", address, first));
                i += 1;
            }
        }
    }

    out
}

/// Parses a number written the way the assembler accepts it
pub fn parse_number(text: &str) -> Option<u32> {
    parse::parse_number(text.trim()).ok()
}
