use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::assembler::{self, Assembly};
use crate::config::Config;
use crate::flags::{self, Alu, Flags, Outcome};
use crate::isa::encoding::{self, DecodeError, MachineWord};
use crate::isa::{AddressingMode, Instruction, Opcode, Register};
use crate::memory::{Memory, OutOfRange, Snapshot, Word};
use crate::Error;
use log::*;

mod error;

pub use error::{RuntimeError, RuntimeErrorKind};

/// The externally observable unit of single stepping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Fetch,
    Decode,
    Execute,
    Halted,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Fetch => "fetch",
            Phase::Decode => "decode",
            Phase::Execute => "execute",
            Phase::Halted => "halted",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Registers {
    /// Accumulator, implicit operand of the one-address instructions
    pub acc: Word,
    /// General purpose registers R0..R7
    pub r: [Word; Register::COUNT],
    /// Program counter
    pub pc: Word,
    pub flags: Flags,
    /// Instruction register: the raw word(s) of the last fetch
    pub ir: u32,
    /// Completed instructions
    pub cycles: u64,
    /// Termination flag. Set once HALT executed
    pub halted: bool,
}

impl Registers {
    pub fn new(entrypoint: Word) -> Self {
        Self {
            pc: entrypoint,
            ..Self::default()
        }
    }

    pub fn get(&self, register: Register) -> Word {
        self.r[register.index()]
    }

    pub fn set(&mut self, register: Register, value: Word) {
        self.r[register.index()] = value;
    }
}

impl fmt::Display for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PC={:04X} ACC={:04X} {} R=[",
            self.pc, self.acc, self.flags
        )?;
        for (i, value) in self.r.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:04X}", value)?;
        }
        write!(f, "] cycles={}", self.cycles)
    }
}

/// Everything an observer may want to render, detached from the processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub registers: Registers,
    /// The phase the next `step` runs
    pub phase: Phase,
    pub ram: Arc<[Word]>,
    pub history: Vec<Snapshot>,
    /// Text of the instruction in flight, once it has been fetched
    pub instruction: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fetched {
    address: Word,
    word: MachineWord,
}

/// Where the phase machine stands, with the data carried between phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cycle {
    Fetch,
    Decode(Fetched),
    Execute(Fetched, Instruction),
    Halted,
}

/// Maps instruction addresses back to the source they were assembled from
#[derive(Debug, Clone, Default)]
struct Listing {
    source: Vec<String>,
    lines: BTreeMap<Word, usize>,
}

impl Listing {
    fn new(assembly: &Assembly, source: &str) -> Self {
        Self {
            source: source.lines().map(|line| line.trim().to_string()).collect(),
            lines: assembly
                .lines()
                .iter()
                .map(|line| (line.address, line.line_nr))
                .collect(),
        }
    }

    fn line(&self, address: Word) -> Option<usize> {
        self.lines.get(&address).copied()
    }

    fn text(&self, line: usize) -> Option<String> {
        self.source.get(line.checked_sub(1)?).cloned()
    }
}

/// Emulates a one-address processor, one phase per [`Processor::step`]
#[derive(Debug, Clone)]
pub struct Processor {
    registers: Registers,
    memory: Memory,
    cycle: Cycle,
    /// Set by a failed phase, cleared by `reset`
    fault: Option<RuntimeError>,
    listing: Listing,
    /// Where `reset` points the program counter
    entrypoint: Word,
    config: Config,
}

impl Default for Processor {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Processor {
    pub fn new(config: Config) -> Self {
        Self {
            registers: Registers::new(config.entrypoint),
            memory: Memory::new(config.memory_size),
            cycle: Cycle::Fetch,
            fault: None,
            listing: Listing::default(),
            entrypoint: config.entrypoint,
            config,
        }
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn history(&self) -> &[Snapshot] {
        self.memory.history()
    }

    /// The phase the next call to [`Processor::step`] runs
    pub fn phase(&self) -> Phase {
        match self.cycle {
            Cycle::Fetch => Phase::Fetch,
            Cycle::Decode(_) => Phase::Decode,
            Cycle::Execute(..) => Phase::Execute,
            Cycle::Halted => Phase::Halted,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.registers.halted
    }

    /// The error that stopped the processor, if any
    pub fn fault(&self) -> Option<&RuntimeError> {
        self.fault.as_ref()
    }

    /// Places an assembled program into RAM at its origin and resets the
    /// processor to start there.
    ///
    /// RAM outside of the program is left alone, so data placed before
    /// survives loading.
    pub fn load(&mut self, assembly: &Assembly, source: &str) -> Result<(), Error> {
        let words = assembly.words();
        self.memory.load(assembly.origin(), &words)?;
        self.listing = Listing::new(assembly, source);
        self.entrypoint = assembly.origin();
        self.reset();

        info!(
            "loaded {} instructions ({} words) at 0x{:04X}",
            assembly.lines().len(),
            words.len(),
            assembly.origin()
        );

        Ok(())
    }

    /// Assembles `source` at the configured entrypoint and loads it. On an
    /// assembly error nothing about the processor changes.
    pub fn load_source(&mut self, source: &str) -> Result<Assembly, Error> {
        let assembly = assembler::assemble_at(source, self.config.entrypoint)?;
        self.load(&assembly, source)?;
        Ok(assembly)
    }

    /// Writes data words, growing RAM when they reach past its end
    pub fn write_data(&mut self, address: Word, words: &[Word]) -> Result<(), OutOfRange> {
        self.memory.load(address, words)
    }

    /// Reinitializes registers, flags, program counter and history. RAM is
    /// kept, see [`Processor::clear_memory`].
    pub fn reset(&mut self) {
        self.registers = Registers::new(self.entrypoint);
        self.cycle = Cycle::Fetch;
        self.fault = None;
        self.memory.clear_history();

        debug!("reset, pc=0x{:04X}", self.entrypoint);
    }

    /// Zeroes all of RAM
    pub fn clear_memory(&mut self) {
        self.memory.clear();
    }

    pub fn state(&self) -> State {
        State {
            registers: self.registers,
            phase: self.phase(),
            ram: self.memory.view(),
            history: self.memory.history().to_vec(),
            instruction: self.current_instruction(),
        }
    }

    fn current_instruction(&self) -> Option<String> {
        match self.cycle {
            Cycle::Decode(fetched) => encoding::decode(fetched.word)
                .ok()
                .map(|instruction| instruction.to_string()),
            Cycle::Execute(_, instruction) => Some(instruction.to_string()),
            Cycle::Fetch | Cycle::Halted => None,
        }
    }

    /// Address of the instruction the next phase works on
    fn current_address(&self) -> Option<Word> {
        match self.cycle {
            Cycle::Fetch => Some(self.registers.pc),
            Cycle::Decode(fetched) | Cycle::Execute(fetched, _) => Some(fetched.address),
            Cycle::Halted => None,
        }
    }

    /// Runs exactly one phase. Returns whether execution may continue.
    ///
    /// Once halted this is a no-op returning `false`. After a failure the
    /// same error is returned again until the processor is reset or loaded.
    pub fn step(&mut self) -> Result<bool, RuntimeError> {
        if let Some(fault) = &self.fault {
            return Err(fault.clone());
        }

        let phase = self.phase();
        let address = self.current_address();

        let result = match self.cycle {
            Cycle::Halted => return Ok(false),
            Cycle::Fetch => self.fetch(),
            Cycle::Decode(fetched) => self.decode(fetched),
            Cycle::Execute(_, instruction) => self.execute(instruction),
        };

        match result {
            Ok(()) => {
                self.record(phase, address);
                Ok(!matches!(self.cycle, Cycle::Halted))
            }
            Err(kind) => {
                let err = RuntimeError::new(kind, phase, address, self.state());
                error!("{}", err);
                self.fault = Some(err.clone());
                Err(err)
            }
        }
    }

    fn record(&mut self, phase: Phase, address: Option<Word>) {
        let line = address.and_then(|address| self.listing.line(address));
        let snapshot = Snapshot {
            phase,
            registers: self.registers,
            ram: self.memory.freeze(),
            address,
            line,
            source: line.and_then(|line| self.listing.text(line)),
        };

        trace_phase(&snapshot);
        self.memory.record(snapshot);
    }

    /// Reads the word at PC, and the next one for wide instructions, then
    /// moves PC past them.
    fn fetch(&mut self) -> Result<(), RuntimeErrorKind> {
        let address = self.registers.pc;
        let first = self.memory.read(address)?;

        let second = if encoding::is_wide(first) {
            let next = address
                .checked_add(1)
                .ok_or(RuntimeErrorKind::AddressOutOfRange {
                    address: address as usize + 1,
                    size: self.memory.len(),
                })?;
            Some(self.memory.read(next)?)
        } else {
            None
        };

        let word = MachineWord::from_words(first, second);
        self.registers.pc = address.wrapping_add(word.len() as Word);
        self.registers.ir = word.value();
        self.cycle = Cycle::Decode(Fetched { address, word });

        Ok(())
    }

    /// Resolves the fetched words. Operands are not dereferenced yet.
    fn decode(&mut self, fetched: Fetched) -> Result<(), RuntimeErrorKind> {
        let instruction = encoding::decode(fetched.word)?;
        self.cycle = Cycle::Execute(fetched, instruction);

        Ok(())
    }

    /// Performs the effect of `instruction`. All reads and checks happen
    /// before anything is committed; a memory write is always the last
    /// fallible action.
    fn execute(&mut self, instruction: Instruction) -> Result<(), RuntimeErrorKind> {
        use Opcode::*;

        let mut next = self.registers;
        let operand = instruction.operand as Word;
        let target = instruction.target;

        match instruction.opcode {
            NOP => {}
            HALT => next.halted = true,
            LDI => next.acc = operand,
            LDA => next.acc = self.memory.read(operand)?,
            STA => self.memory.write(operand, next.acc)?,
            ADD => self.accumulate(&mut next, Alu::Add, operand)?,
            SUB => self.accumulate(&mut next, Alu::Sub, operand)?,
            MUL => self.accumulate(&mut next, Alu::Mul, operand)?,
            DIV => self.accumulate(&mut next, Alu::Div, operand)?,
            AND => self.accumulate(&mut next, Alu::And, operand)?,
            OR => self.accumulate(&mut next, Alu::Or, operand)?,
            XOR => self.accumulate(&mut next, Alu::Xor, operand)?,
            NOT => {
                let out = flags::not(next.acc, next.flags);
                next.acc = out.value;
                next.flags = out.flags;
            }
            CMP => next.flags = flags::compare(next.acc, self.memory.read(operand)?),
            JMP | JZ | JNZ | JC | JNC | JV | JNV | JN | JNN => {
                if branch_taken(instruction.opcode, next.flags) {
                    next.pc = operand;
                }
            }
            LDRI => next.set(target, operand),
            LDR => {
                let value = self.memory.read(operand)?;
                next.set(target, value);
            }
            STR => self.memory.write(operand, next.get(target))?,
            LDRR => {
                let address = next.get(register_operand(&instruction)?);
                let value = self.memory.read(address)?;
                next.set(target, value);
            }
            STRR => {
                let address = next.get(register_operand(&instruction)?);
                self.memory.write(address, next.get(target))?;
            }
            ADDR => combine(&mut next, Alu::Add, &instruction)?,
            SUBR => combine(&mut next, Alu::Sub, &instruction)?,
            MULR => combine(&mut next, Alu::Mul, &instruction)?,
            DIVR => combine(&mut next, Alu::Div, &instruction)?,
            ANDR => combine(&mut next, Alu::And, &instruction)?,
            ORR => combine(&mut next, Alu::Or, &instruction)?,
            XORR => combine(&mut next, Alu::Xor, &instruction)?,
            CMPR => {
                let value = operand_value(&next, &instruction)?;
                next.flags = flags::compare(next.get(target), value);
            }
        }

        next.cycles += 1;
        self.registers = next;
        self.cycle = if next.halted {
            Cycle::Halted
        } else {
            Cycle::Fetch
        };

        Ok(())
    }

    /// ACC = ACC op [address]
    fn accumulate(
        &self,
        next: &mut Registers,
        alu: Alu,
        address: Word,
    ) -> Result<(), RuntimeErrorKind> {
        let value = self.memory.read(address)?;
        let out = arithmetic(alu, next.acc, value)?;
        next.acc = out.value;
        next.flags = out.flags;

        Ok(())
    }
}

/// Rd = Rs op operand
fn combine(
    next: &mut Registers,
    alu: Alu,
    instruction: &Instruction,
) -> Result<(), RuntimeErrorKind> {
    let value = operand_value(next, instruction)?;
    let out = arithmetic(alu, next.get(instruction.source), value)?;
    next.set(instruction.target, out.value);
    next.flags = out.flags;

    Ok(())
}

fn arithmetic(alu: Alu, a: Word, b: Word) -> Result<Outcome, RuntimeErrorKind> {
    alu.apply(a, b).ok_or(RuntimeErrorKind::ArithmeticError {
        message: "division by zero",
    })
}

fn operand_value(
    registers: &Registers,
    instruction: &Instruction,
) -> Result<Word, RuntimeErrorKind> {
    match instruction.mode {
        AddressingMode::Register => Ok(registers.get(register_operand(instruction)?)),
        AddressingMode::Immediate | AddressingMode::Direct => Ok(instruction.operand as Word),
    }
}

fn register_operand(instruction: &Instruction) -> Result<Register, RuntimeErrorKind> {
    instruction.operand_register().ok_or_else(|| {
        RuntimeErrorKind::DecodeError(DecodeError::Malformed {
            word: instruction.operand,
        })
    })
}

fn branch_taken(opcode: Opcode, flags: Flags) -> bool {
    match opcode {
        Opcode::JMP => true,
        Opcode::JZ => flags.zero,
        Opcode::JNZ => !flags.zero,
        Opcode::JC => flags.carry,
        Opcode::JNC => !flags.carry,
        Opcode::JV => flags.overflow,
        Opcode::JNV => !flags.overflow,
        Opcode::JN => flags.negative,
        Opcode::JNN => !flags.negative,
        _ => false,
    }
}

/// The one place phases are reported to the log
fn trace_phase(snapshot: &Snapshot) {
    match snapshot.phase {
        Phase::Execute => debug!("{}", snapshot),
        _ => trace!("{}", snapshot),
    }
}
