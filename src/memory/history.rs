//! Execution history: one snapshot per completed phase.

use std::fmt;
use std::sync::Arc;

use crate::processor::{Phase, Registers};

use super::Word;

/// State of the machine right after a phase completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// The phase that produced this snapshot
    pub phase: Phase,
    pub registers: Registers,
    /// The whole RAM. Shared with the previous snapshot unless the phase
    /// wrote memory.
    pub ram: Arc<[Word]>,
    /// Address of the instruction the phase worked on
    pub address: Option<Word>,
    /// 1-based source line of that instruction, if it came from the assembler
    pub line: Option<usize>,
    /// The source text of that line, trimmed
    pub source: Option<String>,
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<7} {}", self.phase, self.registers)?;
        if let Some(source) = &self.source {
            write!(f, "  | {}", source)?;
        }
        Ok(())
    }
}
