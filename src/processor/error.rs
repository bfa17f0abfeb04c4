use std::error;
use std::fmt;
use std::sync::Arc;

use crate::isa::encoding::DecodeError;
use crate::memory::{OutOfRange, Word};

use super::{Phase, State};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    AddressOutOfRange { address: usize, size: usize },
    DecodeError(DecodeError),
    ArithmeticError { message: &'static str },
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeErrorKind::AddressOutOfRange { address, size } => write!(
                f,
                "address `0x{:04X}` is out of range (memory size 0x{:04X})",
                address, size
            ),
            RuntimeErrorKind::DecodeError(err) => write!(f, "failed to decode: {}", err),
            RuntimeErrorKind::ArithmeticError { message } => f.write_str(message),
        }
    }
}

impl From<OutOfRange> for RuntimeErrorKind {
    fn from(err: OutOfRange) -> Self {
        RuntimeErrorKind::AddressOutOfRange {
            address: err.address,
            size: err.size,
        }
    }
}

impl From<DecodeError> for RuntimeErrorKind {
    fn from(err: DecodeError) -> Self {
        RuntimeErrorKind::DecodeError(err)
    }
}

/// A fatal fault while stepping. Carries the complete machine state as it
/// was before the failing phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    kind: RuntimeErrorKind,
    phase: Phase,
    address: Option<Word>,
    state: Arc<State>,
}

impl RuntimeError {
    pub(crate) fn new(
        kind: RuntimeErrorKind,
        phase: Phase,
        address: Option<Word>,
        state: State,
    ) -> Self {
        Self {
            kind,
            phase,
            address,
            state: Arc::new(state),
        }
    }

    pub fn kind(&self) -> RuntimeErrorKind {
        self.kind
    }

    /// The phase that failed
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Address of the instruction being processed, if one was fetched
    pub fn address(&self) -> Option<Word> {
        self.address
    }

    pub fn state(&self) -> &State {
        &self.state
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed", self.phase)?;
        if let Some(address) = self.address {
            write!(f, " at 0x{:04X}", address)?;
        }
        write!(f, ": {} [{}]", self.kind, self.state.registers)
    }
}

impl error::Error for RuntimeError {}
