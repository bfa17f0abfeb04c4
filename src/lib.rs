//! A 16 bit one-address accumulator machine: shared program and data memory,
//! an assembler for it and a processor that can be stepped one phase at a
//! time.

use std::error;
use std::fmt;

pub mod assembler;
pub mod config;
pub mod flags;
pub mod isa;
pub mod memory;
pub mod processor;
pub mod task;

use assembler::AssemblyError;
use memory::OutOfRange;
use processor::RuntimeError;

/// Anything that can go wrong while loading or running a program
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Assembly(AssemblyError),
    Runtime(RuntimeError),
    Memory(OutOfRange),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Assembly(err) => write!(f, "assembly failed: {}", err),
            Error::Runtime(err) => write!(f, "runtime error: {}", err),
            Error::Memory(err) => write!(f, "memory error: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Assembly(err) => Some(err),
            Error::Runtime(err) => Some(err),
            Error::Memory(err) => Some(err),
        }
    }
}

impl From<AssemblyError> for Error {
    fn from(err: AssemblyError) -> Self {
        Error::Assembly(err)
    }
}

impl From<RuntimeError> for Error {
    fn from(err: RuntimeError) -> Self {
        Error::Runtime(err)
    }
}

impl From<OutOfRange> for Error {
    fn from(err: OutOfRange) -> Self {
        Error::Memory(err)
    }
}
