use crate::memory::Word;

/// Number of addressable words
pub const ADDRESS_SPACE: usize = 0x10000;

/// Words of RAM a processor starts out with
pub const DEFAULT_MEMORY_SIZE: usize = 0x2000;

/// First instruction is placed here unless configured otherwise
pub const DEFAULT_ENTRYPOINT: Word = 0x0000;

/// Construction parameters of a [`Processor`](crate::processor::Processor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Config {
    /// Initial RAM size in words, capped at [`ADDRESS_SPACE`]
    pub memory_size: usize,
    /// Where programs are placed and where the program counter starts
    pub entrypoint: Word,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memory_size: DEFAULT_MEMORY_SIZE,
            entrypoint: DEFAULT_ENTRYPOINT,
        }
    }
}

impl Config {
    pub fn with_memory_size(mut self, memory_size: usize) -> Self {
        self.memory_size = memory_size.min(ADDRESS_SPACE);
        self
    }

    pub fn with_entrypoint(mut self, entrypoint: Word) -> Self {
        self.entrypoint = entrypoint;
        self
    }
}
