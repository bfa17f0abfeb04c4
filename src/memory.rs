use std::error;
use std::fmt::{self, Write};
use std::ops::Range;
use std::sync::Arc;

use crate::config::ADDRESS_SPACE;

pub mod history;

pub use history::Snapshot;

pub type Word = u16; // 2 bytes

/// An access outside of the current bounds of the memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutOfRange {
    pub address: usize,
    pub size: usize,
}

impl fmt::Display for OutOfRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "address `0x{:04X}` is outside of memory (size 0x{:04X})",
            self.address, self.size
        )
    }
}

impl error::Error for OutOfRange {}

/// Word addressable RAM holding program and data, plus the execution history
/// recorded by the processor.
///
/// The RAM only ever grows. Every access is bounds checked against the
/// current size; nothing is grown implicitly by a read or a write.
#[derive(Debug, Clone)]
pub struct Memory {
    /// The actual data of the memory
    data: Vec<Word>,
    /// One snapshot per completed phase
    history: Vec<Snapshot>,
    /// Frozen copy of `data` shared by snapshots. Dropped by every write.
    view: Option<Arc<[Word]>>,
}

impl PartialEq for Memory {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data && self.history == other.history
    }
}

impl Eq for Memory {}

impl Default for Memory {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MEMORY_SIZE)
    }
}

impl Memory {
    /// Initializes zeroed memory with `size` words
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size.min(ADDRESS_SPACE)],
            history: Vec::new(),
            view: None,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[Word] {
        &self.data
    }

    fn check(&self, address: usize, len: usize) -> Result<(), OutOfRange> {
        match address.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(()),
            _ => Err(OutOfRange {
                address: address.max(self.data.len()),
                size: self.data.len(),
            }),
        }
    }

    /// Reads a word from the memory
    pub fn read(&self, address: Word) -> Result<Word, OutOfRange> {
        self.check(address as usize, 1)?;
        Ok(self.data[address as usize])
    }

    /// Writes a word to the memory
    pub fn write(&mut self, address: Word, value: Word) -> Result<(), OutOfRange> {
        self.check(address as usize, 1)?;
        self.data[address as usize] = value;
        self.view = None;
        Ok(())
    }

    /// Writes a slice of words starting at `address`. Nothing is written
    /// unless the whole slice fits.
    pub fn write_slice(&mut self, address: Word, words: &[Word]) -> Result<(), OutOfRange> {
        let start = address as usize;
        self.check(start, words.len())?;
        self.data[start..start + words.len()].copy_from_slice(words);
        self.view = None;
        Ok(())
    }

    /// Grows the memory to hold at least `len` words. Never shrinks.
    pub fn grow_to(&mut self, len: usize) -> Result<(), OutOfRange> {
        if len > ADDRESS_SPACE {
            return Err(OutOfRange {
                address: len - 1,
                size: ADDRESS_SPACE,
            });
        }
        if len > self.data.len() {
            log::debug!("growing memory 0x{:04X} -> 0x{:04X}", self.data.len(), len);
            self.data.resize(len, 0);
            self.view = None;
        }
        Ok(())
    }

    /// Grows the memory as far as needed and writes `words` at `address`
    pub fn load(&mut self, address: Word, words: &[Word]) -> Result<(), OutOfRange> {
        self.grow_to(address as usize + words.len())?;
        self.write_slice(address, words)
    }

    /// Zeroes every cell, keeping the current size
    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|word| *word = 0);
        self.view = None;
    }

    /// The current contents as a shared slice, reusing the last frozen copy
    /// when nothing was written since
    pub fn view(&self) -> Arc<[Word]> {
        match &self.view {
            Some(view) => Arc::clone(view),
            None => Arc::from(self.data.as_slice()),
        }
    }

    /// Like [`Memory::view`], but keeps the copy for the next caller
    pub(crate) fn freeze(&mut self) -> Arc<[Word]> {
        if let Some(view) = &self.view {
            return Arc::clone(view);
        }
        let view: Arc<[Word]> = Arc::from(self.data.as_slice());
        self.view = Some(Arc::clone(&view));
        view
    }

    pub fn history(&self) -> &[Snapshot] {
        &self.history
    }

    pub(crate) fn record(&mut self, snapshot: Snapshot) {
        self.history.push(snapshot);
    }

    pub(crate) fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Renders `range` as a hex table, eight words per row
    pub fn dump(&self, range: Range<usize>) -> String {
        let end = range.end.min(self.data.len());
        let start = range.start.min(end);
        let mut out = String::new();

        for (row, chunk) in self.data[start..end].chunks(8).enumerate() {
            let _ = write!(out, "0x{:04X}:", start + row * 8);
            for word in chunk {
                let _ = write!(out, " {:04X}", word);
            }
            out.push('\n');
        }

        out
    }
}

/// Writes a block of words directly into the memory
#[macro_export]
macro_rules! write_words {
    ( $mem:ident : $pos:expr => $( $word:expr ),+ ) => {
        $mem.write_slice($pos, &[
            $(
                $word as $crate::memory::Word,
            )+
        ])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::Result;

    #[test]
    fn test_read_write() -> Result<()> {
        let mut mem = Memory::new(0x10);
        mem.write(0x2, 0x1234)?;
        assert_eq!(mem.read(0x2)?, 0x1234);
        assert_eq!(mem.as_slice()[0x2], 0x1234);

        Ok(())
    }

    #[test]
    fn test_out_of_range() -> Result<()> {
        let mut mem = Memory::new(0x10);
        assert_eq!(
            mem.read(0x10),
            Err(OutOfRange {
                address: 0x10,
                size: 0x10
            })
        );
        assert!(mem.write(0x20, 1).is_err());
        assert_eq!(mem, Memory::new(0x10));

        Ok(())
    }

    #[test]
    fn test_write_slice_is_all_or_nothing() -> Result<()> {
        let mut mem = Memory::new(0x10);
        assert!(mem.write_slice(0x0E, &[1, 2, 3]).is_err());
        assert_eq!(mem.as_slice()[0x0E..], [0, 0]);

        mem.write_slice(0x0D, &[1, 2, 3])?;
        assert_eq!(mem.as_slice()[0x0D..], [1, 2, 3]);

        Ok(())
    }

    #[test]
    fn test_grow_never_shrinks() -> Result<()> {
        let mut mem = Memory::new(0x10);
        mem.write(0x0F, 7)?;
        mem.grow_to(0x20)?;
        assert_eq!(mem.len(), 0x20);
        assert_eq!(mem.read(0x0F)?, 7);

        mem.grow_to(0x08)?;
        assert_eq!(mem.len(), 0x20);
        assert!(mem.grow_to(ADDRESS_SPACE + 1).is_err());

        Ok(())
    }

    #[test]
    fn test_load_grows() -> Result<()> {
        let mut mem = Memory::new(0x04);
        mem.load(0x0100, &[3, 10, 20, 30])?;
        assert_eq!(mem.len(), 0x0104);
        assert_eq!(mem.read(0x0103)?, 30);

        Ok(())
    }

    #[test]
    fn test_clear_keeps_size() -> Result<()> {
        let mut mem = Memory::new(0x10);
        mem.load(0x18, &[1])?;
        mem.clear();
        assert_eq!(mem.len(), 0x19);
        assert!(mem.as_slice().iter().all(|word| *word == 0));

        Ok(())
    }

    #[test]
    fn test_write_words() -> Result<()> {
        let mut mem = Memory::new(0x10);
        write_words!(mem : 0x4 => 0x0805, 0x1000, 0x0400)?;
        assert_eq!(mem.as_slice()[0x4..0x7], [0x0805, 0x1000, 0x0400]);

        Ok(())
    }

    #[test]
    fn test_view_is_shared_until_written() -> Result<()> {
        let mut mem = Memory::new(0x10);
        let first = mem.freeze();
        assert!(Arc::ptr_eq(&first, &mem.freeze()));
        assert!(Arc::ptr_eq(&first, &mem.view()));

        // a failed write leaves the copy valid
        assert!(mem.write(0x10, 1).is_err());
        assert!(Arc::ptr_eq(&first, &mem.freeze()));

        mem.write(0x2, 7)?;
        let second = mem.freeze();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first[0x2], 0);
        assert_eq!(second[0x2], 7);

        mem.clear();
        assert_eq!(mem.freeze()[0x2], 0);

        Ok(())
    }

    #[test]
    fn test_dump() -> Result<()> {
        let mut mem = Memory::new(0x10);
        mem.write(0x9, 0xBEEF)?;
        assert_eq!(
            mem.dump(0x8..0x10),
            "0x0008: 0000 BEEF 0000 0000 0000 0000 0000 0000\n"
        );

        Ok(())
    }
}
