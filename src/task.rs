//! Demonstration programs together with their input data and the result
//! they must produce, and a driver that runs them.

use std::fmt;

use color_eyre::eyre::{ensure, Result, WrapErr};
use log::*;

use crate::isa::Register;
use crate::memory::Word;
use crate::processor::{Phase, Processor, Registers};

/// Largest array a task accepts. A block this long plus its length prefix
/// stays inside the 0x100 words reserved for it, and either program finishes
/// it within `DEFAULT_MAX_STEPS`.
pub const MAX_ELEMENTS: usize = 0x7F;

/// Steps a driver runs before giving up, unless told otherwise
pub const DEFAULT_MAX_STEPS: usize = 10_000;

/// When the input data of a task reaches memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Staging {
    /// Everything is written before the first step
    Preload,
    /// Cells start out zeroed; one is written after each completed execute
    /// phase, in layout order
    Incremental,
}

/// Where a task leaves its result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultLocation {
    Accumulator,
    Register(Register),
}

impl ResultLocation {
    pub fn read(&self, registers: &Registers) -> Word {
        match self {
            ResultLocation::Accumulator => registers.acc,
            ResultLocation::Register(register) => registers.get(*register),
        }
    }
}

impl fmt::Display for ResultLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultLocation::Accumulator => f.write_str("ACC"),
            ResultLocation::Register(register) => write!(f, "{}", register),
        }
    }
}

/// Input cells of a task as `(address, value)`, in the order they are written
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataLayout {
    cells: Vec<(Word, Word)>,
}

impl DataLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `words` at consecutive addresses from `address`
    pub fn block(mut self, address: Word, words: &[Word]) -> Self {
        self.cells.extend(
            words
                .iter()
                .enumerate()
                .map(|(i, word)| (address.wrapping_add(i as Word), *word)),
        );
        self
    }

    pub fn cells(&self) -> &[(Word, Word)] {
        &self.cells
    }
}

/// Hands out the cells of a layout one at a time
#[derive(Debug, Clone, Default)]
pub struct DataFeed {
    pending: std::vec::IntoIter<(Word, Word)>,
}

impl DataFeed {
    pub fn new(layout: DataLayout) -> Self {
        Self {
            pending: layout.cells.into_iter(),
        }
    }
}

impl Iterator for DataFeed {
    type Item = (Word, Word);

    fn next(&mut self) -> Option<Self::Item> {
        self.pending.next()
    }
}

/// Outcome of checking a finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub expected: Word,
    pub actual: Word,
    pub passed: bool,
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expected {}, found {}: {}",
            self.expected,
            self.actual,
            if self.passed { "passed" } else { "failed" }
        )
    }
}

pub trait Task {
    fn id(&self) -> usize;

    fn title(&self) -> &str;

    fn description(&self) -> String;

    /// Assembly source of the program
    fn program(&self) -> &str;

    fn data(&self) -> DataLayout;

    fn staging(&self) -> Staging {
        Staging::Preload
    }

    fn result(&self) -> ResultLocation;

    fn expected(&self) -> Word;

    fn verify(&self, registers: &Registers) -> Verification {
        let expected = self.expected();
        let actual = self.result().read(registers);
        Verification {
            expected,
            actual,
            passed: expected == actual,
        }
    }
}

const MAX_PROGRAM: &str = "\
; R4 = N, R0 = running maximum, R1 = index
        LDI R1, 1
        LDI R2, 0x0100
        LDR R4, [0x0100]
        LDR R0, [0x0101]
LOOP:   CMP R1, R4
        JZ DONE
        ADD R1, R1, 1
        ADD R6, R2, R1
        LDRR R7, [R6]
        CMP R0, R7          ; carry: R0 < R7
        JC UPDATE
        JMP LOOP
UPDATE: ADD R0, R7, 0
        JMP LOOP
DONE:   STR R0, [0x0410]
        LDA 0x0410
        HALT
";

/// Maximum of an array: `N` at `0x0100`, elements from `0x0101`, result in
/// the accumulator. The data arrives while the program runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaxTask {
    elements: Vec<Word>,
}

impl Default for MaxTask {
    fn default() -> Self {
        Self {
            elements: vec![10, 20, 30],
        }
    }
}

impl MaxTask {
    pub const BASE: Word = 0x0100;

    pub fn new(elements: Vec<Word>) -> Result<Self> {
        ensure!(!elements.is_empty(), "the array must not be empty");
        ensure!(
            elements.len() <= MAX_ELEMENTS,
            "at most {} elements are supported, got {}",
            MAX_ELEMENTS,
            elements.len()
        );
        Ok(Self { elements })
    }
}

impl Task for MaxTask {
    fn id(&self) -> usize {
        1
    }

    fn title(&self) -> &str {
        "maximum of an array"
    }

    fn description(&self) -> String {
        format!(
            "Finds the largest of {:?} (unsigned). N is read from 0x{:04X}, the elements \
             follow it; one cell is written after each executed instruction. The result is \
             left in ACC.",
            self.elements,
            Self::BASE
        )
    }

    fn program(&self) -> &str {
        MAX_PROGRAM
    }

    fn data(&self) -> DataLayout {
        let mut words = vec![self.elements.len() as Word];
        words.extend(&self.elements);
        DataLayout::new().block(Self::BASE, &words)
    }

    fn staging(&self) -> Staging {
        Staging::Incremental
    }

    fn result(&self) -> ResultLocation {
        ResultLocation::Accumulator
    }

    fn expected(&self) -> Word {
        self.elements.iter().copied().max().unwrap_or_default()
    }
}

const CONVOLUTION_PROGRAM: &str = "\
; R0 = sum, R1 = index, R5 = N + 1
        LDI R0, 0
        LDI R1, 1
        LDI R2, 0x0200
        LDI R3, 0x0300
        LDR R4, [0x0200]
        ADD R5, R4, 1
LOOP:   CMP R1, R5
        JZ DONE
        ADD R6, R2, R1
        LDRR R7, [R6]       ; A[i]
        ADD R6, R3, R1
        LDRR R6, [R6]       ; B[i]
        MUL R7, R7, R6
        ADD R0, R0, R7
        ADD R1, R1, 1
        JMP LOOP
DONE:   HALT
";

/// Sum of the pairwise products of two equally long arrays, A at `0x0200`
/// and B at `0x0300`, each prefixed with its length. Result in `R0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvolutionTask {
    a: Vec<Word>,
    b: Vec<Word>,
}

impl Default for ConvolutionTask {
    fn default() -> Self {
        Self {
            a: vec![2, 3, 1, 4, 5, 2, 3, 1, 4, 2],
            b: vec![1, 2, 3, 1, 2, 3, 1, 2, 3, 1],
        }
    }
}

impl ConvolutionTask {
    pub const A: Word = 0x0200;
    pub const B: Word = 0x0300;

    pub fn new(a: Vec<Word>, b: Vec<Word>) -> Result<Self> {
        ensure!(
            a.len() == b.len(),
            "arrays differ in length: {} and {}",
            a.len(),
            b.len()
        );
        ensure!(!a.is_empty(), "the arrays must not be empty");
        ensure!(
            a.len() <= MAX_ELEMENTS,
            "at most {} elements are supported, got {}",
            MAX_ELEMENTS,
            a.len()
        );
        Ok(Self { a, b })
    }
}

impl Task for ConvolutionTask {
    fn id(&self) -> usize {
        2
    }

    fn title(&self) -> &str {
        "convolution of two arrays"
    }

    fn description(&self) -> String {
        format!(
            "Computes the sum of A[i] * B[i] for A = {:?} at 0x{:04X} and B = {:?} at \
             0x{:04X}, both prefixed with their length. The result is left in R0.",
            self.a,
            Self::A,
            self.b,
            Self::B
        )
    }

    fn program(&self) -> &str {
        CONVOLUTION_PROGRAM
    }

    fn data(&self) -> DataLayout {
        let prefixed = |words: &[Word]| {
            let mut out = vec![words.len() as Word];
            out.extend(words);
            out
        };
        DataLayout::new()
            .block(Self::A, &prefixed(&self.a))
            .block(Self::B, &prefixed(&self.b))
    }

    fn result(&self) -> ResultLocation {
        ResultLocation::Register(Register::default())
    }

    fn expected(&self) -> Word {
        self.a
            .iter()
            .zip(&self.b)
            .fold(0, |sum: Word, (a, b)| sum.wrapping_add(a.wrapping_mul(*b)))
    }
}

/// All tasks with their default data, ordered by id
pub fn catalogue() -> Vec<Box<dyn Task>> {
    vec![
        Box::new(MaxTask::default()),
        Box::new(ConvolutionTask::default()),
    ]
}

pub fn find(id: usize) -> Option<Box<dyn Task>> {
    catalogue().into_iter().find(|task| task.id() == id)
}

/// Result of [`Driver::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// Phases run in total
    pub steps: usize,
    /// Whether HALT was reached, as opposed to running out of steps
    pub halted: bool,
}

/// Runs a task on a processor, feeding its data as the task demands
pub struct Driver<'t> {
    processor: Processor,
    task: &'t dyn Task,
    feed: DataFeed,
    steps: usize,
}

impl<'t> Driver<'t> {
    pub fn new(processor: Processor, task: &'t dyn Task) -> Self {
        Self {
            processor,
            task,
            feed: DataFeed::default(),
            steps: 0,
        }
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    pub fn into_processor(self) -> Processor {
        self.processor
    }

    pub fn task(&self) -> &dyn Task {
        self.task
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Assembles and loads the program, then stages the data
    pub fn load(&mut self) -> Result<()> {
        let task = self.task;

        self.processor
            .load_source(task.program())
            .wrap_err_with(|| format!("failed to load task {} ({})", task.id(), task.title()))?;

        let data = task.data();
        match task.staging() {
            Staging::Preload => {
                for &(address, value) in data.cells() {
                    self.processor.write_data(address, &[value])?;
                }
                self.feed = DataFeed::default();
            }
            Staging::Incremental => {
                for &(address, _) in data.cells() {
                    self.processor.write_data(address, &[0])?;
                }
                self.feed = DataFeed::new(data);
            }
        }
        self.steps = 0;

        info!(
            "task {}: {} loaded, {} data cell(s) {:?}",
            task.id(),
            task.title(),
            task.data().cells().len(),
            task.staging()
        );

        Ok(())
    }

    /// Runs one phase. After a completed execute phase the next pending data
    /// cell is written.
    pub fn step(&mut self) -> Result<bool> {
        let phase = self.processor.phase();
        if phase == Phase::Halted {
            return Ok(false);
        }

        let running = self
            .processor
            .step()
            .wrap_err_with(|| {
                format!("task {} failed after {} steps", self.task.id(), self.steps)
            })?;
        self.steps += 1;

        if phase == Phase::Execute {
            if let Some((address, value)) = self.feed.next() {
                debug!("feeding 0x{:04X} = {}", address, value);
                self.processor.write_data(address, &[value])?;
            }
        }

        Ok(running)
    }

    /// Steps until the program halts or `max_steps` phases ran
    pub fn run(&mut self, max_steps: usize) -> Result<Outcome> {
        while self.steps < max_steps {
            if !self.step()? {
                return Ok(Outcome {
                    steps: self.steps,
                    halted: true,
                });
            }
        }

        warn!("task {} did not halt within {} steps", self.task.id(), max_steps);
        Ok(Outcome {
            steps: self.steps,
            halted: self.processor.is_halted(),
        })
    }

    /// Compares the result with the expected value, once the program halted
    pub fn verify(&self) -> Option<Verification> {
        if self.processor.is_halted() {
            Some(self.task.verify(self.processor.registers()))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::assemble;

    fn run(task: &dyn Task) -> Result<(Outcome, Option<Verification>, Processor)> {
        let mut driver = Driver::new(Processor::default(), task);
        driver.load()?;
        let outcome = driver.run(DEFAULT_MAX_STEPS)?;
        let verification = driver.verify();
        Ok((outcome, verification, driver.into_processor()))
    }

    #[test]
    fn test_programs_assemble() -> Result<()> {
        for task in catalogue() {
            assemble(task.program())?;
        }

        Ok(())
    }

    #[test]
    fn test_max() -> Result<()> {
        let task = MaxTask::default();
        let (outcome, verification, cpu) = run(&task)?;

        assert!(outcome.halted);
        assert_eq!(outcome.steps % 3, 0);
        assert_eq!(cpu.registers().acc, 30);
        assert_eq!(
            verification,
            Some(Verification {
                expected: 30,
                actual: 30,
                passed: true
            })
        );
        assert_eq!(cpu.memory().as_slice()[0x0100..0x0104], [3, 10, 20, 30]);

        Ok(())
    }

    #[test]
    fn test_max_other_data() -> Result<()> {
        let arrays = vec![
            vec![7],
            vec![5, 90, 3, 90, 1],
            vec![0xFFFF, 2],
            vec![1, 2, 3, 4, 5, 6],
        ];
        for elements in arrays {
            let task = MaxTask::new(elements.clone())?;
            let (_, verification, _) = run(&task)?;
            let verification = verification.ok_or_else(|| color_eyre::eyre::eyre!("no result"))?;
            assert!(verification.passed, "{:?}: {}", elements, verification);
        }

        assert!(MaxTask::new(vec![]).is_err());
        assert!(MaxTask::new(vec![1; MAX_ELEMENTS + 1]).is_err());

        Ok(())
    }

    #[test]
    fn test_incremental_staging() -> Result<()> {
        let task = MaxTask::default();
        let mut driver = Driver::new(Processor::default(), &task);
        driver.load()?;

        fn cells(driver: &Driver<'_>) -> Vec<Word> {
            driver.processor().memory().as_slice()[0x0100..0x0104].to_vec()
        }
        assert_eq!(cells(&driver), vec![0, 0, 0, 0]);

        // fetch and decode do not feed
        driver.step()?;
        driver.step()?;
        assert_eq!(cells(&driver), vec![0, 0, 0, 0]);

        driver.step()?;
        assert_eq!(cells(&driver), vec![3, 0, 0, 0]);
        for _ in 0..3 {
            driver.step()?;
        }
        assert_eq!(cells(&driver), vec![3, 10, 0, 0]);

        Ok(())
    }

    #[test]
    fn test_convolution() -> Result<()> {
        let task = ConvolutionTask::default();
        assert_eq!(task.expected(), 50);

        let (outcome, verification, cpu) = run(&task)?;
        assert!(outcome.halted);
        assert_eq!(cpu.registers().r[0], 50);
        assert_eq!(verification.map(|v| v.passed), Some(true));

        let task = ConvolutionTask::new(vec![1, 2, 3], vec![4, 5, 6])?;
        let (_, verification, _) = run(&task)?;
        assert_eq!(verification.map(|v| v.actual), Some(32));

        assert!(ConvolutionTask::new(vec![1], vec![1, 2]).is_err());

        Ok(())
    }

    #[test]
    fn test_largest_arrays() -> Result<()> {
        // ascending, so the maximum is updated on every element
        let elements: Vec<Word> = (1..=MAX_ELEMENTS as Word).collect();
        let task = MaxTask::new(elements.clone())?;
        let (outcome, verification, cpu) = run(&task)?;
        assert!(outcome.halted);
        assert_eq!(verification.map(|v| v.passed), Some(true));
        assert_eq!(cpu.registers().acc, MAX_ELEMENTS as Word);
        // the last element sits just below the next block
        let last = MaxTask::BASE as usize + MAX_ELEMENTS;
        assert!(last < ConvolutionTask::A as usize);
        assert_eq!(cpu.memory().as_slice()[last], MAX_ELEMENTS as Word);

        let task = ConvolutionTask::new(elements.clone(), vec![1; MAX_ELEMENTS])?;
        let (outcome, verification, _) = run(&task)?;
        assert!(outcome.halted);
        assert_eq!(verification.map(|v| v.passed), Some(true));

        Ok(())
    }

    #[test]
    fn test_step_limit() -> Result<()> {
        let task = ConvolutionTask::default();
        let mut driver = Driver::new(Processor::default(), &task);
        driver.load()?;

        let outcome = driver.run(30)?;
        assert_eq!(outcome, Outcome { steps: 30, halted: false });
        assert_eq!(driver.verify(), None);

        // continues where it stopped
        let outcome = driver.run(DEFAULT_MAX_STEPS)?;
        assert!(outcome.halted);
        assert_eq!(driver.verify().map(|v| v.passed), Some(true));

        Ok(())
    }

    #[test]
    fn test_catalogue() -> Result<()> {
        let ids: Vec<_> = catalogue().iter().map(|task| task.id()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(
            find(2).map(|task| task.result()),
            Some(ResultLocation::Register(Register::default()))
        );
        assert!(find(3).is_none());

        Ok(())
    }
}
