use std::convert::TryFrom;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand};
use color_eyre::eyre::{bail, eyre, Result, WrapErr};
use log::LevelFilter;
use simple_logger::SimpleLogger;

use acc16::assembler;
use acc16::config::{Config, DEFAULT_MEMORY_SIZE};
use acc16::memory::Word;
use acc16::processor::Processor;
use acc16::task::{self, Driver, DEFAULT_MAX_STEPS};

/// Assembler and phase stepping emulator for a 16 bit accumulator machine
#[derive(Parser)]
#[command(version)]
struct Args {
    /// More log output, repeat for more detail
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble a source file and print the listing
    Assemble {
        /// Source file
        name: PathBuf,
        /// Address of the first instruction
        #[arg(long, value_parser = parse_word, default_value = "0")]
        origin: Word,
    },
    /// Run a source file until it halts
    Run {
        /// Source file
        name: PathBuf,
        /// Give up after this many phases
        #[arg(long, default_value_t = DEFAULT_MAX_STEPS)]
        max_steps: usize,
        /// Print the machine state after every phase
        #[arg(short, long)]
        trace: bool,
        /// Print memory starting at this address once halted
        #[arg(long, value_parser = parse_word)]
        dump: Option<Word>,
        /// Number of words printed by `--dump`
        #[arg(long, default_value_t = 16)]
        count: usize,
        /// Address of the first instruction
        #[arg(long, value_parser = parse_word, default_value = "0")]
        origin: Word,
        /// Initial RAM size in words
        #[arg(long, default_value_t = DEFAULT_MEMORY_SIZE)]
        memory_size: usize,
    },
    /// Run one of the built-in tasks and verify its result
    Task {
        /// Task id, see `tasks`
        id: usize,
        /// Give up after this many phases
        #[arg(long, default_value_t = DEFAULT_MAX_STEPS)]
        max_steps: usize,
        /// Print the machine state after every phase
        #[arg(short, long)]
        trace: bool,
    },
    /// List the built-in tasks
    Tasks,
}

fn parse_word(text: &str) -> std::result::Result<Word, String> {
    assembler::parse_number(text)
        .and_then(|n| Word::try_from(n).ok())
        .ok_or_else(|| format!("`{}` is not a 16 bit number", text))
}

fn main() -> Result<()> {
    color_eyre::install()?; // rust error handling
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    SimpleLogger::new().with_level(level).init()?; // logging

    match args.command {
        Command::Assemble { name, origin } => assemble(&name, origin),
        Command::Run {
            name,
            max_steps,
            trace,
            dump,
            count,
            origin,
            memory_size,
        } => {
            let config = Config::default()
                .with_memory_size(memory_size)
                .with_entrypoint(origin);
            run(&name, config, max_steps, trace, dump.map(|address| (address, count)))
        }
        Command::Task {
            id,
            max_steps,
            trace,
        } => run_task(id, max_steps, trace),
        Command::Tasks => {
            for task in task::catalogue() {
                println!("{:>3}  {}", task.id(), task.title());
            }
            Ok(())
        }
    }
}

fn read_source(name: &Path) -> Result<String> {
    fs::read_to_string(name).wrap_err_with(|| format!("failed to read `{}`", name.display()))
}

fn assemble(name: &Path, origin: Word) -> Result<()> {
    let source = read_source(name)?;
    let assembly = assembler::assemble_at(&source, origin)
        .wrap_err_with(|| format!("failed to assemble `{}`", name.display()))?;

    print!("{}", assembly);
    println!(
        "{} instruction(s), {} word(s), {} label(s)",
        assembly.lines().len(),
        assembly.len(),
        assembly.labels().len()
    );

    Ok(())
}

fn run(
    name: &Path,
    config: Config,
    max_steps: usize,
    trace: bool,
    dump: Option<(Word, usize)>,
) -> Result<()> {
    let source = read_source(name)?;
    let mut cpu = Processor::new(config);
    cpu.load_source(&source)
        .wrap_err_with(|| format!("failed to load `{}`", name.display()))?;

    let mut steps = 0;
    loop {
        if steps >= max_steps {
            bail!("program did not halt within {} steps", max_steps);
        }

        let running = cpu.step()?;
        steps += 1;

        if trace {
            if let Some(snapshot) = cpu.history().last() {
                println!("{}", snapshot);
            }
        }
        if !running {
            break;
        }
    }

    println!("halted after {} steps", steps);
    println!("{}", cpu.registers());

    if let Some((address, count)) = dump {
        let start = address as usize;
        print!("{}", cpu.memory().dump(start..start + count));
    }

    Ok(())
}

fn run_task(id: usize, max_steps: usize, trace: bool) -> Result<()> {
    let task = task::find(id).ok_or_else(|| eyre!("no task with id {}", id))?;
    println!("task {}: {}", task.id(), task.title());
    println!("{}", task.description());

    let mut driver = Driver::new(Processor::default(), task.as_ref());
    driver.load()?;
    let outcome = driver.run(max_steps)?;

    if trace {
        for snapshot in driver.processor().history() {
            println!("{}", snapshot);
        }
    }

    if !outcome.halted {
        bail!("task {} did not halt within {} steps", id, max_steps);
    }

    let verification = driver
        .verify()
        .ok_or_else(|| eyre!("task {} has no result", id))?;
    println!(
        "{} = {} after {} steps",
        task.result(),
        verification.actual,
        outcome.steps
    );
    println!("{}", verification);

    if !verification.passed {
        bail!("task {} failed", id);
    }

    Ok(())
}
