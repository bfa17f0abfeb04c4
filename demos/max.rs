use color_eyre::eyre::{bail, Result};

use acc16::processor::Processor;
use acc16::task::{Driver, MaxTask, Task, DEFAULT_MAX_STEPS};
use log::LevelFilter;
use simple_logger::SimpleLogger;

fn main() -> Result<()> {
    color_eyre::install()?; // rust error handling
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()?; // logging

    let task = MaxTask::new(vec![12, 7, 300, 42, 299])?;
    println!("{}", task.description());

    let mut driver = Driver::new(Processor::default(), &task);
    driver.load()?;
    let outcome = driver.run(DEFAULT_MAX_STEPS)?;

    match driver.verify() {
        Some(verification) => println!("{} ({} steps)", verification, outcome.steps),
        None => bail!("did not halt within {} steps", DEFAULT_MAX_STEPS),
    }

    Ok(())
}
