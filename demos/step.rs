use color_eyre::eyre::Result;

use acc16::assembler;
use acc16::processor::{Phase, Processor};
use simple_logger::SimpleLogger;

fn main() -> Result<()> {
    color_eyre::install()?; // rust error handling
    SimpleLogger::new().init()?; // logging

    let source = std::fs::read_to_string("demos/programs/countdown.asm")?;
    let mut cpu = Processor::default();
    let assembly = cpu.load_source(&source)?;

    print!("{}", assembler::disassemble_words(&assembly.words(), assembly.origin()));

    while cpu.step()? {
        if cpu.phase() == Phase::Execute {
            let state = cpu.state();
            println!(
                "{:<16} {}",
                state.instruction.unwrap_or_default(),
                state.registers
            );
        }
    }

    println!("{}", cpu.registers());
    print!("{}", cpu.memory().dump(0x40..0x48));

    Ok(())
}
