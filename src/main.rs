//! LC-3 VM - CLI Entry Point
//!
//! `lc3 [OPTIONS] <IMAGE>...` loads each image in order, then runs from
//! 0x3000 with the terminal in raw mode until the program halts. When stdin
//! is not a terminal the program reads it as plain bytes instead.

use clap::Parser;
use crossterm::tty::IsTty;
use lc3::cpu::{decode, StopReason};
use lc3::{load_image, Console, Cpu, CpuError, StreamConsole, Terminal};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;

const EXIT_LOAD: u8 = 1;
const EXIT_FAULT: u8 = 3;
const EXIT_IO: u8 = 4;
const EXIT_CYCLE_LIMIT: u8 = 5;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "lc3")]
#[command(version = "0.1.0")]
#[command(about = "A virtual machine for the LC-3 educational computer")]
struct Cli {
    /// Object images to load, in order; later images may overwrite earlier ones
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Stop after this many instructions
    #[arg(short, long)]
    max_cycles: Option<u64>,

    /// Print each instruction to stderr as it executes
    #[arg(short, long)]
    trace: bool,

    /// Write the final machine state as JSON
    #[arg(long, value_name = "PATH")]
    dump_state: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut cpu = Cpu::new();
    for path in &cli.images {
        match load_image(path) {
            Ok(image) => cpu.load_image(&image),
            Err(e) => {
                eprintln!("failed to load image: {}: {}", path.display(), e);
                return ExitCode::from(EXIT_LOAD);
            }
        }
    }

    // The console is dropped, and raw mode left, before anything is reported.
    let result = if io::stdin().is_tty() {
        match Terminal::new() {
            Ok(mut term) => {
                let cancel = term.interrupt_flag();
                execute(&mut cpu, &cli, &cancel, &mut term)
            }
            Err(e) => {
                eprintln!("cannot set up terminal: {}", e);
                return ExitCode::from(EXIT_IO);
            }
        }
    } else {
        // Ctrl-C still raises SIGINT here, so nothing sets the flag.
        let cancel = AtomicBool::new(false);
        let mut console = StreamConsole::new(io::stdin().lock(), io::stdout().lock());
        execute(&mut cpu, &cli, &cancel, &mut console)
    };

    if cli.trace {
        eprintln!("cycles: {}, state: {:?}", cpu.cycles, cpu.state);
    }

    if let Some(path) = &cli.dump_state {
        if let Err(e) = dump_state(&cpu, path) {
            eprintln!("failed to write state to {}: {}", path.display(), e);
            return ExitCode::from(EXIT_IO);
        }
    }

    match result {
        Ok(StopReason::Halted) => ExitCode::SUCCESS,
        Ok(StopReason::Cancelled) => {
            println!();
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Ok(StopReason::CycleLimit) => {
            eprintln!("stopped after {} instructions without halting", cpu.cycles);
            ExitCode::from(EXIT_CYCLE_LIMIT)
        }
        Err(e @ CpuError::Fault { .. }) => {
            eprintln!("{}", e);
            ExitCode::from(EXIT_FAULT)
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::from(EXIT_IO)
        }
    }
}

fn execute(
    cpu: &mut Cpu,
    cli: &Cli,
    cancel: &AtomicBool,
    console: &mut dyn Console,
) -> Result<StopReason, CpuError> {
    let summary = if cli.trace {
        cpu.run_until_with(cli.max_cycles, cancel, console, trace)
    } else {
        cpu.run_until(cli.max_cycles, cancel, console)
    };
    summary.map(|summary| summary.reason)
}

/// Print the instruction about to execute.
///
/// Raw mode is on, so lines need an explicit carriage return.
fn trace(cpu: &Cpu) {
    let pc = cpu.regs.pc;
    let word = cpu.mem.peek(pc);
    match decode::decode(word) {
        Ok(instr) => eprint!("{:04x}: {:04x}  {:?}\r\n", pc, word, instr),
        Err(_) => eprint!("{:04x}: {:04x}  ??\r\n", pc, word),
    }
}

fn dump_state(cpu: &Cpu, path: &Path) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(&cpu.snapshot())?;
    std::fs::write(path, json)
}
