//! Gox Compiler CLI
//!
//! Reads one serialized SSA program (JSON, as produced by the
//! frontend) and writes the C99 translation unit to standard output.
//! Parse, validation, and emission errors are relayed on standard
//! error with a non-zero exit.

use std::io::{self, Write as _};
use std::path::PathBuf;
use std::process;

use clap::Parser;

use goxc::EmitterConfig;

#[derive(Parser)]
#[command(name = "goxc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Gox compiler - lower SSA programs to C99", long_about = None)]
struct Cli {
    /// Input SSA program; standard input when omitted
    #[arg(short = 'i', value_name = "PATH")]
    input: Option<PathBuf>,

    /// Emitter configuration (TOML)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match EmitterConfig::from_path(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        },
        None => EmitterConfig::default(),
    };

    let program = match &cli.input {
        Some(path) => gox_ssa::from_path(path),
        None => gox_ssa::from_reader(io::stdin().lock()),
    };
    let program = match program {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    match goxc::emit_program(&program, &config) {
        Ok(c) => {
            let mut stdout = io::stdout().lock();
            if let Err(e) = stdout.write_all(c.as_bytes()) {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
