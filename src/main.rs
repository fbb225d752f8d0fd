//! Exanet command-line runner.
//!
//! Assembles a source program into a node network and runs it to
//! completion.
//!
//! # Usage
//! ```text
//! exanet <script> [OPTIONS]
//! ```
//!
//! # Arguments
//! - `script`: path to the source program
//!
//! # Options
//! - `--seed <n>`: engine RNG seed (defaults to a fixed documented value,
//!   so runs are reproducible unless overridden)
//!
//! Exits 0 after a run (runtime errors are printed to stderr) and 1 on
//! usage errors.

use exanet::assembler::assemble_file_seeded;
use exanet::network::DEFAULT_SEED;
use exanet::utils::log::{self, Level, Logger};
use std::env;
use std::process;
use std::time::Instant;

const USAGE: &str = "\
Exanet

USAGE:
    {program} <script> [OPTIONS]

ARGS:
    <script>         Path to the source program

OPTIONS:
    --seed <n>       Engine RNG seed (default: 4604955068226825093)
    -h, --help       Print this help message

EXAMPLES:
    # Run a program
    {program} program.net

    # Run with a different seed
    {program} program.net --seed 7
";

/// Prints usage information to stderr.
fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let script = &args[1];
    let mut seed = DEFAULT_SEED;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--seed" => {
                i += 1;
                let Some(value) = args.get(i).and_then(|v| v.parse().ok()) else {
                    eprintln!("--seed requires an integer argument");
                    process::exit(1);
                };
                seed = value;
                i += 1;
            }
            other => {
                eprintln!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    log::init(Level::Info);
    let log = Logger::new(script.as_str());

    let start = Instant::now();
    let mut network = match assemble_file_seeded(script, seed) {
        Ok(network) => network,
        Err(e) => {
            eprintln!("{e}");
            return;
        }
    };
    log.info(&format!("loaded program in {}ms", start.elapsed().as_millis()));

    let start = Instant::now();
    let stats = match network.run() {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("{e}");
            return;
        }
    };
    log.info(&format!("executed program in {}ms", start.elapsed().as_millis()));

    println!("Size:     {}", stats.size);
    println!("Cycles:   {}", stats.cycles);
    println!("Activity: {}", stats.activity);
}
