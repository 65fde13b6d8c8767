use colored::*;
use log::info;
use std::io;

use opencircuit::cli::{self, CliArgs};

fn main() {
    let matches = match cli::build_command().try_get_matches() {
        Ok(matches) => matches,
        Err(e) => {
            // --help and --version are not failures
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    if let Err(e) = run_application(&matches) {
        eprintln!("{}", format!("Error: {:#}", e).red());
        std::process::exit(1);
    }
}

fn run_application(matches: &clap::ArgMatches) -> anyhow::Result<()> {
    let args = CliArgs::from_matches(matches)?;

    env_logger::Builder::from_default_env()
        .filter_level(args.log_level())
        .init();

    info!("{}", "Starting OpenCircuit".green().bold());
    let stdout = io::stdout();
    cli::run(&args, &mut stdout.lock())?;
    info!("{}", "Simulation completed successfully!".green().bold());
    Ok(())
}
