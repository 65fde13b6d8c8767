use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use colored::*;
use log::info;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::simulator::{Simulator, TraceFormat};

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub input_file: PathBuf,
    pub ticks: u64,
    pub output_format: OutputFormat,
    pub trace_file: Option<PathBuf>,
    pub verbose_level: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct OutputValue {
    id: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct RunOutput {
    ticks: u64,
    outputs: Vec<OutputValue>,
}

pub fn build_command() -> Command {
    Command::new("opencircuit")
        .version(crate::VERSION)
        .about(crate::DESCRIPTION)
        .arg(
            Arg::new("input")
                .help("Project file (.json)")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("ticks")
                .short('t')
                .long("ticks")
                .value_name("N")
                .default_value("0")
                .help("Number of tick-steps to run"),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_name("FORMAT")
                .default_value("text")
                .value_parser(["text", "json"])
                .help("Output format"),
        )
        .arg(
            Arg::new("trace")
                .long("trace")
                .value_name("FILE")
                .help("Write every OUTPUT value per tick (CSV, or JSON for .json files)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Increase verbosity level"),
        )
}

impl CliArgs {
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let input_file = matches
            .get_one::<String>("input")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("Input file is required"))?;

        let ticks = match matches.get_one::<String>("ticks") {
            Some(text) => text
                .trim()
                .parse::<u64>()
                .map_err(|_| anyhow!("Invalid tick count '{}'", text))?,
            None => 0,
        };

        let output_format = match matches.get_one::<String>("format").map(String::as_str) {
            None | Some("text") => OutputFormat::Text,
            Some("json") => OutputFormat::Json,
            Some(other) => return Err(anyhow!("Invalid output format '{}'", other)),
        };

        Ok(CliArgs {
            input_file,
            ticks,
            output_format,
            trace_file: matches.get_one::<String>("trace").map(PathBuf::from),
            verbose_level: matches.get_count("verbose"),
        })
    }

    /// `warn`, then `info`, `debug`, `trace` for each `-v`.
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose_level {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

fn trace_format(path: &Path) -> TraceFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => TraceFormat::Json,
        _ => TraceFormat::Csv,
    }
}

/// Load, run and report. Output goes to `out`.
pub fn run(args: &CliArgs, out: &mut dyn Write) -> Result<()> {
    info!("Input file: {}", args.input_file.display().to_string().bright_blue());
    if !args.input_file.exists() {
        return Err(anyhow!("Input file '{}' not found", args.input_file.display()));
    }

    let mut simulator = Simulator::new();
    simulator
        .load_file(&args.input_file)
        .with_context(|| format!("Failed to load '{}'", args.input_file.display()))?;
    if args.trace_file.is_some() {
        simulator.enable_trace();
    }

    info!("Running {} tick(s)", args.ticks);
    simulator.tick(args.ticks)?;

    if let Some(trace_file) = &args.trace_file {
        let path = trace_file.to_string_lossy();
        simulator.export_trace(&path, trace_format(trace_file))?;
        info!("Trace exported to: {}", path.bright_green());
    }

    let circuit = simulator.circuit();
    let outputs: Vec<OutputValue> = circuit
        .output_ids()
        .into_iter()
        .map(|id| {
            let value = circuit.signal(&id).unwrap_or_default().to_string();
            OutputValue { id, value }
        })
        .collect();

    match args.output_format {
        OutputFormat::Json => {
            let report = RunOutput {
                ticks: simulator.tick_count(),
                outputs,
            };
            serde_json::to_writer_pretty(&mut *out, &report)?;
            writeln!(out)?;
        }
        OutputFormat::Text if outputs.is_empty() => writeln!(out, "No OUTPUT components found.")?,
        OutputFormat::Text => {
            for output in &outputs {
                writeln!(out, "{}: {}", output.id, output.value)?;
            }
        }
    }
    Ok(())
}
