use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Read;
use std::path::PathBuf;

use crate::registry::EngineRegistry;
use crate::source::SourceRegistry;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AnalysisMode {
    /// Continuous series, block-mean sampled at a fixed rate
    Counter,
    /// Sparse non-zero event timestamps, magnitude discarded
    Instant,
    /// Instant events plus interval durations from the sample values
    Complete,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a transform script against a waveform trace and print JSON
    Analyze {
        /// Waveform trace file (dispatched by suffix)
        #[arg(long)]
        file: PathBuf,

        /// Transform script file, or `-` for stdin
        #[arg(long)]
        script: PathBuf,

        /// Result shape to produce
        #[arg(long, value_enum, default_value_t = AnalysisMode::Counter)]
        mode: AnalysisMode,

        /// Block sampling rate for counter mode
        #[arg(long, default_value_t = 1)]
        sample_rate: usize,

        /// Compressed zero-order-hold alignment for very long traces
        #[arg(long)]
        compress: bool,
    },

    /// List the signal names available in a trace
    Signals {
        #[arg(long)]
        file: PathBuf,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut registry = EngineRegistry::new(SourceRegistry::with_default_backends());

    match cli.command {
        Commands::Analyze {
            file,
            script,
            mode,
            sample_rate,
            compress,
        } => {
            let script_text = read_script(&script)?;
            let engine = registry.get_or_create(&file)?;
            let engine = engine.lock().unwrap_or_else(|p| p.into_inner());

            let json = match mode {
                AnalysisMode::Counter => {
                    let result = engine.analyze_counter(&script_text, sample_rate, compress)?;
                    serde_json::to_string_pretty(&result)?
                }
                AnalysisMode::Instant => {
                    let result = engine.analyze_instant(&script_text)?;
                    serde_json::to_string_pretty(&result)?
                }
                AnalysisMode::Complete => {
                    let result = engine.analyze_complete(&script_text)?;
                    serde_json::to_string_pretty(&result)?
                }
            };
            println!("{json}");
        }
        Commands::Signals { file } => {
            let engine = registry.get_or_create(&file)?;
            let engine = engine.lock().unwrap_or_else(|p| p.into_inner());
            for name in engine.signal_names()? {
                println!("{name}");
            }
        }
    }
    Ok(())
}

fn read_script(path: &PathBuf) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read script from stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read script {}", path.display()))
    }
}
