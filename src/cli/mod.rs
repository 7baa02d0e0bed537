//! Command-line parsing for the event loader.
//!
//! Argument parsing and dispatch stay separate from the pipeline code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "evload", version, about = "Event ingestion, classification and dial indexing")]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load every enabled dataset of a configuration and print diagnostics.
    Load(LoadArgs),
    /// Write a seeded synthetic dataset as a JSON column file.
    Synth(SynthArgs),
}

#[derive(Debug, Args, Clone)]
pub struct LoadArgs {
    /// JSON load configuration.
    #[arg(short, long, value_name = "JSON")]
    pub config: PathBuf,

    /// Worker threads (overrides the config; 0 = rayon default).
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Run every pass on the calling thread.
    #[arg(long)]
    pub single_thread: bool,

    /// Always print per-sample selected counts.
    #[arg(long)]
    pub show_counts: bool,

    /// Print the variable resolution table of every dataset.
    #[arg(long)]
    pub show_variables: bool,

    /// Extra variables to store on every event.
    #[arg(long = "store", value_name = "VAR")]
    pub storage_vars: Vec<String>,

    /// Parameter value for reweighting, `NAME=VALUE`. Repeatable.
    #[arg(long = "param", value_name = "NAME=VALUE")]
    pub params: Vec<String>,

    /// Export stored events to CSV files in this directory.
    #[arg(long, value_name = "DIR")]
    pub export: Option<PathBuf>,

    /// Write a markdown debug bundle into ./debug.
    #[arg(long)]
    pub debug_bundle: bool,
}

#[derive(Debug, Args, Clone)]
pub struct SynthArgs {
    /// Output JSON column file.
    #[arg(short, long, value_name = "JSON")]
    pub output: PathBuf,

    /// Number of entries.
    #[arg(short = 'n', long, default_value_t = 1000)]
    pub entries: usize,

    /// Random seed.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Spread of the per-event response slopes.
    #[arg(long, default_value_t = 0.1)]
    pub response_sigma: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_load_with_repeated_flags() {
        let cli = Cli::parse_from([
            "evload",
            "load",
            "--config",
            "cfg.json",
            "--param",
            "a=1",
            "--param",
            "b=2",
            "--store",
            "Enu",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.log_level, tracing::Level::DEBUG);
        let Command::Load(args) = cli.command else {
            panic!("expected load");
        };
        assert_eq!(args.params, vec!["a=1", "b=2"]);
        assert_eq!(args.storage_vars, vec!["Enu"]);
        assert_eq!(args.threads, None);
    }

    #[test]
    fn synth_defaults() {
        let cli = Cli::parse_from(["evload", "synth", "-o", "toy.json"]);
        let Command::Synth(args) = cli.command else {
            panic!("expected synth");
        };
        assert_eq!(args.entries, 1000);
        assert_eq!(args.seed, 42);
    }
}
