//! Top-level application orchestration.
//!
//! `src/main.rs` parses arguments and installs logging; this module is the
//! "real main" that runs a subcommand and prints its reports.

use std::path::Path;

use tracing::info;

use crate::cli::{Cli, Command, LoadArgs, SynthArgs};
use crate::data::{SynthConfig, generate_table};
use crate::error::Result;
use crate::io::{read_config, write_events_csv};
use crate::source::write_json_table;

pub mod pipeline;

/// Entry point for the `evload` binary.
pub fn run(cli: Cli) -> Result<()> {
    // `.env` must be loaded before record-source paths are expanded.
    dotenvy::dotenv().ok();

    match cli.command {
        Command::Load(args) => handle_load(args),
        Command::Synth(args) => handle_synth(args),
    }
}

fn handle_load(args: LoadArgs) -> Result<()> {
    let mut config = read_config(&args.config)?;
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    let options = pipeline::RunOptions {
        single_thread: args.single_thread,
        storage_vars: args.storage_vars.clone(),
        params: args.params.clone(),
    };
    let run = pipeline::run_load(&config, &options)?;

    println!(
        "{}",
        crate::report::format_run_summary(&run.output, &config, run.threads)
    );
    if config.show_selected_counts || args.show_counts {
        println!("{}", crate::report::format_selected_counts(&run.output.reports));
    }
    if args.show_variables {
        for report in &run.output.reports {
            println!("{}", crate::report::format_variable_table(report));
        }
    }
    println!("{}", crate::report::format_dial_usage(&run.output.reports));
    println!(
        "{}",
        crate::report::format_histograms(&run.histograms, &run.params)
    );

    if let Some(dir) = &args.export {
        let written = write_events_csv(dir, &run.output.samples)?;
        info!(files = written.len(), dir = %dir.display(), "export done");
    }
    if args.debug_bundle {
        let path = crate::debug::write_debug_bundle(Path::new("debug"), &run.output, &config)?;
        println!("Debug bundle: {}", path.display());
    }
    Ok(())
}

fn handle_synth(args: SynthArgs) -> Result<()> {
    let table = generate_table(&SynthConfig {
        entries: args.entries,
        seed: args.seed,
        response_sigma: args.response_sigma,
    })?;
    write_json_table(&args.output, &table)?;
    println!(
        "Wrote {} entries ({} columns) to {}",
        table.n_entries(),
        table.names().len(),
        args.output.display()
    );
    Ok(())
}
