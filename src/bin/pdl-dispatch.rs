//! pdl-dispatch CLI - run print streams through the job dispatcher
//!
//! Each input is a separate run over the same dispatcher, so control-layer
//! defaults carry from one input to the next.

use anyhow::{Context, Result, bail};
use clap::Parser;
use pdl_dispatch::dispatch::device::write_atomic;
use pdl_dispatch::dispatch::{
    DispatchConfig, Dispatcher, ErrorReport, ForcedPersistence, NullDevice, OutputDevice,
    RunReport, Source, SpoolDevice, load_config,
};
use pdl_dispatch::standard_registry;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pdl-dispatch")]
#[command(about = "Dispatch multi-language print streams job by job", long_about = None)]
#[command(version)]
struct Cli {
    /// Input files ("-" for standard input)
    inputs: Vec<String>,

    /// Use this language instead of auto-sensing
    #[arg(short = 'L', long)]
    language: Option<String>,

    /// Keep the forced language for every job, not just the first
    #[arg(long, requires = "language")]
    sticky_language: bool,

    /// PJL commands to run before the first job, separated by ';'
    #[arg(short = 'J', long = "pjl", value_name = "CMDS")]
    pjl: Option<String>,

    /// Report job errors with extended diagnostics
    #[arg(short = 'E', long)]
    verbose_errors: bool,

    /// Spool job output into this directory (default: discard)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Dispatcher configuration file (JSON)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write the run reports to this file (JSON)
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// List the available languages and exit
    #[arg(long)]
    list_languages: bool,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    if cli.list_languages {
        let registry = standard_registry()?;
        for (slot, characteristics) in registry.characteristics().iter().enumerate() {
            println!(
                "{}  {:<12} {:<8} {}",
                slot,
                characteristics.language,
                characteristics.version,
                if characteristics.direct_file { "direct-file" } else { "" }
            );
        }
        return Ok(());
    }

    if cli.inputs.is_empty() {
        bail!("No input files given (use '-' for standard input)");
    }

    let config = build_config(&cli)?;
    let device: Box<dyn OutputDevice> = match &cli.output {
        Some(dir) => Box::new(
            SpoolDevice::new(dir).with_context(|| format!("Cannot spool to {:?}", dir))?,
        ),
        None => Box::new(NullDevice::new()),
    };

    let mut dispatcher = Dispatcher::with_standard_languages(device, config)?;
    let mut reports: Vec<RunReport> = Vec::new();

    for input in &cli.inputs {
        let report = dispatcher
            .run(Source::from_arg(input))
            .with_context(|| format!("Dispatch of {} failed", input))?;
        print_summary(&report);
        reports.push(report);
    }

    dispatcher.shutdown()?;

    if let Some(path) = &cli.report {
        let json = serde_json::to_vec_pretty(&reports).context("Failed to serialize report")?;
        write_atomic(path, &json).with_context(|| format!("Failed to write report: {:?}", path))?;
    }

    Ok(())
}

fn build_config(cli: &Cli) -> Result<DispatchConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => DispatchConfig::default(),
    };

    if let Some(language) = &cli.language {
        config.forced_language = Some(language.clone());
    }
    if cli.sticky_language {
        config.forced_persistence = ForcedPersistence::EveryJob;
    }
    if let Some(commands) = &cli.pjl {
        config.prefix_commands = Some(pjl_lines(commands));
    }
    if cli.verbose_errors {
        config.error_report = ErrorReport::Verbose;
    }

    config.validate()?;
    Ok(config)
}

/// `SET COPIES=2;@PJL ENTER LANGUAGE=PCL` becomes one `@PJL` line per command
fn pjl_lines(commands: &str) -> String {
    commands
        .split(';')
        .map(str::trim)
        .filter(|command| !command.is_empty())
        .map(|command| {
            if command.starts_with("@PJL") {
                format!("{}\n", command)
            } else {
                format!("@PJL {}\n", command)
            }
        })
        .collect()
}

fn print_summary(report: &RunReport) {
    println!("{}: {} job(s), {} switch(es)", report.source, report.jobs.len(), report.switches);
    for job in &report.jobs {
        let bytes = job.output.as_ref().map_or(0, |output| output.bytes);
        println!(
            "  job {:<4} {:<10} {:>10}..{:<10} {:?} ({} bytes out){}",
            job.index,
            job.language,
            job.start_offset,
            job.end_offset,
            job.outcome,
            bytes,
            job.error
                .as_ref()
                .map(|error| format!(" - {}", error))
                .unwrap_or_default()
        );
    }
}
