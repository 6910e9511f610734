// src/main.rs

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use vanguard_webscan::core::report::{ReportFormat, render};
use vanguard_webscan::logging::{get_data_dir, initialize_logging};
use vanguard_webscan::{
    JobId, JsonFileStore, Orchestrator, ProbeRegistry, ProbeState, ScanError, ScanJob, ScanSettings,
};

const EXIT_USAGE: u8 = 64;
const EXIT_NOT_FOUND: u8 = 4;
const EXIT_NOT_READY: u8 = 75;

/// Vanguard web scanner - probe a web application for common vulnerabilities
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (defaults to ./vanguard.toml when present)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Mirror log output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a URL and print the report once every probe has settled
    Scan {
        /// Absolute http(s) URL of the target
        url: String,
        /// Comma-separated probe identifiers, or "all"
        #[arg(short, long, value_delimiter = ',', default_value = "all")]
        probes: Vec<String>,
        /// Report format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
        /// Write the report to a file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Show the state of a scan
    Status { id: JobId },
    /// Print the report of a finished scan
    #[command(name = "result")]
    Report {
        id: JobId,
        #[arg(short, long, default_value = "text")]
        format: String,
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// List stored scans, newest first
    List {
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Delete a finished scan
    Delete { id: JobId },
    /// List the available probes
    Probes,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let settings = ScanSettings::load(cli.config.as_deref()).wrap_err("invalid configuration")?;
    let data_dir = settings.data_dir.clone().unwrap_or_else(get_data_dir);
    initialize_logging(&data_dir, cli.verbose)?;
    info!(data_dir = %data_dir.display(), "Starting vanguard-webscan.");

    let store = Arc::new(JsonFileStore::in_data_dir(&data_dir));
    let orchestrator = Orchestrator::new(settings, ProbeRegistry::with_defaults(), store)?;

    match run(&orchestrator, cli.command).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(report) => {
            error!(error = %report, "Command failed.");
            let code = exit_code(&report);
            eprintln!("Error: {report:?}");
            Ok(code)
        }
    }
}

/// Maps library errors to sysexits-style process codes.
fn exit_code(report: &color_eyre::Report) -> ExitCode {
    let code = match report.downcast_ref::<ScanError>() {
        Some(
            ScanError::InvalidTarget { .. }
            | ScanError::UnknownProbe(_)
            | ScanError::EmptyProbeSelection
            | ScanError::UnsupportedFormat(_),
        ) => EXIT_USAGE,
        Some(ScanError::NotFound(_)) => EXIT_NOT_FOUND,
        Some(ScanError::NotReady(_)) => EXIT_NOT_READY,
        _ => 1,
    };
    ExitCode::from(code)
}

async fn run(orchestrator: &Orchestrator, command: Commands) -> Result<()> {
    match command {
        Commands::Scan { url, probes, format, output } => {
            let format: ReportFormat = format.parse()?;
            if format == ReportFormat::Pdf {
                return Err(ScanError::UnsupportedFormat(format.to_string()).into());
            }
            let id = orchestrator.submit(&url, probes.as_slice()).await?;
            orchestrator.dispatch(id).await?;
            eprintln!("Scan {id} started against {url}");
            follow(orchestrator, id).await?;
            let report = orchestrator.result(id).await?;
            emit(&render(&report, format)?, output.as_ref()).await
        }
        Commands::Status { id } => {
            print_status(&orchestrator.status(id).await?);
            Ok(())
        }
        Commands::Report { id, format, output } => {
            let format: ReportFormat = format.parse()?;
            let report = orchestrator.result(id).await?;
            emit(&render(&report, format)?, output.as_ref()).await
        }
        Commands::List { limit, offset } => {
            let jobs = orchestrator.list(limit, offset).await?;
            if jobs.is_empty() {
                println!("No scans stored.");
            }
            for job in jobs {
                println!(
                    "{}  {}  {:<20} {:>3} finding(s)  {}",
                    job.id,
                    job.created_at.format("%Y-%m-%d %H:%M:%S"),
                    job.status.to_string(),
                    job.findings.len(),
                    job.url
                );
            }
            Ok(())
        }
        Commands::Delete { id } => {
            if !orchestrator.delete(id).await? {
                return Err(ScanError::NotFound(id).into());
            }
            println!("Deleted scan {id}");
            Ok(())
        }
        Commands::Probes => {
            for probe in orchestrator.probe_catalogue() {
                println!(
                    "{:<14} {:<24} intensity {}/5  [{}]\n               {}",
                    probe.id.to_string(),
                    probe.name,
                    probe.intensity,
                    probe.category,
                    probe.description
                );
            }
            Ok(())
        }
    }
}

/// Polls the job every second until it is terminal. Ctrl-C finalizes it early.
async fn follow(orchestrator: &Orchestrator, id: JobId) -> Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut interrupted = false;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal.wrap_err("failed to listen for Ctrl-C")?;
                interrupted = true;
                eprintln!("Interrupted, finalizing with the probes finished so far...");
                orchestrator.finalize_now(id).await?;
            }
        }
        let job = orchestrator.status(id).await?;
        eprint!("\r[{:>3}%] {:<60}", job.progress(), job.message);
        if job.is_terminal() {
            eprintln!();
            return Ok(());
        }
    }
}

async fn emit(bytes: &[u8], output: Option<&PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            tokio::fs::write(path, bytes)
                .await
                .wrap_err_with(|| format!("failed to write report to {}", path.display()))?;
            eprintln!("Report written to {}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(bytes)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn print_status(job: &ScanJob) {
    println!("Scan:     {}", job.id);
    println!("Target:   {}", job.url);
    println!("Status:   {} ({}%)", job.status, job.progress());
    println!("Message:  {}", job.message);
    if let Some(reason) = &job.failure_reason {
        println!("Failure:  {reason}");
    }
    println!("Probes:");
    for entry in &job.probe_states {
        let reason = match &entry.state {
            ProbeState::Failed(reason) => format!(" ({reason})"),
            _ => String::new(),
        };
        println!(
            "  {:<14} {:<10} {} finding(s){reason}",
            entry.probe.to_string(),
            entry.state.label(),
            entry.findings
        );
    }
}
