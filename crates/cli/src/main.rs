//! Command-line interface for merging archived DAG sections.
//!
//! `merge` unpacks every `dag-*.tar.gz` in a directory and unions their
//! section fragments into a result tree; `inspect` prints what a merged
//! section file holds.

use clap::{Parser, Subcommand};
use dagmerge::{
    Codec, Coordinator, CorruptPolicy, ExtractorKind, JsonCodec, MergeOptions, ProgressSnapshot,
    RunReport,
};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

#[derive(Parser)]
#[command(name = "dag-merge")]
#[command(version, about = "Merge DAG section fragments from a batch of archives", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge every matching archive in a directory
    Merge {
        /// Directory holding dag-*.tar.gz archives
        archives_dir: PathBuf,

        /// Result directory
        #[arg(short, long)]
        out: PathBuf,

        /// Process archives one at a time
        #[arg(long)]
        sequential: bool,

        /// Maximum archives processed concurrently
        #[arg(long, default_value = "4")]
        archive_workers: usize,

        /// Maximum file workers per archive
        #[arg(long, default_value = "8")]
        file_workers: usize,

        /// Global cap on concurrent file merges
        #[arg(long)]
        worker_budget: Option<usize>,

        /// Unreadable destination handling: replace, quarantine, preserve
        #[arg(long, default_value = "replace")]
        on_corrupt: String,

        /// Unpack archives in-process instead of spawning tar
        #[arg(long)]
        native: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the transactions held by a section file
    Inspect {
        /// Section file to decode
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Writes log lines to stderr with the progress bar cleared around them.
struct BarWriter(ProgressBar);

impl Write for BarWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.suspend(|| io::stderr().write(buf))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.suspend(|| io::stderr().write_all(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

fn main() {
    // Shown only while merging
    let bar = ProgressBar::hidden();

    // Initialize tracing
    let log_bar = bar.clone();
    tracing_subscriber::fmt()
        .with_writer(move || BarWriter(log_bar.clone()))
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Merge {
            archives_dir,
            out,
            sequential,
            archive_workers,
            file_workers,
            worker_budget,
            on_corrupt,
            native,
            json,
        } => parse_policy(&on_corrupt).and_then(|policy| {
            let options = MergeOptions {
                max_archive_workers: archive_workers,
                max_file_workers: file_workers,
                worker_budget,
                on_corrupt_destination: policy,
                extractor: if native {
                    ExtractorKind::Native
                } else {
                    ExtractorKind::Command
                },
                ..MergeOptions::default()
            };
            handle_merge(&bar, archives_dir, out, options, sequential, json)
        }),
        Commands::Inspect { file, json } => handle_inspect(file, json),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn parse_policy(value: &str) -> Result<CorruptPolicy, Box<dyn std::error::Error>> {
    match value {
        "replace" => Ok(CorruptPolicy::Replace),
        "quarantine" => Ok(CorruptPolicy::Quarantine),
        "preserve" => Ok(CorruptPolicy::Preserve),
        other => Err(format!("unknown corruption policy: {other}").into()),
    }
}

fn handle_merge(
    bar: &ProgressBar,
    archives_dir: PathBuf,
    out: PathBuf,
    options: MergeOptions,
    sequential: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let cancel_flag = Arc::new(AtomicBool::new(false));
    {
        let cancel_flag = Arc::clone(&cancel_flag);
        ctrlc::set_handler(move || {
            warn!("Cancelling, waiting for in-flight merges...");
            cancel_flag.store(true, Ordering::Relaxed);
        })?;
    }

    bar.set_draw_target(ProgressDrawTarget::stderr());
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {wide_bar} {pos}/{len} files")?,
    );
    let progress_cb = |snap: ProgressSnapshot| {
        bar.set_length(snap.total);
        bar.set_position(snap.processed);
    };

    let coordinator = Coordinator::new(options).with_cancel_flag(cancel_flag);
    let report = if sequential {
        coordinator.run_sequential(&archives_dir, &out, &progress_cb)?
    } else {
        coordinator.run(&archives_dir, &out, &progress_cb)?
    };
    bar.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    for archive in &report.archives {
        println!(
            "{}: {:?} ({} merged, {} skipped, {} failed)",
            archive.archive.display(),
            archive.status,
            archive.merged(),
            archive.skipped(),
            archive.failed()
        );
    }
    println!(
        "Processed {}/{} files in {:.1}s{}",
        report.processed,
        report.total,
        report.duration.as_secs_f64(),
        if report.cancelled { " (cancelled)" } else { "" }
    );
}

#[derive(Serialize)]
struct InspectOutput {
    file: PathBuf,
    transactions: usize,
    hashes: Vec<String>,
}

fn handle_inspect(file: PathBuf, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(&file)?;
    let section = JsonCodec::default().decode(&bytes)?;

    let output = InspectOutput {
        transactions: section.len(),
        hashes: section.hashes().map(str::to_string).collect(),
        file,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}: {} transaction(s)", output.file.display(), output.transactions);
        for hash in &output.hashes {
            println!("  {}", hash);
        }
    }
    Ok(())
}
