use crate::engine::PipelineEngine;
use crate::model::{LaunchConfig, PipelineEvent};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "seqrun-cli",
    version,
    about = "Prepare sequencing run folders under the input root and launch \
             the analysis pipeline on each one"
)]
pub struct Cli {
    /// Threads handed to the workflow engine (bcl2fastq needs at least 16)
    #[arg(short = 't', long, default_value_t = 39)]
    pub threads: usize,

    /// Root holding one directory per sequencing run
    #[arg(long, default_value = "/home/watson/snakemake_watson/input")]
    pub input_dir: PathBuf,

    /// Root receiving one output directory per run
    #[arg(long, default_value = "/home/watson/snakemake_watson/output")]
    pub output_dir: PathBuf,

    /// Static reference data directory
    #[arg(long, default_value = "/home/watson/snakemake_watson/static_files")]
    pub static_dir: PathBuf,

    /// Pipeline helper binaries directory
    #[arg(long, default_value = "/home/watson/snakemake_watson/bin")]
    pub bin_dir: PathBuf,

    /// Reference genome FASTA
    #[arg(
        long,
        default_value = "/home/watson/snakemake_watson/static_files/GRCh38.fa"
    )]
    pub reference: PathBuf,

    /// Conda executable used to enter the pipeline environment
    #[arg(long, default_value = "conda")]
    pub conda_exe: PathBuf,

    /// Conda environment holding the workflow engine
    #[arg(long, default_value = "snakemake")]
    pub conda_env: String,

    /// Workflow engine executable
    #[arg(long, default_value = "snakemake")]
    pub engine: String,

    /// Delay between completion-sentinel checks
    #[arg(long, default_value = "1200s")]
    pub poll_interval: humantime::Duration,

    /// Give up waiting for a run after this long (unbounded when omitted)
    #[arg(long)]
    pub poll_timeout: Option<humantime::Duration>,

    /// Print the batch summary as JSON instead of text lines
    #[arg(long)]
    pub json: bool,
}

/// Build a `LaunchConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> LaunchConfig {
    LaunchConfig {
        input_dir: expand_tilde(&args.input_dir),
        output_dir: expand_tilde(&args.output_dir),
        static_files_dir: expand_tilde(&args.static_dir),
        bin_dir: expand_tilde(&args.bin_dir),
        reference: expand_tilde(&args.reference),
        threads: args.threads,
        conda_exe: expand_tilde(&args.conda_exe),
        conda_env: args.conda_env.clone(),
        engine: args.engine.clone(),
        poll_interval: Duration::from(args.poll_interval),
        poll_timeout: args.poll_timeout.map(Duration::from),
    }
}

/// Expand a leading `~` to the current user's home dir; paths without one
/// (or with no known home) pass through unchanged.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    if args.json {
        return run_json(cfg).await;
    }
    run_text(cfg).await
}

/// Run the batch silently and print the summary as pretty JSON.
async fn run_json(cfg: LaunchConfig) -> Result<()> {
    // Progress events are dropped; only the final summary is printed.
    let (event_tx, _) = mpsc::unbounded_channel::<PipelineEvent>();
    let summary = PipelineEngine::new(cfg)
        .run(event_tx)
        .await
        .context("pipeline batch failed")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Run the batch with progress lines on stderr and the summary on stdout.
async fn run_text(cfg: LaunchConfig) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<PipelineEvent>();

    let engine = PipelineEngine::new(cfg);
    let handle = tokio::spawn(async move { engine.run(event_tx).await });

    while let Some(ev) = event_rx.recv().await {
        let _ = out_tx.send(OutputLine::Stderr(ev.to_message()));
    }

    let summary = handle
        .await
        .context("pipeline task failed")?
        .context("pipeline batch failed")?;

    for line in crate::summary::build_batch_summary(&summary) {
        let _ = out_tx.send(OutputLine::Stdout(line));
    }
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}
