use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File names fixed by the LIMS hand-off and the workflow engine.
pub const SAMPLE_SHEET_FILE: &str = "LIMS_supp_sample_sheet.csv";
pub const SAMPLE_INFO_FILE: &str = "sample_info.csv";
pub const CONFIG_FILE: &str = "config.yaml";
pub const FASTQ_SUBDIR: &str = "FASTQ_files";
pub const FILE_LIST_FILE: &str = "FASTQ_file_list.csv";
pub const LOG_SUBDIR: &str = "log";
pub const COMPLETED_SENTINEL: &str = "000-pipeline_completed";

/// Launcher settings shared by every component. Built once from CLI
/// arguments and passed down, so tests can point it at temp directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub static_files_dir: PathBuf,
    pub bin_dir: PathBuf,
    pub reference: PathBuf,
    pub threads: usize,
    pub conda_exe: PathBuf,
    pub conda_env: String,
    pub engine: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(default, with = "humantime_serde")]
    pub poll_timeout: Option<Duration>,
}

/// Per-run `config.yaml` consumed by the workflow engine. Written and read
/// back through the same serializer so paths survive a round trip intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(rename = "STATIC_FILES_DIR")]
    pub static_files_dir: PathBuf,
    #[serde(rename = "BIN_DIR")]
    pub bin_dir: PathBuf,
    #[serde(rename = "OUTPUT_DIR")]
    pub output_dir: PathBuf,
    #[serde(rename = "REFERENCE")]
    pub reference: PathBuf,
    #[serde(rename = "SAMPLE_INFO_FILE")]
    pub sample_info_file: PathBuf,
    #[serde(rename = "SAMPLE_DIR")]
    pub sample_dir: PathBuf,
    /// Sample name to per-sample path prefix, filled in after the run's
    /// FASTQ files are normalized.
    #[serde(
        rename = "SAMPLES",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub samples: BTreeMap<String, PathBuf>,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read run config {}", path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("malformed run config {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_yaml::to_string(self).context("cannot serialize run config")?;
        fs::write(path, text).with_context(|| format!("cannot write {}", path.display()))
    }

    /// Directory holding the run's raw and normalized FASTQ files.
    pub fn fastq_dir(&self) -> PathBuf {
        self.sample_dir.join(FASTQ_SUBDIR)
    }
}

/// Paired-end mate designation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadDirection {
    R1,
    R2,
}

impl ReadDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            ReadDirection::R1 => "R1",
            ReadDirection::R2 => "R2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Assemble,
    Normalize,
    Launch,
    Watch,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Assemble => "Assemble",
            Phase::Normalize => "Normalize",
            Phase::Launch => "Launch",
            Phase::Watch => "Watch",
        }
    }
}

/// Progress events emitted by the engine and rendered by the CLI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    RunsDiscovered {
        count: usize,
    },
    PhaseStarted {
        run: String,
        phase: Phase,
    },
    SampleInfoWritten {
        run: String,
        rows: usize,
    },
    ConfigWritten {
        run: String,
        path: PathBuf,
    },
    FragmentRenamed {
        id: String,
        direction: ReadDirection,
        from: String,
    },
    FragmentAppended {
        id: String,
        direction: ReadDirection,
        from: String,
    },
    /// A manifest row pointed at a file that is not on disk; the fragment
    /// is skipped and the run continues without its bytes.
    FragmentMissing {
        id: String,
        direction: ReadDirection,
        path: PathBuf,
    },
    SamplesRegistered {
        run: String,
        count: usize,
    },
    EngineStarted {
        run: String,
        pid: Option<u32>,
    },
    StillRunning {
        run: String,
        #[serde(with = "humantime_serde")]
        waited: Duration,
    },
    RunCompleted {
        run: String,
        // Box to keep PipelineEvent small; RunSummary carries path lists.
        summary: Box<RunSummary>,
    },
}

impl PipelineEvent {
    /// Render a human-readable progress line for the CLI layer.
    pub fn to_message(&self) -> String {
        match self {
            PipelineEvent::RunsDiscovered { count } => {
                format!("Found {count} run folder(s) to process")
            }
            PipelineEvent::PhaseStarted { run, phase } => {
                format!("== {run}: {} ==", phase.as_str())
            }
            PipelineEvent::SampleInfoWritten { run, rows } => {
                format!("{run}: wrote {SAMPLE_INFO_FILE} ({rows} rows)")
            }
            PipelineEvent::ConfigWritten { run, path } => {
                format!("{run}: wrote {}", path.display())
            }
            PipelineEvent::FragmentRenamed {
                id,
                direction,
                from,
            } => format!(
                "Renamed {} file {from} to {id}_{}.fastq.gz",
                direction.as_str(),
                direction.as_str()
            ),
            PipelineEvent::FragmentAppended {
                id,
                direction,
                from,
            } => format!("Appended {from} to {id}_{}.fastq.gz", direction.as_str()),
            PipelineEvent::FragmentMissing { path, .. } => {
                format!("File not found, skipping: {}", path.display())
            }
            PipelineEvent::SamplesRegistered { run, count } => {
                format!("{run}: registered {count} sample(s) in config")
            }
            PipelineEvent::EngineStarted { run, pid } => match pid {
                Some(pid) => format!("{run}: workflow engine started (pid {pid})"),
                None => format!("{run}: workflow engine started"),
            },
            PipelineEvent::StillRunning { run, waited } => {
                let waited = Duration::from_secs(waited.as_secs());
                format!(
                    "{run}: pipeline is still running ({} elapsed)",
                    humantime::format_duration(waited)
                )
            }
            PipelineEvent::RunCompleted { run, .. } => format!("{run}: pipeline completed"),
        }
    }
}

/// Outcome of one processed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run: String,
    pub samples: usize,
    pub renamed: usize,
    pub appended: usize,
    pub missing: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_files: Vec<PathBuf>,
    #[serde(with = "humantime_serde")]
    pub waited: Duration,
    pub engine_pid: Option<u32>,
}

/// Outcome of the whole batch, printed as text lines or `--json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    #[serde(default)]
    pub timestamp_utc: String,
    pub input_dir: PathBuf,
    pub threads: usize,
    pub runs: Vec<RunSummary>,
}
