//! Batch engine: prepares every run, then processes each one serially.

mod assemble;
mod launch;
mod normalize;
mod watch;

use crate::model::{
    BatchSummary, LaunchConfig, Phase, PipelineEvent, RunConfig, RunSummary, CONFIG_FILE,
};
use anyhow::{Context, Result};
use tokio::sync::mpsc::UnboundedSender;

pub struct PipelineEngine {
    cfg: LaunchConfig,
}

impl PipelineEngine {
    pub fn new(cfg: LaunchConfig) -> Self {
        Self { cfg }
    }

    pub async fn run(self, event_tx: UnboundedSender<PipelineEvent>) -> Result<BatchSummary> {
        let runs = assemble::discover_runs(&self.cfg.input_dir)?;
        let _ = event_tx.send(PipelineEvent::RunsDiscovered { count: runs.len() });

        // All configs are assembled before the first launch, so a bad
        // sample sheet late in the batch aborts before any engine starts.
        for run in &runs {
            let _ = event_tx.send(PipelineEvent::PhaseStarted {
                run: run.clone(),
                phase: Phase::Assemble,
            });
            assemble::prepare_run(&self.cfg, run, &event_tx)
                .with_context(|| format!("preparing run {run}"))?;
        }

        let mut summaries = Vec::new();
        for run in &runs {
            let summary = self
                .process_run(run, &event_tx)
                .await
                .with_context(|| format!("processing run {run}"))?;
            summaries.push(summary);
        }

        Ok(BatchSummary {
            timestamp_utc: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "now".into()),
            input_dir: self.cfg.input_dir.clone(),
            threads: self.cfg.threads,
            runs: summaries,
        })
    }

    async fn process_run(
        &self,
        run: &str,
        event_tx: &UnboundedSender<PipelineEvent>,
    ) -> Result<RunSummary> {
        let config_path = self.cfg.input_dir.join(run).join(CONFIG_FILE);

        // Read the config back through the parser rather than trusting
        // in-memory state; the engine sees exactly this file.
        let config = RunConfig::load(&config_path)?;
        let fastq_dir = config.fastq_dir();

        let _ = event_tx.send(PipelineEvent::PhaseStarted {
            run: run.to_string(),
            phase: Phase::Normalize,
        });
        let stats = normalize::normalize_run(&fastq_dir, event_tx)?;

        let _ = event_tx.send(PipelineEvent::PhaseStarted {
            run: run.to_string(),
            phase: Phase::Launch,
        });
        let samples = launch::register_samples(&config_path, &fastq_dir)?;
        let _ = event_tx.send(PipelineEvent::SamplesRegistered {
            run: run.to_string(),
            count: samples.len(),
        });

        let pid = launch::start_engine(&self.cfg, &config_path)?;
        let _ = event_tx.send(PipelineEvent::EngineStarted {
            run: run.to_string(),
            pid,
        });

        let _ = event_tx.send(PipelineEvent::PhaseStarted {
            run: run.to_string(),
            phase: Phase::Watch,
        });
        let waited = watch::wait_for_completion(
            run,
            &config.output_dir,
            self.cfg.poll_interval,
            self.cfg.poll_timeout,
            event_tx,
        )
        .await?;

        let summary = RunSummary {
            run: run.to_string(),
            samples: samples.len(),
            renamed: stats.renamed,
            appended: stats.appended,
            missing: stats.missing.len(),
            missing_files: stats.missing,
            waited,
            engine_pid: pid,
        };
        let _ = event_tx.send(PipelineEvent::RunCompleted {
            run: run.to_string(),
            summary: Box::new(summary.clone()),
        });
        Ok(summary)
    }
}
