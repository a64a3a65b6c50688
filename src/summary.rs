//! Batch-summary rendering for text output.

use crate::model::BatchSummary;
use std::time::Duration;

/// Format the end-of-batch report as printable lines.
pub fn build_batch_summary(batch: &BatchSummary) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!(
        "Processed {} run(s) under {} with {} engine thread(s)",
        batch.runs.len(),
        batch.input_dir.display(),
        batch.threads
    ));

    for run in &batch.runs {
        lines.push(format!(
            "{}: {} sample(s), {} fragment(s) renamed, {} appended, pipeline finished after {}",
            run.run,
            run.samples,
            run.renamed,
            run.appended,
            humantime::format_duration(round_secs(run.waited))
        ));
        for path in &run.missing_files {
            lines.push(format!("  missing fragment: {}", path.display()));
        }
    }

    let missing: usize = batch.runs.iter().map(|r| r.missing).sum();
    if missing > 0 {
        lines.push(format!(
            "WARNING: {missing} fragment(s) were absent and contributed no bytes to any sample file"
        ));
    }
    lines
}

fn round_secs(d: Duration) -> Duration {
    Duration::from_secs(d.as_secs())
}
