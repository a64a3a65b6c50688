//! Completion-sentinel polling.

use crate::model::{PipelineEvent, COMPLETED_SENTINEL, LOG_SUBDIR};
use anyhow::{bail, Result};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Wait until the pipeline drops its completion sentinel under
/// `<output_dir>/log/`. Checks happen at multiples of `interval` measured
/// from the start instant, so a slow filesystem check does not drift the
/// cadence. Returns how long the wait took.
pub async fn wait_for_completion(
    run: &str,
    output_dir: &Path,
    interval: Duration,
    timeout: Option<Duration>,
    event_tx: &UnboundedSender<PipelineEvent>,
) -> Result<Duration> {
    let sentinel = output_dir.join(LOG_SUBDIR).join(COMPLETED_SENTINEL);
    let started = Instant::now();
    let mut ticks = interval_at(started + interval, interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if sentinel.is_file() {
            return Ok(started.elapsed());
        }
        if let Some(limit) = timeout {
            if started.elapsed() >= limit {
                bail!(
                    "gave up waiting for {} after {}",
                    sentinel.display(),
                    humantime::format_duration(limit)
                );
            }
        }
        let _ = event_tx.send(PipelineEvent::StillRunning {
            run: run.to_string(),
            waited: started.elapsed(),
        });
        tokio::select! {
            _ = ticks.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                bail!("cancelled while waiting for {}", sentinel.display())
            }
        }
    }
}
