//! FASTQ fragment normalization.
//!
//! Raw files for one library arrive split across lanes; the manifest lists
//! every fragment per LIMS ID and read direction, in concatenation order.
//! The first fragment for an ID becomes the canonical
//! `<id>_<direction>.fastq.gz`; every later fragment is folded onto the end
//! of the canonical file and removed.

use crate::model::{PipelineEvent, ReadDirection, FILE_LIST_FILE};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;

/// Holding name for the canonical file while a fragment is folded in.
const STAGING_FILE: &str = "FileToCat.temp.fastq.gz";

#[derive(Debug, Deserialize)]
struct ManifestRow {
    #[serde(rename = "LIMS_ID")]
    lims_id: String,
    #[serde(rename = "Filename_R1")]
    filename_r1: String,
    #[serde(rename = "Filename_R2")]
    filename_r2: String,
}

#[derive(Debug, Default)]
pub struct NormalizeStats {
    pub renamed: usize,
    pub appended: usize,
    pub missing: Vec<PathBuf>,
}

/// Walk the run's manifest and produce one file per (sample, direction).
/// Fragments listed in the manifest but absent on disk are skipped and
/// reported; every other failure aborts the run.
pub fn normalize_run(
    fastq_dir: &Path,
    event_tx: &UnboundedSender<PipelineEvent>,
) -> Result<NormalizeStats> {
    let list_path = fastq_dir.join(FILE_LIST_FILE);
    let mut reader = csv::Reader::from_path(&list_path)
        .with_context(|| format!("cannot open manifest {}", list_path.display()))?;

    let mut stats = NormalizeStats::default();
    // One first-occurrence map per direction; discarded with the run.
    let mut seen_r1: HashMap<String, PathBuf> = HashMap::new();
    let mut seen_r2: HashMap<String, PathBuf> = HashMap::new();

    for row in reader.deserialize() {
        let row: ManifestRow =
            row.with_context(|| format!("bad manifest row in {}", list_path.display()))?;
        merge_fragment(
            fastq_dir,
            &row.lims_id,
            &row.filename_r1,
            ReadDirection::R1,
            &mut seen_r1,
            &mut stats,
            event_tx,
        )?;
        merge_fragment(
            fastq_dir,
            &row.lims_id,
            &row.filename_r2,
            ReadDirection::R2,
            &mut seen_r2,
            &mut stats,
            event_tx,
        )?;
    }
    Ok(stats)
}

/// Fold one raw fragment into the canonical file for (id, direction).
fn merge_fragment(
    fastq_dir: &Path,
    id: &str,
    filename: &str,
    direction: ReadDirection,
    seen: &mut HashMap<String, PathBuf>,
    stats: &mut NormalizeStats,
    event_tx: &UnboundedSender<PipelineEvent>,
) -> Result<()> {
    let fragment = fastq_dir.join(filename);

    if let Some(canonical) = seen.get(id).cloned() {
        if !fragment.is_file() {
            stats.missing.push(fragment.clone());
            let _ = event_tx.send(PipelineEvent::FragmentMissing {
                id: id.to_string(),
                direction,
                path: fragment,
            });
            return Ok(());
        }
        append_fragment(fastq_dir, &canonical, &fragment)?;
        stats.appended += 1;
        let _ = event_tx.send(PipelineEvent::FragmentAppended {
            id: id.to_string(),
            direction,
            from: filename.to_string(),
        });
        return Ok(());
    }

    let canonical = fastq_dir.join(format!("{id}_{}.fastq.gz", direction.as_str()));
    if let Err(err) = fs::rename(&fragment, &canonical) {
        if err.kind() == io::ErrorKind::NotFound {
            stats.missing.push(fragment.clone());
            let _ = event_tx.send(PipelineEvent::FragmentMissing {
                id: id.to_string(),
                direction,
                path: fragment,
            });
            return Ok(());
        }
        return Err(err)
            .with_context(|| format!("cannot rename {}", fragment.display()));
    }
    seen.insert(id.to_string(), canonical);
    stats.renamed += 1;
    let _ = event_tx.send(PipelineEvent::FragmentRenamed {
        id: id.to_string(),
        direction,
        from: filename.to_string(),
    });
    Ok(())
}

/// Move the canonical file aside, rewrite it as accumulated bytes followed
/// by the fragment's bytes, then drop the staging copy and the consumed
/// fragment. Not transactional: a crash mid-rewrite orphans the staging
/// file.
fn append_fragment(fastq_dir: &Path, canonical: &Path, fragment: &Path) -> Result<()> {
    let staged = fastq_dir.join(STAGING_FILE);
    fs::rename(canonical, &staged).with_context(|| {
        format!("cannot stage {} for concatenation", canonical.display())
    })?;

    let mut out = File::create(canonical)
        .with_context(|| format!("cannot rewrite {}", canonical.display()))?;
    let mut accumulated = File::open(&staged)
        .with_context(|| format!("cannot reopen {}", staged.display()))?;
    io::copy(&mut accumulated, &mut out)?;
    let mut new_bytes = File::open(fragment)
        .with_context(|| format!("cannot open fragment {}", fragment.display()))?;
    io::copy(&mut new_bytes, &mut out)?;

    fs::remove_file(&staged)
        .with_context(|| format!("cannot remove {}", staged.display()))?;
    fs::remove_file(fragment)
        .with_context(|| format!("cannot remove {}", fragment.display()))?;
    Ok(())
}
