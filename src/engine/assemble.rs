//! Per-run preparation: sample-info projection and config generation.
//!
//! Every run is prepared before the first one is launched, so a bad sample
//! sheet anywhere in the batch is caught before any engine starts.

use crate::model::{
    LaunchConfig, PipelineEvent, RunConfig, CONFIG_FILE, SAMPLE_INFO_FILE, SAMPLE_SHEET_FILE,
};
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tokio::sync::mpsc::UnboundedSender;

/// Columns of the LIMS sample sheet that survive into `sample_info.csv`.
const SAMPLE_INFO_COLUMNS: [usize; 4] = [0, 7, 10, 11];

/// List run directories under the input root, sorted by name. Hidden
/// entries and plain files are not runs.
pub fn discover_runs(input_dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(input_dir)
        .with_context(|| format!("cannot list input directory {}", input_dir.display()))?;

    let mut runs = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') {
            runs.push(name);
        }
    }
    runs.sort();
    Ok(runs)
}

/// Project the run's sample sheet into `sample_info.csv` and write the
/// run's `config.yaml`. Reruns overwrite both files.
pub fn prepare_run(
    cfg: &LaunchConfig,
    run: &str,
    event_tx: &UnboundedSender<PipelineEvent>,
) -> Result<()> {
    let run_dir = cfg.input_dir.join(run);

    let rows = write_sample_info(&run_dir)?;
    let _ = event_tx.send(PipelineEvent::SampleInfoWritten {
        run: run.to_string(),
        rows,
    });

    let config_path = run_dir.join(CONFIG_FILE);
    run_config_for(cfg, run).save(&config_path)?;
    let _ = event_tx.send(PipelineEvent::ConfigWritten {
        run: run.to_string(),
        path: config_path,
    });
    Ok(())
}

/// Static entries plus the run-derived paths the engine needs.
pub fn run_config_for(cfg: &LaunchConfig, run: &str) -> RunConfig {
    let run_dir = cfg.input_dir.join(run);
    RunConfig {
        static_files_dir: cfg.static_files_dir.clone(),
        bin_dir: cfg.bin_dir.clone(),
        output_dir: cfg.output_dir.join(run),
        reference: cfg.reference.clone(),
        sample_info_file: run_dir.join(SAMPLE_INFO_FILE),
        sample_dir: run_dir,
        samples: BTreeMap::new(),
    }
}

/// Copy columns 0, 7, 10 and 11 of every sheet row into `sample_info.csv`,
/// positionally. The sheet carries no header; rows pass through as-is.
fn write_sample_info(run_dir: &Path) -> Result<usize> {
    let sheet_path = run_dir.join(SAMPLE_SHEET_FILE);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(&sheet_path)
        .with_context(|| format!("cannot open sample sheet {}", sheet_path.display()))?;

    let info_path = run_dir.join(SAMPLE_INFO_FILE);
    let mut writer = csv::Writer::from_path(&info_path)
        .with_context(|| format!("cannot create {}", info_path.display()))?;

    let mut rows = 0usize;
    for (line, record) in reader.records().enumerate() {
        let record =
            record.with_context(|| format!("bad row in {}", sheet_path.display()))?;
        let mut projected = csv::StringRecord::new();
        for &col in &SAMPLE_INFO_COLUMNS {
            match record.get(col) {
                Some(field) => projected.push_field(field),
                None => bail!(
                    "sample sheet {} line {}: expected at least {} columns, found {}",
                    sheet_path.display(),
                    line + 1,
                    col + 1,
                    record.len()
                ),
            }
        }
        writer.write_record(&projected)?;
        rows += 1;
    }
    writer
        .flush()
        .with_context(|| format!("cannot write {}", info_path.display()))?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    fn launch_config(root: &Path) -> LaunchConfig {
        LaunchConfig {
            input_dir: root.join("input"),
            output_dir: root.join("output"),
            static_files_dir: root.join("static_files"),
            bin_dir: root.join("bin"),
            reference: root.join("static_files").join("GRCh38.fa"),
            threads: 4,
            conda_exe: PathBuf::from("conda"),
            conda_env: "snakemake".into(),
            engine: "snakemake".into(),
            poll_interval: Duration::from_millis(10),
            poll_timeout: Some(Duration::from_secs(1)),
        }
    }

    #[test]
    fn discovers_only_visible_directories() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("run_b")).unwrap();
        fs::create_dir(dir.path().join("run_a")).unwrap();
        fs::create_dir(dir.path().join(".cache")).unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let runs = discover_runs(dir.path()).unwrap();
        assert_eq!(runs, vec!["run_a".to_string(), "run_b".to_string()]);
    }

    #[test]
    fn missing_input_root_is_fatal() {
        let dir = tempdir().unwrap();
        assert!(discover_runs(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn projects_sheet_columns_into_sample_info() {
        let dir = tempdir().unwrap();
        let cfg = launch_config(dir.path());
        let run_dir = cfg.input_dir.join("run1");
        fs::create_dir_all(&run_dir).unwrap();
        fs::write(
            run_dir.join(SAMPLE_SHEET_FILE),
            "S1,x,y,z,a,b,c,region,w,q,projA,libA\nS2,x,y,z,a,b,c,south,w,q,projB,libB\n",
        )
        .unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        prepare_run(&cfg, "run1", &tx).unwrap();

        let info = fs::read_to_string(run_dir.join(SAMPLE_INFO_FILE)).unwrap();
        assert_eq!(info, "S1,region,projA,libA\nS2,south,projB,libB\n");
    }

    #[test]
    fn short_sheet_row_aborts() {
        let dir = tempdir().unwrap();
        let cfg = launch_config(dir.path());
        let run_dir = cfg.input_dir.join("run1");
        fs::create_dir_all(&run_dir).unwrap();
        fs::write(run_dir.join(SAMPLE_SHEET_FILE), "S1,x,y\n").unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = prepare_run(&cfg, "run1", &tx).unwrap_err();
        assert!(err.to_string().contains("columns"));
    }

    #[test]
    fn writes_config_with_derived_paths_idempotently() {
        let dir = tempdir().unwrap();
        let cfg = launch_config(dir.path());
        let run_dir = cfg.input_dir.join("run1");
        fs::create_dir_all(&run_dir).unwrap();
        fs::write(
            run_dir.join(SAMPLE_SHEET_FILE),
            "S1,x,y,z,a,b,c,region,w,q,projA,libA\n",
        )
        .unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        prepare_run(&cfg, "run1", &tx).unwrap();
        let first = fs::read_to_string(run_dir.join(CONFIG_FILE)).unwrap();
        prepare_run(&cfg, "run1", &tx).unwrap();
        let second = fs::read_to_string(run_dir.join(CONFIG_FILE)).unwrap();
        assert_eq!(first, second);

        let config = RunConfig::load(&run_dir.join(CONFIG_FILE)).unwrap();
        assert_eq!(config.output_dir, cfg.output_dir.join("run1"));
        assert_eq!(config.sample_dir, run_dir);
        assert_eq!(config.sample_info_file, run_dir.join(SAMPLE_INFO_FILE));
        assert!(config.samples.is_empty());
    }
}
