//! Sample registration and detached engine start.

use crate::model::{LaunchConfig, RunConfig};
use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Suffix of canonical forward-read files; the sample name is everything
/// before it.
const R1_SUFFIX: &str = "_R1.fastq.gz";

/// Cluster submission template handed to the engine as one opaque
/// argument; the `{params.*}` and `{rule}` placeholders are filled per job
/// by the engine at dispatch time, not here.
const CLUSTER_SUBMIT_TEMPLATE: &str = "sbatch --job-name='{params.sampleID} {rule}' \
--partition={params.partition} --output={params.logfile} \
--cpus-per-task={params.cpus_per_task} --mem={params.mem} --parsable";

/// Discover normalized samples in `fastq_dir` and merge them into the
/// run's config, rewriting `config.yaml`. Returns the sample names, sorted.
pub fn register_samples(config_path: &Path, fastq_dir: &Path) -> Result<Vec<String>> {
    let pattern = fastq_dir.join(format!("*{R1_SUFFIX}"));
    let pattern = pattern
        .to_str()
        .with_context(|| format!("non-UTF-8 FASTQ directory {}", fastq_dir.display()))?;

    let mut names = Vec::new();
    for entry in glob::glob(pattern).context("invalid sample glob pattern")? {
        let path = entry?;
        if let Some(name) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(R1_SUFFIX))
        {
            names.push(name.to_string());
        }
    }
    names.sort();

    let mut config = RunConfig::load(config_path)?;
    for name in &names {
        config.samples.insert(name.clone(), fastq_dir.join(name));
    }
    config.save(config_path)?;
    Ok(names)
}

/// Start the workflow engine inside the conda environment, detached. The
/// child handle is dropped on purpose: completion is only observable
/// through the sentinel file, and the job outlives this process if the
/// wait is cancelled.
pub fn start_engine(cfg: &LaunchConfig, config_path: &Path) -> Result<Option<u32>> {
    let child = Command::new(&cfg.conda_exe)
        .arg("run")
        .arg("--no-capture-output")
        .arg("-n")
        .arg(&cfg.conda_env)
        .arg(&cfg.engine)
        .arg("-j")
        .arg(cfg.threads.to_string())
        .arg("--configfile")
        .arg(config_path)
        .arg("--cluster")
        .arg(CLUSTER_SUBMIT_TEMPLATE)
        .stdin(Stdio::null())
        .spawn()
        .with_context(|| {
            format!(
                "cannot start {} via {}",
                cfg.engine,
                cfg.conda_exe.display()
            )
        })?;
    Ok(child.id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CONFIG_FILE;
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::tempdir;

    fn seed_config(run_dir: &Path) -> PathBuf {
        let config = RunConfig {
            static_files_dir: PathBuf::from("/s"),
            bin_dir: PathBuf::from("/b"),
            output_dir: PathBuf::from("/o"),
            reference: PathBuf::from("/r.fa"),
            sample_info_file: run_dir.join("sample_info.csv"),
            sample_dir: run_dir.to_path_buf(),
            samples: BTreeMap::new(),
        };
        let path = run_dir.join(CONFIG_FILE);
        config.save(&path).unwrap();
        path
    }

    #[test]
    fn registers_samples_from_forward_reads_only() {
        let dir = tempdir().unwrap();
        let fastq_dir = dir.path().join("FASTQ_files");
        fs::create_dir(&fastq_dir).unwrap();
        let config_path = seed_config(dir.path());

        for name in [
            "S1_R1.fastq.gz",
            "S1_R2.fastq.gz",
            "S2_extra_R1.fastq.gz",
            "S2_extra_R2.fastq.gz",
        ] {
            fs::write(fastq_dir.join(name), "x").unwrap();
        }

        let names = register_samples(&config_path, &fastq_dir).unwrap();
        assert_eq!(names, vec!["S1".to_string(), "S2_extra".to_string()]);

        let config = RunConfig::load(&config_path).unwrap();
        assert_eq!(config.samples.len(), 2);
        assert_eq!(config.samples["S1"], fastq_dir.join("S1"));
        // Underscores inside the LIMS ID survive name derivation.
        assert_eq!(config.samples["S2_extra"], fastq_dir.join("S2_extra"));
    }

    #[test]
    fn registering_twice_is_idempotent() {
        let dir = tempdir().unwrap();
        let fastq_dir = dir.path().join("FASTQ_files");
        fs::create_dir(&fastq_dir).unwrap();
        let config_path = seed_config(dir.path());
        fs::write(fastq_dir.join("S1_R1.fastq.gz"), "x").unwrap();

        register_samples(&config_path, &fastq_dir).unwrap();
        let first = fs::read_to_string(&config_path).unwrap();
        register_samples(&config_path, &fastq_dir).unwrap();
        let second = fs::read_to_string(&config_path).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn spawn_failure_surfaces_the_activator() {
        let dir = tempdir().unwrap();
        let config_path = seed_config(dir.path());
        let cfg = LaunchConfig {
            input_dir: dir.path().to_path_buf(),
            output_dir: dir.path().join("out"),
            static_files_dir: dir.path().join("static"),
            bin_dir: dir.path().join("bin"),
            reference: dir.path().join("ref.fa"),
            threads: 2,
            conda_exe: dir.path().join("no-such-activator"),
            conda_env: "snakemake".into(),
            engine: "snakemake".into(),
            poll_interval: Duration::from_millis(10),
            poll_timeout: None,
        };
        let err = start_engine(&cfg, &config_path).unwrap_err();
        assert!(err.to_string().contains("no-such-activator"));
    }
}
