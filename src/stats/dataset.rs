use crate::error::StatsError;
use crate::stats::bucket::MonthlyBuckets;
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthRecord {
    pub member_count: u64,
    pub total_messages: u64,
    pub unique_posters: u64,
}

/// Month key (`YYYY-MM`) to record. `BTreeMap` keeps keys sorted on write.
pub type Dataset = BTreeMap<String, MonthRecord>;

pub fn default_output_file(cwd: &Path) -> PathBuf {
    cwd.join("data").join("discord-stats").join("stats.json")
}

pub fn load(path: &Path) -> Result<Dataset> {
    if !path.exists() {
        return Ok(Dataset::new());
    }

    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(Dataset::new());
    }
    let parsed: Dataset = serde_json::from_str(&raw)
        .map_err(|err| StatsError::CorruptDataset(format!("{}: {err}", path.display())))?;
    Ok(parsed)
}

fn ensure_parent(path: &Path) -> Result<PathBuf> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).with_context(|| format!("failed to create {}", parent.display()))?;
    Ok(parent)
}

/// Writes the dataset atomically: a temp file in the same directory is
/// persisted over `path`.
pub fn save(path: &Path, dataset: &Dataset) -> Result<()> {
    let parent = ensure_parent(path)?;
    let data = serde_json::to_string_pretty(dataset)?;

    let mut tmp = NamedTempFile::new_in(&parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    tmp.write_all(format!("{data}\n").as_bytes())
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Overwrites one record per bucket with this run's numbers; every other
/// month keeps its stored value. Returns the keys written.
pub fn merge_buckets(
    dataset: &mut Dataset,
    buckets: &MonthlyBuckets,
    member_count: u64,
) -> Vec<String> {
    let mut written = Vec::with_capacity(buckets.len());
    for (key, bucket) in buckets.iter() {
        let key = key.to_string();
        dataset.insert(
            key.clone(),
            MonthRecord {
                member_count,
                total_messages: bucket.total_messages,
                unique_posters: bucket.unique_poster_count(),
            },
        );
        written.push(key);
    }
    written
}

/// Lays `incoming` over `dataset`, key by key. Returns the number of keys written.
pub fn overlay(dataset: &mut Dataset, incoming: &Dataset) -> usize {
    for (key, record) in incoming {
        dataset.insert(key.clone(), *record);
    }
    incoming.len()
}

/// Exclusive advisory lock on `<output>.lock`, held for a whole run. The
/// lock file is deleted on release.
#[derive(Debug)]
pub struct OutputLock {
    file: File,
    path: PathBuf,
}

impl OutputLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for OutputLock {
    fn drop(&mut self) {
        // Removed while still held so the data directory stays clean.
        let _ = fs::remove_file(&self.path);
        let _ = FileExt::unlock(&self.file);
    }
}

pub fn lock_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "stats.json".into());
    name.push(".lock");
    output.with_file_name(name)
}

pub fn lock_output(output: &Path) -> Result<OutputLock> {
    ensure_parent(output)?;
    let path = lock_path(output);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    if file.try_lock_exclusive().is_err() {
        return Err(StatsError::OutputLocked(path.display().to_string()).into());
    }
    Ok(OutputLock { file, path })
}
