//! Durable mapping from batch job name to the source file that produced it.
//!
//! The remote service does not remember which document a job was built from, so this file is
//! the only record of that association. The whole map is rewritten on every mutation. An
//! unreadable or corrupt file is treated as an empty registry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One registry row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRegistryEntry {
    pub job_name: String,
    pub source_file: PathBuf,
    /// Number of chunks submitted, when known
    pub chunk_count: Option<usize>,
}

/// On-disk value, keyed by job name.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    source_file: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chunk_count: Option<usize>,
}

/// File-backed job registry.
///
/// All reads and writes go through one lock, so concurrent callers never interleave file
/// writes.
#[derive(Debug)]
pub struct JobRegistry {
    path: PathBuf,
    jobs: Mutex<BTreeMap<String, StoredEntry>>,
}

impl JobRegistry {
    /// Open the registry stored at `path`.
    ///
    /// A missing file starts an empty registry. A corrupt file is logged and also starts empty;
    /// it is overwritten on the next mutation.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let jobs = load(&path);
        tracing::debug!(path = %path.display(), jobs = jobs.len(), "Opened job registry");
        Self {
            path,
            jobs: Mutex::new(jobs),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the source file for a job. An existing row for the same job is replaced.
    pub fn add(&self, job_name: &str, source_file: impl Into<PathBuf>) -> Result<()> {
        self.insert(JobRegistryEntry {
            job_name: job_name.to_string(),
            source_file: source_file.into(),
            chunk_count: None,
        })
    }

    /// Record a full entry. An existing row for the same job is replaced.
    ///
    /// The in-memory map only changes once the file has been written.
    pub fn insert(&self, entry: JobRegistryEntry) -> Result<()> {
        let mut jobs = self.jobs.lock();
        let mut updated = jobs.clone();
        updated.insert(
            entry.job_name.clone(),
            StoredEntry {
                source_file: entry.source_file.clone(),
                chunk_count: entry.chunk_count,
            },
        );
        save(&self.path, &updated)?;
        *jobs = updated;
        tracing::info!(
            job = %entry.job_name,
            source = %entry.source_file.display(),
            "Job tracked in registry"
        );
        Ok(())
    }

    /// Source file that produced `job_name`, if tracked.
    pub fn get_source_file(&self, job_name: &str) -> Option<PathBuf> {
        self.jobs
            .lock()
            .get(job_name)
            .map(|entry| entry.source_file.clone())
    }

    pub fn get(&self, job_name: &str) -> Option<JobRegistryEntry> {
        self.jobs.lock().get(job_name).map(|entry| JobRegistryEntry {
            job_name: job_name.to_string(),
            source_file: entry.source_file.clone(),
            chunk_count: entry.chunk_count,
        })
    }

    /// Forget a job. Returns whether a row was removed.
    pub fn remove(&self, job_name: &str) -> Result<bool> {
        let mut jobs = self.jobs.lock();
        if !jobs.contains_key(job_name) {
            return Ok(false);
        }
        let mut updated = jobs.clone();
        updated.remove(job_name);
        save(&self.path, &updated)?;
        *jobs = updated;
        tracing::info!(job = %job_name, "Job removed from registry");
        Ok(true)
    }

    /// All rows, ordered by job name.
    pub fn entries(&self) -> Vec<JobRegistryEntry> {
        self.jobs
            .lock()
            .iter()
            .map(|(name, entry)| JobRegistryEntry {
                job_name: name.clone(),
                source_file: entry.source_file.clone(),
                chunk_count: entry.chunk_count,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

fn load(path: &Path) -> BTreeMap<String, StoredEntry> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not read job registry, starting empty");
            return BTreeMap::new();
        }
    };

    if contents.trim().is_empty() {
        return BTreeMap::new();
    }

    match serde_json::from_str(&contents) {
        Ok(jobs) => jobs,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Job registry is corrupt, starting empty");
            BTreeMap::new()
        }
    }
}

/// Write the whole map, replacing the file in one rename.
fn save(path: &Path, jobs: &BTreeMap<String, StoredEntry>) -> Result<()> {
    let json = serde_json::to_string_pretty(jobs)?;
    let tmp = path.with_extension("json.tmp");
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path).inspect_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "Failed to save job registry");
    })?;
    Ok(())
}
