//! The translation manager: the entry point tying the pipeline together.
//!
//! Each operation (submit, wait, download, delete) is self-contained and safe to run
//! concurrently with the others. The only shared mutable state is the [`JobRegistry`], which
//! serializes its own access.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{MonitorConfig, TranslationConfig};
use crate::domain::chunk::chunk_text;
use crate::domain::job::{BatchJob, JobDestination, JobState};
use crate::domain::request::RequestBuilder;
use crate::error::{Result, TranslateBatchError};
use crate::monitor::{JobMonitor, Sleeper, TokioSleeper};
use crate::reassemble::{Reassembly, reassemble, reassemble_inline};
use crate::registry::JobRegistry;
use crate::remote::BatchService;
use crate::submit::BatchSubmitter;

/// Default number of jobs fetched by [`TranslationManager::list_jobs`].
const DEFAULT_LIST_PAGE_SIZE: usize = 50;

/// A remote job joined with the source file it was built from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationJob {
    pub job: BatchJob,
    /// `None` for jobs submitted elsewhere or before the registry existed
    pub source_file: Option<PathBuf>,
}

/// Drives documents through chunking, submission, monitoring and reassembly.
pub struct TranslationManager<S, C = TokioSleeper> {
    service: Arc<S>,
    registry: Arc<JobRegistry>,
    config: TranslationConfig,
    builder: RequestBuilder,
    submitter: BatchSubmitter<S>,
    monitor: JobMonitor<S, C>,
    list_page_size: usize,
}

impl<S: BatchService> TranslationManager<S> {
    /// Create a manager. Fails with `ConfigInvalid` if `config` is out of range.
    pub fn new(
        service: Arc<S>,
        registry: Arc<JobRegistry>,
        config: TranslationConfig,
        monitor_config: MonitorConfig,
    ) -> Result<Self> {
        Self::with_sleeper(service, registry, config, monitor_config, TokioSleeper)
    }
}

impl<S: BatchService, C: Sleeper> TranslationManager<S, C> {
    pub fn with_sleeper(
        service: Arc<S>,
        registry: Arc<JobRegistry>,
        config: TranslationConfig,
        monitor_config: MonitorConfig,
        sleeper: C,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            builder: RequestBuilder::from_config(&config),
            submitter: BatchSubmitter::new(service.clone()).with_registry(registry.clone()),
            monitor: JobMonitor::with_sleeper(service.clone(), monitor_config, sleeper),
            service,
            registry,
            config,
            list_page_size: DEFAULT_LIST_PAGE_SIZE,
        })
    }

    /// Set how many jobs [`list_jobs`](Self::list_jobs) fetches.
    pub fn with_list_page_size(mut self, page_size: usize) -> Self {
        self.list_page_size = page_size;
        self
    }

    pub fn config(&self) -> &TranslationConfig {
        &self.config
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn monitor(&self) -> &JobMonitor<S, C> {
        &self.monitor
    }

    /// Chunk `text` and submit it as one job.
    ///
    /// Returns `Ok(None)` without contacting the service when `text` is empty.
    #[tracing::instrument(skip(self, text, source_file), fields(chars = text.len()))]
    pub async fn submit_text(
        &self,
        text: &str,
        display_name: &str,
        source_file: Option<&Path>,
    ) -> Result<Option<BatchJob>> {
        let records = self
            .builder
            .build_all(chunk_text(text, self.config.chunk_size)?)?;
        if records.is_empty() {
            tracing::info!("Document is empty, nothing to submit");
            return Ok(None);
        }

        let job = self
            .submitter
            .submit(&records, display_name, source_file)
            .await?;
        Ok(Some(job))
    }

    /// Read a UTF-8 text file and submit it as one job named `translation-<file name>`.
    #[tracing::instrument(skip(self, source), fields(source = %source.display()))]
    pub async fn submit_file(&self, source: &Path) -> Result<Option<BatchJob>> {
        let text = tokio::fs::read_to_string(source).await.inspect_err(|e| {
            tracing::error!(error = %e, "Could not read source document");
        })?;
        self.submit_text(&text, &display_name_for(source), Some(source))
            .await
    }

    /// Recent remote jobs, each joined with its registered source file.
    pub async fn list_jobs(&self) -> Result<Vec<TranslationJob>> {
        let jobs = self.service.list_batches(self.list_page_size).await?;
        Ok(jobs
            .into_iter()
            .map(|job| TranslationJob {
                source_file: self.registry.get_source_file(&job.name),
                job,
            })
            .collect())
    }

    /// Current state of one job.
    pub async fn job_status(&self, name: &str) -> Result<BatchJob> {
        self.monitor.poll_once(name).await
    }

    /// Poll one job until it is terminal.
    pub async fn wait_for_job(&self, name: &str) -> Result<BatchJob> {
        self.monitor.wait_until_terminal(name).await
    }

    /// Poll one job until it is terminal or `token` is cancelled.
    pub async fn wait_for_job_with_cancel(
        &self,
        name: &str,
        token: &CancellationToken,
    ) -> Result<BatchJob> {
        self.monitor
            .wait_until_terminal_with_cancel(name, token)
            .await
    }

    /// Poll several jobs concurrently. Each outcome is paired with its job name; one job
    /// failing does not affect the others.
    pub async fn wait_for_jobs(&self, names: &[String]) -> Vec<(String, Result<BatchJob>)> {
        futures::future::join_all(names.iter().map(|name| async move {
            (name.clone(), self.monitor.wait_until_terminal(name).await)
        }))
        .await
    }

    /// Download and reassemble the results of a succeeded job without writing them anywhere.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_results(&self, name: &str) -> Result<Reassembly> {
        let job = self.service.get_batch(name).await?;
        match job.state {
            JobState::Succeeded => {}
            JobState::Failed => {
                return Err(TranslateBatchError::JobFailed {
                    message: job.error_message(),
                    name: job.name,
                });
            }
            JobState::Cancelled => {
                return Err(TranslateBatchError::JobCancelled {
                    message: job.error_message(),
                    name: job.name,
                });
            }
            state => {
                return Err(TranslateBatchError::JobNotReady {
                    name: job.name,
                    state: state.to_string(),
                });
            }
        }

        let expected_chunks = self.registry.get(name).and_then(|entry| entry.chunk_count);
        let reassembly = match job.destination {
            Some(JobDestination::File(file_name)) => {
                let content = self.service.download_file(&file_name).await?;
                reassemble(&content, expected_chunks)
            }
            Some(JobDestination::Inline(responses)) => {
                reassemble_inline(&responses, expected_chunks)
            }
            None => return Err(TranslateBatchError::MissingDestination(job.name)),
        };

        tracing::info!(
            segments = reassembly.len(),
            placeholders = reassembly.placeholder_count(),
            "Results reassembled"
        );
        Ok(reassembly)
    }

    /// Download a succeeded job's results and write the reassembled document to `save_path`.
    #[tracing::instrument(skip(self, save_path), fields(save_path = %save_path.display()))]
    pub async fn download_results(&self, name: &str, save_path: &Path) -> Result<Reassembly> {
        let reassembly = self.fetch_results(name).await?;

        if let Some(parent) = save_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(save_path, reassembly.text()).await?;
        tracing::info!("Translation saved");
        Ok(reassembly)
    }

    /// Delete a job remotely, then forget it locally.
    ///
    /// Running poll loops on the job are not notified.
    #[tracing::instrument(skip(self))]
    pub async fn delete_job(&self, name: &str) -> Result<()> {
        self.service.delete_batch(name).await?;
        self.registry.remove(name)?;
        Ok(())
    }

    /// Translate one file end to end: submit, wait, download to `save_path`.
    ///
    /// Returns `Ok(None)` for an empty source document; nothing is submitted or written.
    #[tracing::instrument(skip(self, source), fields(source = %source.display()))]
    pub async fn translate_file(&self, source: &Path, save_path: &Path) -> Result<Option<Reassembly>> {
        let Some(job) = self.submit_file(source).await? else {
            return Ok(None);
        };
        self.wait_for_job(&job.name).await?;
        let reassembly = self.download_results(&job.name, save_path).await?;
        Ok(Some(reassembly))
    }
}

/// Display name given to the job for a source file.
pub fn display_name_for(source: &Path) -> String {
    let file_name = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    format!("translation-{file_name}")
}
