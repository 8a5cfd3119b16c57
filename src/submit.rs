//! Submitting request records as one batch job.

use std::path::Path;
use std::sync::Arc;

use metrics::counter;

use crate::domain::job::BatchJob;
use crate::domain::request::{RequestRecord, records_to_jsonl};
use crate::error::{Result, TranslateBatchError};
use crate::registry::{JobRegistry, JobRegistryEntry};
use crate::remote::BatchService;

/// Uploads request records and creates a batch job from them.
///
/// Submission is all-or-nothing from the caller's point of view: any upload or create failure
/// becomes `SubmissionFailed` and nothing is recorded locally. A half-submitted job (file
/// uploaded, job never created) is left to the service.
pub struct BatchSubmitter<S> {
    service: Arc<S>,
    registry: Option<Arc<JobRegistry>>,
}

impl<S: BatchService> BatchSubmitter<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self {
            service,
            registry: None,
        }
    }

    /// Record each successful submission in `registry`.
    pub fn with_registry(mut self, registry: Arc<JobRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Submit `records` as one job.
    ///
    /// When a registry is attached and `source_file` is given, the job is recorded after the
    /// service accepts it, together with the number of records. A registry write failure is
    /// logged and does not fail the submission, since the job already exists remotely.
    #[tracing::instrument(skip(self, records, source_file), fields(records = records.len()))]
    pub async fn submit(
        &self,
        records: &[RequestRecord],
        display_name: &str,
        source_file: Option<&Path>,
    ) -> Result<BatchJob> {
        let model = match records.first() {
            Some(record) => record.model.clone(),
            None => {
                return Err(TranslateBatchError::ConfigInvalid(
                    "no request records to submit".to_string(),
                ));
            }
        };
        if let Some(other) = records.iter().find(|record| record.model != model) {
            return Err(TranslateBatchError::ConfigInvalid(format!(
                "records target different models ('{model}' and '{}')",
                other.model
            )));
        }

        let payload = records_to_jsonl(records)?;
        let file_name = self
            .service
            .upload_file(display_name, payload.into_bytes())
            .await
            .map_err(|e| submission_failed("upload", e))?;
        tracing::debug!(file = %file_name, "Request payload uploaded");

        let job = self
            .service
            .create_batch(&model, &file_name, display_name)
            .await
            .map_err(|e| submission_failed("create", e))?;

        counter!("translate_batch_jobs_submitted_total").increment(1);
        tracing::info!(job = %job.name, model = %model, chunks = records.len(), "Batch job submitted");

        if let (Some(registry), Some(source_file)) = (&self.registry, source_file) {
            let entry = JobRegistryEntry {
                job_name: job.name.clone(),
                source_file: source_file.to_path_buf(),
                chunk_count: Some(records.len()),
            };
            if let Err(e) = registry.insert(entry) {
                tracing::error!(
                    job = %job.name,
                    error = %e,
                    "Job submitted but could not be recorded in the registry"
                );
            }
        }

        Ok(job)
    }
}

fn submission_failed(step: &str, error: TranslateBatchError) -> TranslateBatchError {
    tracing::error!(step, error = %error, "Batch submission failed");
    TranslateBatchError::SubmissionFailed(format!("{step} failed: {error}"))
}
