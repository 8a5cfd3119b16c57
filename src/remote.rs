//! Remote batch service abstraction.
//!
//! This module defines the `BatchService` trait covering the calls the pipeline makes against
//! the hosted generation API (file upload, batch create/get/list/delete, file download),
//! enabling testability with a scripted mock implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::{DeserializeOwned, Error as _};
use serde_json::Value;

use crate::config::ServiceConfig;
use crate::domain::job::{BatchJob, InlineResponse, JobDestination, JobState};
use crate::domain::request::qualified_model;
use crate::error::{Result, TranslateBatchError};

/// Trait for talking to the remote batch service.
///
/// Every call is an opaque remote operation; implementations own transport, authentication
/// and wire formats and hand back domain types.
///
/// # Example
/// ```ignore
/// let service = GeminiBatchService::new(ServiceConfig { api_key, ..Default::default() });
/// let file = service.upload_file("requests.jsonl", payload).await?;
/// let job = service.create_batch("gemini-2.5-flash", &file, "translation-book.txt").await?;
/// ```
#[async_trait]
pub trait BatchService: Send + Sync {
    /// Upload a JSONL request payload, returning the remote file name.
    async fn upload_file(&self, display_name: &str, payload: Vec<u8>) -> Result<String>;

    /// Create a batch job reading its requests from an uploaded file.
    async fn create_batch(
        &self,
        model: &str,
        input_file: &str,
        display_name: &str,
    ) -> Result<BatchJob>;

    /// Fetch the current state of a job.
    async fn get_batch(&self, name: &str) -> Result<BatchJob>;

    /// List the most recent jobs.
    async fn list_batches(&self, page_size: usize) -> Result<Vec<BatchJob>>;

    /// Delete (or cancel) a job. Best effort: running poll loops are not notified.
    async fn delete_batch(&self, name: &str) -> Result<()>;

    /// Download a result file as text.
    async fn download_file(&self, file_name: &str) -> Result<String>;
}

// ============================================================================
// Production Implementation using reqwest
// ============================================================================

/// Batch service client for the Generative Language REST API.
#[derive(Clone)]
pub struct GeminiBatchService {
    client: reqwest::Client,
    config: ServiceConfig,
}

impl GeminiBatchService {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Attach credentials and timeout, send, and reject non-success statuses.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let mut request = request.timeout(Duration::from_millis(self.config.timeout_ms));
        if !self.config.api_key.is_empty() {
            request = request.header("x-goog-api-key", &self.config.api_key);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, "Batch service request failed");
            e
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body_len = body.len(), "Batch service returned error status");
            return Err(TranslateBatchError::Remote {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl BatchService for GeminiBatchService {
    #[tracing::instrument(skip(self, payload), fields(bytes = payload.len()))]
    async fn upload_file(&self, display_name: &str, payload: Vec<u8>) -> Result<String> {
        // Resumable upload: the first call returns the URL the bytes go to
        let start = self
            .send(
                self.client
                    .post(self.url("/upload/v1beta/files"))
                    .header("X-Goog-Upload-Protocol", "resumable")
                    .header("X-Goog-Upload-Command", "start")
                    .header("X-Goog-Upload-Header-Content-Length", payload.len())
                    .header("X-Goog-Upload-Header-Content-Type", "application/jsonl")
                    .json(&serde_json::json!({ "file": { "display_name": display_name } })),
            )
            .await?;

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| anyhow::anyhow!("upload start response has no x-goog-upload-url header"))?
            .to_string();

        let finished = self
            .send(
                self.client
                    .post(upload_url)
                    .header("X-Goog-Upload-Offset", "0")
                    .header("X-Goog-Upload-Command", "upload, finalize")
                    .body(payload),
            )
            .await?;

        let uploaded: WireUploadResponse = read_json(finished).await?;
        tracing::info!(file = %uploaded.file.name, "Uploaded request file");
        Ok(uploaded.file.name)
    }

    #[tracing::instrument(skip(self))]
    async fn create_batch(
        &self,
        model: &str,
        input_file: &str,
        display_name: &str,
    ) -> Result<BatchJob> {
        let body = serde_json::json!({
            "batch": {
                "display_name": display_name,
                "input_config": { "file_name": input_file },
            }
        });
        let path = format!("/v1beta/{}:batchGenerateContent", qualified_model(model));
        let response = self
            .send(self.client.post(self.url(&path)).json(&body))
            .await?;
        decode_batch(read_json(response).await?)
    }

    #[tracing::instrument(skip(self))]
    async fn get_batch(&self, name: &str) -> Result<BatchJob> {
        let response = self
            .send(self.client.get(self.url(&format!("/v1beta/{name}"))))
            .await?;
        decode_batch(read_json(response).await?)
    }

    #[tracing::instrument(skip(self))]
    async fn list_batches(&self, page_size: usize) -> Result<Vec<BatchJob>> {
        let response = self
            .send(
                self.client
                    .get(self.url("/v1beta/batches"))
                    .query(&[("pageSize", page_size)]),
            )
            .await?;
        let page: WireListResponse = read_json(response).await?;
        page.operations.into_iter().map(decode_batch).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn delete_batch(&self, name: &str) -> Result<()> {
        self.send(self.client.delete(self.url(&format!("/v1beta/{name}"))))
            .await?;
        tracing::info!(job = %name, "Deleted batch job");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn download_file(&self, file_name: &str) -> Result<String> {
        let response = self
            .send(
                self.client
                    .get(self.url(&format!("/download/v1beta/{file_name}:download")))
                    .query(&[("alt", "media")]),
            )
            .await?;
        let body = response.text().await?;
        tracing::info!(file = %file_name, bytes = body.len(), "Downloaded result file");
        Ok(body)
    }
}

#[derive(Deserialize)]
struct WireUploadResponse {
    file: WireFile,
}

#[derive(Deserialize)]
struct WireFile {
    name: String,
}

#[derive(Deserialize)]
struct WireListResponse {
    #[serde(default, alias = "batches")]
    operations: Vec<Value>,
}

/// Long-running operation envelope wrapping a batch.
#[derive(Deserialize)]
struct WireOperation {
    name: Option<String>,
    metadata: Option<WireBatch>,
    #[serde(default)]
    done: bool,
    error: Option<WireStatus>,
    response: Option<WireOutput>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBatch {
    name: Option<String>,
    display_name: Option<String>,
    state: Option<String>,
    create_time: Option<DateTime<Utc>>,
    update_time: Option<DateTime<Utc>>,
    output: Option<WireOutput>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOutput {
    responses_file: Option<String>,
    inlined_responses: Option<WireInlinedResponses>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInlinedResponses {
    #[serde(default)]
    inlined_responses: Vec<WireInlinedResponse>,
}

#[derive(Deserialize)]
struct WireInlinedResponse {
    response: Option<Value>,
    error: Option<Value>,
    metadata: Option<Value>,
}

#[derive(Deserialize)]
struct WireStatus {
    message: Option<String>,
}

impl WireOutput {
    fn into_destination(self) -> Option<JobDestination> {
        if let Some(file) = self.responses_file {
            return Some(JobDestination::File(file));
        }
        let inlined = self.inlined_responses?;
        Some(JobDestination::Inline(
            inlined
                .inlined_responses
                .into_iter()
                .map(|inline| InlineResponse {
                    key: inline
                        .metadata
                        .as_ref()
                        .and_then(|m| m.get("key"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    response: inline.response,
                    error: inline.error,
                })
                .collect(),
        ))
    }
}

/// Read a response body as JSON. Malformed bodies surface as `Serialization` errors.
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

/// Decode a batch resource, wrapped in an operation envelope or bare.
///
/// Every decoding failure is a `Serialization` error.
fn decode_batch(value: Value) -> Result<BatchJob> {
    let operation: WireOperation = serde_json::from_value(value.clone())?;
    let batch: WireBatch = match operation.metadata {
        Some(batch) => batch,
        None => serde_json::from_value(value)?,
    };

    let name = batch
        .name
        .or(operation.name)
        .ok_or_else(|| serde_json::Error::custom("batch resource has no name"))?;

    let error = operation.error.map(|status| {
        status
            .message
            .unwrap_or_else(|| "unspecified error".to_string())
    });

    let state = match batch.state.as_deref() {
        Some(raw) => JobState::normalize(raw),
        None if operation.done && error.is_some() => JobState::Failed,
        None if operation.done => JobState::Succeeded,
        None => JobState::Pending,
    };

    let destination = batch
        .output
        .or(operation.response)
        .and_then(WireOutput::into_destination);

    Ok(BatchJob {
        display_name: batch.display_name.unwrap_or_else(|| name.clone()),
        name,
        state,
        created_at: batch.create_time,
        updated_at: batch.update_time,
        destination,
        error,
    })
}

// ============================================================================
// Test/Mock Implementation
// ============================================================================

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Mock batch service for testing.
///
/// Keeps jobs and files in memory. Poll results can be scripted per job; scripted results are
/// snapshots that leave the stored job untouched, and once a job's script is exhausted
/// `get_batch` returns the stored job.
///
/// # Example
/// ```ignore
/// let mock = MockBatchService::new();
/// let job = submitter.submit(&records, "display", "book.txt").await?;
/// mock.add_poll_state(&job.name, JobState::Running);
/// mock.complete_job(&job.name, result_lines);
/// ```
#[derive(Clone, Default)]
pub struct MockBatchService {
    jobs: Arc<Mutex<HashMap<String, BatchJob>>>,
    poll_responses: Arc<Mutex<HashMap<String, VecDeque<Result<BatchJob>>>>>,
    files: Arc<Mutex<HashMap<String, String>>>,
    job_inputs: Arc<Mutex<HashMap<String, String>>>,
    upload_failures: Arc<Mutex<VecDeque<TranslateBatchError>>>,
    create_failures: Arc<Mutex<VecDeque<TranslateBatchError>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

/// Record of a call made to the mock service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub operation: &'static str,
    pub target: String,
}

impl MockBatchService {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, operation: &'static str, target: &str) {
        self.calls.lock().push(MockCall {
            operation,
            target: target.to_string(),
        });
    }

    /// Queue a result for the next `get_batch` call on `name`. Results are returned FIFO.
    pub fn add_poll_response(&self, name: &str, response: Result<BatchJob>) {
        self.poll_responses
            .lock()
            .entry(name.to_string())
            .or_default()
            .push_back(response);
    }

    /// Queue the stored job, moved to `state`, as the next poll result for `name`.
    pub fn add_poll_state(&self, name: &str, state: JobState) {
        let job = self.stored_job(name).map(|job| BatchJob { state, ..job });
        let response = job.ok_or_else(|| not_found(name));
        self.add_poll_response(name, response);
    }

    /// Queue a transient transport failure as the next poll result for `name`.
    pub fn add_poll_error(&self, name: &str) {
        self.add_poll_response(
            name,
            Err(TranslateBatchError::Other(anyhow::anyhow!(
                "connection reset by peer"
            ))),
        );
    }

    /// Insert or replace a job.
    pub fn set_job(&self, job: BatchJob) {
        self.jobs.lock().insert(job.name.clone(), job);
    }

    pub fn stored_job(&self, name: &str) -> Option<BatchJob> {
        self.jobs.lock().get(name).cloned()
    }

    /// Mark a job succeeded with a result file holding `result_lines`.
    pub fn complete_job(&self, name: &str, result_lines: &str) {
        let file_name = format!("files/results-{}", uuid::Uuid::new_v4().simple());
        self.files
            .lock()
            .insert(file_name.clone(), result_lines.to_string());
        if let Some(job) = self.jobs.lock().get_mut(name) {
            job.state = JobState::Succeeded;
            job.destination = Some(JobDestination::File(file_name));
            job.updated_at = Some(Utc::now());
        }
    }

    /// Mark a job finished in a non-success terminal state.
    pub fn finish_job(&self, name: &str, state: JobState, error: Option<&str>) {
        if let Some(job) = self.jobs.lock().get_mut(name) {
            job.state = state;
            job.error = error.map(str::to_string);
            job.updated_at = Some(Utc::now());
        }
    }

    /// Make the next upload fail with `error`.
    pub fn fail_next_upload(&self, error: TranslateBatchError) {
        self.upload_failures.lock().push_back(error);
    }

    /// Make the next batch creation fail with `error`.
    pub fn fail_next_create(&self, error: TranslateBatchError) {
        self.create_failures.lock().push_back(error);
    }

    /// Contents of an uploaded or result file.
    pub fn file_contents(&self, file_name: &str) -> Option<String> {
        self.files.lock().get(file_name).cloned()
    }

    /// Request payload a job was created from.
    pub fn job_input(&self, name: &str) -> Option<String> {
        let input_file = self.job_inputs.lock().get(name).cloned()?;
        self.file_contents(&input_file)
    }

    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Number of calls made for one operation (e.g. "get_batch").
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }
}

fn not_found(name: &str) -> TranslateBatchError {
    TranslateBatchError::Remote {
        status: 404,
        body: format!("{name} not found"),
    }
}

#[async_trait]
impl BatchService for MockBatchService {
    async fn upload_file(&self, display_name: &str, payload: Vec<u8>) -> Result<String> {
        self.record("upload_file", display_name);
        if let Some(error) = self.upload_failures.lock().pop_front() {
            return Err(error);
        }
        let file_name = format!("files/{}", uuid::Uuid::new_v4().simple());
        self.files.lock().insert(
            file_name.clone(),
            String::from_utf8_lossy(&payload).into_owned(),
        );
        Ok(file_name)
    }

    async fn create_batch(
        &self,
        model: &str,
        input_file: &str,
        display_name: &str,
    ) -> Result<BatchJob> {
        self.record("create_batch", input_file);
        if let Some(error) = self.create_failures.lock().pop_front() {
            return Err(error);
        }
        if !self.files.lock().contains_key(input_file) {
            return Err(not_found(input_file));
        }

        let now = Utc::now();
        let job = BatchJob {
            name: format!("batches/{}", uuid::Uuid::new_v4().simple()),
            display_name: display_name.to_string(),
            state: JobState::Pending,
            created_at: Some(now),
            updated_at: Some(now),
            destination: None,
            error: None,
        };
        tracing::debug!(job = %job.name, model = %model, "Mock batch created");
        self.job_inputs
            .lock()
            .insert(job.name.clone(), input_file.to_string());
        self.set_job(job.clone());
        Ok(job)
    }

    async fn get_batch(&self, name: &str) -> Result<BatchJob> {
        self.record("get_batch", name);
        let scripted = self
            .poll_responses
            .lock()
            .get_mut(name)
            .and_then(|queue| queue.pop_front());

        match scripted {
            Some(response) => response,
            None => self.stored_job(name).ok_or_else(|| not_found(name)),
        }
    }

    async fn list_batches(&self, page_size: usize) -> Result<Vec<BatchJob>> {
        self.record("list_batches", "");
        let mut jobs: Vec<BatchJob> = self.jobs.lock().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.name.cmp(&b.name)));
        jobs.truncate(page_size);
        Ok(jobs)
    }

    async fn delete_batch(&self, name: &str) -> Result<()> {
        self.record("delete_batch", name);
        self.poll_responses.lock().remove(name);
        match self.jobs.lock().remove(name) {
            Some(_) => Ok(()),
            None => Err(not_found(name)),
        }
    }

    async fn download_file(&self, file_name: &str) -> Result<String> {
        self.record("download_file", file_name);
        self.file_contents(file_name)
            .ok_or_else(|| not_found(file_name))
    }
}
