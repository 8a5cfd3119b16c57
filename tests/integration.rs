use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use translate_batch::{
    BatchJob, BatchService, InlineResponse, JobDestination, JobRegistry, JobState, MockBatchService,
    MonitorConfig, SegmentKind, Sleeper, TranslateBatchError, TranslationConfig,
    TranslationManager, chunk_text,
};

/// Returns immediately; jobs must already be scripted to finish.
struct NoSleep;

#[async_trait]
impl Sleeper for NoSleep {
    async fn sleep(&self, _duration: Duration) {
        tokio::task::yield_now().await;
    }
}

/// Plays the remote service: every pending job is answered while the monitor sleeps.
struct AnsweringSleeper(MockBatchService);

#[async_trait]
impl Sleeper for AnsweringSleeper {
    async fn sleep(&self, _duration: Duration) {
        for job in self.0.list_batches(100).await.unwrap() {
            if job.state == JobState::Pending {
                answer_job(&self.0, &job.name);
            }
        }
    }
}

struct Harness<C> {
    mock: MockBatchService,
    manager: TranslationManager<MockBatchService, C>,
    dir: PathBuf,
}

impl<C> Drop for Harness<C> {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn harness_with<C: Sleeper>(mock: MockBatchService, sleeper: C) -> Harness<C> {
    let dir = std::env::temp_dir().join(format!("translate-batch-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();

    let registry = Arc::new(JobRegistry::open(dir.join("batch_jobs.json")));
    let config = TranslationConfig {
        chunk_size: 100,
        ..Default::default()
    };
    let manager = TranslationManager::with_sleeper(
        Arc::new(mock.clone()),
        registry,
        config,
        MonitorConfig {
            poll_interval_ms: 10,
        },
        sleeper,
    )
    .unwrap();

    Harness { mock, manager, dir }
}

fn harness() -> Harness<NoSleep> {
    harness_with(MockBatchService::new(), NoSleep)
}

fn document() -> String {
    (1..=6)
        .map(|i| format!("Line {i}: the quick brown fox jumps over the lazy dog.\n"))
        .collect()
}

fn write_source(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

fn translated_line(key: &str, text: &str) -> String {
    json!({
        "key": key,
        "response": {
            "candidates": [{
                "content": {"parts": [{"text": text}], "role": "model"},
                "finishReason": "STOP"
            }]
        }
    })
    .to_string()
}

/// Answer every request in a job's payload by upper-casing the chunk text. Lines are written
/// in reverse order.
fn answer_job(mock: &MockBatchService, name: &str) {
    let payload = mock.job_input(name).unwrap();
    let mut lines: Vec<String> = payload
        .lines()
        .map(|line| {
            let record: Value = serde_json::from_str(line).unwrap();
            let key = record["key"].as_str().unwrap();
            let contents = record["request"]["contents"].as_array().unwrap();
            let text = contents.last().unwrap()["parts"][0]["text"]
                .as_str()
                .unwrap();
            translated_line(key, &text.to_uppercase())
        })
        .collect();
    lines.reverse();
    mock.complete_job(name, &lines.join("\n"));
}

fn expected_translation(text: &str) -> String {
    chunk_text(text, 100)
        .unwrap()
        .map(|chunk| chunk.text.to_uppercase())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[test_log::test(tokio::test)]
async fn test_translate_file_end_to_end() {
    let mock = MockBatchService::new();
    let h = harness_with(mock.clone(), AnsweringSleeper(mock));

    let text = document();
    let source = write_source(&h.dir, "novel.txt", &text);
    let save_path = h.dir.join("out").join("novel_translated.txt");

    let reassembly = h
        .manager
        .translate_file(&source, &save_path)
        .await
        .unwrap()
        .expect("non-empty document produces a job");

    let chunk_count = chunk_text(&text, 100).unwrap().count();
    assert_eq!(reassembly.len(), chunk_count);
    assert!(reassembly.is_complete());

    let saved = std::fs::read_to_string(&save_path).unwrap();
    assert_eq!(saved, expected_translation(&text));

    // The job is tracked with its source file and chunk count
    let entries = h.manager.registry().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].source_file, source);
    assert_eq!(entries[0].chunk_count, Some(chunk_count));
}

#[tokio::test]
async fn test_empty_document_is_a_noop() {
    let h = harness();
    let source = write_source(&h.dir, "empty.txt", "");
    let save_path = h.dir.join("empty_translated.txt");

    let result = h.manager.translate_file(&source, &save_path).await.unwrap();

    assert!(result.is_none());
    assert!(h.mock.get_calls().is_empty());
    assert!(!save_path.exists());
    assert!(h.manager.registry().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_submit_poll_download_steps() {
    let h = harness();
    let text = document();
    let source = write_source(&h.dir, "book.txt", &text);

    let job = h.manager.submit_file(&source).await.unwrap().unwrap();
    assert_eq!(job.display_name, "translation-book.txt");
    assert_eq!(job.state, JobState::Pending);

    // Not finished yet: downloading is refused
    let save_path = h.dir.join("book_translated.txt");
    match h.manager.download_results(&job.name, &save_path).await {
        Err(TranslateBatchError::JobNotReady { name, state }) => {
            assert_eq!(name, job.name);
            assert_eq!(state, "PENDING");
        }
        other => panic!("expected JobNotReady, got {other:?}"),
    }
    assert!(!save_path.exists());

    h.mock.add_poll_state(&job.name, JobState::Running);
    answer_job(&h.mock, &job.name);

    let finished = h.manager.wait_for_job(&job.name).await.unwrap();
    assert_eq!(finished.state, JobState::Succeeded);

    let reassembly = h
        .manager
        .download_results(&job.name, &save_path)
        .await
        .unwrap();
    assert!(reassembly.is_complete());
    assert_eq!(
        std::fs::read_to_string(&save_path).unwrap(),
        expected_translation(&text)
    );
}

#[tokio::test]
async fn test_partial_results_become_placeholders() {
    let h = harness();
    let text = "a".repeat(250);
    let source = write_source(&h.dir, "partial.txt", &text);
    let job = h.manager.submit_file(&source).await.unwrap().unwrap();

    // chunk_3 never comes back; a garbage line arrives first
    let safety_line = json!({
        "key": "chunk_2",
        "response": {"candidates": [{"finishReason": "SAFETY"}]}
    })
    .to_string();
    let results = [
        "{this is not json".to_string(),
        translated_line("chunk_1", "first"),
        safety_line,
    ]
    .join("\n");
    h.mock.complete_job(&job.name, &results);

    let reassembly = h.manager.fetch_results(&job.name).await.unwrap();
    let kinds: Vec<SegmentKind> = reassembly.segments.iter().map(|s| s.kind).collect();
    assert_eq!(
        kinds,
        vec![
            SegmentKind::Translated,
            SegmentKind::SafetyBlocked,
            SegmentKind::Missing,
            SegmentKind::Malformed,
        ]
    );
    assert_eq!(reassembly.segments[0].text, "first");
    assert_eq!(reassembly.segments[2].text, "[chunk 3 missing]");
    assert!(reassembly.segments[3].text.contains("{this is not json"));
    assert_eq!(reassembly.placeholder_count(), 3);
}

#[tokio::test]
async fn test_failed_job_surfaces_error_everywhere() {
    let h = harness();
    let source = write_source(&h.dir, "doomed.txt", &document());
    let job = h.manager.submit_file(&source).await.unwrap().unwrap();

    h.mock
        .finish_job(&job.name, JobState::Failed, Some("quota exceeded"));

    match h.manager.wait_for_job(&job.name).await {
        Err(TranslateBatchError::JobFailed { name, message }) => {
            assert_eq!(name, job.name);
            assert_eq!(message, "quota exceeded");
        }
        other => panic!("expected JobFailed, got {other:?}"),
    }

    let result = h
        .manager
        .download_results(&job.name, &h.dir.join("never.txt"))
        .await;
    assert!(matches!(result, Err(TranslateBatchError::JobFailed { .. })));
}

#[tokio::test]
async fn test_cancelled_job_cannot_be_downloaded() {
    let h = harness();
    let source = write_source(&h.dir, "stopped.txt", &document());
    let job = h.manager.submit_file(&source).await.unwrap().unwrap();

    h.mock.finish_job(&job.name, JobState::Cancelled, None);

    assert!(matches!(
        h.manager.fetch_results(&job.name).await,
        Err(TranslateBatchError::JobCancelled { .. })
    ));
}

#[test_log::test(tokio::test)]
async fn test_transient_poll_errors_are_retried() {
    let h = harness();
    let source = write_source(&h.dir, "flaky.txt", &document());
    let job = h.manager.submit_file(&source).await.unwrap().unwrap();

    h.mock.add_poll_error(&job.name);
    h.mock.add_poll_error(&job.name);
    answer_job(&h.mock, &job.name);

    let finished = h.manager.wait_for_job(&job.name).await.unwrap();

    assert_eq!(finished.state, JobState::Succeeded);
    assert_eq!(h.mock.call_count("get_batch"), 3);
}

#[tokio::test]
async fn test_submission_failure_leaves_no_registry_entry() {
    let h = harness();
    h.mock.fail_next_create(TranslateBatchError::Remote {
        status: 400,
        body: "model not found".to_string(),
    });
    let source = write_source(&h.dir, "rejected.txt", &document());

    let result = h.manager.submit_file(&source).await;

    assert!(matches!(
        result,
        Err(TranslateBatchError::SubmissionFailed(_))
    ));
    assert!(h.manager.registry().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_jobs_finish_independently() {
    let h = harness();
    let first = write_source(&h.dir, "first.txt", &document());
    let second = write_source(&h.dir, "second.txt", "short second document");

    let job_a = h.manager.submit_file(&first).await.unwrap().unwrap();
    let job_b = h.manager.submit_file(&second).await.unwrap().unwrap();

    h.mock
        .finish_job(&job_a.name, JobState::Failed, Some("internal error"));
    h.mock.add_poll_state(&job_b.name, JobState::Running);
    answer_job(&h.mock, &job_b.name);

    let outcomes = h
        .manager
        .wait_for_jobs(&[job_a.name.clone(), job_b.name.clone()])
        .await;

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].0, job_a.name);
    assert!(matches!(
        outcomes[0].1,
        Err(TranslateBatchError::JobFailed { .. })
    ));
    assert_eq!(outcomes[1].0, job_b.name);
    assert_eq!(
        outcomes[1].1.as_ref().unwrap().state,
        JobState::Succeeded
    );

    // Results are attributed by job, not by submission order
    let reassembly = h.manager.fetch_results(&job_b.name).await.unwrap();
    assert_eq!(reassembly.text(), "SHORT SECOND DOCUMENT");
}

#[tokio::test]
async fn test_list_jobs_joins_registry() {
    let h = harness();
    let source = write_source(&h.dir, "listed.txt", &document());
    let job = h.manager.submit_file(&source).await.unwrap().unwrap();

    // A job the registry knows nothing about
    h.mock.set_job(BatchJob {
        name: "batches/foreign".to_string(),
        display_name: "made elsewhere".to_string(),
        state: JobState::Running,
        created_at: None,
        updated_at: None,
        destination: None,
        error: None,
    });

    let jobs = h.manager.list_jobs().await.unwrap();
    assert_eq!(jobs.len(), 2);

    let ours = jobs.iter().find(|j| j.job.name == job.name).unwrap();
    assert_eq!(ours.source_file.as_deref(), Some(source.as_path()));
    let foreign = jobs
        .iter()
        .find(|j| j.job.name == "batches/foreign")
        .unwrap();
    assert_eq!(foreign.source_file, None);
}

#[tokio::test]
async fn test_delete_job_forgets_registry_entry() {
    let h = harness();
    let source = write_source(&h.dir, "deleted.txt", &document());
    let job = h.manager.submit_file(&source).await.unwrap().unwrap();
    assert_eq!(h.manager.registry().len(), 1);

    h.manager.delete_job(&job.name).await.unwrap();

    assert!(h.manager.registry().is_empty());
    assert!(h.mock.stored_job(&job.name).is_none());

    // The registry on disk agrees
    let reopened = JobRegistry::open(h.manager.registry().path());
    assert!(reopened.is_empty());
}

#[tokio::test]
async fn test_inline_results_are_reassembled() {
    let h = harness();
    h.mock.set_job(BatchJob {
        name: "batches/inline".to_string(),
        display_name: "translation-inline.txt".to_string(),
        state: JobState::Succeeded,
        created_at: None,
        updated_at: None,
        destination: Some(JobDestination::Inline(vec![
            InlineResponse {
                key: Some("chunk_2".to_string()),
                response: Some(json!({
                    "candidates": [{"content": {"parts": [{"text": "second"}]}}]
                })),
                error: None,
            },
            InlineResponse {
                key: Some("chunk_1".to_string()),
                response: Some(json!({
                    "candidates": [{"content": {"parts": [{"text": "first"}]}}]
                })),
                error: None,
            },
        ])),
        error: None,
    });

    let reassembly = h.manager.fetch_results("batches/inline").await.unwrap();
    assert_eq!(reassembly.text(), "first\n\nsecond");
}

#[tokio::test]
async fn test_succeeded_job_without_destination() {
    let h = harness();
    h.mock.set_job(BatchJob {
        name: "batches/empty".to_string(),
        display_name: "translation-empty.txt".to_string(),
        state: JobState::Succeeded,
        created_at: None,
        updated_at: None,
        destination: None,
        error: None,
    });

    assert!(matches!(
        h.manager.fetch_results("batches/empty").await,
        Err(TranslateBatchError::MissingDestination(_))
    ));
}

#[tokio::test]
async fn test_cancelled_token_bounds_wait() {
    let h = harness();
    let source = write_source(&h.dir, "waiting.txt", &document());
    let job = h.manager.submit_file(&source).await.unwrap().unwrap();

    let token = CancellationToken::new();
    token.cancel();

    assert!(matches!(
        h.manager.wait_for_job_with_cancel(&job.name, &token).await,
        Err(TranslateBatchError::Shutdown)
    ));
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let registry = Arc::new(JobRegistry::open(
        std::env::temp_dir().join(format!("unused-{}.json", uuid::Uuid::new_v4())),
    ));
    let config = TranslationConfig {
        temperature: 3.5,
        ..Default::default()
    };

    let result = TranslationManager::new(
        Arc::new(MockBatchService::new()),
        registry,
        config,
        MonitorConfig::default(),
    );

    assert!(matches!(result, Err(TranslateBatchError::ConfigInvalid(_))));
}
