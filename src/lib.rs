//! Batch translation of large documents on a hosted generative model.
//!
//! A document is split into bounded chunks, each chunk becomes an independently keyed
//! request, and all requests are submitted as one asynchronous batch job. The job is polled
//! until it finishes, then its per-chunk responses are put back in the original order, with
//! visible placeholders wherever a chunk was blocked, failed, missing or unreadable.
//!
//! A local job registry remembers which source file produced each job, since the remote
//! service does not.
//!
//! ```ignore
//! let service_config = ServiceConfig {
//!     api_key: std::env::var("GEMINI_API_KEY")?,
//!     ..Default::default()
//! };
//! let page_size = service_config.list_page_size;
//! let service = Arc::new(GeminiBatchService::new(service_config));
//! let registry = Arc::new(JobRegistry::open("batch_jobs.json"));
//! let config = TranslationConfig::load_or_create(Path::new("config.json"));
//! let manager = TranslationManager::new(service, registry, config, MonitorConfig::default())?
//!     .with_list_page_size(page_size);
//!
//! manager
//!     .translate_file(Path::new("novel.txt"), Path::new("novel_translated.txt"))
//!     .await?;
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod manager;
pub mod monitor;
pub mod reassemble;
pub mod registry;
pub mod remote;
pub mod submit;

// Re-export commonly used types
pub use config::{MonitorConfig, ServiceConfig, TranslationConfig};
pub use domain::*;
pub use error::{ResultParseError, Result, TranslateBatchError};
pub use manager::{TranslationJob, TranslationManager, display_name_for};
pub use monitor::{JobMonitor, Sleeper, TokioSleeper};
pub use reassemble::{Reassembler, Reassembly, Segment, SegmentKind, reassemble, reassemble_inline};
pub use registry::{JobRegistry, JobRegistryEntry};
pub use remote::{BatchService, GeminiBatchService, MockBatchService, MockCall};
pub use submit::BatchSubmitter;
