pub mod cache;
pub mod config;
pub mod deadline;
pub mod digest;
pub mod error;
pub mod feed;
pub mod gate;
pub mod preferences;
pub mod read_state;
pub mod refresh;
pub mod scheduler;
pub mod sources;
pub mod storage;
pub mod summarizer;

pub use cache::{ContentCache, DisplayContent, RichContent, TextMetadata};
pub use config::{DigestConfig, HttpConfig, PipelineConfig, RefreshConfig, SummaryConfig};
pub use deadline::{with_deadline, with_timeout};
pub use digest::{Clock, DigestEngine, DigestEntry, DigestOutcome, DigestView, SystemClock};
pub use error::{ConfigError, DeadlineExceeded, FetchError, GateError, RefreshError, SummaryError};
pub use feed::{add_feed, list_feeds, remove_feed, shared_feed_list};
pub use feed::{Article, Feed, SharedFeedList};
pub use gate::{ConcurrencyGate, GatePermit};
pub use preferences::SummaryPreferences;
pub use read_state::{ReadState, ReadStateStore};
pub use refresh::{Event, ProgressSnapshot, RefreshOrchestrator, RefreshReport};
pub use scheduler::{run_cycle, spawn_scheduler, CycleReport, ScheduleConfig, SchedulerHandle};
pub use sources::{FeedFetcher, Html2TextExtractor, HttpFeedFetcher, HttpPageFetcher, PageFetcher, TextExtractor};
pub use storage::KeyValueStore;
pub use summarizer::{LanguageModel, LeadSentenceModel, Summarizer, SummaryEntry, SummaryLength};
