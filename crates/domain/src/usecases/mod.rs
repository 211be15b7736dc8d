//! Application use cases / business logic

pub mod announcement;
pub mod dispatcher;
pub mod ledger;
pub mod links;
pub mod media;
pub mod render;
pub mod retry;
pub mod strategies;
pub mod supervisor;
pub mod templates;

pub use announcement::AnnouncementCache;
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use ledger::DedupLedger;
pub use media::{MediaConfig, MediaRecognizer};
pub use render::{NoticeRenderer, RenderConfig};
pub use retry::{PublishRetrier, RetryPolicy};
pub use strategies::{Extraction, Extractor, ExtractorConfig, MediaStage, StrategyOutcome};
pub use supervisor::{ConnectionState, ConnectionSupervisor, SupervisorConfig, SupervisorError};
