pub mod batch;
pub mod config;
pub mod dedup;
pub mod delivery;
pub mod error;
pub mod failures;
pub mod feed;
pub mod fetch;
pub mod identity;
pub mod item;
pub mod ledger;
pub mod notify;
pub mod peers;
pub mod persist;
pub mod pipeline;
pub mod registry;
pub mod schedule;
pub mod scheduler;
pub mod storage;
pub mod worker;

pub use config::{ProcessorMethod, RelayConfig};
pub use dedup::DedupEngine;
pub use delivery::{
    DeliveryLedger, DeliveryRecord, DeliveryScope, DeliveryState, DeliveryStatus,
    DeliveryTracker, StateDetail, StatusUpdate,
};
pub use error::{ConfigError, DeliveryError, FetchError, RegistryError, ScheduleError, StorageError};
pub use failures::{FailurePolicy, FailureTable, FailureTransition};
pub use feed::{add_source, list_sources, remove_source, shared_source_list};
pub use feed::{AdvancedOptions, SharedSourceList, Source, SourceHealth, SourceProvider};
pub use fetch::{Fetcher, HttpFetcher, TargetOutcome};
pub use identity::IdType;
pub use item::Item;
pub use ledger::JsonLedger;
pub use notify::{AcceptAll, ArticleFilter, DeliveryOutcome, FailureNotice, LogSink, NotificationSink};
pub use peers::{BroadcastPeers, CycleCompleted, PeerCoordinator, Standalone};
pub use pipeline::{Dispatcher, FeedDispatch};
pub use registry::{spawn_registry, RegistryHandle};
pub use schedule::{Schedule, DEFAULT_SCHEDULE};
pub use scheduler::{
    spawn_schedule, CyclePhase, CycleReport, Event, FeedSchedule, ScheduleDeps, ScheduleHandle,
    SchedulerSettings,
};
pub use storage::{SeenFieldStore, SeenStore};
