// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod activity;
pub mod cache;
pub mod config;
pub mod engine;
pub mod llm;
pub mod metrics;
pub mod processor;
pub mod registry;
pub mod sources;
pub mod store;
pub mod uid;

// ---- Re-exports for stable public API ----
pub use crate::activity::{Activity, ActivityRecord};
pub use crate::config::{AppConfig, ConfigError, EngineConfig, LlmConfig, ProviderConfig};
pub use crate::engine::{EngineError, SourceState, StreamEngine};
pub use crate::processor::{consume_faults, ActivityProcessor};
pub use crate::registry::{Fetcher, RegistryError, SourceRegistry};
pub use crate::sources::{Emitter, Source, SourceFault};
pub use crate::store::{ActivityStore, MemoryActivityStore, StoredActivity};
pub use crate::uid::TypedUid;
