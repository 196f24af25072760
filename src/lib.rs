//! In-process engine that proactively prunes and compresses LLM context
//! window cache entries under relevance scoring and tiered aging, so a
//! surrounding agent runtime rarely has to fall back to its own blunt
//! compaction.

pub mod advisor;
pub mod clock;
pub mod compression;
pub mod config;
pub mod entry;
pub mod error;
pub mod estimator;
pub mod facade;
pub mod metrics;
pub mod pruning;
pub mod scoring;
pub mod similarity;
pub mod store;
pub mod tiering;
pub mod vector_store;

pub use advisor::{AdvisorPlugin, NoAdvisor};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CompressionStrategy, EngineConfig, Strategy, TierConfig, TierSettings};
pub use entry::{CompressedState, CompressionMethod, Entry, EntryId, EntryType, Metadata, Tier};
pub use error::{ConfigError, EngineError, SnapshotError};
pub use estimator::{HeuristicEstimator, TokenEstimator};
pub use facade::{Engine, EngineBuilder, HookResult};
pub use metrics::Metrics;
pub use pruning::{PressureLevel, PruneResult, PruningController, PruningDecision, Rationale};
pub use scoring::ScoringContext;
pub use similarity::{JaccardSimilarity, NoopSimilarity, SimilarityFn};
pub use store::EntryStore;
pub use vector_store::{NullVectorStore, VectorStore, VectorStoreError};

#[cfg(feature = "qdrant")]
pub use vector_store::QdrantVectorStore;
