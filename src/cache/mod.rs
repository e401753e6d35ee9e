// Distributed cache and post-write invalidation

pub mod catalog;
pub mod distributed;
pub mod edge;
pub mod invalidation;
pub mod pattern;
pub mod pipeline;
pub mod placeholders;

pub use catalog::{EdgeRewrite, EdgeRoute, InvalidationCatalog};
pub use distributed::DistributedCache;
pub use edge::{EdgeCache, HttpEdgePurger, NoopEdgeCache, StoreEdgeCache};
pub use invalidation::{CacheInvalidating, InvalidationBatch, InvalidationEngine, InvalidationReport};
pub use pattern::KeyPattern;
pub use pipeline::{InvalidationStage, OperationOutcome, StageResult};
