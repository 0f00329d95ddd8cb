//! cellstore engine - the indexing and consistency core
//!
//! The Index Manager keeps cell-index rows in step with each feature's
//! geometry, the Geometry Tier Store decides where payloads live, and the
//! Query Engine answers bounding-box and identifier queries by fanning out
//! range reads over the index store. `FeatureStore` is the public facade.

pub mod batch;
pub mod collaborators;
pub mod diff;
pub mod fanout;
pub mod feature_store;
pub mod manager;
pub mod merge;
pub mod query;
pub mod retry;
pub mod tier;

pub use batch::BatchWriter;
pub use collaborators::Collaborators;
pub use feature_store::{FeatureStore, PutOutcome};
pub use manager::{IndexManager, WriteOutcome};
pub use query::{FeaturePage, QueryEngine, QueryResult, QueryTimings, ResolveFailure};
pub use retry::RetryPolicy;
pub use tier::GeometryTierStore;
