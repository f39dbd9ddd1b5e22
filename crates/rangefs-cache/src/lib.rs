//! The caching fetch engine: on-disk range cache, missing-range planner,
//! bounded fetch worker pool, and directory snapshot cache with
//! freshness-driven invalidation. This crate has no knowledge of FUSE or
//! any concrete object store; it is driven through
//! [`rangefs_models::Connector`] and exposes [`Engine`] as the single
//! entry point callers construct at mount time.

mod dir_cache;
mod engine;
mod file_cache;
mod metadata_store;
mod planner;
mod range_algebra;
mod range_set;
mod tracker;
mod worker_pool;

pub use engine::{Engine, EngineConfig};
pub use metadata_store::{FileRecord, MetadataStore};
pub use range_set::RangeSet;
pub use tracker::{Handle, InFlightOp, Stats, StatsSnapshot, Tracker};
