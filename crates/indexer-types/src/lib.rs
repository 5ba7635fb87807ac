//! # indexer-types
//!
//! Shared domain types for the aggregate indexer.
//!
//! This crate defines the data structures used throughout the workspace:
//! - Documents: schemaless JSON objects plus numeric helpers
//! - Measures: the per-aggregate numeric rollups (sum, count, averages, functions)
//! - Signals: timestamped events folded into rolling statistics
//! - Cache entries: pending aggregate state awaiting flush
//! - Type configuration and the type registry
//! - Settings: layered configuration

pub mod config;
pub mod document;
pub mod entry;
pub mod error;
pub mod measure;
pub mod op;
pub mod registry;
pub mod result;
pub mod signal;
pub mod type_config;

pub use config::{BackendKind, CacheSettings, LockSettings, Settings, StoreSettings};
pub use document::{merge_over, number_field, number_value, round_to, value_as_id, Document};
pub use entry::CachedAggregateEntry;
pub use error::TypesError;
pub use measure::{MeasureFn, MeasureSpec, Modifier, DEFAULT_ROUND};
pub use op::{FailCode, OpType, Operation, Status};
pub use registry::{TypeRegistry, TypeRegistryBuilder, SEARCH_QUERY_TYPE};
pub use result::OperationResult;
pub use signal::{
    OverallStatsEntry, Signal, StatsEntry, TimeUnit, DAILY_STATS_FIELD, MONTHLY_STATS_FIELD,
    OVERALL_STATS_FIELD, STATS_FIELDS, WEEKLY_STATS_FIELD,
};
pub use type_config::{
    AggregateBuilder, AggregateConfig, AggregatorsConfig, DocFilter, IdFn, LangFn,
    LazyAggregateBuilder, TransformFn, TypeConfig, TypeMode, WeightFn,
};
