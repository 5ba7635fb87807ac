//! # indexer-core
//!
//! Write side of the aggregate indexer.
//!
//! [`Indexer`] adds, updates, removes and upserts documents in the document
//! store. When a source type has aggregators, each change is turned into
//! membership deltas (ADD, UPDATE, REMOVE) against the aggregate documents it
//! belongs to, and the aggregates' measures are maintained incrementally in
//! the write-behind [`AggregatorCache`](indexer_cache::AggregatorCache).
//! Signals fold into rolling daily, weekly, monthly and overall statistics.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let registry = TypeRegistry::builder("shop")
//!     .register(TypeConfig::new("product"))
//!     .register(TypeConfig::new("tag"))
//!     .aggregators(
//!         "product",
//!         AggregatorsConfig::new(vec![MeasureSpec::count("count")]).with_aggregate(
//!             AggregateConfig::new("tags", "tags", "tag", |_, tag| {
//!                 json!({ "id": tag }).as_object().cloned().unwrap_or_default()
//!             }),
//!         ),
//!     )
//!     .build()?;
//!
//! let indexer = Indexer::builder(registry).settings(Settings::load(None)?).build().await?;
//! indexer.add(AddRequest::new("product", doc)).await?;
//! indexer.shutdown().await?;
//! ```

pub mod error;
pub mod indexer;
pub mod measures;
pub mod membership;
pub mod request;
pub mod stats;

mod engine;

pub use error::{IndexerError, ValidationCode};
pub use indexer::{Indexer, IndexerBuilder};
pub use measures::{apply_measures, MemberChange};
pub use membership::{derive_aggregates, diff_memberships, AggregateRef, MembershipDiff};
pub use request::{AddRequest, RemoveRequest, SignalRequest, UpdateRequest, UpsertRequest};
pub use stats::aggregate_signals;
