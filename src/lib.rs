//! A Rust client for the Visual Layer dataset API.
//!
//! Searches run as server-side export jobs. This crate implements the
//! submit / poll / download flow and flattens the exported media items into a
//! [`SearchResult`], one row per media item.
//!
//! ## Quick start
//! - Configure credentials via environment variables (`VISUAL_LAYER_API_KEY`,
//!   `VISUAL_LAYER_API_SECRET`, optionally `VISUAL_LAYER_ENVIRONMENT`) or a
//!   `.visuallayerrc` file (current directory or home directory).
//! - Open a [`Dataset`] with [`Client::dataset`] and call one of its `search_by_*` methods.
//!
//! ```no_run
//! use anyhow::Result;
//! use visual_layer::{Client, EntityType, SearchOperator};
//!
//! fn main() -> Result<()> {
//!     let client = Client::from_env()?;
//!     let dataset = client.dataset("bc41491e-78ae-11ef-ba4b-8a774758b536")?;
//!     let rows = dataset.search_by_labels(["cat", "dog"], EntityType::Images, SearchOperator::IsOneOf)?;
//!     if rows.is_empty() {
//!         println!("no matches (or the search did not complete)");
//!     }
//!     for r in &rows {
//!         println!("{} {}", r.media_id, r.image_labels);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Failed or timed-out searches return an empty result and log a warning
//! rather than erroring; check [`SearchResult::is_empty`]. To see those logs
//! without installing a global subscriber, pass a dispatcher built from
//! [`LogConfig`] to [`Client::with_log_dispatch`].

#![forbid(unsafe_code)]

mod auth;
mod client;
mod config;
mod dataset;
mod error;
mod job;
mod logging;
mod query;
mod table;
mod util;

pub use client::{Client, ClientConfig, DatasetSummary};
pub use config::Environment;
pub use dataset::{Dataset, SearchFeatures};
pub use job::{AsyncSearchJob, JobStatus, SearchJob};
pub use logging::{LogConfig, LogDestination, default_log_dir, list_log_files};
pub use query::{
    EntityType, Filter, IssueMode, IssueType, Query, SearchOperator, SemanticRelevance,
};
pub use table::{MediaRecord, SearchResult};
