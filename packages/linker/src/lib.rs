#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Address-to-building linking.
//!
//! Builds an R-tree over a campaign's footprints and gives every address a
//! tiered [`canvass_linker_models::Match`], an
//! [`canvass_linker_models::Orphan`] review row, or both. Addresses are
//! decided in parallel; results come back sorted by address id so the
//! caller can commit them in one batch.

pub mod index;
pub mod link;
pub mod normalize;
pub mod summary;
pub mod synonyms;

pub use index::BuildingIndex;
pub use link::{AddressDecision, LinkOutcome, Linker};
pub use summary::{review_queue, summarize};

/// Errors that can occur while linking.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The linker configuration is unusable.
    #[error("Invalid linker configuration: {0}")]
    InvalidConfig(String),
}
