//! Core types and engine for the Verity truth layer.
//!
//! Raw producer output becomes immutable, content-addressed observations;
//! observations reduce deterministically into entity snapshots under
//! versioned merge policies. This crate has no HTTP or database
//! dependencies. Storage backends implement [`store::TruthStore`].

// We intentionally use native `async fn` in traits and impls.
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod canonical;
pub mod error;
pub mod gate;
pub mod hash;
pub mod identity;
pub mod memory;
pub mod observation;
pub mod reducer;
pub mod schema;
pub mod service;
pub mod snapshot;
pub mod store;

pub use error::{Error, Result};
pub use service::{Receipt, ServiceError, Submission, TruthLayer};
