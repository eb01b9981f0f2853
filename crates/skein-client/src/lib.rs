//! Skein Client
//!
//! Typed HTTP+JSON client for the coordinating service. One method per
//! endpoint; index queries take optional free-text matches plus cardinality
//! bounds the caller can assert.
//!
//! Failure policy: transport failures surface immediately as
//! [`ClientError::Connectivity`], non-success statuses as
//! [`ClientError::Response`]. This layer never retries.

mod client;
mod error;

pub use client::ApiClient;
pub use error::ClientError;
