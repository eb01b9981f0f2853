use thiserror::Error;

/// Errors surfaced by the API client.
#[derive(Debug, Error)]
pub enum ClientError {
  /// The coordinating service could not be reached at all.
  #[error("no response from server at {url}: {message}")]
  Connectivity { url: String, message: String },

  /// The service answered with a non-success status.
  #[error("server returned status {status}: {body}")]
  Response { status: u16, body: String },

  /// An index query matched fewer objects than the caller required.
  #[error("found {found} {kind} matching '{query}', expected at least {min}")]
  TooFewMatches {
    kind: &'static str,
    query: String,
    found: usize,
    min: usize,
  },

  /// An index query matched more objects than the caller allowed.
  #[error("found {found} {kind} matching '{query}', expected at most {max}")]
  TooManyMatches {
    kind: &'static str,
    query: String,
    found: usize,
    max: usize,
  },

  /// The response body did not have the expected shape.
  #[error("unexpected response body: {0}")]
  Decode(#[from] serde_json::Error),
}

impl ClientError {
  pub fn is_cardinality(&self) -> bool {
    matches!(self, Self::TooFewMatches { .. } | Self::TooManyMatches { .. })
  }
}
