use thiserror::Error;

/// Result type returned by all fallible operations in this crate.
///
/// The error variant is always the crate's [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors returned by the Mixpanel clients.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// Network failure, timeout, or a response body that could not be read
    /// or decoded.
    #[error(transparent)]
    Network(#[from] reqwest::Error),

    /// Event data could not be serialized to JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The export API answered with a non-empty `error` field.
    #[error("server error: {0}")]
    Server(String),

    /// The ingestion API did not acknowledge the submitted data. Carries
    /// the response body.
    #[error("request failed - {0}")]
    Rejected(String),

    /// More events were submitted in one batch than the API accepts.
    #[error("max batch size is 50")]
    BatchTooLarge,
}
