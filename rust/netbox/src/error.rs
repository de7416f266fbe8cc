//! Error types for the NetBox inventory client.

use thiserror::Error;

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while querying the inventory API.
#[derive(Error, Debug)]
pub enum Error {
    /// The API answered with a non-200 status.
    #[error("unexpected status {status} from {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    /// The request itself failed (connect, timeout, TLS).
    #[error("inventory request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body was not the expected paginated JSON shape.
    #[error("decoding inventory response: {0}")]
    Decode(#[from] serde_json::Error),
}
