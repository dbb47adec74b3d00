//! Shared error type for fetching and parsing documents.

use thiserror::Error;

/// Fetch or parse failure. Whether it is fatal depends on where it happens: the crawler treats it
/// as run-global while resolving the title or listing chapters, and item-local elsewhere.
#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("Invalid URL: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error(
        "Could not detect site from URL host '{host}'. Use --site manganelo or --site mangapanda."
    )]
    UnrecognizedHost { host: String },

    #[error("Network error: could not reach {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Cancelled before fetching {url}")]
    Cancelled { url: String },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to read response body from {url}: {source}")]
    BodyRead {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Could not find {what} in {url} (selector or structure may have changed)")]
    MissingElement { what: String, url: String },

    #[error("Could not parse {url}: {message}")]
    Parse { url: String, message: String },
}
