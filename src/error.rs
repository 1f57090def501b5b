//! Typed errors for the harvest pipeline.
//!
//! Each error maps to one stage of a harvest job. Only [`GatherError`] is
//! fatal to a job; everything else is recorded against a single attempt and
//! the job moves on to the next identity.

use thiserror::Error;

/// Source-level enumeration failure. Aborts the job and is recorded once.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct GatherError(pub String);

impl GatherError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Per-identity content retrieval failure.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The server answered with a non-success status.
    #[error("Server responded with an error when accessing URL: {url} Status: {status} Reason: {reason:?}")]
    Status {
        url: String,
        status: u16,
        reason: String,
    },

    /// The URL was malformed or the host could not be reached.
    #[error("URL syntax error or could not make connection to the host server. URL: \"{url}\" Error: {reason:?}")]
    Connection { url: String, reason: String },

    /// The request did not complete within the configured timeout.
    #[error("HTTP connection timeout error. URL: {url}")]
    Timeout { url: String },

    /// A catalog service request failed.
    #[error("Error getting the CSW record with GUID {guid}: {reason}")]
    Csw { guid: String, reason: String },

    /// A catalog service returned nothing for the identifier.
    #[error("Empty record for GUID {guid}")]
    EmptyRecord { guid: String },
}

impl FetchError {
    /// Classify a `reqwest` failure for `url`.
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = err.status() {
            FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            }
        } else {
            FetchError::Connection {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

/// The document could not be read as a GEMINI record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Content is blank/empty")]
    Blank,

    #[error("Content is not a valid XML document: {0}")]
    Xml(String),

    #[error("Content is not a valid Gemini document without the gmd:MD_Metadata element")]
    MissingMetadataElement,

    #[error("Required element is missing from the document: {0}")]
    MissingField(&'static str),
}

/// Failure reported by the catalog when persisting an entry.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The payload did not pass the catalog's own validation.
    #[error("Validation Error: {0}")]
    Validation(String),

    /// The backend failed.
    #[error("catalog storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// More than one attempt is flagged current for a single identity.
#[derive(Debug, Error)]
#[error("System Error: more than one current record for GUID {guid} ({count} found)")]
pub struct ConsistencyError {
    pub guid: String,
    pub count: usize,
}
