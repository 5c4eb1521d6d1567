use reqwest::StatusCode;
use thiserror::Error;

/// Failure while retrieving a document or API response.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },

    #[error("malformed body from {url}: {reason}")]
    MalformedBody { url: String, reason: String },
}

impl FetchError {
    /// Network failures, rate limiting and server errors are worth retrying.
    /// Client errors and unparseable bodies are not.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network { .. } => true,
            FetchError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            FetchError::MalformedBody { .. } => false,
        }
    }
}

/// A document could not be turned into records.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    /// A structural landmark the extractor relies on is gone; the source
    /// markup most likely changed.
    #[error("anchor not found: {0}")]
    AnchorMissing(&'static str),

    #[error("malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("data conflict: {0}")]
    DataConflict(String),

    /// A snapshot that would wipe state came back empty; refused so an
    /// outage never reads as "everyone dropped out".
    #[error("refusing empty {0} snapshot")]
    EmptySnapshot(&'static str),

    #[error("tournament '{0}' has no recognisable surface")]
    MissingSurface(String),

    #[error("scoring service returned unusable probabilities ({0}, {1})")]
    InvalidProbabilities(f64, f64),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::Fetch(e) if e.is_transient())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_classified() {
        let server = FetchError::Status {
            url: "u".into(),
            status: StatusCode::BAD_GATEWAY,
        };
        let throttled = FetchError::Status {
            url: "u".into(),
            status: StatusCode::TOO_MANY_REQUESTS,
        };
        let missing = FetchError::Status {
            url: "u".into(),
            status: StatusCode::NOT_FOUND,
        };
        assert!(server.is_transient());
        assert!(throttled.is_transient());
        assert!(!missing.is_transient());
    }

    #[test]
    fn extraction_errors_are_not_transient() {
        let err: PipelineError = ExtractionError::AnchorMissing("section").into();
        assert!(!err.is_transient());
    }
}
