//! Error kinds for the reconstruction and loading pipeline

use thiserror::Error;

/// Result type for pipeline operations.
pub type EtlResult<T> = Result<T, EtlError>;

/// Errors raised while fetching, parsing, reconstructing or loading match data.
#[derive(Debug, Error)]
pub enum EtlError {
    /// A required log or artifact is absent.
    #[error("missing data: {0}")]
    MissingData(String),

    /// Schema or invariant violation in otherwise present data.
    #[error("malformed data: {0}")]
    MalformedData(String),

    /// Zero-length shot ray or similar unusable geometry.
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    /// An entity has no temporal data to resolve against.
    #[error("not found: {0}")]
    NotFound(String),

    /// Remote fetch failed. `transient` is true when the retry budget ran out on
    /// retryable errors rather than on a terminal response.
    #[error("fetch failed for {target}: {reason}")]
    Fetch { target: String, reason: String, transient: bool },

    /// Database write or read failed; the enclosing transaction is rolled back.
    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A state machine was asked to make a transition it does not allow.
    #[error("illegal transition: {from} -> {to}")]
    IllegalTransition { from: &'static str, to: &'static str },

    /// The window is already being processed by another run.
    #[error("event window {0} is already being processed")]
    WindowBusy(String),
}

impl EtlError {
    /// Whether this error aborts a single event rather than the whole match
    pub fn is_event_local(&self) -> bool {
        matches!(self, EtlError::DegenerateGeometry(_) | EtlError::NotFound(_))
    }

    /// Short label used for failure tallies
    pub fn kind(&self) -> &'static str {
        match self {
            EtlError::MissingData(_) => "missing_data",
            EtlError::MalformedData(_) => "malformed_data",
            EtlError::DegenerateGeometry(_) => "degenerate_geometry",
            EtlError::NotFound(_) => "not_found",
            EtlError::Fetch { transient: true, .. } => "fetch_exhausted",
            EtlError::Fetch { .. } => "fetch_rejected",
            EtlError::Persistence(_) => "persistence",
            EtlError::Io(_) => "io",
            EtlError::Json(_) => "json",
            EtlError::IllegalTransition { .. } => "illegal_transition",
            EtlError::WindowBusy(_) => "window_busy",
        }
    }
}
