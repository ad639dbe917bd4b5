use thiserror::Error;

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, ExtractError>;

/// Everything that can go wrong between the console and the extraction service.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Local precondition failed; no request was sent.
    #[error("{0}")]
    Validation(String),

    /// The service answered `success: false` or a non-2xx status.
    #[error("{0}")]
    Service(String),

    /// The request never got a usable answer (connect, timeout, ...).
    #[error("{0}")]
    Transport(String),

    #[error("Another request is already in progress for this workflow.")]
    Busy,

    #[error("Unexpected response from service: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Database error: {source}")]
    Database {
        #[from]
        source: rusqlite::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),
}

impl ExtractError {
    /// True for failures the user fixes locally before retrying.
    pub fn is_validation(&self) -> bool {
        matches!(self, ExtractError::Validation(_))
    }
}

impl From<serde_json::Error> for ExtractError {
    fn from(err: serde_json::Error) -> Self {
        ExtractError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ExtractError {
    fn from(err: serde_yaml::Error) -> Self {
        ExtractError::Serialization(err.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for ExtractError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        ExtractError::Spreadsheet(err.to_string())
    }
}

impl From<calamine::Error> for ExtractError {
    fn from(err: calamine::Error) -> Self {
        ExtractError::Spreadsheet(err.to_string())
    }
}

// Mirrors the desktop app's wording: connectivity problems get a hint, the rest stay generic.
impl From<reqwest::Error> for ExtractError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            ExtractError::Transport(format!(
                "Could not reach the extraction service: {}. Check your connection and try again.",
                err
            ))
        } else if err.is_decode() {
            ExtractError::InvalidResponse(err.to_string())
        } else {
            ExtractError::Transport(format!("Network error: {}", err))
        }
    }
}
