use thiserror::Error;

/// Result type for storage operations
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Blob not found: {key}")]
    NotFound { key: String },

    #[error("Unable to sign request: {reason}")]
    Signing { reason: String },

    #[error("Backend error during {operation} of {key}{}: {message}", status_suffix(.status))]
    Backend {
        operation: String,
        key: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Upload of {key} rejected with status {status}: {message}")]
    Upload {
        key: String,
        status: u16,
        message: String,
    },

    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Signed request expired at {expires_at}")]
    Expired { expires_at: i64 },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("HTTP transport error: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (status {})", code),
        None => String::new(),
    }
}

impl BlobError {
    /// Create a not found error
    pub fn not_found<S: Into<String>>(key: S) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a signing error
    pub fn signing<S: Into<String>>(reason: S) -> Self {
        Self::Signing {
            reason: reason.into(),
        }
    }

    /// Create a backend error for an operation on a key (or prefix)
    pub fn backend<O, K, M>(operation: O, key: K, status: Option<u16>, message: M) -> Self
    where
        O: Into<String>,
        K: Into<String>,
        M: Into<String>,
    {
        Self::Backend {
            operation: operation.into(),
            key: key.into(),
            status,
            message: message.into(),
        }
    }

    /// Create an upload rejected error
    pub fn upload<K: Into<String>, M: Into<String>>(key: K, status: u16, message: M) -> Self {
        Self::Upload {
            key: key.into(),
            status,
            message: message.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// True for the "no such object" case
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Status code reported by the backend, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Backend { status, .. } => *status,
            Self::Upload { status, .. } => Some(*status),
            Self::Http { source } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
