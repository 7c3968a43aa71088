use thiserror::Error;

/// Result of one direct upload: the response body, or why it failed
pub type UploadOutcome = Result<String, TransferError>;

/// A direct upload that did not complete with a 2xx response.
///
/// `status` is `0` when no response was observed at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Error storing \"{filename}\". Status: {status}")]
pub struct TransferError {
    pub filename: String,
    pub status: u16,
}

impl TransferError {
    pub fn new<S: Into<String>>(filename: S, status: u16) -> Self {
        Self {
            filename: filename.into(),
            status,
        }
    }

    /// True when the request never produced a response
    pub fn is_network(&self) -> bool {
        self.status == 0
    }
}

/// Failure below HTTP: connect, TLS, body or form construction
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP transport error: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    #[error("Transport error: {message}")]
    Other { message: String },
}

impl TransportError {
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_names_file_and_status() {
        let err = TransferError::new("cat.png", 500);
        assert_eq!(err.to_string(), "Error storing \"cat.png\". Status: 500");
        assert!(!err.is_network());
        assert!(TransferError::new("cat.png", 0).is_network());
    }
}
