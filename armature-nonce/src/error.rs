use thiserror::Error;

#[derive(Error, Debug)]
pub enum NonceError {
    #[error("Invalid nonce configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Nonce verification failed")]
    VerificationFailed,

    #[error("Request aborted ({status}): {message}")]
    AbortedRequest { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NonceError {
    /// HTTP status the request layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            NonceError::AbortedRequest { status, .. } => *status,
            NonceError::VerificationFailed => 403,
            NonceError::InvalidUrl(_) => 400,
            NonceError::InvalidConfiguration(_) | NonceError::Serialization(_) => 500,
        }
    }

    /// Whether the current request must not be processed any further.
    pub fn is_abort(&self) -> bool {
        matches!(self, NonceError::AbortedRequest { .. })
    }
}

pub type Result<T> = std::result::Result<T, NonceError>;
