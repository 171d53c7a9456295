//! Error types for the server.
//!
//! A unified `thiserror` hierarchy shared by every module. Failures are
//! contained at the tool-call boundary: the MCP layer turns any of these into
//! an error-flagged textual response rather than propagating them to the
//! client as protocol errors.

use thiserror::Error;

/// Unified error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors (missing env vars, invalid values)
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// fal.ai API errors with endpoint and HTTP status context
    #[error("API error for {endpoint} (HTTP {status_code}): {message}")]
    Api {
        /// The API endpoint that was called
        endpoint: String,
        /// HTTP status code returned by the API (0 when the request never
        /// reached the server)
        status_code: u16,
        /// Error message from the API or describing the failure
        message: String,
    },

    /// Generation requests that reached the FAILED state on the queue
    #[error("Request {request_id} failed during generation")]
    GenerationFailed {
        /// Queue request id of the failed generation
        request_id: String,
    },

    /// Input validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Image download failures
    #[error("Failed to download image from {url}: {message}")]
    Download {
        /// Source URL of the image
        url: String,
        /// Description of the failure
        message: String,
    },

    /// File system I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a new API error with endpoint, status code, and message.
    pub fn api(endpoint: impl Into<String>, status_code: u16, message: impl Into<String>) -> Self {
        Error::Api {
            endpoint: endpoint.into(),
            status_code,
            message: message.into(),
        }
    }

    /// Create a new validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Create a new download error.
    pub fn download(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Download {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is not set
    #[error("Required environment variable {0} is not set")]
    MissingEnvVar(String),
}

/// Result type alias using the unified Error type.
pub type Result<T> = std::result::Result<T, Error>;
