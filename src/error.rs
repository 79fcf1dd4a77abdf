//! Error types and handling for shmcomm

/// Result type alias for shmcomm operations
pub type Result<T> = std::result::Result<T, ShmError>;

/// Errors surfaced by the shmcomm shared-memory transport
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    /// Segment could not be created or attached (allocation failure,
    /// attach timeout, magic/version mismatch)
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// A blocking operation exceeded its deadline
    #[error("Timed out after {waited:?}: {message}")]
    Timeout {
        message: String,
        waited: std::time::Duration,
    },

    /// Non-blocking send on a full work-queue ring, or a blocking send
    /// that ran out its timeout
    #[error("Ring buffer full: {segment}")]
    BufferFull { segment: String },

    /// Payload does not fit in a single slot
    #[error("Payload of {size} bytes exceeds slot capacity {max} (increase slot_size)")]
    PayloadTooLarge { size: usize, max: usize },

    /// Codec encode/decode failure
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Request/reply state-machine violation
    #[error("Protocol state error: {message}")]
    State { message: String },

    /// Invalid configuration or argument
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },
}

impl ShmError {
    /// Create a connection error with context
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error from a standard I/O error
    pub fn connection_io(source: std::io::Error, context: &str) -> Self {
        Self::Connection {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>, waited: std::time::Duration) -> Self {
        Self::Timeout {
            message: message.into(),
            waited,
        }
    }

    /// Create a buffer-full error for a segment
    pub fn buffer_full(segment: impl Into<String>) -> Self {
        Self::BufferFull {
            segment: segment.into(),
        }
    }

    /// Create a payload-too-large error
    pub fn payload_too_large(size: usize, max: usize) -> Self {
        Self::PayloadTooLarge { size, max }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a state-machine violation error
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ShmError {
    fn from(err: std::io::Error) -> Self {
        Self::connection_io(err, "I/O operation failed")
    }
}

impl From<bincode::Error> for ShmError {
    fn from(err: bincode::Error) -> Self {
        Self::serialization(format!("Bincode error: {}", err))
    }
}

impl From<serde_json::Error> for ShmError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}
