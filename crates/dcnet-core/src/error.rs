//! Error types for DC-net sessions

use crate::NodeIndex;
use thiserror::Error;

/// Result type alias for DC-net operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or running a DC-net session
#[derive(Debug, Error)]
pub enum Error {
    // ============ Configuration Errors ============
    /// Invalid room configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Node index outside of the room
    #[error("Invalid node index: {0}")]
    InvalidNodeIndex(NodeIndex),

    // ============ Encoding Errors ============
    /// Plaintext longer than the room allows
    #[error("Message too long: {length} characters (maximum {max})")]
    MessageTooLong { length: usize, max: usize },

    /// Character encoding failure while packing or unpacking a message
    #[error("Encoding error: {0}")]
    Encoding(String),

    // ============ Cryptographic Errors ============
    /// Prime or generator search gave up
    #[error("Crypto setup failed: {0}")]
    CryptoSetup(String),

    /// Commitment or proof did not verify
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    // ============ Channel Errors ============
    /// Barrier, broadcast, or exchange channel failure
    #[error("Channel error: {0}")]
    Channel(String),

    /// Timeout waiting on a channel
    #[error("Timeout waiting for {0}")]
    Timeout(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ============ Protocol Errors ============
    /// Decoded aggregate or scheduler state that cannot occur with honest peers
    #[error("Protocol invariant violated: {0}")]
    ProtocolViolation(String),

    /// Session terminated by a fatal error
    #[error("Session aborted after {elapsed_ms} ms with {} resolved message(s): {source}", .resolved.len())]
    Aborted {
        elapsed_ms: u128,
        resolved: Vec<String>,
        #[source]
        source: Box<Error>,
    },

    // ============ Internal Errors ============
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for failures of the synchronization or broadcast transport
    pub fn is_channel_failure(&self) -> bool {
        match self {
            Error::Channel(_)
            | Error::Timeout(_)
            | Error::Serialization(_)
            | Error::Deserialization(_) => true,
            Error::Aborted { source, .. } => source.is_channel_failure(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Deserialization(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Error::Encoding(e.to_string())
    }
}
