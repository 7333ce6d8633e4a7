//! INDIGO error types
//!
//! Provides structured error types for session and transport operations.

use std::time::Duration;

/// INDIGO client errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum IndigoError {
    /// Another session is already active in this process
    #[error("An INDIGO session is already active")]
    AlreadyActive,
    /// Library-level transport initialization failed
    #[error("INDIGO start failed: {0}")]
    StartFailed(String),
    /// Connection to INDIGO server failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    /// Connection timeout with context
    #[error("Connection timeout: failed to connect to {host}:{port} after {duration:?}")]
    ConnectionTimeout {
        host: String,
        port: u16,
        duration: Duration,
    },
    /// Disconnecting from the server failed
    #[error("Disconnect failed: {0}")]
    DisconnectFailed(String),
    /// Not connected to server
    #[error("Not connected to INDIGO server")]
    NotConnected,
    /// Operation called in the wrong session state
    #[error("Cannot {operation} while session is {state}")]
    InvalidState { operation: String, state: String },
    /// Send channel closed
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
    /// A prior command did not clear the gate in time
    #[error("Timed out after {waited:?} waiting for pending update before sending {key}")]
    GateTimeout { key: String, waited: Duration },
    /// XML encoding error
    #[error("XML encode error: {0}")]
    Encode(String),
    /// XML parse error
    #[error("XML parse error: {0}")]
    Parse(String),
    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for INDIGO operations
pub type IndigoResult<T> = Result<T, IndigoError>;
