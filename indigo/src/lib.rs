//! INDIGO Protocol Client Session
//!
//! Client-side session manager for the INDIGO XML-over-TCP protocol.
//!
//! ## Features
//!
//! - Live mirror of every property the server defines, keyed by device, host and name
//! - Single-slot pending-update gate serializing commands against server acknowledgements
//! - Protocol-correct `new*Vector` command encoding
//! - Pluggable transport with a tokio TCP implementation
//! - mDNS and port-probe discovery of INDIGO servers

mod codec;
mod encoder;
mod error;
mod gate;
mod key;
mod mirror;
mod protocol;
mod session;
pub mod discovery;
pub mod logging;
pub mod transport;

pub use codec::{detect_blob_format, PropertyDecoder, PropertyRecord, RawProperty, RecordCodec};
pub use encoder::{encode_command, vector_tags};
pub use error::{IndigoError, IndigoResult};
pub use gate::PendingGate;
pub use key::PropertyKey;
pub use mirror::PropertyMirror;
pub use protocol::{standard_properties, INDIGO_PROTOCOL_VERSION};
pub use session::{CommandOutcome, DropReason, Session, SessionState};
pub use transport::{
    Connection, NotificationHandler, ServerTarget, TcpTransport, Transport, XmlSender,
};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default INDIGO server port
pub const INDIGO_DEFAULT_PORT: u16 = 7624;

/// INDIGO property types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    Text,
    Number,
    Switch,
    Light,
    Blob,
}

impl PropertyType {
    /// Wire name fragment used inside vector tags (`defTextVector`, `setBLOBVector`, ...)
    pub fn wire_name(self) -> &'static str {
        match self {
            PropertyType::Text => "Text",
            PropertyType::Number => "Number",
            PropertyType::Switch => "Switch",
            PropertyType::Light => "Light",
            PropertyType::Blob => "BLOB",
        }
    }

    /// Parse the type fragment of a vector or item tag
    pub fn from_wire_name(s: &str) -> Option<Self> {
        match s {
            "Text" => Some(PropertyType::Text),
            "Number" => Some(PropertyType::Number),
            "Switch" => Some(PropertyType::Switch),
            "Light" => Some(PropertyType::Light),
            "BLOB" => Some(PropertyType::Blob),
            _ => None,
        }
    }
}

/// INDIGO property state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PropertyState {
    #[default]
    Idle,
    Ok,
    Busy,
    Alert,
}

/// INDIGO property permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Permission {
    ReadOnly,
    WriteOnly,
    #[default]
    ReadWrite,
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Client name announced in the `getProperties` handshake
    pub client_name: String,
    /// Identifier of the server entry the transport creates on connect
    pub server_id: String,
    /// Server host; also the host part of every property key
    pub host: String,
    /// Server port (default: 7624)
    pub port: u16,
    /// Gate poll interval and post-send settle delay (default: 1000ms)
    pub server_delay_ms: u64,
    /// Number of poll intervals a command waits for a prior one to clear (default: 30)
    pub max_wait_count: u32,
    /// Connection timeout for the initial TCP connection (default: 30 seconds)
    pub connection_timeout_secs: u64,
    /// Protocol version sent in the handshake (default: "2.0")
    pub protocol_version: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_name: "indigo_client".to_string(),
            server_id: "indigo_server".to_string(),
            host: "localhost".to_string(),
            port: INDIGO_DEFAULT_PORT,
            server_delay_ms: 1000,
            max_wait_count: 30,
            connection_timeout_secs: 30,
            protocol_version: INDIGO_PROTOCOL_VERSION.to_string(),
        }
    }
}

impl SessionConfig {
    /// Create a configuration for a specific server
    pub fn new(host: &str, port: Option<u16>) -> Self {
        Self {
            host: host.to_string(),
            port: port.unwrap_or(INDIGO_DEFAULT_PORT),
            ..Self::default()
        }
    }

    /// Build a configuration from defaults overlaid with `INDIGO_*` environment variables
    ///
    /// Recognized: `INDIGO_HOST`, `INDIGO_PORT`, `INDIGO_SERVER_DELAY_MS`,
    /// `INDIGO_MAX_WAIT_COUNT`, `INDIGO_CLIENT_NAME`.
    pub fn from_env() -> IndigoResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> IndigoResult<Self> {
        let mut config = Self::default();
        if let Some(host) = lookup("INDIGO_HOST") {
            config.host = host;
        }
        if let Some(name) = lookup("INDIGO_CLIENT_NAME") {
            config.client_name = name;
        }
        if let Some(port) = lookup("INDIGO_PORT") {
            config.port = parse_env("INDIGO_PORT", &port)?;
        }
        if let Some(delay) = lookup("INDIGO_SERVER_DELAY_MS") {
            config.server_delay_ms = parse_env("INDIGO_SERVER_DELAY_MS", &delay)?;
        }
        if let Some(count) = lookup("INDIGO_MAX_WAIT_COUNT") {
            config.max_wait_count = parse_env("INDIGO_MAX_WAIT_COUNT", &count)?;
        }
        Ok(config)
    }

    /// Get the server delay as a Duration
    pub fn server_delay(&self) -> Duration {
        Duration::from_millis(self.server_delay_ms)
    }

    /// Longest time a command waits for the gate before it is dropped
    pub fn gate_timeout(&self) -> Duration {
        self.server_delay() * self.max_wait_count
    }

    /// Get the connection timeout as a Duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// The connection target this configuration points at
    pub fn target(&self) -> ServerTarget {
        ServerTarget {
            server_id: self.server_id.clone(),
            host: self.host.clone(),
            port: self.port,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> IndigoResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| IndigoError::Config(format!("{} has an invalid value: {:?}", name, value)))
}
