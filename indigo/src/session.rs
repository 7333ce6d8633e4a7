//! INDIGO client session
//!
//! Owns the connection lifetime and wires the property mirror, the pending
//! gate and the command encoder together.
//!
//! States: `Unstarted -> Connected -> Stopped`. Only one session may be
//! active in a process at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::sleep;

use crate::codec::{PropertyDecoder, PropertyRecord, RawProperty, RecordCodec};
use crate::encoder::{encode_command, vector_tags};
use crate::error::{IndigoError, IndigoResult};
use crate::gate::PendingGate;
use crate::key::PropertyKey;
use crate::mirror::PropertyMirror;
use crate::transport::{Connection, NotificationHandler, TcpTransport, Transport, XmlSender};
use crate::{PropertyType, SessionConfig};

/// Set while a session is between a successful `start` and `stop`
static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Connected,
    Stopped,
}

/// Why a command was not transmitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The property is not in the mirror
    UnknownProperty,
    /// The property type has no command vector
    UnsupportedType(PropertyType),
    /// A prior command did not clear the gate in time
    GateTimeout,
}

/// Result of `send_command`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Sent,
    Dropped(DropReason),
}

/// State shared with the transport's notification path
struct SessionShared {
    host: String,
    decoder: Arc<dyn PropertyDecoder>,
    mirror: PropertyMirror,
    gate: PendingGate,
}

impl NotificationHandler for SessionShared {
    fn on_attach(&self) {
        tracing::debug!("attach client");
    }

    fn on_define(&self, property: &RawProperty) {
        let (key, record) = self.decoder.decode(property);
        tracing::debug!("define_property: {} {}", property.device, property.name);
        self.mirror.define(key, record);
    }

    fn on_update(&self, property: &RawProperty) {
        let (key, record) = self.decoder.decode(property);
        if self.gate.release_if_match(&key) {
            tracing::debug!("pending update for {} acknowledged", key);
        }
        if self.mirror.update(&key, record) {
            tracing::debug!("update_property: {} {}", property.device, property.name);
        }
    }

    fn on_delete(&self, device: &str, property: Option<&str>) {
        match property {
            Some(name) => {
                let key = self.decoder.key(device, name);
                self.gate.release_if_match(&key);
                if self.mirror.delete(&key) {
                    tracing::debug!("delete_property: {} {}", device, name);
                }
            }
            None => {
                self.gate.release_device(device, &self.host);
                let removed = self.mirror.delete_device(device, &self.host);
                tracing::debug!("delete_property: {} ({} properties)", device, removed.len());
            }
        }
    }

    fn on_message(&self, device: Option<&str>, message: &str) {
        match device {
            Some(device) => tracing::info!("message from {}: {}", device, message),
            None => tracing::info!("message: {}", message),
        }
    }

    fn on_detach(&self) {
        tracing::debug!("detach client");
    }
}

/// Client session against one INDIGO server
pub struct Session<T: Transport = TcpTransport> {
    config: SessionConfig,
    transport: T,
    shared: Arc<SessionShared>,
    connection: Option<Connection>,
    state: SessionState,
    holds_marker: bool,
}

impl Session<TcpTransport> {
    /// Create a session that connects over TCP
    pub fn new(config: SessionConfig) -> Self {
        let transport = TcpTransport::new(&config);
        Self::with_transport(config, transport)
    }
}

impl Default for Session<TcpTransport> {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl<T: Transport> Session<T> {
    /// Create a session over a custom transport
    pub fn with_transport(config: SessionConfig, transport: T) -> Self {
        let decoder = Arc::new(RecordCodec::new(&config.host));
        Self::with_decoder(config, transport, decoder)
    }

    /// Create a session over a custom transport and property decoder
    pub fn with_decoder(
        config: SessionConfig,
        transport: T,
        decoder: Arc<dyn PropertyDecoder>,
    ) -> Self {
        let shared = Arc::new(SessionShared {
            host: config.host.clone(),
            decoder,
            mirror: PropertyMirror::new(),
            gate: PendingGate::new(config.server_delay(), config.max_wait_count),
        });
        Self {
            config,
            transport,
            shared,
            connection: None,
            state: SessionState::Unstarted,
            holds_marker: false,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Initialize the transport, connect and register for notifications.
    ///
    /// Fails if another session is active or the transport reports a failure.
    /// A session whose start failed must not be reused.
    pub async fn start(&mut self) -> IndigoResult<()> {
        if self.state != SessionState::Unstarted {
            return Err(self.invalid_state("start"));
        }
        if SESSION_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(IndigoError::AlreadyActive);
        }
        self.holds_marker = true;

        let result = self.open().await;
        if let Err(e) = &result {
            tracing::error!("INDIGO session start failed: {}", e);
            self.state = SessionState::Stopped;
            self.release_marker();
        }
        result
    }

    async fn open(&mut self) -> IndigoResult<()> {
        self.transport.start().await?;

        let target = self.config.target();
        let handler: Arc<dyn NotificationHandler> = self.shared.clone();
        let connection = self.transport.connect(&target, handler).await?;
        self.connection = Some(connection);

        sleep(self.config.server_delay()).await;

        self.state = SessionState::Connected;
        tracing::info!("INDIGO session connected to {}", target);
        Ok(())
    }

    /// Disconnect and release the process-wide session marker
    pub async fn stop(&mut self) -> IndigoResult<()> {
        if self.state != SessionState::Connected {
            return Err(self.invalid_state("stop"));
        }
        let connection = self.connection.take().ok_or(IndigoError::NotConnected)?;
        self.state = SessionState::Stopped;

        if let Some(key) = self.shared.gate.reset() {
            tracing::warn!("stop: abandoning pending update for {}", key);
        }

        self.transport.disconnect(connection).await.map_err(|e| match e {
            IndigoError::DisconnectFailed(_) => e,
            other => IndigoError::DisconnectFailed(other.to_string()),
        })?;

        self.shared.mirror.clear();
        self.release_marker();
        tracing::info!("INDIGO session stopped");
        Ok(())
    }

    /// Transmit a pre-built XML document verbatim
    pub async fn send_xml(&self, xml: &str) -> IndigoResult<()> {
        let sender = self.sender("send XML")?;
        tracing::debug!("------------- Sending: {}", xml);
        sender.send(xml.as_bytes()).await?;
        sleep(self.config.server_delay()).await;
        Ok(())
    }

    /// Set items of a known property.
    ///
    /// Waits for any prior command to be acknowledged, then transmits a
    /// `new*Vector` document and leaves the gate pending until the server
    /// updates or deletes the property. Unknown properties, Light/BLOB
    /// properties and gate timeouts drop the command with a warning.
    pub async fn send_command(
        &self,
        device: &str,
        property: &str,
        items: &[(&str, &str)],
    ) -> IndigoResult<CommandOutcome> {
        let sender = self.sender("send command")?;
        let key = self.shared.decoder.key(device, property);

        let Some(property_type) = self.shared.mirror.lookup_type(&key) else {
            tracing::warn!("send_command: {} not in known properties", key);
            return Ok(CommandOutcome::Dropped(DropReason::UnknownProperty));
        };

        let Some((vector_tag, item_tag)) = vector_tags(property_type) else {
            tracing::warn!(
                "send_command error: unsupported property type for command {:?} ({}). Command not sent",
                property_type,
                key
            );
            return Ok(CommandOutcome::Dropped(DropReason::UnsupportedType(property_type)));
        };

        let document = encode_command(device, property, vector_tag, item_tag, items)?;

        match self.shared.gate.acquire(&key).await {
            Ok(()) => {}
            Err(IndigoError::GateTimeout { waited, .. }) => {
                tracing::warn!(
                    "send_command: timed out after {:?} waiting for server update, {} not sent",
                    waited,
                    key
                );
                return Ok(CommandOutcome::Dropped(DropReason::GateTimeout));
            }
            Err(e) => return Err(e),
        }

        tracing::debug!("------------- Sending: {}", String::from_utf8_lossy(&document));
        if let Err(e) = sender.send(&document).await {
            self.shared.gate.release_if_match(&key);
            return Err(e);
        }

        sleep(self.config.server_delay()).await;
        Ok(CommandOutcome::Sent)
    }

    /// True while a command awaits its acknowledgement
    pub fn is_pending(&self) -> bool {
        self.shared.gate.is_pending()
    }

    pub fn pending_key(&self) -> Option<PropertyKey> {
        self.shared.gate.pending_key()
    }

    /// Key a property of `device` is mirrored under
    pub fn key(&self, device: &str, property: &str) -> PropertyKey {
        self.shared.decoder.key(device, property)
    }

    pub fn property(&self, device: &str, property: &str) -> Option<PropertyRecord> {
        self.shared.mirror.get(&self.key(device, property))
    }

    pub fn property_type(&self, device: &str, property: &str) -> Option<PropertyType> {
        self.shared.mirror.lookup_type(&self.key(device, property))
    }

    /// Every mirrored property, ordered by key
    pub fn properties(&self) -> Vec<(PropertyKey, PropertyRecord)> {
        self.shared.mirror.snapshot()
    }

    pub fn mirror(&self) -> &PropertyMirror {
        &self.shared.mirror
    }

    /// Log every mirrored property
    pub fn print_properties(&self) {
        for (key, record) in self.properties() {
            tracing::info!(
                "{}: {:?} {:?} {:?}",
                key,
                record.property_type,
                record.state,
                record.items
            );
        }
    }

    fn sender(&self, operation: &str) -> IndigoResult<&XmlSender> {
        match (&self.connection, self.state) {
            (Some(connection), SessionState::Connected) => Ok(connection.sender()),
            _ => Err(self.invalid_state(operation)),
        }
    }

    fn invalid_state(&self, operation: &str) -> IndigoError {
        IndigoError::InvalidState {
            operation: operation.to_string(),
            state: format!("{:?}", self.state),
        }
    }

    fn release_marker(&mut self) {
        if self.holds_marker {
            SESSION_ACTIVE.store(false, Ordering::SeqCst);
            self.holds_marker = false;
        }
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.shutdown();
        }
        self.release_marker();
    }
}
