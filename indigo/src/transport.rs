//! INDIGO transport
//!
//! The transport owns the TCP connection to the server. It delivers decoded
//! property notifications to a registered [`NotificationHandler`] and hands
//! back an [`XmlSender`] for outbound documents.
//!
//! [`TcpTransport`] is the default implementation:
//! - Connection timeout on the initial TCP connect
//! - Writer task fed through an mpsc channel
//! - Reader task that parses the server's XML stream incrementally
//! - Shutdown signal for a clean disconnect

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::codec::{parse_perm, parse_state, RawProperty};
use crate::error::{IndigoError, IndigoResult};
use crate::protocol::{classify, Element, VectorKind};
use crate::SessionConfig;

/// Where a connection goes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerTarget {
    pub server_id: String,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for ServerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.server_id, self.host, self.port)
    }
}

/// Receiver of server notifications.
///
/// Called from the transport's reader, independently of the command path.
/// Implementations must not block.
pub trait NotificationHandler: Send + Sync {
    fn on_attach(&self) {}

    /// Server announced a property
    fn on_define(&self, property: &RawProperty);

    /// Server reported new values for a property
    fn on_update(&self, property: &RawProperty);

    /// Server removed a property, or every property of `device` when `property` is `None`
    fn on_delete(&self, device: &str, property: Option<&str>);

    fn on_message(&self, device: Option<&str>, message: &str) {
        let _ = (device, message);
    }

    fn on_detach(&self) {}
}

/// Write handle for raw XML documents on a connection
#[derive(Debug, Clone)]
pub struct XmlSender {
    tx: mpsc::Sender<Vec<u8>>,
}

impl XmlSender {
    pub fn new(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { tx }
    }

    /// Queue a document for transmission
    pub async fn send(&self, document: &[u8]) -> IndigoResult<()> {
        self.tx.send(document.to_vec()).await.map_err(|e| {
            IndigoError::ChannelClosed(format!(
                "Failed to send INDIGO document: {}. The connection may have been lost.",
                e
            ))
        })
    }
}

/// An open connection returned by [`Transport::connect`]
#[derive(Debug)]
pub struct Connection {
    target: ServerTarget,
    sender: XmlSender,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl Connection {
    pub fn new(target: ServerTarget, sender: XmlSender) -> Self {
        Self {
            target,
            sender,
            shutdown_tx: None,
        }
    }

    /// Attach a shutdown signal that stops the connection's reader
    pub fn with_shutdown(mut self, shutdown_tx: oneshot::Sender<()>) -> Self {
        self.shutdown_tx = Some(shutdown_tx);
        self
    }

    pub fn target(&self) -> &ServerTarget {
        &self.target
    }

    pub fn sender(&self) -> &XmlSender {
        &self.sender
    }

    /// Signal the reader to stop. False if it had already stopped.
    pub fn shutdown(&mut self) -> bool {
        match self.shutdown_tx.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

/// Connection layer between a session and an INDIGO server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Library-level initialization
    async fn start(&mut self) -> IndigoResult<()>;

    /// Connect to `target`; notifications from then on go to `handler`
    async fn connect(
        &mut self,
        target: &ServerTarget,
        handler: Arc<dyn NotificationHandler>,
    ) -> IndigoResult<Connection>;

    /// Close a connection obtained from `connect`
    async fn disconnect(&mut self, connection: Connection) -> IndigoResult<()>;
}

/// Transport over a plain TCP socket
#[derive(Debug, Clone)]
pub struct TcpTransport {
    client_name: String,
    protocol_version: String,
    connection_timeout: Duration,
    started: bool,
    shut_down: bool,
}

impl TcpTransport {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            client_name: config.client_name.clone(),
            protocol_version: config.protocol_version.clone(),
            connection_timeout: config.connection_timeout(),
            started: false,
            shut_down: false,
        }
    }

    /// Writer task - sends documents to the INDIGO server
    async fn writer_task<W: AsyncWrite + Unpin>(mut writer: W, mut rx: mpsc::Receiver<Vec<u8>>) {
        while let Some(document) = rx.recv().await {
            tracing::debug!("Sending: {}", String::from_utf8_lossy(&document));
            if let Err(e) = writer.write_all(&document).await {
                tracing::error!("INDIGO write error: {}", e);
                break;
            }
            if let Err(e) = writer.write_all(b"\n").await {
                tracing::error!("INDIGO write error: {}", e);
                break;
            }
        }
    }

    fn handshake(&self) -> String {
        format!(
            "<getProperties version=\"{}\" client=\"{}\"/>",
            quick_xml::escape::escape(&self.protocol_version),
            quick_xml::escape::escape(&self.client_name)
        )
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn start(&mut self) -> IndigoResult<()> {
        if self.shut_down {
            return Err(IndigoError::StartFailed(
                "transport has been shut down".to_string(),
            ));
        }
        if !self.started {
            tracing::debug!("INDIGO transport started for client '{}'", self.client_name);
            self.started = true;
        }
        Ok(())
    }

    async fn connect(
        &mut self,
        target: &ServerTarget,
        handler: Arc<dyn NotificationHandler>,
    ) -> IndigoResult<Connection> {
        if !self.started {
            return Err(IndigoError::StartFailed(
                "transport must be started before connecting".to_string(),
            ));
        }

        let addr = format!("{}:{}", target.host, target.port);
        let stream = match timeout(self.connection_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(IndigoError::ConnectionFailed(format!(
                    "Failed to connect to INDIGO server at {}: {}. Check that the server is running and the address is correct.",
                    addr, e
                )));
            }
            Err(_) => {
                return Err(IndigoError::ConnectionTimeout {
                    host: target.host.clone(),
                    port: target.port,
                    duration: self.connection_timeout,
                });
            }
        };

        let (read_half, write_half) = stream.into_split();

        let (tx, rx) = mpsc::channel::<Vec<u8>>(100);
        tokio::spawn(Self::writer_task(write_half, rx));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        handler.on_attach();
        let server = target.to_string();
        tokio::spawn(async move {
            tokio::select! {
                result = read_notifications(read_half, handler.as_ref()) => {
                    if let Err(e) = result {
                        tracing::error!("INDIGO reader for {} stopped: {}", server, e);
                    }
                }
                _ = shutdown_rx => {
                    tracing::info!("INDIGO reader for {} received shutdown signal", server);
                }
            }
            handler.on_detach();
        });

        let sender = XmlSender::new(tx);
        sender.send(self.handshake().as_bytes()).await?;
        tracing::info!("Connected to INDIGO server {}", target);

        Ok(Connection::new(target.clone(), sender).with_shutdown(shutdown_tx))
    }

    async fn disconnect(&mut self, mut connection: Connection) -> IndigoResult<()> {
        tracing::info!("Disconnecting from INDIGO server {}", connection.target());
        self.started = false;
        self.shut_down = true;
        if !connection.shutdown() {
            tracing::debug!("Reader for {} had already stopped", connection.target());
        }
        Ok(())
    }
}

/// Vector currently being assembled by the reader
struct PendingVector {
    kind: VectorKind,
    raw: RawProperty,
    current_item: Option<usize>,
}

/// Consecutive parse errors after which the stream is considered unusable
const MAX_CONSECUTIVE_PARSE_ERRORS: usize = 16;

fn xml_reader<R: AsyncBufRead + Unpin>(inner: R) -> Reader<R> {
    let mut reader = Reader::from_reader(inner);
    // Mismatched close tags are skipped rather than ending the stream
    reader.trim_text(true).check_end_names(false);
    reader
}

/// Parse an INDIGO XML stream and dispatch each complete element to `handler`.
///
/// Returns when the stream ends. Malformed XML is logged and skipped; the
/// element being assembled is discarded and parsing resumes after it.
pub async fn read_notifications<R: AsyncRead + Unpin>(
    reader: R,
    handler: &dyn NotificationHandler,
) -> IndigoResult<()> {
    let mut reader = xml_reader(BufReader::new(reader));

    let mut buf = Vec::new();
    let mut pending: Option<PendingVector> = None;
    let mut parse_errors = 0;

    loop {
        let result = reader.read_event_into_async(&mut buf).await;
        if result.is_ok() {
            parse_errors = 0;
        }
        match result {
            Ok(Event::Start(e)) => on_element(&e, false, &mut pending, handler),
            Ok(Event::Empty(e)) => on_element(&e, true, &mut pending, handler),
            Ok(Event::Text(e)) => {
                if let Some(vector) = pending.as_mut() {
                    if let Some(idx) = vector.current_item {
                        let text = match e.unescape() {
                            Ok(text) => text.into_owned(),
                            Err(err) => {
                                tracing::warn!(
                                    "Keeping raw text of {}.{} item {}: {}",
                                    vector.raw.device,
                                    vector.raw.name,
                                    vector.raw.items[idx].0,
                                    err
                                );
                                String::from_utf8_lossy(&e).into_owned()
                            }
                        };
                        vector.raw.items[idx].1.push_str(&text);
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match classify(&name) {
                    Element::Vector(..) => {
                        if let Some(vector) = pending.take() {
                            dispatch(vector.kind, &vector.raw, handler);
                        }
                    }
                    Element::Item(_) => {
                        if let Some(vector) = pending.as_mut() {
                            vector.current_item = None;
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => {
                tracing::info!("INDIGO connection closed (EOF)");
                break;
            }
            Err(quick_xml::Error::Io(e)) => {
                return Err(IndigoError::ConnectionFailed(format!("read error: {}", e)));
            }
            Err(e) => {
                tracing::error!(
                    "INDIGO XML parse error: {}. Raw buffer (first 200 chars): {:?}",
                    e,
                    String::from_utf8_lossy(&buf[..buf.len().min(200)])
                );
                pending = None;
                parse_errors += 1;
                if parse_errors >= MAX_CONSECUTIVE_PARSE_ERRORS {
                    return Err(IndigoError::Parse(format!(
                        "giving up after {} consecutive parse errors: {}",
                        parse_errors, e
                    )));
                }
                // A reader that reported an error only yields Eof afterwards
                reader = xml_reader(reader.into_inner());
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn on_element(
    e: &BytesStart,
    empty: bool,
    pending: &mut Option<PendingVector>,
    handler: &dyn NotificationHandler,
) {
    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();

    match classify(&name) {
        Element::Vector(kind, property_type) => {
            let (Some(device), Some(prop)) = (get_attribute(e, "device"), get_attribute(e, "name"))
            else {
                tracing::warn!("Ignoring <{}> without device or name", name);
                return;
            };
            let mut raw = RawProperty::new(&device, &prop, property_type);
            raw.state = parse_state(&get_attribute(e, "state").unwrap_or_default());
            raw.perm = parse_perm(&get_attribute(e, "perm").unwrap_or_default());
            raw.label = get_attribute(e, "label");
            raw.group = get_attribute(e, "group");
            raw.message = get_attribute(e, "message");

            if empty {
                dispatch(kind, &raw, handler);
            } else {
                *pending = Some(PendingVector {
                    kind,
                    raw,
                    current_item: None,
                });
            }
        }
        Element::Item(_) => {
            let Some(vector) = pending.as_mut() else {
                tracing::debug!("Ignoring <{}> outside a vector", name);
                return;
            };
            let item = get_attribute(e, "name").unwrap_or_default();
            // URL-mode BLOBs carry their location instead of inline content
            let value = get_attribute(e, "url").unwrap_or_default();
            vector.raw.items.push((item, value));
            vector.current_item = (!empty).then(|| vector.raw.items.len() - 1);
        }
        Element::DelProperty => {
            let Some(device) = get_attribute(e, "device") else {
                tracing::warn!("Ignoring <delProperty> without device");
                return;
            };
            if let Some(message) = get_attribute(e, "message") {
                handler.on_message(Some(&device), &message);
            }
            let property = get_attribute(e, "name").filter(|n| !n.is_empty());
            handler.on_delete(&device, property.as_deref());
        }
        Element::Message => {
            if let Some(message) = get_attribute(e, "message") {
                let device = get_attribute(e, "device");
                handler.on_message(device.as_deref(), &message);
            }
        }
        Element::GetProperties | Element::Other => {
            tracing::debug!("Ignoring <{}>", name);
        }
    }
}

fn dispatch(kind: VectorKind, raw: &RawProperty, handler: &dyn NotificationHandler) {
    if let Some(message) = &raw.message {
        handler.on_message(Some(&raw.device), message);
    }
    match kind {
        VectorKind::Define => handler.on_define(raw),
        VectorKind::Update => handler.on_update(raw),
        VectorKind::New => tracing::debug!("Ignoring inbound new vector {}.{}", raw.device, raw.name),
    }
}

/// Helper to get an unescaped attribute from an XML element
fn get_attribute(e: &BytesStart, name: &str) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.as_ref() == name.as_bytes())
        .map(|a| match a.unescape_value() {
            Ok(value) => value.to_string(),
            Err(_) => String::from_utf8_lossy(&a.value).to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PropertyState, PropertyType};
    use std::sync::Mutex;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Debug, Clone, PartialEq)]
    enum Recorded {
        Attach,
        Define(RawProperty),
        Update(RawProperty),
        Delete(String, Option<String>),
        Message(Option<String>, String),
        Detach,
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Recorded>>,
        notify: tokio::sync::Notify,
    }

    impl Recorder {
        fn push(&self, event: Recorded) {
            self.events.lock().unwrap().push(event);
            self.notify.notify_waiters();
        }

        fn events(&self) -> Vec<Recorded> {
            self.events.lock().unwrap().clone()
        }

        async fn wait_for(&self, count: usize) {
            loop {
                let notified = self.notify.notified();
                if self.events.lock().unwrap().len() >= count {
                    return;
                }
                notified.await;
            }
        }
    }

    impl NotificationHandler for Recorder {
        fn on_attach(&self) {
            self.push(Recorded::Attach);
        }
        fn on_define(&self, property: &RawProperty) {
            self.push(Recorded::Define(property.clone()));
        }
        fn on_update(&self, property: &RawProperty) {
            self.push(Recorded::Update(property.clone()));
        }
        fn on_delete(&self, device: &str, property: Option<&str>) {
            self.push(Recorded::Delete(device.to_string(), property.map(String::from)));
        }
        fn on_message(&self, device: Option<&str>, message: &str) {
            self.push(Recorded::Message(device.map(String::from), message.to_string()));
        }
        fn on_detach(&self) {
            self.push(Recorded::Detach);
        }
    }

    const DEFINE_CONNECTION: &str = r#"
        <defSwitchVector device='CCD Imager Simulator' name='CONNECTION' group='Main' label='Connection status' rule='OneOfMany' state='Ok' perm='rw'>
            <defSwitch name='CONNECTED' label='Connected'>Off</defSwitch>
            <defSwitch name='DISCONNECTED' label='Disconnected'>On</defSwitch>
        </defSwitchVector>"#;

    #[tokio::test]
    async fn test_reader_define_and_update() {
        let stream = format!(
            "{}{}",
            DEFINE_CONNECTION,
            r#"<setSwitchVector device='CCD Imager Simulator' name='CONNECTION' state='Busy'>
                <oneSwitch name='CONNECTED'>On</oneSwitch>
            </setSwitchVector>"#
        );
        let recorder = Recorder::default();
        read_notifications(stream.as_bytes(), &recorder).await.unwrap();

        let expected_define = RawProperty::new("CCD Imager Simulator", "CONNECTION", PropertyType::Switch)
            .with_state(PropertyState::Ok)
            .with_item("CONNECTED", "Off")
            .with_item("DISCONNECTED", "On");
        let events = recorder.events();
        assert_eq!(events.len(), 2);
        match &events[0] {
            Recorded::Define(raw) => {
                assert_eq!(raw.items, expected_define.items);
                assert_eq!(raw.state, PropertyState::Ok);
                assert_eq!(raw.label.as_deref(), Some("Connection status"));
                assert_eq!(raw.group.as_deref(), Some("Main"));
            }
            other => panic!("expected define, got {:?}", other),
        }
        assert_eq!(
            events[1],
            Recorded::Update(
                RawProperty::new("CCD Imager Simulator", "CONNECTION", PropertyType::Switch)
                    .with_state(PropertyState::Busy)
                    .with_item("CONNECTED", "On")
            )
        );
    }

    #[tokio::test]
    async fn test_reader_delete_and_messages() {
        let stream = r#"
            <delProperty device='Mount' name='MOUNT_PARK'/>
            <delProperty device='Mount' message='driver unloaded'/>
            <message device='Server' message='Hello'/>
            <setNumberVector device='CCD' name='CCD_EXPOSURE' state='Ok' message='Exposure done'>
                <oneNumber name='EXPOSURE'>0</oneNumber>
            </setNumberVector>"#;
        let recorder = Recorder::default();
        read_notifications(stream.as_bytes(), &recorder).await.unwrap();

        let events = recorder.events();
        assert_eq!(events[0], Recorded::Delete("Mount".into(), Some("MOUNT_PARK".into())));
        assert_eq!(
            events[1],
            Recorded::Message(Some("Mount".into()), "driver unloaded".into())
        );
        assert_eq!(events[2], Recorded::Delete("Mount".into(), None));
        assert_eq!(events[3], Recorded::Message(Some("Server".into()), "Hello".into()));
        assert_eq!(
            events[4],
            Recorded::Message(Some("CCD".into()), "Exposure done".into())
        );
        assert!(matches!(&events[5], Recorded::Update(raw) if raw.items == vec![("EXPOSURE".to_string(), "0".to_string())]));
    }

    #[tokio::test]
    async fn test_reader_empty_items_and_blob_url() {
        let stream = r#"
            <defTextVector device='Server' name='LOAD' state='Idle' perm='rw'>
                <defText name='DRIVER' label='Load driver'></defText>
            </defTextVector>
            <setBLOBVector device='CCD' name='CCD_IMAGE' state='Ok'>
                <oneBLOB name='IMAGE' url='http://host:7624/blob/0x1.fits'/>
            </setBLOBVector>"#;
        let recorder = Recorder::default();
        read_notifications(stream.as_bytes(), &recorder).await.unwrap();

        let events = recorder.events();
        assert!(matches!(&events[0], Recorded::Define(raw)
            if raw.property_type == PropertyType::Text
                && raw.items == vec![("DRIVER".to_string(), String::new())]));
        assert!(matches!(&events[1], Recorded::Update(raw)
            if raw.property_type == PropertyType::Blob
                && raw.items[0].1 == "http://host:7624/blob/0x1.fits"));
    }

    #[tokio::test]
    async fn test_reader_unescapes_values() {
        let stream = r#"<defTextVector device='A &amp; B' name='INFO' state='Ok' perm='ro'><defText name='PATH'>x &lt; y</defText></defTextVector>"#;
        let recorder = Recorder::default();
        read_notifications(stream.as_bytes(), &recorder).await.unwrap();

        match &recorder.events()[0] {
            Recorded::Define(raw) => {
                assert_eq!(raw.device, "A & B");
                assert_eq!(raw.items[0].1, "x < y");
                assert_eq!(raw.perm, crate::Permission::ReadOnly);
            }
            other => panic!("expected define, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tcp_connect_handshake_and_notifications() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            let mut lines = tokio::io::BufReader::new(read_half).lines();
            let handshake = lines.next_line().await.unwrap().unwrap();
            write_half.write_all(DEFINE_CONNECTION.as_bytes()).await.unwrap();
            let command = lines.next_line().await.unwrap().unwrap();
            // Hand the socket back so it stays open until the client shuts down
            (handshake, command, lines, write_half)
        });

        let mut config = SessionConfig::new("127.0.0.1", Some(port));
        config.client_name = "test client".to_string();
        let mut transport = TcpTransport::new(&config);
        transport.start().await.unwrap();

        let recorder = Arc::new(Recorder::default());
        let mut connection = transport
            .connect(&config.target(), recorder.clone())
            .await
            .unwrap();
        assert_eq!(connection.target().port, port);

        recorder.wait_for(2).await;
        assert_eq!(recorder.events()[0], Recorded::Attach);
        assert!(matches!(&recorder.events()[1], Recorded::Define(raw) if raw.name == "CONNECTION"));

        connection.sender().send(b"<getProperties version='2.0'/>").await.unwrap();
        let (handshake, command, _lines, _write_half) = server.await.unwrap();
        assert_eq!(
            handshake,
            r#"<getProperties version="2.0" client="test client"/>"#
        );
        assert_eq!(command, "<getProperties version='2.0'/>");

        assert!(connection.shutdown());
        recorder.wait_for(3).await;
        assert_eq!(recorder.events()[2], Recorded::Detach);
    }

    #[tokio::test]
    async fn test_connect_requires_start() {
        let mut transport = TcpTransport::default();
        let result = transport
            .connect(&SessionConfig::default().target(), Arc::new(Recorder::default()))
            .await;
        assert!(matches!(result, Err(IndigoError::StartFailed(_))));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port with nothing listening
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = SessionConfig::new("127.0.0.1", Some(port));
        let mut transport = TcpTransport::new(&config);
        transport.start().await.unwrap();

        let result = transport
            .connect(&config.target(), Arc::new(Recorder::default()))
            .await;
        assert!(matches!(result, Err(IndigoError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_start_after_disconnect_fails() {
        let (tx, _rx) = mpsc::channel(1);
        let connection = Connection::new(SessionConfig::default().target(), XmlSender::new(tx));
        let mut transport = TcpTransport::default();
        transport.start().await.unwrap();
        transport.start().await.unwrap();

        transport.disconnect(connection).await.unwrap();
        assert!(matches!(
            transport.start().await,
            Err(IndigoError::StartFailed(_))
        ));
        let result = transport
            .connect(&SessionConfig::default().target(), Arc::new(Recorder::default()))
            .await;
        assert!(matches!(result, Err(IndigoError::StartFailed(_))));
    }

    #[tokio::test]
    async fn test_disconnect_after_server_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let config = SessionConfig::new("127.0.0.1", Some(port));
        let mut transport = TcpTransport::new(&config);
        transport.start().await.unwrap();
        let recorder = Arc::new(Recorder::default());
        let connection = transport
            .connect(&config.target(), recorder.clone())
            .await
            .unwrap();
        server.await.unwrap();

        // Attach, then Detach once the reader sees EOF
        recorder.wait_for(2).await;
        assert_eq!(recorder.events()[1], Recorded::Detach);

        transport.disconnect(connection).await.unwrap();
    }

    #[tokio::test]
    async fn test_reader_skips_mismatched_close_tag() {
        let stream = concat!(
            "<defTextVector device='D' name='A'><defText name='X'>v</defTxt></defTextVector>",
            "<defTextVector device='D' name='C'><defText name='Z'>ok</defText></defTextVector>"
        );
        let recorder = Recorder::default();
        read_notifications(stream.as_bytes(), &recorder).await.unwrap();

        assert!(matches!(recorder.events().last(), Some(Recorded::Define(raw))
            if raw.name == "C" && raw.items == vec![("Z".to_string(), "ok".to_string())]));
    }

    #[tokio::test]
    async fn test_reader_resumes_after_syntax_error() {
        let stream = concat!(
            "<defTextVector device='D' name='A'><defText name='X'>v</defText></defTextVector>",
            "<!x>",
            "<defSwitchVector device='D' name='B'><defSwitch name='ON'>On</defSwitch></defSwitchVector>"
        );
        let recorder = Recorder::default();
        read_notifications(stream.as_bytes(), &recorder).await.unwrap();

        let events = recorder.events();
        assert!(matches!(events.first(), Some(Recorded::Define(raw)) if raw.name == "A"));
        assert!(matches!(events.last(), Some(Recorded::Define(raw))
            if raw.name == "B" && raw.property_type == PropertyType::Switch));
    }

    #[tokio::test]
    async fn test_reader_keeps_raw_text_on_bad_entity() {
        let stream = "<defTextVector device='D' name='P'><defText name='Y'>a &bogus; b</defText></defTextVector>";
        let recorder = Recorder::default();
        read_notifications(stream.as_bytes(), &recorder).await.unwrap();

        match &recorder.events()[0] {
            Recorded::Define(raw) => {
                assert_eq!(raw.items, vec![("Y".to_string(), "a &bogus; b".to_string())]);
            }
            other => panic!("expected define, got {:?}", other),
        }
    }
}
