//! A running gateway connection.
//!
//! [`Connection::spawn`] takes any duplex byte stream, starts a reader task
//! that frames and decodes incoming packets, and exposes the send side.
//! Incoming packets flow through, in order:
//!
//! 1. the ack coordinator, for `OK` / `CMD UNKNOWN` responses (consumed)
//! 2. the packet callback, with the decoded packet
//! 3. the event pipeline, when events are enabled
//! 4. the raw callback, with the original line

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rflink_metrics::{metric_defs, ConnectionLabels};
use rflink_protocol::{
    decode_packet, DecodedPacket, DeviceCommand, Event, Origin, PacketError, PacketFramer,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::ack::{AckCoordinator, CommandOutcome};
use crate::config::{ConnectionConfig, Endpoint};
use crate::error::{ClientError, ClientResult};
use crate::pipeline::{EventDispatch, EventPipeline};
use crate::transport;

/// Callback receiving every decoded, non-response packet.
pub type PacketCallback = Arc<dyn Fn(&DecodedPacket) + Send + Sync>;

/// Callback receiving the original line of every gateway packet that is not
/// a command response.
pub type RawCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Called once when the connection ends, with the error that ended it, or
/// `None` for a clean close.
pub type DisconnectCallback = Box<dyn FnOnce(Option<io::Error>) + Send>;

const READ_BUFFER: usize = 1024;

/// Consumers of a connection's traffic.
///
/// Events are printed to stdout unless a callback is set or they are
/// turned off with [`Handlers::without_events`].
#[derive(Default)]
pub struct Handlers {
    packet: Option<PacketCallback>,
    events: EventDispatch,
    raw: Option<RawCallback>,
    disconnect: Option<DisconnectCallback>,
}

impl Handlers {
    pub fn new() -> Self {
        Handlers::default()
    }

    pub fn on_packet(mut self, callback: impl Fn(&DecodedPacket) + Send + Sync + 'static) -> Self {
        self.packet = Some(Arc::new(callback));
        self
    }

    /// Deliver events to `callback`.
    pub fn on_event(mut self, callback: impl Fn(Event) + Send + Sync + 'static) -> Self {
        self.events = EventDispatch::Callback(Arc::new(callback));
        self
    }

    /// Print events to stdout.
    pub fn print_events(mut self) -> Self {
        self.events = EventDispatch::Print;
        self
    }

    /// Skip event decomposition entirely.
    pub fn without_events(mut self) -> Self {
        self.events = EventDispatch::Disabled;
        self
    }

    pub fn on_raw(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.raw = Some(Arc::new(callback));
        self
    }

    pub fn on_disconnect(mut self, callback: impl FnOnce(Option<io::Error>) + Send + 'static) -> Self {
        self.disconnect = Some(Box::new(callback));
        self
    }
}

/// State shared between the connection handle and its reader task.
struct Shared {
    acks: AckCoordinator,
    pipeline: EventPipeline,
    packet_callback: Option<PacketCallback>,
    raw_callback: Option<RawCallback>,
    disconnect: parking_lot::Mutex<Option<DisconnectCallback>>,
    labels: ConnectionLabels,
    closed: AtomicBool,
}

impl Shared {
    fn handle_line(&self, line: &str) {
        metrics::counter!(metric_defs::PACKETS_RECEIVED.name, &self.labels.to_labels()).increment(1);
        debug!("got packet: {}", line);

        let packet = match decode_packet(line) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("failed to parse packet data {}: {}", line, e);
                return;
            }
        };

        if let Some(ok) = packet.ok() {
            debug!("command response: {}", line);
            let outcome = if ok { "ok" } else { "unknown" };
            metrics::counter!(
                metric_defs::COMMANDS_ACKED.name,
                &self.labels.with(&[("outcome", outcome.to_string())])
            )
            .increment(1);
            self.acks.resolve(ok);
            return;
        }

        if let Some(callback) = &self.packet_callback {
            callback(&packet);
        }
        self.pipeline.process(&packet, &self.labels);
        if packet.node != Origin::Master {
            if let Some(callback) = &self.raw_callback {
                callback(line);
            }
        }
    }

    fn handle_invalid(&self, err: &PacketError) {
        warn!("dropping {}", err);
        metrics::counter!(metric_defs::INVALID_LINES.name, &self.labels.to_labels()).increment(1);
    }

    /// Tear down after the transport ended. Runs the disconnect callback at
    /// most once.
    fn disconnected(&self, err: Option<io::Error>) {
        self.closed.store(true, Ordering::Release);
        self.acks.close();
        let callback = self.disconnect.lock().take();
        if let Some(callback) = callback {
            callback(err);
        }
    }
}

async fn read_loop<R: AsyncRead + Unpin>(mut reader: R, shared: Arc<Shared>) {
    let mut framer = PacketFramer::new();
    let mut buf = [0u8; READ_BUFFER];

    let result = loop {
        match reader.read(&mut buf).await {
            Ok(0) => break None,
            Ok(n) => {
                framer.push(&buf[..n]);
                while let Some(line) = framer.decode() {
                    match line {
                        Ok(line) => shared.handle_line(&line),
                        Err(e) => shared.handle_invalid(&e),
                    }
                }
            }
            Err(e) => break Some(e),
        }
    };

    match &result {
        Some(e) => error!("disconnected due to exception: {}", e),
        None => info!("disconnected because of close/abort."),
    }
    shared.disconnected(result);
}

/// A connection to a gateway.
pub struct Connection {
    shared: Arc<Shared>,
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Start handling a transport. Must be called within a tokio runtime.
    pub fn spawn<T>(
        transport: T,
        handlers: Handlers,
        config: ConnectionConfig,
        labels: ConnectionLabels,
    ) -> Arc<Connection>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(transport);
        let shared = Arc::new(Shared {
            acks: AckCoordinator::new(config.ack_timeout),
            pipeline: EventPipeline::new(config.ignore, handlers.events),
            packet_callback: handlers.packet,
            raw_callback: handlers.raw,
            disconnect: parking_lot::Mutex::new(handlers.disconnect),
            labels,
            closed: AtomicBool::new(false),
        });

        debug!("connected");
        let task = tokio::spawn(read_loop(reader, shared.clone()));
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        Arc::new(Connection {
            shared,
            writer: Mutex::new(writer),
            reader: parking_lot::Mutex::new(Some(task)),
        })
    }

    pub fn labels(&self) -> &ConnectionLabels {
        &self.shared.labels
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Write one packet line, appending the terminator.
    pub async fn send_raw_packet(&self, packet: &str) -> ClientResult<()> {
        if self.is_closed() {
            return Err(ClientError::Disconnected);
        }
        debug!("writing data: {:?}", packet);
        let data = PacketFramer::encode_packet(packet);
        let mut writer = self.writer.lock().await;
        writer.write_all(&data).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn write_command(&self, command: &DeviceCommand) -> ClientResult<()> {
        debug!("sending command: {:?}", command);
        self.send_raw_packet(&command.encode()).await?;
        metrics::counter!(metric_defs::COMMANDS_SENT.name, &self.shared.labels.to_labels()).increment(1);
        Ok(())
    }

    /// Send a command to a device without waiting for acknowledgment.
    pub async fn send_command(&self, device_id: &str, action: &str) -> ClientResult<()> {
        let command = DeviceCommand::parse(device_id, action)?;
        self.write_command(&command).await
    }

    /// Send an already built command without waiting for acknowledgment.
    pub async fn send_device_command(&self, command: &DeviceCommand) -> ClientResult<()> {
        self.write_command(command).await
    }

    /// Send a command and wait for the gateway's acknowledgment.
    ///
    /// Only one command is in flight per connection; concurrent callers
    /// queue in call order. A timeout or a closed connection is reported as
    /// an outcome, not an error.
    pub async fn send_command_ack(&self, device_id: &str, action: &str) -> ClientResult<CommandOutcome> {
        let command = DeviceCommand::parse(device_id, action)?;
        self.send_device_command_ack(&command).await
    }

    /// Send an already built command and wait for the gateway's
    /// acknowledgment. The protocol name is written as given.
    pub async fn send_device_command_ack(&self, command: &DeviceCommand) -> ClientResult<CommandOutcome> {
        let _guard = self.shared.acks.acquire().await;
        let signal = self.shared.acks.arm();
        let started = Instant::now();
        if let Err(e) = self.write_command(command).await {
            self.shared.acks.disarm();
            return Err(e);
        }

        let outcome = self.shared.acks.wait(signal).await;
        let labels = self.shared.labels.to_labels();
        match outcome {
            CommandOutcome::Ack | CommandOutcome::Nack => {
                metrics::histogram!(metric_defs::COMMAND_ACK_LATENCY.name, &labels)
                    .record(started.elapsed().as_secs_f64() * 1000.0);
            }
            CommandOutcome::Timeout => {
                metrics::counter!(metric_defs::COMMAND_TIMEOUTS.name, &labels).increment(1);
            }
            CommandOutcome::Disconnected => {}
        }
        Ok(outcome)
    }

    /// Close the transport. Pending acknowledgments resolve as
    /// [`CommandOutcome::Disconnected`] and the disconnect callback runs
    /// with `None` unless the transport already failed.
    pub async fn close(&self) {
        let task = self.reader.lock().take();
        if let Some(task) = task {
            task.abort();
        }
        {
            let mut writer = self.writer.lock().await;
            let _ = writer.shutdown().await;
        }
        self.shared.disconnected(None);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("labels", &self.shared.labels)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Open a connection to `endpoint` and start handling it.
pub async fn connect(
    endpoint: &Endpoint,
    handlers: Handlers,
    config: ConnectionConfig,
) -> ClientResult<Arc<Connection>> {
    info!("connecting to {} ({})", endpoint, endpoint.transport());
    let transport = transport::open(endpoint).await?;
    Ok(Connection::spawn(transport, handlers, config, endpoint.labels()))
}
