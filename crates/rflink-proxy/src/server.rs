//! Relay server.
//!
//! One upstream gateway connection is shared by any number of downstream
//! TCP clients:
//!
//! - every gateway report is broadcast verbatim to all clients
//! - client lines carrying a device command go through the upstream
//!   connection's ack coordinator, and an `OK` line is written back to the
//!   client that sent it once the gateway acknowledges
//! - any other client line is passed through unchanged
//!
//! A supervisor task keeps the upstream connection alive, retrying at a
//! fixed interval until the server shuts down.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rflink_client::{connect, ClientError, Connection, Handlers};
use rflink_metrics::metric_defs;
use rflink_protocol::{decode_tx_packet, is_valid_packet, DeviceCommand, DELIM};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::ProxyConfig;
use crate::error::ProxyResult;

/// Line written back to a client whose command was acknowledged.
pub const CLIENT_ACK: &str = "20;00;OK;";

// ============================================================================
// Shared state
// ============================================================================

/// A registered downstream client.
struct ClientHandle {
    peer: SocketAddr,
    sender: mpsc::UnboundedSender<String>,
}

struct ProxyState {
    config: ProxyConfig,
    clients: Mutex<HashMap<u64, ClientHandle>>,
    next_client_id: AtomicU64,
    upstream: RwLock<Option<Arc<Connection>>>,
    last_error: Mutex<Option<String>>,
    shutdown: watch::Sender<bool>,
}

impl ProxyState {
    fn register(&self, peer: SocketAddr, sender: mpsc::UnboundedSender<String>) -> u64 {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        self.clients.lock().insert(id, ClientHandle { peer, sender });
        metrics::gauge!(metric_defs::RELAY_CLIENTS.name).increment(1.0);
        id
    }

    fn unregister(&self, id: u64) {
        if self.clients.lock().remove(&id).is_some() {
            metrics::gauge!(metric_defs::RELAY_CLIENTS.name).decrement(1.0);
        }
    }

    fn upstream(&self) -> Option<Arc<Connection>> {
        self.upstream.read().clone()
    }

    fn set_upstream(&self, upstream: Option<Arc<Connection>>) {
        *self.upstream.write() = upstream;
    }

    fn record_error(&self, err: impl ToString) {
        *self.last_error.lock() = Some(err.to_string());
    }

    fn is_closing(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Send a gateway line to every connected client.
    fn broadcast(&self, line: &str) {
        if line.contains("PONG") {
            debug!("forwarding packet {} to clients", line);
        } else {
            info!("forwarding packet {} to clients", line);
        }
        metrics::counter!(metric_defs::RELAY_BROADCASTS.name).increment(1);

        // snapshot so a disconnecting client cannot invalidate the iteration
        let clients: Vec<(SocketAddr, mpsc::UnboundedSender<String>)> = self
            .clients
            .lock()
            .values()
            .map(|c| (c.peer, c.sender.clone()))
            .collect();

        let data = format!("{}\r\n", line);
        for (peer, sender) in clients {
            if sender.send(data.clone()).is_err() {
                debug!(peer = %peer, "client writer already closed");
            }
        }
    }

    /// Handle one line received from a client.
    async fn handle_client_line(
        &self,
        peer: SocketAddr,
        line: &str,
        reply: &mpsc::UnboundedSender<String>,
    ) {
        let mut line = line.to_string();
        // some clients omit the final delimiter
        if !line.ends_with(DELIM) {
            line.push_str(DELIM);
        }

        if line.contains("PING") {
            debug!(peer = %peer, "got line from client: {}", line);
        } else {
            info!(peer = %peer, "got line from client: {}", line);
        }

        if !is_valid_packet(&line) {
            warn!(peer = %peer, "dropping invalid packet: {}", line);
            return;
        }
        let packet = match decode_tx_packet(&line) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(peer = %peer, "failed to decode {}: {}", line, e);
                return;
            }
        };

        let Some(upstream) = self.upstream() else {
            warn!(peer = %peer, "not connected to gateway, dropping {}", line);
            return;
        };

        match &packet.command {
            Some(command) => {
                // built from the decoded fields so the protocol name is kept as sent
                let command = DeviceCommand::new(packet.device_id(), command.clone());
                self.forward_command(&upstream, peer, &command, reply).await;
            }
            None => {
                if let Err(e) = upstream.send_raw_packet(&line).await {
                    warn!(peer = %peer, "failed to forward {}: {}", line, e);
                }
            }
        }
    }

    /// Send a client command upstream `repeat` times. Only the first
    /// acknowledgment is reported to the client.
    async fn forward_command(
        &self,
        upstream: &Connection,
        peer: SocketAddr,
        command: &DeviceCommand,
        reply: &mpsc::UnboundedSender<String>,
    ) {
        let device_id = &command.device;
        let action = &command.command;
        debug!(peer = %peer, "forwarding command {} {} upstream", device_id, action);
        match upstream.send_device_command_ack(command).await {
            Ok(outcome) if outcome.is_ok() => {
                let _ = reply.send(format!("{}\r\n", CLIENT_ACK));
            }
            Ok(outcome) => {
                warn!(peer = %peer, "command {} {} {}", device_id, action, outcome);
            }
            Err(e) => {
                warn!(peer = %peer, "failed to send {} {}: {}", device_id, action, e);
                return;
            }
        }

        for _ in 1..self.config.repeat {
            if let Err(e) = upstream.send_device_command_ack(command).await {
                warn!(peer = %peer, "failed to repeat {} {}: {}", device_id, action, e);
                return;
            }
        }
    }
}

// ============================================================================
// Client sessions
// ============================================================================

async fn handle_client(
    state: Arc<ProxyState>,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) {
    let (reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let id = state.register(peer, tx.clone());
    info!(peer = %peer, "client connected");

    let writer_task = tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if let Err(e) = writer.write_all(data.as_bytes()).await {
                debug!(peer = %peer, "write failed: {}", e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => match read {
                Ok(0) => break,
                Ok(_) => {
                    let line = match std::str::from_utf8(&buf) {
                        Ok(line) => line.trim(),
                        Err(_) => {
                            warn!(peer = %peer, "dropping undecodable line {:?}", buf);
                            continue;
                        }
                    };
                    if line.is_empty() {
                        continue;
                    }
                    state.handle_client_line(peer, line, &tx).await;
                }
                Err(e) => {
                    warn!(peer = %peer, "read failed: {}", e);
                    break;
                }
            },
            _ = shutdown.changed() => break,
        }
    }

    state.unregister(id);
    drop(tx);
    let _ = writer_task.await;
    info!(peer = %peer, "client disconnected");
}

async fn accept_loop(
    state: Arc<ProxyState>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    // a clone keeps the unseen shutdown signal
                    sessions.spawn(handle_client(state.clone(), stream, peer, shutdown.clone()));
                }
                Err(e) => warn!("accept failed: {}", e),
            },
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            _ = shutdown.changed() => break,
        }
    }

    drop(listener);
    while sessions.join_next().await.is_some() {}
}

// ============================================================================
// Upstream supervision
// ============================================================================

async fn connect_upstream(
    state: &Arc<ProxyState>,
    lost: oneshot::Sender<()>,
) -> ProxyResult<Arc<Connection>> {
    let weak: Weak<ProxyState> = Arc::downgrade(state);
    let on_lost = weak.clone();
    let handlers = Handlers::new()
        .without_events()
        .on_raw(move |line| {
            if let Some(state) = weak.upgrade() {
                state.broadcast(line);
            }
        })
        .on_disconnect(move |err| {
            if let (Some(state), Some(err)) = (on_lost.upgrade(), err) {
                state.record_error(&err);
            }
            let _ = lost.send(());
        });

    let endpoint = &state.config.endpoint;
    let timeout = state.config.connect_timeout();
    info!("connecting to {}", endpoint);
    match tokio::time::timeout(
        timeout,
        connect(endpoint, handlers, state.config.connection_config()),
    )
    .await
    {
        Ok(result) => Ok(result?),
        Err(_) => Err(ClientError::ConnectTimeout(timeout).into()),
    }
}

async fn supervise(state: Arc<ProxyState>, mut shutdown: watch::Receiver<bool>) {

    while !state.is_closing() {
        let (lost_tx, lost_rx) = oneshot::channel();
        let attempt = tokio::select! {
            attempt = connect_upstream(&state, lost_tx) => attempt,
            _ = shutdown.changed() => break,
        };

        match attempt {
            Ok(upstream) => {
                info!("connected to gateway");
                metrics::counter!(metric_defs::RELAY_RECONNECTS.name, "result" => "connected")
                    .increment(1);
                state.set_upstream(Some(upstream.clone()));

                tokio::select! {
                    _ = lost_rx => warn!("lost connection to gateway"),
                    _ = shutdown.changed() => {
                        state.set_upstream(None);
                        upstream.close().await;
                        break;
                    }
                }
                state.set_upstream(None);
            }
            Err(e) => {
                error!("connection to gateway failed: {}", e);
                metrics::counter!(metric_defs::RELAY_RECONNECTS.name, "result" => "failed")
                    .increment(1);
                state.record_error(&e);

                let interval = state.config.reconnect_interval();
                info!("retrying in {:?}", interval);
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }
    debug!("upstream supervisor stopped");
}

// ============================================================================
// Public API
// ============================================================================

/// A running relay.
pub struct ProxyHandle {
    state: Arc<ProxyState>,
    local_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl ProxyHandle {
    /// Address the client listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn client_count(&self) -> usize {
        self.state.clients.lock().len()
    }

    pub fn upstream_connected(&self) -> bool {
        self.state.upstream().is_some()
    }

    /// The error of the most recent failed or lost upstream connection.
    pub fn last_error(&self) -> Option<String> {
        self.state.last_error.lock().clone()
    }

    /// Stop accepting clients, close every client and the upstream
    /// connection, and wait for all tasks to finish. No reconnect is
    /// attempted afterwards.
    pub async fn shutdown(self) {
        info!("shutting down");
        self.state.shutdown.send_replace(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

impl std::fmt::Debug for ProxyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyHandle")
            .field("local_addr", &self.local_addr)
            .field("clients", &self.client_count())
            .field("upstream_connected", &self.upstream_connected())
            .finish()
    }
}

/// Bind the client listener and start the relay.
pub async fn start(config: ProxyConfig) -> ProxyResult<ProxyHandle> {
    config.validate()?;
    let listener = TcpListener::bind(config.listen_addr()).await?;
    let local_addr = listener.local_addr()?;
    info!("serving on {}", local_addr);

    let (shutdown, _) = watch::channel(false);
    let state = Arc::new(ProxyState {
        config,
        clients: Mutex::new(HashMap::new()),
        next_client_id: AtomicU64::new(0),
        upstream: RwLock::new(None),
        last_error: Mutex::new(None),
        shutdown,
    });

    // subscribed before spawning so an early shutdown is still seen
    let tasks = vec![
        tokio::spawn(supervise(state.clone(), state.shutdown.subscribe())),
        tokio::spawn(accept_loop(state.clone(), listener, state.shutdown.subscribe())),
    ];
    Ok(ProxyHandle {
        state,
        local_addr,
        tasks,
    })
}
