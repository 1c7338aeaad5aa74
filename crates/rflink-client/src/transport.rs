//! Byte transports to the gateway.
//!
//! TCP endpoints use a tokio socket directly. Serial ports are opened with
//! the blocking `serialport` crate and bridged onto an in-memory duplex
//! stream by two worker threads, so the rest of the crate only ever sees an
//! `AsyncRead + AsyncWrite` stream.

use std::io::{self, Read, Write};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::config::Endpoint;
use crate::error::ClientResult;

/// A bidirectional byte stream to the gateway.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

pub type BoxedTransport = Box<dyn Transport>;

/// Serial read timeout; bounds how long the reader thread takes to notice
/// that the connection was closed.
const SERIAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Buffer size of the serial duplex bridge.
const BRIDGE_BUFFER: usize = 4096;

/// Open a transport to the endpoint.
pub async fn open(endpoint: &Endpoint) -> ClientResult<BoxedTransport> {
    match endpoint {
        Endpoint::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port)).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        Endpoint::Serial { path, baud } => Ok(Box::new(open_serial(path, *baud)?)),
    }
}

/// Slot for the error that ended a serial bridge.
type ErrorSlot = Arc<Mutex<Option<io::Error>>>;

/// A serial port bridged onto an in-memory stream.
///
/// When the port fails, the bridge closes and the read that would see end
/// of stream returns the port's error instead.
#[derive(Debug)]
pub struct SerialStream {
    inner: DuplexStream,
    error: ErrorSlot,
}

impl SerialStream {
    fn new(inner: DuplexStream, error: ErrorSlot) -> Self {
        SerialStream { inner, error }
    }
}

impl AsyncRead for SerialStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if buf.filled().len() == before && buf.remaining() > 0 => {
                match this.error.lock().take() {
                    Some(err) => Poll::Ready(Err(err)),
                    None => Poll::Ready(Ok(())),
                }
            }
            other => other,
        }
    }
}

impl AsyncWrite for SerialStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Open a serial port and bridge it onto an async stream.
pub fn open_serial(path: &str, baud: u32) -> ClientResult<SerialStream> {
    let port = serialport::new(path, baud)
        .timeout(SERIAL_POLL_INTERVAL)
        .open()?;
    let mut serial_rx = port.try_clone()?;
    let mut serial_tx = port;

    let (local, remote) = tokio::io::duplex(BRIDGE_BUFFER);
    let (mut remote_rx, mut remote_tx) = tokio::io::split(remote);
    let runtime = tokio::runtime::Handle::current();
    let closed = Arc::new(AtomicBool::new(false));
    let error: ErrorSlot = Arc::new(Mutex::new(None));

    // serial -> stream
    let reader_closed = closed.clone();
    let reader_error = error.clone();
    let name = path.to_string();
    thread::Builder::new()
        .name(format!("serial-rx {}", path))
        .spawn(move || {
            let mut buf = [0u8; 256];
            while !reader_closed.load(Ordering::Acquire) {
                match serial_rx.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if runtime.block_on(remote_tx.write_all(&buf[..n])).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                    Err(e) => {
                        warn!("[serial] read error on {}: {}", name, e);
                        reader_error.lock().get_or_insert(e);
                        break;
                    }
                }
            }
            reader_closed.store(true, Ordering::Release);
            let _ = runtime.block_on(remote_tx.shutdown());
            debug!("[serial] reader for {} stopped", name);
        })?;

    // stream -> serial
    let (tx, rx) = crossbeam_channel::unbounded::<Vec<u8>>();
    tokio::spawn(async move {
        let mut buf = [0u8; 256];
        loop {
            match remote_rx.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let writer_closed = closed;
    let writer_error = error.clone();
    let name = path.to_string();
    thread::Builder::new()
        .name(format!("serial-tx {}", path))
        .spawn(move || {
            while let Ok(data) = rx.recv() {
                if let Err(e) = serial_tx.write_all(&data).and_then(|_| serial_tx.flush()) {
                    warn!("[serial] write error on {}: {}", name, e);
                    writer_error.lock().get_or_insert(e);
                    break;
                }
            }
            // stops the reader, which closes the stream
            writer_closed.store(true, Ordering::Release);
            debug!("[serial] writer for {} stopped", name);
        })?;

    Ok(SerialStream::new(local, error))
}
