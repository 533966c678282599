//! Raw duplex byte transport for the command stream.
//!
//! One TCP connection to a fixed host and port. The transport knows nothing
//! about commands: it reads chunks, writes whatever bytes it is handed, and
//! reports open/close/bytes-available events to a [`TransportEvents`] sink.
//! There is no reconnect logic; an ended connection is simply reported as
//! closed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Maximum number of bytes handed to the dispatcher per read.
pub const READ_CHUNK_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

/// Callbacks raised by a transport. Invoked from the transport's I/O task.
pub trait TransportEvents: Send + Sync {
    fn opened(&self, direction: Direction);
    fn closed(&self, direction: Direction);
    fn bytes_available(&self, direction: Direction, chunk: &[u8]);
}

/// A duplex byte link the dispatcher can drive.
pub trait Link: Send + Sync {
    /// Starts opening both directions. Never fails to the caller; failures
    /// are reported through `events` as closed directions.
    fn open(&self, events: Arc<dyn TransportEvents>);
    fn close(&self);
    fn is_active(&self) -> bool;
    /// Queues bytes for writing without blocking the caller.
    fn send_bytes(&self, data: Bytes);
}

/// TCP implementation of [`Link`].
#[derive(Clone)]
pub struct TcpTransport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    host: String,
    port: u16,
    read_active: AtomicBool,
    write_active: AtomicBool,
    generation: AtomicU64,
    connection: Mutex<Option<Connection>>,
}

struct Connection {
    generation: u64,
    outgoing: mpsc::UnboundedSender<Bytes>,
    driver: JoinHandle<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                host: host.into(),
                port,
                read_active: AtomicBool::new(false),
                write_active: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                connection: Mutex::new(None),
            }),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.inner.host, self.inner.port)
    }
}

impl Link for TcpTransport {
    fn open(&self, events: Arc<dyn TransportEvents>) {
        let mut connection = lock(&self.inner.connection);
        if connection.is_some() {
            drop(connection);
            debug!("Stream to {} already open", self.address());
            if self.is_active() {
                events.opened(Direction::Read);
                events.opened(Direction::Write);
            }
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            drop(connection);
            warn!("No runtime to open the stream to {} on", self.address());
            events.closed(Direction::Read);
            events.closed(Direction::Write);
            return;
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (outgoing, rx) = mpsc::unbounded_channel();
        let driver = runtime.spawn(drive_connection(
            Arc::downgrade(&self.inner),
            generation,
            events,
            rx,
        ));

        *connection = Some(Connection {
            generation,
            outgoing,
            driver,
        });
    }

    fn close(&self) {
        if let Some(connection) = lock(&self.inner.connection).take() {
            connection.driver.abort();
            info!("Closed stream to {}", self.address());
        }
        self.inner.read_active.store(false, Ordering::Release);
        self.inner.write_active.store(false, Ordering::Release);
    }

    fn is_active(&self) -> bool {
        self.inner.read_active.load(Ordering::Acquire)
            && self.inner.write_active.load(Ordering::Acquire)
    }

    fn send_bytes(&self, data: Bytes) {
        let connection = lock(&self.inner.connection);
        match connection.as_ref() {
            Some(connection) => {
                trace!("Queueing {} bytes for the stream", data.len());
                if connection.outgoing.send(data).is_err() {
                    debug!("Stream writer gone, dropping write");
                }
            }
            None => debug!("Stream not open, dropping {} bytes", data.len()),
        }
    }
}

impl TransportInner {
    /// Clears the connection slot if it still belongs to `generation`.
    fn finish(&self, generation: u64) -> bool {
        let mut connection = lock(&self.connection);
        let is_current = connection
            .as_ref()
            .is_some_and(|c| c.generation == generation);
        if is_current {
            *connection = None;
            self.read_active.store(false, Ordering::Release);
            self.write_active.store(false, Ordering::Release);
        }
        is_current
    }
}

async fn drive_connection(
    inner: Weak<TransportInner>,
    generation: u64,
    events: Arc<dyn TransportEvents>,
    mut outgoing: mpsc::UnboundedReceiver<Bytes>,
) {
    let Some(address) = inner.upgrade().map(|i| (i.host.clone(), i.port)) else {
        return;
    };

    let stream = match TcpStream::connect((address.0.as_str(), address.1)).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed opening stream to {}:{}: {}", address.0, address.1, e);
            if inner.upgrade().is_some_and(|i| i.finish(generation)) {
                events.closed(Direction::Read);
                events.closed(Direction::Write);
            }
            return;
        }
    };

    let sock_ref = socket2::SockRef::from(&stream);
    if let Err(e) = sock_ref.set_nodelay(true).and_then(|_| sock_ref.set_keepalive(true)) {
        debug!("Could not tune stream socket: {}", e);
    }

    let (mut reader, mut writer) = stream.into_split();

    match inner.upgrade() {
        Some(inner) => {
            inner.read_active.store(true, Ordering::Release);
            inner.write_active.store(true, Ordering::Release);
        }
        None => return,
    }
    info!("Opened stream to {}:{}", address.0, address.1);
    events.opened(Direction::Read);
    events.opened(Direction::Write);

    let ended = tokio::select! {
        _ = read_loop(&mut reader, events.as_ref()) => Direction::Read,
        _ = write_loop(&mut writer, &mut outgoing) => Direction::Write,
    };
    debug!("Stream {:?} direction ended", ended);

    if inner.upgrade().is_some_and(|i| i.finish(generation)) {
        events.closed(ended);
        let other = match ended {
            Direction::Read => Direction::Write,
            Direction::Write => Direction::Read,
        };
        events.closed(other);
    }
}

async fn read_loop(reader: &mut OwnedReadHalf, events: &dyn TransportEvents) {
    let mut buf = [0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                info!("Stream ended by peer");
                return;
            }
            Ok(n) => events.bytes_available(Direction::Read, &buf[..n]),
            Err(e) => {
                warn!("Stream read error: {}", e);
                return;
            }
        }
    }
}

async fn write_loop(writer: &mut OwnedWriteHalf, outgoing: &mut mpsc::UnboundedReceiver<Bytes>) {
    while let Some(data) = outgoing.recv().await {
        if let Err(e) = writer.write_all(&data).await {
            warn!("Stream write error: {}", e);
            return;
        }
    }
}
