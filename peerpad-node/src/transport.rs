//! TCP transport: a host listens and advertises its session address; a guest resolves that
//! address over discovery, connects and introduces itself with a hello. The host acks the
//! hello only once its session accepts the connection. Frames pass through whole.

use std::collections::HashMap;
use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use peerpad_core::wire::{frame_len, LEN_SIZE, MAX_FRAME_LEN};
use peerpad_core::{Address, ConnectionId, Transport, TransportError, TransportEvent};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::discovery;

const HELLO_VERSION: u8 = 1;
const HELLO_ACK: u8 = 0x06;
const MAX_HELLO_LEN: usize = 1024;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
/// Frames queued for writing across all connections before `send` reports `Busy`.
pub const OUTBOUND_FRAMES: usize = 64;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub bind_ip: Ipv4Addr,
    pub discovery_port: u16,
    pub transport_port: u16,
    pub connect_timeout: Duration,
}

impl From<&Config> for TransportConfig {
    fn from(c: &Config) -> Self {
        Self {
            bind_ip: Ipv4Addr::UNSPECIFIED,
            discovery_port: c.discovery_port,
            transport_port: c.transport_port,
            connect_timeout: c.connect_timeout(),
        }
    }
}

/// First thing a guest writes on a new connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Hello {
    version: u8,
    from: Address,
    target: Address,
}

enum Command {
    Open(Option<Address>),
    Connect(ConnectionId, Address),
    Accept(ConnectionId),
    Send(ConnectionId, QueuedFrame),
    Close(ConnectionId),
    Shutdown,
}

enum Internal {
    Dialed {
        conn: ConnectionId,
        result: io::Result<TcpStream>,
    },
    Accepted {
        stream: TcpStream,
        from: Address,
    },
}

/// Bytes on their way to a socket. The permit returns to the outbound gate once written.
struct QueuedFrame {
    bytes: Vec<u8>,
    _permit: Option<OwnedSemaphorePermit>,
}

/// Handle to the background transport task. Calls are queued; outcomes arrive on the
/// event receiver returned by [`TcpTransport::spawn`].
pub struct TcpTransport {
    commands: mpsc::UnboundedSender<Command>,
    ids: Arc<AtomicU64>,
    outbound: Arc<Semaphore>,
}

impl TcpTransport {
    /// Start the background task. Must be called inside a tokio runtime.
    pub fn spawn(config: TransportConfig) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let ids = Arc::new(AtomicU64::new(0));
        tokio::spawn(run_transport(config, cmd_rx, event_tx, ids.clone()));
        (
            Self {
                commands: cmd_tx,
                ids,
                outbound: Arc::new(Semaphore::new(OUTBOUND_FRAMES)),
            },
            event_rx,
        )
    }

    /// Has a free permit whenever `send` would not be `Busy`. Await a permit from it and
    /// drop it before sending.
    pub fn outbound_gate(&self) -> Arc<Semaphore> {
        self.outbound.clone()
    }

    fn command(&self, cmd: Command) -> Result<(), TransportError> {
        self.commands.send(cmd).map_err(|_| TransportError::Closed)
    }
}

fn next_id(ids: &AtomicU64) -> ConnectionId {
    ConnectionId(ids.fetch_add(1, Ordering::Relaxed) + 1)
}

impl Transport for TcpTransport {
    fn open(&mut self, address: Option<&Address>) -> Result<(), TransportError> {
        self.command(Command::Open(address.cloned()))
    }

    fn connect(&mut self, target: &Address) -> Result<ConnectionId, TransportError> {
        let conn = next_id(&self.ids);
        self.command(Command::Connect(conn, target.clone()))?;
        Ok(conn)
    }

    fn accept(&mut self, conn: ConnectionId) {
        let _ = self.command(Command::Accept(conn));
    }

    fn send(&mut self, conn: ConnectionId, bytes: Vec<u8>) -> Result<(), TransportError> {
        let permit = self
            .outbound
            .clone()
            .try_acquire_owned()
            .map_err(|_| TransportError::Busy)?;
        self.command(Command::Send(
            conn,
            QueuedFrame {
                bytes,
                _permit: Some(permit),
            },
        ))
    }

    fn close(&mut self, conn: ConnectionId) {
        let _ = self.command(Command::Close(conn));
    }

    fn shutdown(&mut self) {
        let _ = self.command(Command::Shutdown);
    }
}

struct Peer {
    writer: mpsc::Sender<QueuedFrame>,
    reader: JoinHandle<()>,
}

struct Listening {
    acceptor: JoinHandle<()>,
    beacon: JoinHandle<()>,
}

struct State {
    config: TransportConfig,
    events: mpsc::UnboundedSender<TransportEvent>,
    internal: mpsc::UnboundedSender<Internal>,
    ids: Arc<AtomicU64>,
    local: Option<Address>,
    listening: Option<Listening>,
    dialing: HashMap<ConnectionId, JoinHandle<()>>,
    /// Inbound connections whose hello was read but not yet answered.
    unanswered: HashMap<ConnectionId, TcpStream>,
    peers: HashMap<ConnectionId, Peer>,
}

async fn run_transport(
    config: TransportConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
    ids: Arc<AtomicU64>,
) {
    let (internal_tx, mut internal_rx) = mpsc::unbounded_channel();
    let mut state = State {
        config,
        events,
        internal: internal_tx,
        ids,
        local: None,
        listening: None,
        dialing: HashMap::new(),
        unanswered: HashMap::new(),
        peers: HashMap::new(),
    };
    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(cmd) => state.apply(cmd).await,
                None => break,
            },
            Some(msg) = internal_rx.recv() => state.on_internal(msg),
        }
    }
    state.shutdown();
}

impl State {
    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    async fn apply(&mut self, cmd: Command) {
        match cmd {
            Command::Open(Some(address)) => self.listen(address).await,
            Command::Open(None) => {
                let address = Address::new(format!("peerpad-guest-{}", uuid::Uuid::new_v4().simple()));
                self.local = Some(address.clone());
                self.emit(TransportEvent::Ready { address });
            }
            Command::Connect(conn, target) => self.start_dial(conn, target),
            Command::Accept(conn) => match self.unanswered.remove(&conn) {
                Some(stream) => {
                    debug!(conn = conn.0, "acking hello");
                    self.attach(conn, stream, Some(HELLO_ACK));
                    self.emit(TransportEvent::Opened { conn });
                }
                None => debug!(conn = conn.0, "accept for unknown connection ignored"),
            },
            Command::Send(conn, frame) => match self.peers.get(&conn) {
                Some(peer) => {
                    if peer.writer.try_send(frame).is_err() {
                        debug!(conn = conn.0, "writer gone; frame dropped");
                    }
                }
                None => debug!(conn = conn.0, "send on unknown connection dropped"),
            },
            Command::Close(conn) => {
                if let Some(task) = self.dialing.remove(&conn) {
                    task.abort();
                }
                if self.unanswered.remove(&conn).is_some() {
                    debug!(conn = conn.0, "hello left unanswered");
                }
                if let Some(peer) = self.peers.remove(&conn) {
                    peer.reader.abort();
                    debug!(conn = conn.0, "connection closed");
                }
            }
            Command::Shutdown => self.shutdown(),
        }
    }

    async fn listen(&mut self, address: Address) {
        self.shutdown();
        let listener = match TcpListener::bind((self.config.bind_ip, self.config.transport_port)).await {
            Ok(l) => l,
            Err(e) => {
                warn!(port = self.config.transport_port, error = %e, "cannot listen");
                self.emit(TransportEvent::Error {
                    conn: None,
                    reason: format!("cannot listen on port {}: {e}", self.config.transport_port),
                });
                return;
            }
        };
        let port = match listener.local_addr() {
            Ok(a) => a.port(),
            Err(e) => {
                self.emit(TransportEvent::Error {
                    conn: None,
                    reason: e.to_string(),
                });
                return;
            }
        };
        info!(%address, port, "listening");
        let acceptor = tokio::spawn(accept_loop(listener, address.clone(), self.internal.clone()));
        let discovery_port = self.config.discovery_port;
        let beacon_address = address.clone();
        let beacon = tokio::spawn(async move {
            if let Err(e) = discovery::advertise(beacon_address, discovery_port, port).await {
                warn!(error = %e, "discovery beacon stopped");
            }
        });
        self.listening = Some(Listening { acceptor, beacon });
        self.local = Some(address.clone());
        self.emit(TransportEvent::Ready { address });
    }

    fn start_dial(&mut self, conn: ConnectionId, target: Address) {
        let Some(from) = self.local.clone() else {
            self.emit(TransportEvent::Error {
                conn: Some(conn),
                reason: "transport is not open".to_string(),
            });
            return;
        };
        let config = self.config.clone();
        let internal = self.internal.clone();
        let task = tokio::spawn(async move {
            let result = dial(&target, &from, &config).await;
            let _ = internal.send(Internal::Dialed { conn, result });
        });
        self.dialing.insert(conn, task);
    }

    fn on_internal(&mut self, msg: Internal) {
        match msg {
            Internal::Dialed { conn, result } => {
                if self.dialing.remove(&conn).is_none() {
                    return;
                }
                match result {
                    Ok(stream) => {
                        self.emit(TransportEvent::Opened { conn });
                        self.attach(conn, stream, None);
                    }
                    Err(e) => self.emit(TransportEvent::Error {
                        conn: Some(conn),
                        reason: e.to_string(),
                    }),
                }
            }
            Internal::Accepted { stream, from } => {
                if self.listening.is_none() {
                    return;
                }
                let conn = next_id(&self.ids);
                self.unanswered.insert(conn, stream);
                self.emit(TransportEvent::Incoming { conn, from });
            }
        }
    }

    /// Start the writer and reader tasks. `greeting` goes out ahead of any frame.
    fn attach(&mut self, conn: ConnectionId, stream: TcpStream, greeting: Option<u8>) {
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        // One slot more than the gate hands out, so queued sends never find it full.
        let (tx, rx) = mpsc::channel(OUTBOUND_FRAMES + 1);
        if let Some(byte) = greeting {
            let _ = tx.try_send(QueuedFrame {
                bytes: vec![byte],
                _permit: None,
            });
        }
        tokio::spawn(write_frames(conn, rx, writer));
        let reader = tokio::spawn(read_frames(conn, reader, self.events.clone()));
        self.peers.insert(conn, Peer { writer: tx, reader });
    }

    fn shutdown(&mut self) {
        if let Some(l) = self.listening.take() {
            l.acceptor.abort();
            l.beacon.abort();
        }
        for (_, task) in self.dialing.drain() {
            task.abort();
        }
        self.unanswered.clear();
        for (_, peer) in self.peers.drain() {
            peer.reader.abort();
        }
        if let Some(address) = self.local.take() {
            debug!(%address, "transport shut down");
        }
    }
}

async fn accept_loop(listener: TcpListener, local: Address, internal: mpsc::UnboundedSender<Internal>) {
    loop {
        let (mut stream, peer) = match listener.accept().await {
            Ok(x) => x,
            Err(e) => {
                warn!(error = %e, "accept failed");
                break;
            }
        };
        let local = local.clone();
        let internal = internal.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(HANDSHAKE_TIMEOUT, read_hello(&mut stream, &local)).await {
                Ok(Ok(from)) => {
                    let _ = internal.send(Internal::Accepted { stream, from });
                }
                Ok(Err(e)) => debug!(%peer, error = %e, "hello rejected"),
                Err(_) => debug!(%peer, "hello timed out"),
            }
        });
    }
}

async fn dial(target: &Address, from: &Address, config: &TransportConfig) -> io::Result<TcpStream> {
    let addr = discovery::resolve(target, config.discovery_port, config.connect_timeout).await?;
    info!(%target, %addr, "connecting");
    let mut stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, format!("connect to {addr} timed out")))??;
    tokio::time::timeout(HANDSHAKE_TIMEOUT, hello_connect(&mut stream, from, target))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "hello timed out"))??;
    Ok(stream)
}

fn invalid_data(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// Introduce ourselves as `from`, asking for `target`; waits for the host's ack.
async fn hello_connect<S>(stream: &mut S, from: &Address, target: &Address) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let hello = Hello {
        version: HELLO_VERSION,
        from: from.clone(),
        target: target.clone(),
    };
    let bytes = bincode::serialize(&hello).map_err(invalid_data)?;
    stream.write_all(&(bytes.len() as u32).to_le_bytes()).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    let mut ack = [0u8; 1];
    match stream.read_exact(&mut ack).await {
        Ok(_) if ack[0] == HELLO_ACK => Ok(()),
        Ok(_) => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "host refused the session")),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "host refused the session"))
        }
        Err(e) => Err(e),
    }
}

/// Read a guest's hello; returns the guest address if it asked for `local`. The ack is
/// written later, and only if the session accepts the guest.
async fn read_hello<S>(stream: &mut S, local: &Address) -> io::Result<Address>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; LEN_SIZE];
    stream.read_exact(&mut header).await?;
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_HELLO_LEN {
        return Err(invalid_data("hello too large"));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    let hello: Hello = bincode::deserialize(&buf).map_err(invalid_data)?;
    if hello.version != HELLO_VERSION {
        return Err(invalid_data(format!("unsupported hello version {}", hello.version)));
    }
    if &hello.target != local {
        return Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("hello for {}", hello.target),
        ));
    }
    Ok(hello.from)
}

async fn write_frames<W>(conn: ConnectionId, mut frames: mpsc::Receiver<QueuedFrame>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        if let Err(e) = writer.write_all(&frame.bytes).await {
            debug!(conn = conn.0, error = %e, "write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_frames<R>(conn: ConnectionId, mut reader: R, events: mpsc::UnboundedSender<TransportEvent>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(bytes)) => {
                if events.send(TransportEvent::Data { conn, bytes }).is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(conn = conn.0, error = %e, "read failed");
                break;
            }
        }
    }
    let _ = events.send(TransportEvent::Closed { conn });
}

/// One whole frame, header included. `None` on EOF before a header.
async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut frame = vec![0u8; LEN_SIZE];
    match reader.read_exact(&mut frame).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = frame_len(&frame).ok_or_else(|| invalid_data("short header"))?;
    if len > MAX_FRAME_LEN as usize {
        return Err(invalid_data("frame too large"));
    }
    frame.resize(LEN_SIZE + len, 0);
    reader.read_exact(&mut frame[LEN_SIZE..]).await?;
    Ok(Some(frame))
}
