//! Accept loop and per-connection read/write tasks.

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use thiserror::Error;
use tokio::{
    io::{
        AsyncBufRead, AsyncBufReadExt as _, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _,
        BufReader,
    },
    net::{TcpListener, TcpStream},
    sync::{RwLock, mpsc},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    ConnId, Msg,
    dispatch::{DispatchError, Dispatcher},
    floor::FloorRegistryHandle,
    session::PlayerSession,
};

const FRAME_DELIMITER: u8 = b'\n';

/// How long the accept loop backs off after a failed accept.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A live connection, as seen by the server.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnId,
    pub peer: SocketAddr,
    pub token: CancellationToken,
}

pub type ConnectionSet = Arc<RwLock<BTreeMap<ConnId, ConnectionInfo>>>;

/// Everything a connection task needs besides its socket.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub dispatcher: Dispatcher,
    pub floors: FloorRegistryHandle,
    pub connections: ConnectionSet,
    pub max_frame_length: usize,
    /// Longest a single outbound frame may take to write before the connection is dropped.
    pub write_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame exceeds {0} bytes")]
    TooLong(usize),
    #[error(transparent)]
    IO(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    /// A delimited frame is in the buffer, without its delimiter.
    Complete,
    /// The stream closed partway through a frame of this many bytes.
    Incomplete(usize),
    Eof,
}

/// Reads the next `\n` delimited frame into `buf`.
async fn read_frame<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_frame_length: usize,
) -> Result<Frame, FrameError> {
    buf.clear();

    // one extra byte leaves room for the delimiter of a maximum length frame
    let limit = u64::try_from(max_frame_length)
        .unwrap_or(u64::MAX)
        .saturating_add(1);

    let read = (&mut *reader)
        .take(limit)
        .read_until(FRAME_DELIMITER, buf)
        .await?;

    if read == 0 {
        return Ok(Frame::Eof);
    }

    if buf.last() == Some(&FRAME_DELIMITER) {
        buf.pop();
        return Ok(Frame::Complete);
    }

    if buf.len() > max_frame_length {
        return Err(FrameError::TooLong(max_frame_length));
    }

    Ok(Frame::Incomplete(buf.len()))
}

/// Drains `rx` into `writer`, one frame per message.
///
/// A write that fails or does not finish within `write_timeout` cancels `token`, closing the
/// whole connection, so a peer that stops reading cannot grow its queue without bound.
async fn write_loop<W: AsyncWrite + Unpin>(
    conn: ConnId,
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Msg>,
    write_timeout: Duration,
    token: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            () = token.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let mut frame = msg.into_bytes();
        frame.push(FRAME_DELIMITER);

        match tokio::time::timeout(write_timeout, writer.write_all(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::debug!("Failed to write to connection {conn}: {e:?}");
                token.cancel();
                break;
            }
            Err(_) => {
                log::warn!(
                    "Connection {conn} did not accept a frame within {write_timeout:?}, closing"
                );
                token.cancel();
                break;
            }
        }
    }

    let _ = writer.shutdown().await;
    log::trace!("Writer for connection {conn} stopped");
}

async fn handle_connection(
    conn: ConnId,
    stream: TcpStream,
    peer: SocketAddr,
    context: ConnectionContext,
    token: CancellationToken,
) {
    log::info!("Connection {conn} accepted from {peer}");

    let (reader, writer) = stream.into_split();
    let (conn_tx, conn_rx) = mpsc::unbounded_channel();

    context.connections.write().await.insert(
        conn,
        ConnectionInfo {
            id: conn,
            peer,
            token: token.clone(),
        },
    );

    if let Err(e) = context.floors.register(conn, conn_tx).await {
        log::error!("Failed to register connection {conn}: {e:?}");
        context.connections.write().await.remove(&conn);
        return;
    }

    let writer = tokio::spawn(write_loop(
        conn,
        writer,
        conn_rx,
        context.write_timeout,
        token.clone(),
    ));

    let mut session = PlayerSession::new(conn);

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        let frame = tokio::select! {
            () = token.cancelled() => {
                log::debug!("Connection {conn} was cancelled");
                break;
            }
            frame = read_frame(&mut reader, &mut buf, context.max_frame_length) => frame,
        };

        match frame {
            Ok(Frame::Complete) => {}
            Ok(Frame::Incomplete(len)) => {
                log::debug!("Discarding incomplete {len} byte frame from connection {conn}");
                break;
            }
            Ok(Frame::Eof) => break,
            Err(FrameError::TooLong(max)) => {
                log::warn!("Connection {conn} sent a frame over {max} bytes, closing");
                break;
            }
            Err(FrameError::IO(e)) => {
                log::debug!("Connection {conn} read failed: {e:?}");
                break;
            }
        }

        let Ok(text) = std::str::from_utf8(&buf) else {
            log::warn!("Dropping non UTF-8 frame from connection {conn}");
            continue;
        };

        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        log::trace!("Connection {conn} received {text}");

        match context.dispatcher.handle_frame(&mut session, text).await {
            Ok(()) => {}
            Err(DispatchError::Decode(e)) => {
                log::warn!("Dropping malformed frame from connection {conn}: {e}");
            }
            Err(e @ DispatchError::FloorRegistry(_)) => {
                log::error!("Connection {conn} failed to dispatch: {e:?}");
                break;
            }
        }
    }

    if let Err(e) = context.dispatcher.on_disconnect(&mut session).await {
        log::error!("Failed to deregister connection {conn}: {e:?}");
    }

    context.connections.write().await.remove(&conn);

    // the registry dropped the outbound sender on deregistration, so the writer drains and ends
    if let Err(e) = writer.await {
        log::error!("Writer for connection {conn} failed: {e:?}");
    }

    log::info!("Connection {conn} from {peer} closed");
}

/// Owns the accept loop and tracks every connection task it spawns.
#[derive(Debug)]
pub struct ConnectionManager {
    next_id: AtomicU64,
    context: ConnectionContext,
    tracker: TaskTracker,
    token: CancellationToken,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(context: ConnectionContext, token: CancellationToken) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            context,
            tracker: TaskTracker::new(),
            token,
        }
    }

    #[must_use]
    pub fn connections(&self) -> ConnectionSet {
        self.context.connections.clone()
    }

    /// Starts serving `stream` on its own task and returns its connection id.
    pub fn accept(&self, stream: TcpStream, peer: SocketAddr) -> ConnId {
        let conn = self.next_id.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = stream.set_nodelay(true) {
            log::warn!("Failed to set TCP_NODELAY for {peer}: {e:?}");
        }

        self.tracker.spawn(handle_connection(
            conn,
            stream,
            peer,
            self.context.clone(),
            self.token.child_token(),
        ));

        conn
    }

    /// Accepts connections until the manager's token is cancelled.
    pub async fn run(&self, listener: TcpListener) {
        loop {
            let accepted = tokio::select! {
                () = self.token.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    self.accept(stream, peer);
                }
                Err(e) => {
                    log::error!("Failed to accept connection: {e:?}");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }

        log::debug!("Accept loop stopped");
    }

    /// Cancels every connection and waits for their tasks to finish.
    pub async fn shutdown(&self) {
        for info in self.context.connections.read().await.values() {
            log::debug!("Closing connection {} from {}", info.id, info.peer);
            info.token.cancel();
        }

        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        log::debug!("All connections closed");
    }
}
