use horm_common::transport::Framer;
use horm_common::{HormError, Result, Stage};
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;

use super::ConnectionPool;

/// Raw socket of a pooled connection.
#[derive(Debug)]
pub(crate) enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Stream {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.try_read(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.try_read(buf),
        }
    }

    pub(crate) fn peer_addr(&self) -> Option<String> {
        match self {
            Stream::Tcp(s) => s.peer_addr().ok().map(|a| a.to_string()),
            #[cfg(unix)]
            Stream::Unix(_) => None,
        }
    }

    fn local_addr(&self) -> Option<String> {
        match self {
            Stream::Tcp(s) => s.local_addr().ok().map(|a| a.to_string()),
            #[cfg(unix)]
            Stream::Unix(s) => s
                .local_addr()
                .ok()
                .and_then(|a| a.as_pathname().map(|p| p.display().to_string())),
        }
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Result of the non-blocking liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// Nothing pending on the socket.
    Healthy,
    /// The peer closed the connection.
    Eof,
    /// Bytes arrived that no request asked for; the stream is out of sync.
    UnexpectedData,
    /// The probe read itself failed.
    Failed,
}

impl Probe {
    pub fn is_healthy(self) -> bool {
        self == Probe::Healthy
    }
}

/// An open socket owned by a pool.
#[derive(Debug)]
pub struct Connection {
    pub(crate) stream: Stream,
    remote_addr: String,
    local_addr: Option<String>,
    created: Instant,
    pub(crate) returned: Instant,
}

impl Connection {
    pub(crate) fn new(stream: Stream, remote_addr: String) -> Self {
        let now = Instant::now();
        Connection {
            local_addr: stream.local_addr(),
            stream,
            remote_addr,
            created: now,
            returned: now,
        }
    }

    /// Checks without blocking whether the peer closed the connection or
    /// sent bytes nobody is waiting for.
    pub fn probe(&self) -> Probe {
        let mut buf = [0u8; 1];
        match self.stream.try_read(&mut buf) {
            Ok(0) => Probe::Eof,
            Ok(_) => Probe::UnexpectedData,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Probe::Healthy,
            Err(_) => Probe::Failed,
        }
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn local_addr(&self) -> Option<&str> {
        self.local_addr.as_deref()
    }

    pub fn created_at(&self) -> Instant {
        self.created
    }

    /// When the connection was last put back into the idle list.
    pub fn returned_at(&self) -> Instant {
        self.returned
    }
}

/// A connection checked out of a [`ConnectionPool`].
///
/// Exactly one caller owns it at a time. Dropping it, or calling
/// [`close`](Self::close), hands the socket back to the pool. Any I/O error
/// discards the socket instead, since a partially written or read frame
/// leaves the stream in an unknown state; every later operation then fails
/// with [`HormError::ConnClosed`].
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<ConnectionPool>,
    permit: Option<OwnedSemaphorePermit>,
    framer: Framer,
    deadline: Option<Instant>,
    force_close: bool,
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .field("deadline", &self.deadline)
            .field("force_close", &self.force_close)
            .field("holds_slot", &self.permit.is_some())
            .finish()
    }
}

impl PooledConnection {
    pub(crate) fn new(
        conn: Connection,
        pool: Arc<ConnectionPool>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        let force_close = pool.config().force_close;
        PooledConnection {
            conn: Some(conn),
            pool,
            permit,
            framer: Framer::new(),
            deadline: None,
            force_close,
        }
    }

    /// Sets the absolute deadline for subsequent reads and writes.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    /// Marks the connection so it is closed instead of recycled on release.
    pub fn set_force_close(&mut self, force_close: bool) {
        self.force_close = force_close;
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    pub fn remote_addr(&self) -> Option<&str> {
        self.conn.as_ref().map(Connection::remote_addr)
    }

    pub fn local_addr(&self) -> Option<&str> {
        self.conn.as_ref().and_then(Connection::local_addr)
    }

    /// Writes all of `buf`, looping over partial writes.
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let deadline = self.deadline;
        let conn = self.conn.as_mut().ok_or(HormError::ConnClosed)?;

        let res = before_deadline(deadline, Stage::Write, write_fully(&mut conn.stream, buf)).await;
        if res.is_err() {
            self.discard();
        }
        res
    }

    /// Reads one complete frame.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let deadline = self.deadline;
        let conn = self.conn.as_mut().ok_or(HormError::ConnClosed)?;
        let framer = &mut self.framer;

        let read = async {
            framer
                .read_frame(&mut conn.stream)
                .await
                .map_err(|e| match e {
                    HormError::Io(e) => HormError::from_io(e, Stage::Read, "read frame"),
                    other => other,
                })
        };
        let res = before_deadline(deadline, Stage::Read, read).await;
        if res.is_err() {
            self.discard();
        }
        res
    }

    /// Returns the connection to the pool, or closes it when it is marked
    /// force-close or the pool is shut down.
    pub fn close(mut self) {
        let force = self.force_close;
        self.release(force);
    }

    /// Closes the socket without recycling it.
    pub fn discard(&mut self) {
        self.release(true);
    }

    fn release(&mut self, force: bool) {
        self.deadline = None;
        if let Some(conn) = self.conn.take() {
            self.pool.put(conn, force);
        }
        // the slot is returned only after the connection is accounted for
        self.permit.take();
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let force = self.force_close;
        self.release(force);
    }
}

async fn write_fully(stream: &mut Stream, buf: &[u8]) -> Result<()> {
    let mut written = 0;
    while written < buf.len() {
        match stream.write(&buf[written..]).await {
            Ok(0) => {
                return Err(HormError::Network {
                    stage: Stage::Write,
                    msg: format!("write frame: zero bytes written, {} of {} sent", written, buf.len()),
                });
            }
            Ok(n) => written += n,
            Err(e) => return Err(HormError::from_io(e, Stage::Write, "write frame")),
        }
    }

    stream
        .flush()
        .await
        .map_err(|e| HormError::from_io(e, Stage::Write, "flush frame"))
}

async fn before_deadline<F, T>(deadline: Option<Instant>, stage: Stage, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, fut).await {
            Ok(res) => res,
            Err(_) => Err(HormError::Timeout {
                stage,
                msg: "i/o deadline exceeded".to_string(),
            }),
        },
        None => fut.await,
    }
}
