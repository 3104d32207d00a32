//! In-process access service used by the integration tests.
//!
//! The server speaks the frame protocol on a random loopback port and answers
//! each request with whatever its handler returns.

#![allow(dead_code)]

use horm_common::transport::{decode_request, encode_response, Framer};
use horm_common::{RequestHeader, ResponseHeader};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// What the server does with one request.
pub enum Reply {
    /// A well-formed response frame.
    Frame(ResponseHeader, Vec<u8>),
    /// Arbitrary bytes written as-is.
    Raw(Vec<u8>),
    /// Close the connection without answering.
    Hangup,
    /// Answer nothing for this long, then close.
    Stall(Duration),
}

pub type Handler = Arc<dyn Fn(&RequestHeader, &[u8]) -> Reply + Send + Sync>;

pub struct TestAccessServer {
    pub addr: String,
    accepted: Arc<AtomicUsize>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestAccessServer {
    /// Starts a server echoing the request body back.
    pub async fn echo() -> Self {
        Self::start("", Arc::new(|head: &RequestHeader, body: &[u8]| {
            Reply::Frame(
                ResponseHeader::reply_to(head.request_id, head.query_mode),
                body.to_vec(),
            )
        }))
        .await
    }

    /// Starts a server unwrapping signed/encrypted frames with `token`.
    pub async fn start(token: &str, handler: Handler) -> Self {
        init_tracing();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accepted = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();

        let token = token.to_string();
        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        let Ok((stream, _)) = result else { break };
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::spawn(serve(stream, token.clone(), Arc::clone(&handler)));
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Self {
            addr,
            accepted,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Number of connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for TestAccessServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Serves the echo protocol on a unix socket at `path`.
#[cfg(unix)]
pub async fn echo_unix(path: &std::path::Path) {
    init_tracing();

    let _ = std::fs::remove_file(path);
    let listener = tokio::net::UnixListener::bind(path).unwrap();
    let handler: Handler = Arc::new(|head: &RequestHeader, body: &[u8]| {
        Reply::Frame(
            ResponseHeader::reply_to(head.request_id, head.query_mode),
            body.to_vec(),
        )
    });
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream, String::new(), Arc::clone(&handler)));
        }
    });
}

async fn serve<S>(mut stream: S, token: String, handler: Handler)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framer = Framer::new();
    loop {
        let Ok(frame) = framer.read_frame(&mut stream).await else {
            return;
        };
        let Ok((head, body)) = decode_request(&frame, &token) else {
            return;
        };

        let out = match handler(&head, &body) {
            Reply::Frame(rsp, body) => match encode_response(&rsp, &body) {
                Ok(out) => out,
                Err(_) => return,
            },
            Reply::Raw(bytes) => bytes,
            Reply::Hangup => return,
            Reply::Stall(d) => {
                tokio::time::sleep(d).await;
                return;
            }
        };

        if stream.write_all(&out).await.is_err() {
            return;
        }
    }
}

/// Accepts connections and runs `on_accept` on each, keeping the stream alive
/// as long as the returned future runs.
pub async fn raw_listener<F, Fut>(on_accept: F) -> String
where
    F: Fn(TcpStream) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    init_tracing();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(on_accept(stream));
        }
    });
    addr
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
