//! TCP front end of the Gateway
//!
//! Each connection is a `ReplySocket`: one request, one reply, repeat.
//! Connections are served concurrently; backend links stay serialized by
//! their own locks.

use super::{error_reply, Gateway};
use crate::error::OrchestraError;
use futures::FutureExt;
use orchestra_link::{LinkError, ReplySocket};
use serde_json::Value;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

/// Listening gateway
#[derive(Debug)]
pub struct GatewayServer {
    gateway: Arc<Gateway>,
    listener: TcpListener,
    max_frame_bytes: usize,
}

impl GatewayServer {
    /// Bind the listener
    ///
    /// # Errors
    /// Returns the bind error
    pub async fn bind(
        addr: &str,
        gateway: Arc<Gateway>,
        max_frame_bytes: usize,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr.trim_start_matches("tcp://")).await?;
        Ok(Self {
            gateway,
            listener,
            max_frame_bytes,
        })
    }

    /// Bound address
    ///
    /// # Errors
    /// Returns the socket error
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until the process exits
    ///
    /// # Errors
    /// Never returns an error in practice; accept failures are logged
    pub async fn serve(self) -> io::Result<()> {
        self.serve_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then drop every open connection
    ///
    /// # Errors
    /// Never returns an error in practice; accept failures are logged
    pub async fn serve_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut connections = JoinSet::new();
        tracing::info!(addr = ?self.listener.local_addr().ok(), "gateway listening");

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "connection accepted");
                        let gateway = Arc::clone(&self.gateway);
                        connections.spawn(serve_connection(gateway, stream, self.max_frame_bytes));
                    }
                    Err(err) => tracing::warn!(error = %err, "accept failed"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        tracing::info!(open = connections.len(), "gateway shutting down");
        connections.shutdown().await;
        Ok(())
    }
}

async fn serve_connection(gateway: Arc<Gateway>, stream: TcpStream, max_frame_bytes: usize) {
    let mut socket = ReplySocket::new(stream, max_frame_bytes);
    let peer = socket.peer();

    loop {
        let (reply, close) = match socket.recv_request().await {
            Ok(message) => (answer(&gateway, message).await, false),
            Err(LinkError::Malformed(_)) => (
                error_reply(&OrchestraError::validation("request is not valid JSON"), None),
                false,
            ),
            Err(LinkError::FrameTooLarge { limit }) => (
                error_reply(
                    &OrchestraError::validation(format!("request exceeds {limit} bytes")),
                    None,
                ),
                true,
            ),
            Err(LinkError::Closed) => break,
            Err(err) => {
                tracing::debug!(?peer, error = %err, "connection dropped");
                break;
            }
        };

        if let Err(err) = socket.send_reply(&reply).await {
            tracing::debug!(?peer, error = %err, "reply not delivered");
            break;
        }
        if close {
            break;
        }
    }
    tracing::debug!(?peer, "connection closed");
}

async fn answer(gateway: &Gateway, message: Value) -> Value {
    AssertUnwindSafe(gateway.handle(message))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            tracing::error!("request handler panicked");
            error_reply(&OrchestraError::Internal("request handler panicked".into()), None)
        })
}
