//! Per-connection session management.
//!
//! Each accepted connection gets a Session task that owns its transport. The
//! task waits for a whole request frame, hands it to a worker, and writes the
//! worker's response back before reading the next frame, so one connection
//! never has two requests in flight.

use crate::error::{ProtocolError, ProtocolResult};
use crate::handlers::{handle_request, Binding, Outcome};
use crate::server::Gateway;
use lockbox_core::{FramedTransport, TransportError};
use lockbox_types::{Email, Request, RequestKind, Response};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Session state machine states.
///
/// `serve` awaits each response before reading the next frame; that
/// sequencing is what keeps one request in flight. The state records which
/// request is pending so a connection lost mid-request is logged with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the next request frame.
    Idle,
    /// A request has been handed to a worker; no further frame is read until
    /// its response is written.
    PendingDispatch {
        /// Kind of the request being handled.
        kind: RequestKind,
    },
}

/// A per-connection session.
pub struct Session<S> {
    gateway: Arc<Gateway>,
    workers: Arc<Semaphore>,
    transport: FramedTransport<S>,
    peer: SocketAddr,
    state: SessionState,
    /// User this connection is logged in as.
    email: Option<Email>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Create a new session for a connection.
    pub fn new(gateway: Arc<Gateway>, workers: Arc<Semaphore>, stream: S, peer: SocketAddr) -> Self {
        let max_frame_size = gateway.config().storage.max_frame_size;
        Self {
            gateway,
            workers,
            transport: FramedTransport::with_max_frame_size(stream, max_frame_size),
            peer,
            state: SessionState::Idle,
            email: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// User this connection is logged in as, if any.
    pub fn email(&self) -> Option<&Email> {
        self.email.as_ref()
    }

    /// Run the session until the peer disconnects or breaks the protocol.
    pub async fn run(mut self) {
        info!(peer = %self.peer, "connection opened");
        self.gateway.connection_opened();

        let result = self.serve().await;
        match &result {
            Ok(()) => debug!(peer = %self.peer, "peer disconnected"),
            Err(ProtocolError::Transport(e)) if e.is_disconnect() => {
                debug!(peer = %self.peer, error = %e, "peer went away")
            }
            Err(e) => warn!(peer = %self.peer, state = ?self.state, error = %e, "closing connection"),
        }

        if let Err(e) = self.transport.close().await {
            debug!(peer = %self.peer, error = %e, "shutdown after close");
        }
        self.gateway.connection_closed();
        info!(peer = %self.peer, "connection closed");
    }

    async fn serve(&mut self) -> ProtocolResult<()> {
        loop {
            let payload = match self.transport.recv().await {
                Ok(payload) => payload,
                Err(TransportError::Disconnected) => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            self.gateway
                .metrics()
                .bytes_received
                .fetch_add(payload.len() as u64, Ordering::Relaxed);

            // Undecodable frames and version mismatches end the connection
            let request: Request = lockbox_types::decode(&payload)?;
            let kind = request.kind();
            self.state = SessionState::PendingDispatch { kind };

            let outcome = self.dispatch(request).await;
            self.apply(outcome.binding);
            self.respond(&outcome.response).await?;
            self.state = SessionState::Idle;
        }
    }

    /// Run one request on the worker pool.
    ///
    /// Never fails: errors and worker panics become the generic failure for
    /// the request kind.
    async fn dispatch(&self, request: Request) -> Outcome {
        let kind = request.kind();
        let failure = || Outcome {
            response: Response::failure(kind),
            binding: Binding::Keep,
        };

        let permit = match self.workers.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                error!("worker pool closed");
                return failure();
            }
        };

        let gateway = self.gateway.clone();
        let session = self.email.clone();
        let worker = tokio::spawn(async move {
            let _permit = permit;
            handle_request(&gateway, session, request).await
        });

        let metrics = self.gateway.metrics();
        match worker.await {
            Ok(Ok(outcome)) => {
                debug!(peer = %self.peer, kind = kind.as_str(), "request handled");
                outcome
            }
            Ok(Err(e)) => {
                metrics.internal_failures.fetch_add(1, Ordering::Relaxed);
                match &e {
                    ProtocolError::Storage(_) | ProtocolError::Hashing(_) => {
                        error!(peer = %self.peer, kind = kind.as_str(), error = %e, "request failed")
                    }
                    _ => warn!(peer = %self.peer, kind = kind.as_str(), error = %e, "request rejected"),
                }
                failure()
            }
            Err(e) => {
                metrics.internal_failures.fetch_add(1, Ordering::Relaxed);
                error!(peer = %self.peer, kind = kind.as_str(), error = %e, "worker died");
                failure()
            }
        }
    }

    fn apply(&mut self, binding: Binding) {
        match binding {
            Binding::Keep => {}
            Binding::Bind(email) => {
                debug!(peer = %self.peer, %email, "session bound");
                self.email = Some(email);
            }
            Binding::Unbind => {
                debug!(peer = %self.peer, "session unbound");
                self.email = None;
            }
        }
    }

    async fn respond(&mut self, response: &Response) -> ProtocolResult<()> {
        let bytes = lockbox_types::encode(response).map_err(ProtocolError::Encoding)?;
        let sent = match self.transport.send(&bytes).await {
            Ok(()) => bytes.len(),
            // Nothing was written yet, so the stream is still in sync
            Err(TransportError::FrameTooLarge { size, max }) => {
                let kind = response.kind();
                warn!(peer = %self.peer, kind = kind.as_str(), size, max, "response exceeds frame limit");
                self.gateway
                    .metrics()
                    .internal_failures
                    .fetch_add(1, Ordering::Relaxed);
                let fallback = lockbox_types::encode(&Response::failure(kind))
                    .map_err(ProtocolError::Encoding)?;
                self.transport.send(&fallback).await?;
                fallback.len()
            }
            Err(e) => return Err(e.into()),
        };
        self.gateway
            .metrics()
            .bytes_sent
            .fetch_add(sent as u64, Ordering::Relaxed);
        Ok(())
    }
}
