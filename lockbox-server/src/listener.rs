//! TCP accept loop.
//!
//! Accepts connections, applies the per-IP rate limit and the connection cap,
//! and spawns one [`Session`] task per client. Requests from every session
//! share one bounded worker pool.

use crate::error::Result;
use crate::server::Gateway;
use crate::session::Session;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Listening socket plus the limits shared by every connection it accepts.
#[derive(Debug)]
pub struct Listener {
    listener: TcpListener,
    gateway: Arc<Gateway>,
    connections: Arc<Semaphore>,
    workers: Arc<Semaphore>,
}

impl Listener {
    /// Bind to `server.bind_address` from the gateway's config.
    pub async fn bind(gateway: Arc<Gateway>) -> Result<Self> {
        let listener = TcpListener::bind(&gateway.config().server.bind_address).await?;
        Ok(Self::from_listener(listener, gateway))
    }

    /// Serve on an already bound socket.
    pub fn from_listener(listener: TcpListener, gateway: Arc<Gateway>) -> Self {
        let server = &gateway.config().server;
        let connections = Arc::new(Semaphore::new(server.max_connections));
        let workers = Arc::new(Semaphore::new(server.max_workers));
        Self {
            listener,
            gateway,
            connections,
            workers,
        }
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` completes.
    ///
    /// Sessions already running are left to finish on their own.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(addr = %self.local_addr()?, "listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("listener shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer),
                    // Per-connection failures (e.g. reset before accept) are not fatal
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        let metrics = self.gateway.metrics();

        if let Err(e) = self.gateway.rate_limits().check_connection(peer.ip()) {
            warn!(%peer, error = %e, "connection rate limited");
            metrics.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let permit = match self.connections.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    %peer,
                    max = self.gateway.config().server.max_connections,
                    "connection limit reached"
                );
                return;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "set_nodelay failed");
        }

        let session = Session::new(self.gateway.clone(), self.workers.clone(), stream, peer);
        tokio::spawn(async move {
            let _permit = permit;
            session.run().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::SqliteStorage;
    use lockbox_core::FramedTransport;
    use lockbox_types::{HashParams, Request, RequestKind, Response};
    use std::time::Duration;

    async fn spawn_listener(config: Config) -> (SocketAddr, Arc<Gateway>) {
        let config = Config {
            auth: HashParams::insecure_fast(),
            ..config
        };
        let storage = SqliteStorage::in_memory().await.unwrap();
        let gateway = Arc::new(Gateway::new(config, Arc::new(storage)).unwrap());
        let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener = Listener::from_listener(socket, gateway.clone());
        let addr = listener.local_addr().unwrap();
        tokio::spawn(listener.run());
        (addr, gateway)
    }

    async fn fetch(addr: SocketAddr) -> Result<Response> {
        let stream = TcpStream::connect(addr).await?;
        let mut transport = FramedTransport::new(stream);
        transport
            .send(&lockbox_types::encode(&Request::Fetch).unwrap())
            .await
            .map_err(crate::error::ProtocolError::from)?;
        let bytes = transport
            .recv()
            .await
            .map_err(crate::error::ProtocolError::from)?;
        Ok(lockbox_types::decode(&bytes).unwrap())
    }

    #[tokio::test]
    async fn serves_accepted_connections() {
        let (addr, gateway) = spawn_listener(Config::default()).await;

        let response = fetch(addr).await.unwrap();

        assert_eq!(response, Response::failure(RequestKind::Fetch));
        assert_eq!(gateway.metrics().requests(RequestKind::Fetch), 1);
    }

    #[tokio::test]
    async fn connection_rate_limit_drops_excess() {
        let mut config = Config::default();
        config.limits.connections_per_minute = 1;
        let (addr, gateway) = spawn_listener(config).await;

        assert!(fetch(addr).await.is_ok());
        assert!(fetch(addr).await.is_err());
        assert_eq!(
            gateway.metrics().rate_limit_hits.load(Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn connection_cap_drops_excess() {
        let mut config = Config::default();
        config.server.max_connections = 1;
        let (addr, _gateway) = spawn_listener(config).await;

        // Hold the only slot open
        let _held = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(fetch(addr).await.is_err());
    }

    #[tokio::test]
    async fn run_until_stops_on_shutdown() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let config = Config {
            auth: HashParams::insecure_fast(),
            ..Config::default()
        };
        let gateway = Arc::new(Gateway::new(config, Arc::new(storage)).unwrap());
        let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener = Listener::from_listener(socket, gateway);

        tokio::time::timeout(Duration::from_secs(1), listener.run_until(async {}))
            .await
            .expect("listener should stop")
            .unwrap();
    }
}
