//! TCP listener that wraps every accepted socket in its own [`TlsTransport`].

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::settings::TransportSettings;
use super::transport::{TlsConnection, TlsTransport};
use crate::{Error, Result};

/// Receives authenticated connections from the listener.
///
/// This is the seam to the protocol broker.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Serve one connection until it closes.
    async fn handle(&self, connection: TlsConnection<TcpStream>, peer: SocketAddr) -> Result<()>;
}

/// Bound listener.
#[derive(Debug)]
pub struct TlsListener {
    settings: Arc<TransportSettings>,
    listener: TcpListener,
}

impl TlsListener {
    /// Bind to the settings' host and port.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the address cannot be bound.
    pub async fn bind(settings: Arc<TransportSettings>) -> Result<Self> {
        let listener = TcpListener::bind((settings.host(), settings.port())).await?;
        info!(
            scheme = settings.scheme(),
            addr = %listener.local_addr()?,
            "Listening"
        );
        Ok(Self { settings, listener })
    }

    /// Address actually bound (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the socket address is unavailable.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Settings shared by every connection.
    #[must_use]
    pub fn settings(&self) -> &Arc<TransportSettings> {
        &self.settings
    }

    /// Fresh wrapper for one accepted socket.
    #[must_use]
    pub fn transport(&self) -> TlsTransport {
        TlsTransport::new(Arc::clone(&self.settings))
    }

    /// Accept connections until `shutdown` fires.
    ///
    /// Each socket gets its own task: handshake, then `handler`. A failing
    /// connection is logged and never stops the loop. On shutdown, open
    /// connections are aborted.
    ///
    /// # Errors
    ///
    /// Returns `Error::Shutdown` only if the shutdown channel closed without a
    /// signal.
    pub async fn serve(
        self,
        handler: Arc<dyn ConnectionHandler>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut connections = JoinSet::new();

        let result = loop {
            tokio::select! {
                signal = shutdown.recv() => {
                    break match signal {
                        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => Ok(()),
                        Err(broadcast::error::RecvError::Closed) => Err(Error::Shutdown),
                    };
                }
                accepted = self.listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Accept failed");
                            continue;
                        }
                    };
                    let transport = self.transport();
                    let handler = Arc::clone(&handler);
                    connections.spawn(serve_connection(transport, socket, peer, handler));
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        };

        info!(open = connections.len(), "Listener stopping");
        connections.shutdown().await;
        result
    }
}

async fn serve_connection(
    transport: TlsTransport,
    socket: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn ConnectionHandler>,
) {
    let connection_id = transport.connection_id();
    debug!(%connection_id, %peer, "Connection accepted");

    let connection = match transport.accept(socket).await {
        Ok(connection) => connection,
        Err(e) => {
            debug!(%connection_id, %peer, error = %e, "Connection dropped");
            return;
        }
    };

    if let Err(e) = handler.handle(connection, peer).await {
        warn!(%connection_id, %peer, error = %e, "Connection handler failed");
    }
    debug!(%connection_id, %peer, "Connection closed");
}
