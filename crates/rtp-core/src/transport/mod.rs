//! Network transport for RTP streams
//!
//! Streams talk to the network through [`DatagramTransport`], so tests and
//! alternative socket layers can stand in for UDP. A [`TransportHandle`]
//! records whether the stream that holds it is responsible for closing the
//! socket.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;

/// Trait for datagram transports used by RTP streams
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    /// Local bound address
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Send one datagram
    async fn send_to(&self, data: &[u8], dest: SocketAddr) -> Result<usize>;

    /// Receive one datagram. Returns an error once the transport is closed.
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;

    /// Close the transport; pending and future I/O fails
    fn close(&self);

    /// Whether `close` has been called
    fn is_closed(&self) -> bool;
}

/// A transport plus the ownership flag of the stream holding it
#[derive(Clone)]
pub struct TransportHandle {
    transport: Arc<dyn DatagramTransport>,
    owned: bool,
}

impl TransportHandle {
    /// The holder closes the transport when it terminates
    pub fn owned(transport: Arc<dyn DatagramTransport>) -> Self {
        Self { transport, owned: true }
    }

    /// The transport belongs to someone else and is left open
    pub fn shared(transport: Arc<dyn DatagramTransport>) -> Self {
        Self { transport, owned: false }
    }

    /// Bind a new UDP socket owned by the holder
    pub async fn bind_owned(addr: SocketAddr) -> Result<Self> {
        let transport = UdpTransport::bind(addr).await?;
        Ok(Self::owned(Arc::new(transport)))
    }

    /// The underlying transport
    pub fn transport(&self) -> &Arc<dyn DatagramTransport> {
        &self.transport
    }

    /// Whether the holder owns the transport
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Close the transport if owned; shared transports are untouched
    pub fn release(&self) {
        if self.owned {
            self.transport.close();
        }
    }
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandle")
            .field("local_addr", &self.transport.local_addr().ok())
            .field("owned", &self.owned)
            .finish()
    }
}

pub mod udp;

pub use udp::UdpTransport;
