//! UDP transport backed by a tokio socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::DatagramTransport;
use crate::error::Error;
use crate::Result;

/// UDP transport for RTP
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    closed: AtomicBool,
    close_token: CancellationToken,
}

impl UdpTransport {
    /// Bind a socket on the given address (port 0 picks a free port)
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::Transport(format!("Failed to bind UDP socket on {}: {}", addr, e)))?;
        let local_addr = socket.local_addr()?;
        debug!("Bound UDP transport on {}", local_addr);
        Ok(Self {
            socket,
            local_addr,
            closed: AtomicBool::new(false),
            close_token: CancellationToken::new(),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Transport(format!("Transport {} is closed", self.local_addr)));
        }
        Ok(())
    }
}

#[async_trait]
impl DatagramTransport for UdpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }

    async fn send_to(&self, data: &[u8], dest: SocketAddr) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.socket.send_to(data, dest).await?)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        self.ensure_open()?;
        tokio::select! {
            _ = self.close_token.cancelled() => {
                Err(Error::Transport(format!("Transport {} closed while receiving", self.local_addr)))
            }
            res = self.socket.recv_from(buf) => Ok(res?),
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Closing UDP transport on {}", self.local_addr);
            self.close_token.cancel();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_send_and_receive() {
        let a = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

        a.send_to(b"hello", b.local_addr().unwrap()).await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(from, a.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_close_unblocks_receive() {
        let transport = std::sync::Arc::new(
            UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap(),
        );
        let receiver = transport.clone();
        let pending = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            receiver.recv_from(&mut buf).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.close();
        transport.close();

        let res = tokio::time::timeout(Duration::from_secs(1), pending).await.unwrap().unwrap();
        assert!(matches!(res, Err(Error::Transport(_))));
        assert!(transport.is_closed());
        assert!(transport.send_to(b"x", "127.0.0.1:9".parse().unwrap()).await.is_err());
    }
}
