use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;

/// The unreliable packet service underneath a connection: segments may be lost, duplicated or
///  reordered, but each one arrives intact or not at all.
///
/// Addressing is the implementation's business, so a transport instance is bound to exactly one
///  peer.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PacketTransport: Send + Sync + 'static {
    async fn send_segment(&self, raw: &[u8]) -> anyhow::Result<()>;

    /// Wait for the next segment, returning its length. Segments longer than `buf` are truncated.
    async fn recv_segment(&self, buf: &mut [u8]) -> anyhow::Result<usize>;
}

/// NB: The socket must be connected to the peer, see [UdpSocket::connect]
#[async_trait]
impl PacketTransport for UdpSocket {
    async fn send_segment(&self, raw: &[u8]) -> anyhow::Result<()> {
        self.send(raw).await?;
        Ok(())
    }

    async fn recv_segment(&self, buf: &mut [u8]) -> anyhow::Result<usize> {
        Ok(self.recv(buf).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_socket() {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        a.connect(b.local_addr().unwrap()).await.unwrap();
        b.connect(a.local_addr().unwrap()).await.unwrap();

        a.send_segment(&[1, 2, 3]).await.unwrap();

        let mut buf = [0u8; 16];
        let len = b.recv_segment(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &[1, 2, 3]);
    }
}
