use std::sync::Arc;
use anyhow::{anyhow, bail};
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{span, Instrument, Level};
use crate::config::StreamConfig;
use crate::connection::handshake::initial_sequence_number;
use crate::connection::{AppEvent, Connection};
use crate::error::StreamError;
use crate::event_loop::ConnectionDriver;
use crate::transport::PacketTransport;
use crate::util::random::{Random, RngRandom};

/// What the event loop reports to the application side of a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Data(Bytes),
    PeerHalfClosed,
    Aborted(StreamError),
}

impl From<AppEvent> for StreamEvent {
    fn from(value: AppEvent) -> Self {
        match value {
            AppEvent::Data(data) => StreamEvent::Data(data),
            AppEvent::PeerHalfClosed => StreamEvent::PeerHalfClosed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Active,
    Passive,
}

/// A reliable, ordered byte stream to a single peer, driven by its own task.
///
/// Dropping the stream aborts the connection without telling the peer. Use [ReliableStream::close]
///  and [ReliableStream::closed] for an orderly shutdown.
pub struct ReliableStream {
    app_tx: Option<mpsc::Sender<Bytes>>,
    events_rx: mpsc::UnboundedReceiver<StreamEvent>,
    end_of_stream: bool,
    driver: Option<JoinHandle<Result<(), StreamError>>>,
}

impl Drop for ReliableStream {
    fn drop(&mut self) {
        if let Some(driver) = &self.driver {
            driver.abort();
        }
    }
}

impl ReliableStream {
    /// Actively open a connection, returning once it is established
    pub async fn connect(transport: Arc<dyn PacketTransport>, config: Arc<StreamConfig>) -> anyhow::Result<ReliableStream> {
        Self::open::<RngRandom>(transport, config, Role::Active).await
    }

    /// Wait for a peer to connect, returning once the connection is established
    pub async fn accept(transport: Arc<dyn PacketTransport>, config: Arc<StreamConfig>) -> anyhow::Result<ReliableStream> {
        Self::open::<RngRandom>(transport, config, Role::Passive).await
    }

    async fn open<R: Random>(transport: Arc<dyn PacketTransport>, config: Arc<StreamConfig>, role: Role) -> anyhow::Result<ReliableStream> {
        config.validate()?;

        let mut connection = Connection::new(config.clone(), initial_sequence_number::<R>());
        let span = match role {
            Role::Active => {
                connection.open_active(Instant::now());
                span!(Level::TRACE, "active")
            }
            Role::Passive => {
                connection.listen();
                span!(Level::TRACE, "passive")
            }
        };

        let (app_tx, app_rx) = mpsc::channel(config.app_channel_capacity);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (established_tx, established_rx) = oneshot::channel();

        let driver = ConnectionDriver::new(connection, transport, app_rx, events_tx, established_tx);
        let stream = ReliableStream {
            app_tx: Some(app_tx),
            events_rx,
            end_of_stream: false,
            driver: Some(tokio::spawn(driver.run().instrument(span))),
        };

        match established_rx.await {
            Ok(Ok(())) => Ok(stream),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => bail!("connection task ended before the handshake completed"),
        }
    }

    /// Queue bytes for sending, waiting if too many writes are pending
    pub async fn write(&self, data: &[u8]) -> anyhow::Result<()> {
        let Some(app_tx) = &self.app_tx else {
            bail!("stream is closed for writing");
        };
        app_tx.send(Bytes::copy_from_slice(data)).await
            .map_err(|_| anyhow!(StreamError::ConnectionAborted))
    }

    /// The next run of in-order bytes from the peer, or `None` once the peer closed its side
    ///
    /// NB: Received data is buffered without limit until it is read, since the advertised
    ///      window does not shrink when the application falls behind. An application that
    ///      stops reading while the peer keeps sending grows this buffer indefinitely.
    pub async fn read(&mut self) -> anyhow::Result<Option<Bytes>> {
        if self.end_of_stream {
            return Ok(None);
        }

        match self.events_rx.recv().await {
            Some(StreamEvent::Data(data)) => Ok(Some(data)),
            Some(StreamEvent::PeerHalfClosed) | None => {
                self.end_of_stream = true;
                Ok(None)
            }
            Some(StreamEvent::Aborted(e)) => {
                self.end_of_stream = true;
                Err(e.into())
            }
        }
    }

    /// Finish sending: a FIN follows once all written data is on its way. Reading continues to
    ///  work until the peer closes its side.
    pub fn close(&mut self) {
        self.app_tx = None;
    }

    /// Close the stream and wait until both sides finished the teardown
    pub async fn closed(mut self) -> anyhow::Result<()> {
        self.close();
        match self.driver.take() {
            Some(driver) => Ok(driver.await??),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::runtime::Builder;
    use crate::segment::{Flags, Segment};
    use crate::test_util::LinkTransport;
    use crate::transport::MockPacketTransport;

    fn paused_runtime() -> tokio::runtime::Runtime {
        Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap()
    }

    async fn established_pair(config: Arc<StreamConfig>) -> (Arc<LinkTransport>, Arc<LinkTransport>, ReliableStream, ReliableStream) {
        let (a, b) = LinkTransport::pair();

        let server_transport = b.clone();
        let server_config = config.clone();
        let server = tokio::spawn(async move {
            ReliableStream::accept(server_transport, server_config).await
        });
        let client = ReliableStream::connect(a.clone(), config).await.unwrap();
        let server = server.await.unwrap().unwrap();
        (a, b, client, server)
    }

    async fn read_to_end(stream: &mut ReliableStream) -> Vec<u8> {
        let mut result = Vec::new();
        while let Some(data) = stream.read().await.unwrap() {
            result.extend_from_slice(&data);
        }
        result
    }

    fn test_data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn error_kind(e: &anyhow::Error) -> Option<StreamError> {
        e.downcast_ref::<StreamError>().copied()
    }

    #[test]
    fn test_round_trip() {
        paused_runtime().block_on(async {
            let (a, _b, mut client, mut server) = established_pair(Arc::new(StreamConfig::default())).await;

            let data = test_data(600);
            client.write(&data).await.unwrap();
            client.close();
            assert_eq!(read_to_end(&mut server).await, data);

            server.write(b"bye").await.unwrap();
            server.close();
            assert_eq!(read_to_end(&mut client).await, b"bye");

            client.closed().await.unwrap();
            server.closed().await.unwrap();

            let payload_lens = a.sent_segments().await.iter()
                .map(|raw| Segment::decode(raw).unwrap())
                .filter(|s| !s.payload.is_empty())
                .map(|s| s.payload.len())
                .collect::<Vec<_>>();
            assert_eq!(payload_lens, vec![536, 64]);
        });
    }

    #[test]
    fn test_lossy_link() {
        paused_runtime().block_on(async {
            let (a, b, mut client, mut server) = established_pair(Arc::new(StreamConfig::default())).await;

            let mut num_data_segments = 0;
            a.set_drop_filter(move |raw| {
                let is_data = raw.len() > 20;
                if is_data {
                    num_data_segments += 1;
                }
                is_data && (num_data_segments == 2 || num_data_segments == 7)
            }).await;
            let mut num_acks = 0;
            b.set_drop_filter(move |_| {
                num_acks += 1;
                num_acks == 3
            }).await;

            let data = test_data(10_000);
            for chunk in data.chunks(1000) {
                client.write(chunk).await.unwrap();
            }
            client.close();
            assert_eq!(read_to_end(&mut server).await, data);

            server.close();
            assert_eq!(read_to_end(&mut client).await, Vec::<u8>::new());
            client.closed().await.unwrap();
            server.closed().await.unwrap();
        });
    }

    #[test]
    fn test_lost_final_ack() {
        paused_runtime().block_on(async {
            let (a, _b, mut client, mut server) = established_pair(Arc::new(StreamConfig::default())).await;

            client.write(b"all of it").await.unwrap();
            client.close();
            assert_eq!(read_to_end(&mut server).await, b"all of it");

            // nothing the client sends from here on arrives, including its ACK for the server's FIN
            a.set_drop_filter(|_| true).await;
            server.close();
            assert_eq!(read_to_end(&mut client).await, Vec::<u8>::new());
            client.closed().await.unwrap();

            let start = Instant::now();
            server.closed().await.unwrap();
            assert!(Instant::now() - start <= Duration::from_secs(1 + 2 + 4 + 8 + 16 + 32));
        });
    }

    #[test]
    fn test_handshake_send_failure() {
        paused_runtime().block_on(async {
            let mut transport = MockPacketTransport::new();
            transport.expect_send_segment()
                .returning(|_| Err(anyhow!("network is unreachable")));

            let result = ReliableStream::connect(Arc::new(transport), Arc::new(StreamConfig::default())).await;
            match result {
                Ok(_) => panic!("connect should fail"),
                Err(e) => assert_eq!(error_kind(&e), Some(StreamError::ConnectionRefused)),
            }
        });
    }

    #[test]
    fn test_handshake_timeout() {
        paused_runtime().block_on(async {
            let (a, _b) = LinkTransport::pair();
            a.set_drop_filter(|_| true).await;

            let start = Instant::now();
            let result = ReliableStream::connect(a.clone(), Arc::new(StreamConfig::default())).await;
            match result {
                Ok(_) => panic!("connect should time out"),
                Err(e) => assert_eq!(error_kind(&e), Some(StreamError::TimedOut)),
            }
            assert!(Instant::now() - start <= Duration::from_secs(1 + 2 + 4 + 8 + 16 + 32));

            let syns = a.sent_segments().await.iter()
                .map(|raw| Segment::decode(raw).unwrap().header.flags)
                .collect::<Vec<_>>();
            assert_eq!(syns, vec![Flags::SYN; 6]);
        });
    }

    #[test]
    fn test_send_failure_when_established() {
        paused_runtime().block_on(async {
            let (a, _b, mut client, _server) = established_pair(Arc::new(StreamConfig::default())).await;

            a.set_failing(true);
            client.write(b"lost").await.unwrap();
            match client.read().await {
                Err(e) => assert_eq!(error_kind(&e), Some(StreamError::ConnectionAborted)),
                Ok(data) => panic!("expected an error, got {:?}", data),
            }
            assert_eq!(client.read().await.unwrap(), None);

            let closed = client.closed().await;
            assert_eq!(error_kind(&closed.unwrap_err()), Some(StreamError::ConnectionAborted));
        });
    }

    #[test]
    fn test_peer_half_close() {
        paused_runtime().block_on(async {
            let (_a, _b, mut client, mut server) = established_pair(Arc::new(StreamConfig::default())).await;

            server.close();
            assert_eq!(client.read().await.unwrap(), None);

            // the other direction still works
            client.write(b"still here").await.unwrap();
            assert_eq!(server.read().await.unwrap(), Some(Bytes::from_static(b"still here")));

            client.close();
            assert_eq!(server.read().await.unwrap(), None);
            client.closed().await.unwrap();
            server.closed().await.unwrap();
        });
    }

    #[test]
    fn test_write_after_close() {
        paused_runtime().block_on(async {
            let (_a, _b, mut client, _server) = established_pair(Arc::new(StreamConfig::default())).await;
            client.close();
            assert!(client.write(b"x").await.is_err());
        });
    }

    #[test]
    fn test_invalid_config() {
        paused_runtime().block_on(async {
            let (a, _b) = LinkTransport::pair();
            let config = StreamConfig { max_segment_size: 0, ..Default::default() };
            assert!(ReliableStream::connect(a, Arc::new(config)).await.is_err());
        });
    }
}
