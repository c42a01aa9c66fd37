use minitcp::config::StreamConfig;
use minitcp::stream::ReliableStream;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{info, Level};

fn init_logging() {
    tracing_subscriber::fmt()
        // .with_max_level(Level::TRACE)
        .with_max_level(Level::DEBUG)
        .with_thread_ids(true)
        .try_init()
        .ok();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let socket_a = UdpSocket::bind("127.0.0.1:0").await?;
    let socket_b = UdpSocket::bind("127.0.0.1:0").await?;
    socket_a.connect(socket_b.local_addr()?).await?;
    socket_b.connect(socket_a.local_addr()?).await?;

    let config = Arc::new(StreamConfig::default());

    let server_config = config.clone();
    let server = tokio::spawn(async move {
        let mut stream = ReliableStream::accept(Arc::new(socket_b), server_config).await?;

        let mut received = Vec::new();
        while let Some(data) = stream.read().await? {
            received.extend_from_slice(&data);
        }
        info!("server received {} bytes: {:?}", received.len(), String::from_utf8_lossy(&received));

        stream.write(format!("got {} bytes", received.len()).as_bytes()).await?;
        stream.closed().await
    });

    let mut client = ReliableStream::connect(Arc::new(socket_a), config).await?;
    client.write(b"hello, ").await?;
    client.write(b"world").await?;
    client.close();

    while let Some(reply) = client.read().await? {
        info!("client received reply: {:?}", String::from_utf8_lossy(&reply));
    }
    client.closed().await?;
    server.await??;

    info!("both sides closed");
    Ok(())
}
