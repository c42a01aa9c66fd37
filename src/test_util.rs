//! In-memory transports for exercising connections without a network

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use anyhow::bail;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;
use crate::transport::PacketTransport;

type DropFilter = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// One end of a simulated point-to-point link. Segments are delivered in order unless a drop
///  filter discards them.
pub struct LinkTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    sent: Mutex<Vec<Vec<u8>>>,
    drop_filter: Mutex<Option<DropFilter>>,
    failing: AtomicBool,
}

impl LinkTransport {
    pub fn pair() -> (Arc<LinkTransport>, Arc<LinkTransport>) {
        let (tx_a, rx_b) = mpsc::unbounded_channel();
        let (tx_b, rx_a) = mpsc::unbounded_channel();
        (Arc::new(LinkTransport::new(tx_a, rx_a)), Arc::new(LinkTransport::new(tx_b, rx_b)))
    }

    fn new(tx: mpsc::UnboundedSender<Vec<u8>>, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> LinkTransport {
        LinkTransport {
            tx,
            rx: Mutex::new(rx),
            sent: Default::default(),
            drop_filter: Default::default(),
            failing: AtomicBool::new(false),
        }
    }

    /// Segments sent through this end for which `filter` returns true are lost. They are still
    ///  recorded as sent.
    pub async fn set_drop_filter(&self, filter: impl FnMut(&[u8]) -> bool + Send + 'static) {
        *self.drop_filter.lock().await = Some(Box::new(filter));
    }

    /// In failing mode, every send returns an error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// every segment that was successfully sent through this end, including dropped ones
    pub async fn sent_segments(&self) -> Vec<Vec<u8>> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl PacketTransport for LinkTransport {
    async fn send_segment(&self, raw: &[u8]) -> anyhow::Result<()> {
        if self.failing.load(Ordering::Acquire) {
            bail!("link is down");
        }

        self.sent.lock().await.push(raw.to_vec());

        let dropped = match &mut *self.drop_filter.lock().await {
            Some(filter) => filter(raw),
            None => false,
        };
        if dropped {
            trace!("link drops segment of {} bytes", raw.len());
            return Ok(());
        }

        if self.tx.send(raw.to_vec()).is_err() {
            trace!("other end of the link is gone - segment is lost");
        }
        Ok(())
    }

    async fn recv_segment(&self, buf: &mut [u8]) -> anyhow::Result<usize> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(raw) => {
                let len = raw.len().min(buf.len());
                buf[..len].copy_from_slice(&raw[..len]);
                Ok(len)
            }
            None => {
                // nothing will ever arrive on a link whose other end was dropped
                std::future::pending().await
            }
        }
    }
}
