//! The task driving a single [Connection]: it owns the connection exclusively and waits for
//!  whichever comes first of application data, an incoming segment and the retransmission
//!  deadline.

use std::sync::Arc;
use bytes::{Bytes, BytesMut};
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, trace};
use crate::connection::Connection;
use crate::error::StreamError;
use crate::stream::StreamEvent;
use crate::transport::PacketTransport;

/// large enough for any segment that fits a 16 bit length
const RECV_BUF_LEN: usize = 65535;

pub struct ConnectionDriver {
    connection: Connection,
    transport: Arc<dyn PacketTransport>,

    app_rx: mpsc::Receiver<Bytes>,
    /// true once the application dropped its write side
    app_closed: bool,
    /// application bytes that were accepted but not yet put into segments
    pending: BytesMut,

    events_tx: mpsc::UnboundedSender<StreamEvent>,
    established_tx: Option<oneshot::Sender<Result<(), StreamError>>>,
}

impl ConnectionDriver {
    pub fn new(
        connection: Connection,
        transport: Arc<dyn PacketTransport>,
        app_rx: mpsc::Receiver<Bytes>,
        events_tx: mpsc::UnboundedSender<StreamEvent>,
        established_tx: oneshot::Sender<Result<(), StreamError>>,
    ) -> ConnectionDriver {
        ConnectionDriver {
            connection,
            transport,
            app_rx,
            app_closed: false,
            pending: BytesMut::new(),
            events_tx,
            established_tx: Some(established_tx),
        }
    }

    /// Run until the connection terminates, either orderly or by an error
    pub async fn run(mut self) -> Result<(), StreamError> {
        let mut recv_buf = vec![0u8; RECV_BUF_LEN];

        loop {
            self.segment_pending(Instant::now());

            if let Err(e) = self.flush_outbox().await {
                error!("error sending segment: {}", e);
                let kind = if self.established_tx.is_some() {
                    StreamError::ConnectionRefused
                }
                else {
                    StreamError::ConnectionAborted
                };
                return Err(self.fail(kind));
            }

            self.forward_app_events();
            self.notify_established();

            if self.connection.is_terminated() {
                debug!("connection terminated - stopping event loop");
                return Ok(());
            }

            let deadline = self.connection.retransmit_deadline();
            let read_app = self.connection.can_send_data() && !self.app_closed && self.pending.is_empty();

            select! {
                data = self.app_rx.recv(), if read_app => match data {
                    Some(data) => {
                        trace!("application wrote {} bytes", data.len());
                        self.pending.extend_from_slice(&data);
                    }
                    None => {
                        debug!("application closed its write side");
                        self.app_closed = true;
                    }
                },
                received = self.transport.recv_segment(&mut recv_buf) => match received {
                    Ok(len) => self.connection.on_segment(&recv_buf[..len], Instant::now()),
                    Err(e) => error!("error receiving segment: {}", e),
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Err(e) = self.connection.on_retransmit_timeout(Instant::now()) {
                        return Err(self.fail(e));
                    }
                }
            }
        }
    }

    /// put as much pending data into segments as the window allows, closing the connection
    ///  once the application is done and everything is segmented
    fn segment_pending(&mut self, now: Instant) {
        while self.connection.send_data(&mut self.pending, now) > 0 {}

        if self.app_closed && self.pending.is_empty() && self.connection.can_send_data() {
            self.connection.close(now);
        }
    }

    async fn flush_outbox(&mut self) -> anyhow::Result<()> {
        while let Some(raw) = self.connection.pop_outbound() {
            self.transport.send_segment(&raw).await?;
        }
        Ok(())
    }

    fn forward_app_events(&mut self) {
        while let Some(evt) = self.connection.pop_app_event() {
            if self.events_tx.send(evt.into()).is_err() {
                trace!("application stopped reading - discarding event");
            }
        }
    }

    fn notify_established(&mut self) {
        if self.established_tx.is_none() {
            return;
        }

        let result = if self.connection.state().is_synchronized() {
            Ok(())
        }
        else if self.connection.is_terminated() {
            Err(StreamError::ConnectionRefused)
        }
        else {
            return;
        };

        if let Some(established_tx) = self.established_tx.take() {
            let _ = established_tx.send(result);
        }
    }

    /// abort the connection, reporting the error to whoever is waiting for it
    fn fail(&mut self, e: StreamError) -> StreamError {
        self.connection.abort();
        match self.established_tx.take() {
            Some(established_tx) => {
                let _ = established_tx.send(Err(e));
            }
            None => {
                let _ = self.events_tx.send(StreamEvent::Aborted(e));
            }
        }
        e
    }
}
