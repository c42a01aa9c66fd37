//! The state of a single connection and its transitions, independent of any I/O.
//!
//! A [Connection] is fed with received segments, application data, close requests and timer
//!  expiry, always together with the current time. It reacts by queueing encoded segments in its
//!  outbox and events for the application, which the event loop then drains.
//!
//! Sequence space on the send side:
//!
//! ```ascii
//!   send_unacked           send_next           send_unacked + send_window
//!        |  in flight (queued)  |  usable window   |
//! ```

pub mod handshake;

use std::cmp::min;
use std::collections::VecDeque;
use std::sync::Arc;
use bytes::{Bytes, BytesMut};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::receive_window::{Arrival, ReceiveWindow};
use crate::retransmission_queue::RetransmissionQueue;
use crate::rto_estimator::RtoEstimator;
use crate::safe_converter::SafeCast;
use crate::segment::{seq_len, Flags, Segment};
use crate::seq_number::SeqNum;

/// resend limit for a FIN that is the only thing left unacknowledged, used when the regular
///  limit is unbounded
const FINAL_FIN_MAX_RETRANSMISSIONS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    LastAck,
    Closing,
    /// the connection is finished and will not send or accept anything anymore
    Terminated,
}

impl ConnectionState {
    /// true if both sides' initial sequence numbers are known
    pub fn is_synchronized(&self) -> bool {
        match self {
            ConnectionState::Closed | ConnectionState::SynSent | ConnectionState::SynReceived | ConnectionState::Terminated => false,
            ConnectionState::Established | ConnectionState::FinWait1 | ConnectionState::FinWait2 |
            ConnectionState::CloseWait | ConnectionState::LastAck | ConnectionState::Closing => true,
        }
    }
}

/// Something the application should learn about, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Data(Bytes),
    PeerHalfClosed,
}

pub struct Connection {
    config: Arc<StreamConfig>,
    state: ConnectionState,
    /// true if this side waits for a SYN in `Closed`
    listening: bool,

    isn: SeqNum,
    send_unacked: SeqNum,
    send_next: SeqNum,
    send_window: u16,
    /// the sequence number of our FIN once it was sent
    fin_seq: Option<SeqNum>,

    receive_window: ReceiveWindow,
    rto_estimator: RtoEstimator,
    retransmission_queue: RetransmissionQueue,

    outbox: VecDeque<Bytes>,
    app_events: VecDeque<AppEvent>,
}

impl Connection {
    pub fn new(config: Arc<StreamConfig>, isn: SeqNum) -> Connection {
        Connection {
            state: ConnectionState::Closed,
            listening: false,
            isn,
            send_unacked: isn,
            send_next: isn,
            send_window: 0,
            fin_seq: None,
            receive_window: ReceiveWindow::new(config.receive_window_len(), SeqNum::ZERO),
            rto_estimator: RtoEstimator::new(&config),
            retransmission_queue: RetransmissionQueue::default(),
            outbox: VecDeque::new(),
            app_events: VecDeque::new(),
            config,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn isn(&self) -> SeqNum {
        self.isn
    }

    pub fn send_unacked(&self) -> SeqNum {
        self.send_unacked
    }

    pub fn send_next(&self) -> SeqNum {
        self.send_next
    }

    pub fn send_window(&self) -> u16 {
        self.send_window
    }

    pub fn recv_next(&self) -> SeqNum {
        self.receive_window.recv_next()
    }

    pub fn rto_estimator(&self) -> &RtoEstimator {
        &self.rto_estimator
    }

    pub fn retransmission_queue(&self) -> &RetransmissionQueue {
        &self.retransmission_queue
    }

    pub fn is_terminated(&self) -> bool {
        self.state == ConnectionState::Terminated
    }

    /// true if application data is accepted for sending in the current state
    pub fn can_send_data(&self) -> bool {
        match self.state {
            ConnectionState::Established | ConnectionState::CloseWait => self.fin_seq.is_none(),
            _ => false,
        }
    }

    /// the number of bytes that can be sent before the peer's advertised window is exhausted
    pub fn usable_window(&self) -> usize {
        let in_flight: usize = (self.send_next - self.send_unacked).safe_cast();
        let window: usize = self.send_window.safe_cast();
        window.saturating_sub(in_flight)
    }

    pub fn pop_outbound(&mut self) -> Option<Bytes> {
        self.outbox.pop_front()
    }

    pub fn pop_app_event(&mut self) -> Option<AppEvent> {
        self.app_events.pop_front()
    }

    /// The point in time when the oldest unacknowledged segment needs to be resent, `None` if
    ///  nothing is outstanding
    pub fn retransmit_deadline(&self) -> Option<Instant> {
        self.retransmission_queue.deadline(self.rto_estimator.rto())
    }

    /// Take at most one segment's worth of bytes from `pending` and send them, limited by the
    ///  usable window. Returns the number of bytes sent.
    pub fn send_data(&mut self, pending: &mut BytesMut, now: Instant) -> usize {
        if !self.can_send_data() {
            return 0;
        }

        let len = min(min(self.usable_window(), self.config.max_segment_size), pending.len());
        if len == 0 {
            return 0;
        }

        let chunk = pending.split_to(len);
        self.transmit(Flags::ACK, &chunk, now);
        len
    }

    /// The application is done sending. Any pending application data must be passed to
    ///  [Connection::send_data] before calling this.
    pub fn close(&mut self, now: Instant) {
        match self.state {
            ConnectionState::Closed | ConnectionState::SynSent => {
                debug!("close requested before the connection was established");
                self.abort();
            }
            ConnectionState::SynReceived | ConnectionState::Established => {
                self.send_fin(now);
                self.set_state(ConnectionState::FinWait1);
            }
            ConnectionState::CloseWait => {
                self.send_fin(now);
                self.set_state(ConnectionState::LastAck);
            }
            ConnectionState::FinWait1 | ConnectionState::FinWait2 | ConnectionState::LastAck |
            ConnectionState::Closing | ConnectionState::Terminated => {
                debug!("close requested in state {:?} - already closing", self.state);
            }
        }
    }

    /// Terminate without any further exchange with the peer
    pub fn abort(&mut self) {
        self.retransmission_queue = RetransmissionQueue::default();
        self.set_state(ConnectionState::Terminated);
    }

    /// Handle the expiry of [Connection::retransmit_deadline] by resending everything that is
    ///  outstanding. Fails if the retransmission limit is exhausted, which terminates the
    ///  connection.
    ///
    /// NB: If only our FIN is left unacknowledged after the peer's FIN was consumed, both
    ///      directions are complete. Exhausting the limit then terminates without an error,
    ///      since the peer's final ACK may simply have been lost.
    pub fn on_retransmit_timeout(&mut self, now: Instant) -> Result<(), StreamError> {
        if self.retransmission_queue.is_empty() {
            return Ok(());
        }

        if self.is_only_final_fin_outstanding() {
            let max_retransmissions = self.config.max_retransmissions.unwrap_or(FINAL_FIN_MAX_RETRANSMISSIONS);
            if self.retransmission_queue.max_retry_count() >= Some(max_retransmissions) {
                // both directions are complete, only the peer's last ACK is missing
                warn!("no ACK for our FIN after {} retransmissions - closing anyway", max_retransmissions);
                self.abort();
                return Ok(());
            }
        }
        else if let Some(max_retransmissions) = self.config.max_retransmissions {
            if self.retransmission_queue.max_retry_count() >= Some(max_retransmissions) {
                warn!("no ACK after {} retransmissions - giving up", max_retransmissions);
                self.abort();
                return Err(StreamError::TimedOut);
            }
        }

        warn!("retransmission timeout after {:?}, resending from {}", self.rto_estimator.rto(), self.send_unacked);

        let ack = self.receive_window.recv_next();
        for raw in self.retransmission_queue.prepare_resend(now, ack) {
            self.outbox.push_back(Bytes::copy_from_slice(raw));
        }

        if self.config.rto_backoff {
            self.rto_estimator.back_off();
        }
        Ok(())
    }

    pub fn on_segment(&mut self, raw: &[u8], now: Instant) {
        let segment = match Segment::decode(raw) {
            Ok(segment) => segment,
            Err(e) => {
                debug!("dropping segment: {}", e);
                return;
            }
        };
        trace!("received {:?} with {} payload bytes in state {:?}", segment.header, segment.payload.len(), self.state);

        match self.state {
            ConnectionState::Closed => self.on_segment_closed(&segment, now),
            ConnectionState::SynSent => self.on_segment_syn_sent(&segment, now),
            ConnectionState::SynReceived => self.on_segment_syn_received(&segment, now),
            ConnectionState::Established | ConnectionState::FinWait1 | ConnectionState::FinWait2 |
            ConnectionState::CloseWait | ConnectionState::LastAck | ConnectionState::Closing => {
                self.on_synchronized_segment(&segment, now)
            }
            ConnectionState::Terminated => trace!("connection is terminated - ignoring segment"),
        }
    }

    fn on_synchronized_segment(&mut self, segment: &Segment, now: Instant) {
        let header = &segment.header;

        if header.flags.contains(Flags::SYN) {
            if (header.seq + 1).is_at_or_before(self.receive_window.recv_next()) {
                debug!("duplicate handshake segment {:?} - echoing ACK", header);
                self.send_ack();
            }
            else {
                debug!("unexpected SYN {:?} on a synchronized connection - ignoring", header);
            }
            return;
        }

        if header.flags.contains(Flags::ACK) {
            self.on_ack(header.ack, header.window, now);
            if self.is_terminated() {
                return;
            }
        }

        let mut should_ack = false;

        if !segment.payload.is_empty() {
            match self.receive_window.on_payload(header.seq, segment.payload) {
                Arrival::Stale => {
                    debug!("stale duplicate {:?} - echoing ACK", header);
                    should_ack = true;
                }
                Arrival::OutOfWindow => {
                    debug!("segment {:?} is beyond the receive window - dropping", header);
                    return;
                }
                Arrival::Accepted { delivered } => {
                    if !delivered.is_empty() {
                        trace!("delivering {} bytes", delivered.len());
                        self.app_events.push_back(AppEvent::Data(Bytes::from(delivered)));
                    }
                    should_ack = true;
                }
            }
        }

        if header.flags.contains(Flags::FIN) {
            let fin_seq = header.seq + seq_len(Flags::empty(), segment.payload.len());
            if fin_seq == self.receive_window.recv_next() {
                self.receive_window.consume_control_flag();
                self.on_peer_fin();
            }
            else if fin_seq.is_before(self.receive_window.recv_next()) {
                debug!("duplicate FIN {:?}", header);
            }
            else {
                trace!("FIN at {} arrived ahead of missing data", fin_seq);
            }
            should_ack = true;
        }

        if should_ack {
            self.send_ack();
        }
    }

    fn on_ack(&mut self, ack: SeqNum, window: u16, now: Instant) {
        if ack.is_after(self.send_next) {
            debug!("ACK {} for data that was never sent (send_next={}) - ignoring", ack, self.send_next);
            return;
        }

        self.send_window = min(window, self.config.max_send_window);

        if !ack.is_after(self.send_unacked) {
            return;
        }

        let num_removed = self.retransmission_queue.on_ack(ack, now, &mut self.rto_estimator);
        trace!("ACK {} removed {} segments from the retransmission queue", ack, num_removed);
        self.send_unacked = ack;

        if self.is_fin_acked() {
            match self.state {
                ConnectionState::FinWait1 => self.set_state(ConnectionState::FinWait2),
                ConnectionState::Closing | ConnectionState::LastAck => self.set_state(ConnectionState::Terminated),
                _ => {}
            }
        }
    }

    /// true if the peer's FIN was consumed and everything we sent except our own FIN is
    ///  acknowledged
    fn is_only_final_fin_outstanding(&self) -> bool {
        match self.state {
            ConnectionState::LastAck | ConnectionState::Closing => self.fin_seq == Some(self.send_unacked),
            _ => false,
        }
    }

    fn is_fin_acked(&self) -> bool {
        match self.fin_seq {
            Some(fin_seq) => fin_seq.is_before(self.send_unacked),
            None => false,
        }
    }

    fn on_peer_fin(&mut self) {
        match self.state {
            ConnectionState::Established => self.set_state(ConnectionState::CloseWait),
            ConnectionState::FinWait1 => self.set_state(ConnectionState::Closing),
            ConnectionState::FinWait2 => self.set_state(ConnectionState::Terminated),
            ConnectionState::CloseWait | ConnectionState::LastAck | ConnectionState::Closing => {
                // the peer's FIN is consumed only once, so this is unreachable
                debug!("second FIN from peer in state {:?}", self.state);
                return;
            }
            ConnectionState::Closed | ConnectionState::SynSent | ConnectionState::SynReceived | ConnectionState::Terminated => {
                return;
            }
        }
        self.app_events.push_back(AppEvent::PeerHalfClosed);
    }

    fn send_fin(&mut self, now: Instant) {
        self.fin_seq = Some(self.send_next);
        self.transmit(Flags::FIN | Flags::ACK, &[], now);
    }

    /// Encode a segment at `send_next`, queueing it for retransmission if it consumes sequence
    ///  space
    fn transmit(&mut self, flags: Flags, payload: &[u8], now: Instant) {
        let raw = Segment::encode(flags, self.send_next, self.receive_window.recv_next(), self.config.receive_window, payload);
        trace!("sending {:?} seq={} with {} payload bytes", flags, self.send_next, payload.len());

        let seq_len = seq_len(flags, payload.len());
        if seq_len > 0 {
            self.retransmission_queue.push(raw.clone(), self.send_next, seq_len, now);
            self.send_next += seq_len;
        }
        self.outbox.push_back(raw.freeze());
    }

    fn send_ack(&mut self) {
        let raw = Segment::encode(Flags::ACK, self.send_next, self.receive_window.recv_next(), self.config.receive_window, &[]);
        trace!("sending ACK {}", self.receive_window.recv_next());
        self.outbox.push_back(raw.freeze());
    }

    fn set_state(&mut self, new_state: ConnectionState) {
        if new_state == self.state {
            return;
        }
        debug!("state {:?} -> {:?}", self.state, new_state);
        match new_state {
            ConnectionState::Established => info!("connection established"),
            ConnectionState::Terminated => info!("connection closed"),
            _ => {}
        }
        self.state = new_state;
    }
}
