//! Connection establishment: the three-way handshake covering the `Closed`, `SynSent` and
//!  `SynReceived` states.
//!
//! SYN and SYN+ACK segments go through the regular retransmission queue, so a lost handshake
//!  segment is resent by the same timeout mechanism as data.

use tokio::time::Instant;
use tracing::{debug, trace};
use crate::connection::{Connection, ConnectionState};
use crate::segment::{Flags, Segment};
use crate::seq_number::SeqNum;
use crate::util::random::Random;

pub fn initial_sequence_number<R: Random>() -> SeqNum {
    SeqNum::from_raw(R::next_u32())
}

impl Connection {
    /// Active open: send a SYN and wait for the peer's SYN+ACK
    pub fn open_active(&mut self, now: Instant) {
        if self.state != ConnectionState::Closed {
            debug!("active open in state {:?} - ignoring", self.state);
            return;
        }
        self.transmit(Flags::SYN, &[], now);
        self.set_state(ConnectionState::SynSent);
    }

    /// Passive open: accept an incoming SYN while `Closed`
    pub fn listen(&mut self) {
        self.listening = true;
    }

    pub(super) fn on_segment_closed(&mut self, segment: &Segment, now: Instant) {
        if !self.listening {
            trace!("not listening - ignoring {:?}", segment.header);
            return;
        }
        if segment.header.flags != Flags::SYN {
            debug!("expected SYN, got {:?} - ignoring", segment.header);
            return;
        }

        self.receive_window.synchronize(segment.header.seq);
        self.receive_window.consume_control_flag();
        self.send_window = segment.header.window.min(self.config.max_send_window);

        self.transmit(Flags::SYN | Flags::ACK, &[], now);
        self.set_state(ConnectionState::SynReceived);
    }

    pub(super) fn on_segment_syn_sent(&mut self, segment: &Segment, now: Instant) {
        let header = &segment.header;
        if !header.flags.contains(Flags::SYN | Flags::ACK) {
            debug!("expected SYN+ACK, got {:?} - ignoring", header);
            return;
        }
        if header.ack != self.isn + 1 {
            debug!("SYN+ACK {:?} does not acknowledge our ISN {} - ignoring", header, self.isn);
            return;
        }

        self.receive_window.synchronize(header.seq);
        self.receive_window.consume_control_flag();
        self.on_ack(header.ack, header.window, now);
        self.set_state(ConnectionState::Established);
        self.send_ack();
    }

    pub(super) fn on_segment_syn_received(&mut self, segment: &Segment, now: Instant) {
        let header = &segment.header;
        if header.flags.contains(Flags::SYN) {
            // our SYN+ACK is queued and will be resent on timeout
            debug!("duplicate SYN {:?} while waiting for the handshake ACK - ignoring", header);
            return;
        }
        if !header.flags.contains(Flags::ACK) || header.ack != self.isn + 1 {
            debug!("expected ACK {}, got {:?} - ignoring", self.isn + 1, header);
            return;
        }

        self.set_state(ConnectionState::Established);
        // a lost handshake ACK is implied by a data segment carrying the same ACK
        self.on_synchronized_segment(segment, now);
    }
}
