//! The receive side of a connection: a fixed-capacity window of bytes starting at `recv_next`,
//!  the lowest sequence number that was not yet delivered to the application.
//!
//! Bytes may arrive out of order as long as they fall inside the window. They are stored in a
//!  ring buffer, with a parallel presence map recording which slots hold received data. Whenever
//!  the slot at the window start is present, the maximal contiguous run of present bytes is
//!  delivered and the window slides forward by that length.
//!
//! ```ascii
//!            recv_next                         recv_next + capacity
//!               |                                     |
//!  ... stale ...|  present / missing / present ...    |... out of window ...
//! ```

use bit_set::BitSet;
use tracing::{debug, trace};
use crate::safe_converter::{PrecheckedCast, SafeCast};
use crate::seq_number::SeqNum;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arrival {
    /// The payload lies entirely below `recv_next`. The peer should get an ACK anyway since
    ///  this typically means that our previous ACK was lost.
    Stale,
    /// The payload starts beyond the window. It is dropped without an ACK.
    OutOfWindow,
    /// (Part of) the payload was buffered; `delivered` is the in-order run that became
    ///  available as a result, which may be empty if there is still a gap before it
    Accepted { delivered: Vec<u8> },
}

pub struct ReceiveWindow {
    recv_next: SeqNum,
    buf: Vec<u8>,
    present: BitSet,
    /// ring index corresponding to `recv_next`
    head: usize,
}

impl ReceiveWindow {
    pub fn new(capacity: usize, recv_next: SeqNum) -> ReceiveWindow {
        assert!(capacity > 0);
        ReceiveWindow {
            recv_next,
            buf: vec![0; capacity],
            present: BitSet::with_capacity(capacity),
            head: 0,
        }
    }

    pub fn recv_next(&self) -> SeqNum {
        self.recv_next
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Re-position the (empty) window, e.g. after the peer's initial sequence number becomes
    ///  known in the handshake
    pub fn synchronize(&mut self, recv_next: SeqNum) {
        self.present.clear();
        self.head = 0;
        self.recv_next = recv_next;
    }

    /// Consume a single sequence number that carries no data, i.e. a SYN or FIN, at the start
    ///  of the window.
    ///
    /// NB: A peer never sends data beyond its FIN, so anything still buffered out of order at
    ///      this point is garbage and discarded. Keeping it would misalign it by one position.
    pub fn consume_control_flag(&mut self) {
        if !self.present.is_empty() {
            debug!("discarding out-of-order data beyond a control flag at {}", self.recv_next);
            self.present.clear();
        }
        self.recv_next += 1;
    }

    pub fn on_payload(&mut self, seq: SeqNum, payload: &[u8]) -> Arrival {
        let end = seq + payload.len().prechecked_cast();
        if end.is_at_or_before(self.recv_next) {
            trace!("segment {}..{} is below recv_next {}", seq, end, self.recv_next);
            return Arrival::Stale;
        }

        let (offset, payload) = if seq.is_before(self.recv_next) {
            let already_received: usize = (self.recv_next - seq).safe_cast();
            (0, &payload[already_received..])
        }
        else {
            let offset: usize = (seq - self.recv_next).safe_cast();
            if offset > self.capacity() {
                trace!("segment starting at {} is beyond the receive window {}+{}", seq, self.recv_next, self.capacity());
                return Arrival::OutOfWindow;
            }
            (offset, payload)
        };

        let accepted_len = payload.len().min(self.capacity() - offset);
        if accepted_len < payload.len() {
            trace!("truncating segment at the window edge: {} of {} bytes accepted", accepted_len, payload.len());
        }

        for (i, &b) in payload[..accepted_len].iter().enumerate() {
            let slot = self.slot(offset + i);
            self.buf[slot] = b;
            self.present.insert(slot);
        }

        Arrival::Accepted { delivered: self.take_contiguous() }
    }

    fn slot(&self, offset: usize) -> usize {
        (self.head + offset) % self.capacity()
    }

    /// remove the contiguous run of present bytes at the window start, sliding the window
    fn take_contiguous(&mut self) -> Vec<u8> {
        let mut delivered = Vec::new();
        while delivered.len() < self.capacity() && self.present.remove(self.head) {
            delivered.push(self.buf[self.head]);
            self.head = (self.head + 1) % self.capacity();
        }

        self.recv_next += delivered.len().prechecked_cast();
        delivered
    }
}
