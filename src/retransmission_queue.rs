use std::collections::VecDeque;
use std::time::Duration;
use bytes::BytesMut;
use tokio::time::Instant;
use tracing::{debug, trace};
use crate::rto_estimator::RtoEstimator;
use crate::segment::SegmentHeader;
use crate::seq_number::SeqNum;

/// A segment that was handed to the network and is not acknowledged yet
#[derive(Debug)]
pub struct OutstandingSegment {
    pub raw: BytesMut,
    pub sent_at: Instant,
    pub retry_count: u32,
    pub seq: SeqNum,
    /// number of sequence numbers the segment occupies, including SYN / FIN
    pub seq_len: u32,
}
impl OutstandingSegment {
    pub fn end_seq(&self) -> SeqNum {
        self.seq + self.seq_len
    }
}

/// The send buffer of a connection: all unacknowledged segments in the order they were sent.
///
/// NB: The segments' sequence ranges are contiguous and gap-free, covering exactly
///      `[send_unacked, send_next)`. ACKs are cumulative, so entries are only ever removed
///      from the head.
#[derive(Default)]
pub struct RetransmissionQueue {
    entries: VecDeque<OutstandingSegment>,
}

impl RetransmissionQueue {
    pub fn push(&mut self, raw: BytesMut, seq: SeqNum, seq_len: u32, now: Instant) {
        debug_assert!(seq_len > 0, "segments without sequence space are never retransmitted");
        debug_assert!(self.entries.back().map_or(true, |last| last.end_seq() == seq), "outstanding segments must be contiguous");

        self.entries.push_back(OutstandingSegment {
            raw,
            sent_at: now,
            retry_count: 0,
            seq,
            seq_len,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutstandingSegment> {
        self.entries.iter()
    }

    /// Remove all segments that are fully covered by a cumulative ACK, feeding RTT samples for
    ///  those that were never retransmitted. Returns the number of removed segments.
    pub fn on_ack(&mut self, ack: SeqNum, now: Instant, rto_estimator: &mut RtoEstimator) -> usize {
        let mut num_removed = 0;

        while let Some(head) = self.entries.front() {
            if !head.end_seq().is_at_or_before(ack) {
                break;
            }

            if head.retry_count == 0 {
                rto_estimator.on_sample(now.saturating_duration_since(head.sent_at));
            }
            else {
                trace!("segment {} was retransmitted - not sampling its RTT", head.seq);
            }

            self.entries.pop_front();
            num_removed += 1;
        }

        debug_assert!(
            self.entries.iter().all(|e| !e.end_seq().is_at_or_before(ack)),
            "cumulative ACK covers a non-head segment while the head is still unacknowledged"
        );

        num_removed
    }

    /// The point in time when the oldest outstanding segment times out, or `None` if there is
    ///  nothing to retransmit
    pub fn deadline(&self, rto: Duration) -> Option<Instant> {
        self.entries.iter()
            .map(|e| e.sent_at)
            .min()
            .map(|sent_at| sent_at + rto)
    }

    pub fn max_retry_count(&self) -> Option<u32> {
        self.entries.iter()
            .map(|e| e.retry_count)
            .max()
    }

    /// Go-Back-N: prepare *all* outstanding segments for resending, refreshing their ACK field
    ///  to the current receive position. Returns the raw segments in send order.
    pub fn prepare_resend(&mut self, now: Instant, ack: SeqNum) -> impl Iterator<Item = &[u8]> {
        debug!("resending {} outstanding segments", self.entries.len());

        for entry in self.entries.iter_mut() {
            entry.retry_count += 1;
            entry.sent_at = now;
            SegmentHeader::patch_ack(&mut entry.raw, ack);
        }

        self.entries.iter()
            .map(|e| e.raw.as_ref())
    }
}
