use std::time::Duration;
use anyhow::bail;
use crate::segment::max_payload_len;
use crate::safe_converter::SafeCast;

pub struct StreamConfig {
    /// The maximum number of payload bytes per segment. There is no MSS negotiation, so both
    ///  peers should agree on this value; the receiver accepts anything that fits its window.
    ///
    /// The default of 536 is the minimum any TCP peer must accept (RFC 1122).
    pub max_segment_size: usize,

    /// This is the capacity of the receive buffer, i.e. the number of bytes beyond the next
    ///  expected byte that can be buffered out of order. It is also advertised as the window
    ///  in every segment.
    pub receive_window: u16,

    /// Upper bound for the peer-advertised send window
    pub max_send_window: u16,

    /// The retransmission timeout before the first RTT sample is available
    pub initial_rto: Duration,
    pub min_rto: Duration,
    pub max_rto: Duration,
    /// 'G' in RFC 6298, the lower bound for the variance term of the RTO
    pub clock_granularity: Duration,

    /// If true, every retransmission timeout doubles the RTO (capped at `max_rto`) until the
    ///  next valid RTT sample
    pub rto_backoff: bool,

    /// The number of times the retransmission queue is resent before the connection is aborted.
    ///  `None` means resending indefinitely.
    pub max_retransmissions: Option<u32>,

    /// number of pending writes buffered between the application and the connection's event loop
    pub app_channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            max_segment_size: 536,
            receive_window: 3072,
            max_send_window: 3072,
            initial_rto: Duration::from_secs(1),
            min_rto: Duration::from_secs(1),
            max_rto: Duration::from_secs(60),
            clock_granularity: Duration::from_millis(100),
            rto_backoff: true,
            max_retransmissions: Some(5),
            app_channel_capacity: 64,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_segment_size == 0 {
            bail!("max segment size must not be zero");
        }
        if self.max_segment_size > max_payload_len() {
            bail!("max segment size {} exceeds the maximum of {}", self.max_segment_size, max_payload_len());
        }
        if self.receive_window == 0 {
            bail!("receive window must not be zero");
        }
        if self.max_send_window == 0 {
            bail!("maximum send window must not be zero");
        }
        if self.min_rto > self.max_rto {
            bail!("min RTO {:?} is greater than max RTO {:?}", self.min_rto, self.max_rto);
        }
        if self.initial_rto < self.min_rto || self.initial_rto > self.max_rto {
            bail!("initial RTO {:?} is outside the range {:?}..={:?}", self.initial_rto, self.min_rto, self.max_rto);
        }
        if self.app_channel_capacity == 0 {
            bail!("application channel capacity must not be zero");
        }
        Ok(())
    }

    pub fn receive_window_len(&self) -> usize {
        self.receive_window.safe_cast()
    }
}
