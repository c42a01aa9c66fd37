//! Retransmission timeout calculation as described in RFC 6298.
//!
//! Samples are fed only for segments that were acknowledged without ever being retransmitted
//!  (Karn's algorithm) - the retransmission queue takes care of that.

use std::cmp::{max, min};
use std::time::Duration;
use tracing::trace;
use crate::config::StreamConfig;

pub struct RtoEstimator {
    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,

    config_min_rto: Duration,
    config_max_rto: Duration,
    config_granularity: Duration,
}

impl RtoEstimator {
    pub fn new(config: &StreamConfig) -> RtoEstimator {
        RtoEstimator {
            srtt: None,
            rttvar: Duration::ZERO,
            rto: config.initial_rto,
            config_min_rto: config.min_rto,
            config_max_rto: config.max_rto,
            config_granularity: config.clock_granularity,
        }
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }

    pub fn on_sample(&mut self, r: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(r);
                self.rttvar = r / 2;
            }
            Some(srtt) => {
                // beta = 1/4, alpha = 1/8
                self.rttvar = self.rttvar * 3 / 4 + srtt.abs_diff(r) / 4;
                self.srtt = Some(srtt * 7 / 8 + r / 8);
            }
        }

        let srtt = self.srtt.unwrap_or(r);
        let rto = srtt + max(self.config_granularity, self.rttvar * 4);
        self.rto = min(max(rto, self.config_min_rto), self.config_max_rto);

        trace!("RTT sample {:?}: SRTT={:?} RTTVAR={:?} RTO={:?}", r, self.srtt, self.rttvar, self.rto);
    }

    /// double the RTO after a retransmission timeout; the next valid sample recalculates it
    pub fn back_off(&mut self) {
        self.rto = min(self.rto * 2, self.config_max_rto);
    }
}
