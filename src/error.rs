use std::fmt::{Display, Formatter};

/// Failures that are surfaced outside of the connection's event loop. Conditions that the
///  protocol recovers from on its own (stale duplicates, out-of-window data, retransmission
///  timeouts) are not errors and never show up here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// received bytes can not be a segment, e.g. shorter than the fixed header
    MalformedSegment { len: usize },
    /// the transport failed while the handshake was in progress
    ConnectionRefused,
    /// the transport failed after the connection was established
    ConnectionAborted,
    /// the configured retransmission limit was exceeded without the peer acknowledging
    TimedOut,
}

impl Display for StreamError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::MalformedSegment { len } => write!(f, "malformed segment of {} bytes", len),
            StreamError::ConnectionRefused => write!(f, "connection refused"),
            StreamError::ConnectionAborted => write!(f, "connection aborted"),
            StreamError::TimedOut => write!(f, "connection timed out"),
        }
    }
}

impl std::error::Error for StreamError {}
