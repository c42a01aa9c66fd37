//! A reliable, ordered byte stream on top of an unreliable packet transport, using a subset of
//!  TCP: three-way handshake, cumulative ACKs, Go-Back-N retransmission with an RFC 6298
//!  retransmission timeout, a fixed receive window and FIN-based teardown.
//!
//! Segments use the TCP header layout without options. Ports and checksum are left at zero:
//!  addressing and integrity belong to the transport underneath.
//!
//! ```ascii
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-------------------------------+-------------------------------+
//! | source port (0)               | destination port (0)          |
//! +-------------------------------+-------------------------------+
//! | sequence number                                               |
//! +---------------------------------------------------------------+
//! | acknowledgment number                                         |
//! +-------+-------+---------------+-------------------------------+
//! | 5     | 0     | flags         | window                        |
//! +-------+-------+---------------+-------------------------------+
//! | checksum (0)                  | urgent pointer (0)            |
//! +-------------------------------+-------------------------------+
//! | payload ...
//! ```
//!
//! Flags: FIN = 0x01, SYN = 0x02, ACK = 0x10. Everything else is ignored on receipt.
//!
//! [stream::ReliableStream] is the entry point for applications. [connection::Connection] holds
//!  the protocol logic without any I/O, and [event_loop::ConnectionDriver] connects the two.

pub mod config;
pub mod connection;
pub mod error;
pub mod event_loop;
pub mod receive_window;
pub mod retransmission_queue;
pub mod rto_estimator;
pub mod safe_converter;
pub mod segment;
pub mod seq_number;
pub mod stream;
pub mod transport;
pub mod util;
pub mod test_util;
