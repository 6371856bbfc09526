//! SYN probe sender and TCP reply receiver.
//!
//! The sender transmits one SYN per hop with the probe's identity embedded
//! in the sequence number; the receiver passively captures RST/ACK replies
//! from the destination and reconstructs hop and round-trip time from the
//! acknowledgment number alone.

pub mod receiver;
pub mod sender;

pub use receiver::TcpReceiver;
pub use sender::send_sweep;
