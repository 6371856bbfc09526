//! Wire-format handling for hoptrace.
//!
//! The only crate that touches raw bytes and socket creation: the TCP header
//! codec used by both receivers, SYN probe construction, and raw socket
//! acquisition.

pub mod probe;
pub mod raw;
pub mod tcp;

pub use probe::build_syn_probe;
pub use tcp::{TcpHeader, ACK, FIN, RST, SYN};
pub use tcp::{
    ICMP_HEADER_LEN, MAX_IPV4_HEADER_LEN, MAX_TCP_HEADER_LEN, MIN_IPV4_HEADER_LEN,
    MIN_IPV6_HEADER_LEN, MIN_TCP_HEADER_LEN,
};
