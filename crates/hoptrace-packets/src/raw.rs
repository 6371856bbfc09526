//! Raw socket acquisition.
//!
//! Each receiver owns exactly one raw socket for its lifetime; the sender
//! owns one `IP_HDRINCL` socket. Opening any of them requires elevated
//! privilege, and failure to open or bind is fatal to startup.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use hoptrace_core::TraceError;

/// Poll interval for the capture loops; cancellation is observed between
/// reads, so this bounds shutdown latency.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

fn domain_for(addr: IpAddr) -> Domain {
    if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    }
}

fn bind_to(socket: &Socket, addr: IpAddr) -> Result<(), TraceError> {
    socket
        .bind(&SockAddr::from(SocketAddr::new(addr, 0)))
        .map_err(|e| TraceError::SocketBind {
            addr,
            source: e,
        })
}

/// Opens a raw TCP-protocol capture socket bound to the probing source
/// address. Reads deliver whole segments addressed to the host (for IPv4,
/// with the outer IP header included).
pub fn tcp_capture_socket(src_addr: IpAddr) -> Result<Socket, TraceError> {
    let socket = Socket::new(domain_for(src_addr), Type::RAW, Some(Protocol::TCP))
        .map_err(TraceError::SocketCreation)?;
    socket
        .set_read_timeout(Some(READ_TIMEOUT))
        .map_err(TraceError::SocketCreation)?;
    bind_to(&socket, src_addr)?;
    Ok(socket)
}

/// Opens a raw ICMP capture socket for the source address's family
/// (protocol 1 for IPv4, 58 for IPv6), bound to that address.
pub fn icmp_capture_socket(src_addr: IpAddr) -> Result<Socket, TraceError> {
    let protocol = if src_addr.is_ipv4() {
        Protocol::ICMPV4
    } else {
        Protocol::ICMPV6
    };
    let socket = Socket::new(domain_for(src_addr), Type::RAW, Some(protocol))
        .map_err(TraceError::SocketCreation)?;
    socket
        .set_read_timeout(Some(READ_TIMEOUT))
        .map_err(TraceError::SocketCreation)?;
    bind_to(&socket, src_addr)?;
    Ok(socket)
}

/// Opens a raw socket for transmitting self-built IP packets
/// (`IP_HDRINCL`; the probe buffer carries the full IP header).
pub fn probe_send_socket(src_addr: IpAddr) -> Result<Socket, TraceError> {
    let socket = Socket::new(domain_for(src_addr), Type::RAW, Some(Protocol::TCP))
        .map_err(TraceError::SocketCreation)?;
    socket
        .set_header_included(true)
        .map_err(TraceError::SocketCreation)?;
    Ok(socket)
}

/// Sends one packet toward `target`.
pub fn send_to(socket: &Socket, packet: &[u8], target: IpAddr) -> Result<(), TraceError> {
    let addr = SockAddr::from(SocketAddr::new(target, 0));
    socket
        .send_to(packet, &addr)
        .map_err(TraceError::WriteFailed)?;
    Ok(())
}

/// Receives one packet, returning the initialized bytes and the peer
/// address it arrived from.
pub fn recv_from<'a>(
    socket: &Socket,
    buf: &'a mut [MaybeUninit<u8>],
) -> std::io::Result<(&'a [u8], Option<IpAddr>)> {
    let (len, addr) = socket.recv_from(buf)?;
    // recv_from initialized the first `len` bytes.
    let bytes = unsafe { std::slice::from_raw_parts(buf.as_ptr().cast::<u8>(), len) };
    Ok((bytes, addr.as_socket().map(|s| s.ip())))
}

/// True for the error kinds a read timeout surfaces as; the capture loops
/// treat these as "no packet yet", not failures.
pub fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}
