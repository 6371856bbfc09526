//! SYN probe construction using pnet.

use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::{Ipv4Flags, MutableIpv4Packet};
use pnet_packet::tcp::{MutableTcpPacket, TcpFlags};
use std::net::{IpAddr, Ipv4Addr};

use hoptrace_core::TraceError;

/// TCP window size used in SYN probes.
const TCP_WINDOW_SIZE: u16 = 1024;

/// IP identification stamped on outgoing probes.
const PROBE_PACKET_ID: u16 = 51102;

/// Builds one SYN probe as a full IP packet ready for an `IP_HDRINCL` socket.
///
/// The caller supplies the sequence number, which carries the probe's
/// embedded `(ttl, timestamp)` state; `ttl` must match the hop the sequence
/// number encodes or the receivers will reconstruct the wrong hop.
pub fn build_syn_probe(
    src_ip: IpAddr,
    dst_ip: IpAddr,
    src_port: u16,
    dst_port: u16,
    ttl: u8,
    seq: u32,
) -> Result<Vec<u8>, TraceError> {
    match (src_ip, dst_ip) {
        (IpAddr::V4(src), IpAddr::V4(dst)) => {
            build_syn_probe_v4(src, dst, src_port, dst_port, ttl, seq)
        }
        (IpAddr::V6(_), IpAddr::V6(_)) => Err(TraceError::UnsupportedAddressFamily("ip6")),
        _ => Err(TraceError::InvalidConfig(
            "IP version mismatch between source and destination".to_string(),
        )),
    }
}

fn build_syn_probe_v4(
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    ttl: u8,
    seq: u32,
) -> Result<Vec<u8>, TraceError> {
    let tcp_len = 20; // TCP header without options
    let ip_len = 20 + tcp_len;

    let mut buffer = vec![0u8; ip_len];

    let mut ip_packet = MutableIpv4Packet::new(&mut buffer)
        .ok_or_else(|| TraceError::Internal("Failed to create IP packet".to_string()))?;

    ip_packet.set_version(4);
    ip_packet.set_header_length(5); // 5 * 4 = 20 bytes
    ip_packet.set_total_length(ip_len as u16);
    ip_packet.set_identification(PROBE_PACKET_ID);
    ip_packet.set_flags(Ipv4Flags::DontFragment);
    ip_packet.set_ttl(ttl);
    ip_packet.set_next_level_protocol(IpNextHeaderProtocols::Tcp);
    ip_packet.set_source(src_ip);
    ip_packet.set_destination(dst_ip);

    let ip_checksum = pnet_packet::ipv4::checksum(&ip_packet.to_immutable());
    ip_packet.set_checksum(ip_checksum);

    let tcp_start = 20; // after the IP header
    {
        let mut tcp_packet = MutableTcpPacket::new(&mut buffer[tcp_start..])
            .ok_or_else(|| TraceError::Internal("Failed to create TCP packet".to_string()))?;

        tcp_packet.set_source(src_port);
        tcp_packet.set_destination(dst_port);
        tcp_packet.set_sequence(seq);
        tcp_packet.set_acknowledgement(0);
        tcp_packet.set_data_offset(5); // 5 * 4 = 20 bytes, no options
        tcp_packet.set_flags(TcpFlags::SYN);
        tcp_packet.set_window(TCP_WINDOW_SIZE);
        tcp_packet.set_urgent_ptr(0);

        let tcp_checksum =
            pnet_packet::tcp::ipv4_checksum(&tcp_packet.to_immutable(), &src_ip, &dst_ip);
        tcp_packet.set_checksum(tcp_checksum);
    }

    Ok(buffer)
}
