//! Capture loop and decode for ICMP time-exceeded messages.

use std::mem::MaybeUninit;
use std::net::IpAddr;

use socket2::Socket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use hoptrace_core::{seq, IcmpResponse, Probe, ProbeEvent, TraceConfig, TraceResult};
use hoptrace_packets::{
    raw, TcpHeader, ICMP_HEADER_LEN, MAX_IPV4_HEADER_LEN, MAX_TCP_HEADER_LEN,
    MIN_IPV4_HEADER_LEN, MIN_IPV6_HEADER_LEN, MIN_TCP_HEADER_LEN,
};

/// Capacity of both the internal decode channel and the output channel.
const CHANNEL_DEPTH: usize = 256;

/// Address-family-specific capture parameters.
#[derive(Debug, Clone, Copy)]
struct AfParams {
    /// Minimum length of the quoted IP header inside the ICMP payload.
    inner_ip_header_len: usize,
    /// Raw IPv4 sockets deliver the outer IP header; v6 sockets do not.
    outer_header_delivered: bool,
}

impl AfParams {
    fn for_addr(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self {
                inner_ip_header_len: MIN_IPV4_HEADER_LEN,
                outer_header_delivered: true,
            },
            IpAddr::V6(_) => Self {
                inner_ip_header_len: MIN_IPV6_HEADER_LEN,
                outer_header_delivered: false,
            },
        }
    }
}

/// Passive receiver for router time-exceeded replies.
pub struct IcmpReceiver;

impl IcmpReceiver {
    /// Opens the raw ICMP socket for the source address's family and starts
    /// the capture and emission loops.
    ///
    /// Socket creation or bind failure is returned immediately. The
    /// returned channel yields one [`ProbeEvent::Icmp`] per accepted
    /// message, with `from_name` unset, and closes once `cancel` fires.
    pub fn spawn(
        config: &TraceConfig,
        cancel: CancellationToken,
    ) -> TraceResult<mpsc::Receiver<ProbeEvent>> {
        let socket = raw::icmp_capture_socket(config.src_addr)?;
        info!(src = %config.src_addr, "Starting ICMP receiver");

        let (decoded_tx, decoded_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (out_tx, out_rx) = mpsc::channel(CHANNEL_DEPTH);

        let capture_config = config.clone();
        let capture_cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            capture_loop(socket, capture_config, decoded_tx, capture_cancel)
        });
        tokio::spawn(emit_loop(decoded_rx, out_tx, cancel));

        Ok(out_rx)
    }
}

/// Blocking capture loop; sole owner of the socket, which closes when the
/// loop returns.
fn capture_loop(
    socket: Socket,
    config: TraceConfig,
    decoded: mpsc::Sender<IcmpResponse>,
    cancel: CancellationToken,
) {
    let params = AfParams::for_addr(config.src_addr);
    // Outer header (v4 only, up to full options) + ICMP header + quoted IP
    // header (up to full options) + quoted TCP header.
    let buf_len = if params.outer_header_delivered {
        MAX_IPV4_HEADER_LEN + ICMP_HEADER_LEN + MAX_IPV4_HEADER_LEN + MAX_TCP_HEADER_LEN
    } else {
        ICMP_HEADER_LEN + MAX_IPV4_HEADER_LEN + MAX_TCP_HEADER_LEN
    };
    let mut buf = vec![MaybeUninit::<u8>::uninit(); buf_len];

    while !cancel.is_cancelled() {
        match raw::recv_from(&socket, &mut buf) {
            Ok((bytes, from)) => {
                let Some(from) = from else { continue };
                if let Some(response) =
                    decode_message(bytes, from, params, config.max_ttl, seq::now_millis24())
                {
                    trace!(
                        ttl = response.probe.ttl,
                        from = %response.from_addr,
                        rtt_ms = response.rtt_ms,
                        "Accepted time-exceeded reply"
                    );
                    if decoded.blocking_send(response).is_err() {
                        break;
                    }
                }
            }
            Err(e) if raw::is_timeout(&e) => continue,
            Err(e) => {
                if !cancel.is_cancelled() {
                    warn!(error = %e, "ICMP capture read failed without cancellation");
                }
                break;
            }
        }
    }
}

/// Forwards decoded replies to the output channel until cancellation; the
/// output channel closes when this task returns.
async fn emit_loop(
    mut decoded: mpsc::Receiver<IcmpResponse>,
    out: mpsc::Sender<ProbeEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("ICMP receiver exiting");
                break;
            }
            response = decoded.recv() => match response {
                Some(r) => {
                    if out.send(ProbeEvent::Icmp(r)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

/// Decodes one captured ICMP message into a response, or `None` for
/// messages too short to quote one of our probes. The message type is not
/// inspected; anything that does not carry a plausible quoted TCP header
/// falls out via the size gate.
fn decode_message(
    buf: &[u8],
    from: IpAddr,
    params: AfParams,
    max_ttl: u8,
    now24: u32,
) -> Option<IcmpResponse> {
    let buf = if params.outer_header_delivered {
        // Skip the outer IPv4 header by its real length.
        let ihl = usize::from(*buf.first()? & 0x0f) * 4;
        if ihl < MIN_IPV4_HEADER_LEN || buf.len() < ihl {
            return None;
        }
        &buf[ihl..]
    } else {
        buf
    };

    if buf.len() < ICMP_HEADER_LEN + params.inner_ip_header_len + MIN_TCP_HEADER_LEN {
        return None;
    }

    // The quoted TCP header sits right after the ICMP header and the quoted
    // IP header's minimum span.
    let inner = TcpHeader::parse(&buf[ICMP_HEADER_LEN + params.inner_ip_header_len..]).ok()?;

    // The router never completed a handshake, so the probe's own sequence
    // number carries the embedded state.
    let (ttl, ts) = seq::decode(inner.seq);

    if ttl > max_ttl {
        return None;
    }
    if ts > now24 {
        return None;
    }

    Some(IcmpResponse {
        probe: Probe {
            src_port: inner.src_port,
            ttl,
        },
        from_addr: from,
        from_name: None,
        rtt_ms: seq::elapsed_millis(now24, ts),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTER: &str = "198.51.100.3";

    fn v4_params() -> AfParams {
        AfParams::for_addr("192.0.2.1".parse().unwrap())
    }

    fn v6_params() -> AfParams {
        AfParams::for_addr("2001:db8::1".parse().unwrap())
    }

    /// Builds a captured IPv4 buffer: outer IP header, ICMP time-exceeded
    /// header, quoted IP header, quoted TCP header carrying `seq`.
    fn time_exceeded_v4(seq_num: u32, src_port: u16) -> Vec<u8> {
        let mut buf = vec![
            0u8;
            MIN_IPV4_HEADER_LEN
                + ICMP_HEADER_LEN
                + MIN_IPV4_HEADER_LEN
                + MIN_TCP_HEADER_LEN
        ];
        buf[0] = 0x45; // outer IPv4, IHL 5
        let icmp = MIN_IPV4_HEADER_LEN;
        buf[icmp] = 11; // time exceeded
        let inner_ip = icmp + ICMP_HEADER_LEN;
        buf[inner_ip] = 0x45;
        let inner_tcp = inner_ip + MIN_IPV4_HEADER_LEN;
        buf[inner_tcp..inner_tcp + 2].copy_from_slice(&src_port.to_be_bytes());
        buf[inner_tcp + 4..inner_tcp + 8].copy_from_slice(&seq_num.to_be_bytes());
        buf[inner_tcp + 12] = 0x50;
        buf
    }

    fn router() -> IpAddr {
        ROUTER.parse().unwrap()
    }

    #[test]
    fn test_time_exceeded_decodes() {
        let now = 600_000;
        let buf = time_exceeded_v4(seq::encode(5, now - 17), 40002);
        let response = decode_message(&buf, router(), v4_params(), 30, now).unwrap();

        assert_eq!(response.probe.ttl, 5);
        assert_eq!(response.probe.src_port, 40002);
        assert_eq!(response.from_addr, router());
        assert_eq!(response.from_name, None);
        assert_eq!(response.rtt_ms, 17);
    }

    #[test]
    fn test_outer_header_with_options_skipped() {
        let now = 600_000;
        let mut buf = time_exceeded_v4(seq::encode(3, now - 8), 40000);
        // Grow the outer header to 24 bytes (IHL 6).
        buf.splice(MIN_IPV4_HEADER_LEN..MIN_IPV4_HEADER_LEN, [0u8; 4]);
        buf[0] = 0x46;

        let response = decode_message(&buf, router(), v4_params(), 30, now).unwrap();
        assert_eq!(response.probe.ttl, 3);
        assert_eq!(response.rtt_ms, 8);
    }

    #[test]
    fn test_undersized_message_discarded() {
        let now = 600_000;
        let mut buf = time_exceeded_v4(seq::encode(5, now - 1), 40000);
        buf.truncate(buf.len() - 1);
        assert!(decode_message(&buf, router(), v4_params(), 30, now).is_none());
    }

    #[test]
    fn test_garbage_outer_header_discarded() {
        let now = 600_000;
        let mut buf = time_exceeded_v4(seq::encode(5, now - 1), 40000);
        buf[0] = 0x41; // IHL 1: impossible
        assert!(decode_message(&buf, router(), v4_params(), 30, now).is_none());
        assert!(decode_message(&[], router(), v4_params(), 30, now).is_none());
    }

    #[test]
    fn test_ttl_above_max_discarded() {
        let now = 600_000;
        let buf = time_exceeded_v4(seq::encode(31, now - 1), 40000);
        assert!(decode_message(&buf, router(), v4_params(), 30, now).is_none());
    }

    #[test]
    fn test_future_timestamp_discarded() {
        let now = 600_000;
        let buf = time_exceeded_v4(seq::encode(5, now + 2), 40000);
        assert!(decode_message(&buf, router(), v4_params(), 30, now).is_none());
    }

    #[test]
    fn test_v6_message_has_no_outer_header() {
        let now = 600_000;
        // ICMPv6 header + quoted IPv6 header + quoted TCP header.
        let mut buf =
            vec![0u8; ICMP_HEADER_LEN + MIN_IPV6_HEADER_LEN + MIN_TCP_HEADER_LEN];
        buf[0] = 3; // ICMPv6 time exceeded
        let inner_tcp = ICMP_HEADER_LEN + MIN_IPV6_HEADER_LEN;
        buf[inner_tcp..inner_tcp + 2].copy_from_slice(&40001u16.to_be_bytes());
        buf[inner_tcp + 4..inner_tcp + 8]
            .copy_from_slice(&seq::encode(9, now - 3).to_be_bytes());
        buf[inner_tcp + 12] = 0x50;

        let router: IpAddr = "2001:db8::ff".parse().unwrap();
        let response = decode_message(&buf, router, v6_params(), 30, now).unwrap();
        assert_eq!(response.probe.ttl, 9);
        assert_eq!(response.probe.src_port, 40001);
        assert_eq!(response.from_addr, router);
        assert_eq!(response.rtt_ms, 3);
    }

    #[tokio::test]
    async fn test_emit_loop_closes_output_on_cancel() {
        let (decoded_tx, decoded_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(emit_loop(decoded_rx, out_tx, cancel.clone()));

        let response = IcmpResponse {
            probe: Probe {
                src_port: 40000,
                ttl: 2,
            },
            from_addr: router(),
            from_name: None,
            rtt_ms: 5,
        };
        decoded_tx.send(response.clone()).await.unwrap();
        assert_eq!(out_rx.recv().await, Some(ProbeEvent::Icmp(response)));

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(out_rx.recv().await, None);
    }
}
