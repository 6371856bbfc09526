//! TCP reply receiver.
//!
//! A long-lived capture loop over a raw TCP-protocol socket bound to the
//! probing source address. Replies from the destination (RST, or ACK from
//! stacks that answer instead of resetting) carry our original sequence
//! number plus one in the acknowledgment field; subtracting one recovers the
//! embedded `(ttl, timestamp)` state.

use std::mem::MaybeUninit;
use std::net::IpAddr;

use socket2::Socket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use hoptrace_core::{seq, Probe, ProbeEvent, TcpResponse, TraceConfig, TraceResult};
use hoptrace_packets::{
    raw, TcpHeader, MAX_TCP_HEADER_LEN, MIN_IPV4_HEADER_LEN, MIN_IPV6_HEADER_LEN,
};

/// Capacity of both the internal decode channel and the output channel.
const CHANNEL_DEPTH: usize = 256;

/// Passive receiver for destination TCP replies.
pub struct TcpReceiver;

impl TcpReceiver {
    /// Opens the raw socket and starts the capture and emission loops.
    ///
    /// Failure to open or bind the socket is returned immediately; nothing
    /// is retried. The returned channel yields one [`ProbeEvent::Tcp`] per
    /// accepted reply and closes once `cancel` fires.
    pub fn spawn(
        config: &TraceConfig,
        cancel: CancellationToken,
    ) -> TraceResult<mpsc::Receiver<ProbeEvent>> {
        let socket = raw::tcp_capture_socket(config.src_addr)?;
        info!(src = %config.src_addr, target = %config.target, "Starting TCP receiver");

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
    decoded: mpsc::Sender<TcpResponse>,
    cancel: CancellationToken,
) {
    let buf_len = ip_header_len(config.src_addr) + MAX_TCP_HEADER_LEN;
    let mut buf = vec![MaybeUninit::<u8>::uninit(); buf_len];

    while !cancel.is_cancelled() {
        match raw::recv_from(&socket, &mut buf) {
            Ok((bytes, from)) => {
                if let Some(response) = decode_reply(bytes, from, &config, seq::now_millis24()) {
                    trace!(
                        ttl = response.probe.ttl,
                        src_port = response.probe.src_port,
                        rtt_ms = response.rtt_ms,
                        "Accepted TCP reply"
                    );
                    if decoded.blocking_send(response).is_err() {
                        break;
                    }
                }
            }
            Err(e) if raw::is_timeout(&e) => continue,
            Err(e) => {
                if !cancel.is_cancelled() {
                    warn!(error = %e, "TCP capture read failed without cancellation");
                }
                break;
            }
        }
    }
}

/// Forwards decoded replies to the output channel until cancellation; the
/// output channel closes when this task returns.
async fn emit_loop(
    mut decoded: mpsc::Receiver<TcpResponse>,
    out: mpsc::Sender<ProbeEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("TCP receiver exiting");
                break;
            }
            response = decoded.recv() => match response {
                Some(r) => {
                    if out.send(ProbeEvent::Tcp(r)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

fn ip_header_len(addr: IpAddr) -> usize {
    if addr.is_ipv4() {
        MIN_IPV4_HEADER_LEN
    } else {
        MIN_IPV6_HEADER_LEN
    }
}

/// Decodes one captured packet into a response, or `None` for traffic that
/// is not a reply to our probes. All rejections are silent; unrelated
/// segments on a raw socket are expected noise.
fn decode_reply(
    buf: &[u8],
    from: Option<IpAddr>,
    config: &TraceConfig,
    now24: u32,
) -> Option<TcpResponse> {
    let ip_len = ip_header_len(config.src_addr);
    if buf.len() < ip_len + MAX_TCP_HEADER_LEN {
        return None;
    }

    let hdr = TcpHeader::parse(&buf[ip_len..]).ok()?;

    // A reply travels from the target's port back to the probe's ephemeral
    // port, which must fall inside our pool.
    if hdr.src_port != config.target_port {
        return None;
    }
    if !config.owns_probe_port(hdr.dst_port) {
        return None;
    }
    if !hdr.has_rst() && !hdr.has_ack() {
        return None;
    }
    if from != Some(config.target) {
        return None;
    }

    // The destination acknowledged our sequence number plus one.
    let ack = hdr.ack.wrapping_sub(1);
    let (ttl, ts) = seq::decode(ack);

    if ttl > config.max_ttl {
        return None;
    }
    // A send timestamp ahead of the local clock is corruption, not a
    // negative RTT; equality is fine at millisecond resolution.
    if ts > now24 {
        return None;
    }

    Some(TcpResponse {
        probe: Probe {
            src_port: hdr.dst_port,
            ttl,
        },
        rtt_ms: seq::elapsed_millis(now24, ts),
    })
}
