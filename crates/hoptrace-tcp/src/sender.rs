//! The probe sweep.
//!
//! One SYN per hop, fire and forget: the IP TTL is the hop number and the
//! sequence number is `(hop << 24) | send_millis24`, so a receiver can
//! reconstruct everything from a reply without the sender keeping a table
//! of outstanding probes.

use tracing::{debug, trace};

use hoptrace_core::{seq, TraceConfig, TraceResult};
use hoptrace_packets::{build_syn_probe, raw};

/// Sends one SYN probe per hop from 1 to `max_ttl`.
///
/// Sending never blocks on responses; pacing between probes is the
/// configured `send_delay`. Returns once the last probe is on the wire.
pub async fn send_sweep(config: &TraceConfig) -> TraceResult<()> {
    config.validate()?;

    let socket = raw::probe_send_socket(config.src_addr)?;
    debug!(target = %config.target, max_ttl = config.max_ttl, "Starting probe sweep");

    for ttl in 1..=config.max_ttl {
        let ts = seq::now_millis24();
        let seq_num = seq::encode(ttl, ts);
        let src_port = config.probe_port(ttl);

        let packet = build_syn_probe(
            config.src_addr,
            config.target,
            src_port,
            config.target_port,
            ttl,
            seq_num,
        )?;

        trace!(
            ttl = ttl,
            src_port = src_port,
            seq = seq_num,
            "Sending SYN probe"
        );

        raw::send_to(&socket, &packet, config.target)?;

        if ttl < config.max_ttl && !config.send_delay.is_zero() {
            tokio::time::sleep(config.send_delay).await;
        }
    }

    Ok(())
}
