//! Orchestration: receivers up first, then the probe sweep, then print
//! events from the two streams as they arrive.
//!
//! The TCP and ICMP streams stay independent end to end; nothing here merges
//! or orders them into a per-hop report.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use hoptrace_core::{ProbeEvent, TraceConfig, TraceError, TraceResult};
use hoptrace_icmp::IcmpReceiver;
use hoptrace_resolve::{spawn_resolver, DnsReverseLookup};
use hoptrace_tcp::{send_sweep, TcpReceiver};

/// Discovers the local address the routing table selects for `target` by
/// connecting a throwaway UDP socket.
pub fn local_addr_for(target: IpAddr) -> TraceResult<IpAddr> {
    let socket = match target {
        IpAddr::V4(_) => std::net::UdpSocket::bind("0.0.0.0:0"),
        IpAddr::V6(_) => std::net::UdpSocket::bind("[::]:0"),
    }
    .map_err(TraceError::SocketCreation)?;

    socket
        .connect(SocketAddr::new(target, 53))
        .map_err(TraceError::SocketCreation)?;

    socket
        .local_addr()
        .map(|addr| addr.ip())
        .map_err(TraceError::SocketCreation)
}

/// Runs one discovery: both receivers, a resolver stage per stream, one
/// probe sweep, events printed until the deadline or Ctrl-C cancels.
pub async fn run_trace(config: TraceConfig, deadline: Duration, json: bool) -> TraceResult<()> {
    let cancel = CancellationToken::new();

    let tcp_stream = TcpReceiver::spawn(&config, cancel.clone())?;
    let icmp_stream = IcmpReceiver::spawn(&config, cancel.clone())?;

    let lookup = Arc::new(DnsReverseLookup::new());
    let mut tcp_events = spawn_resolver(Arc::clone(&lookup), tcp_stream);
    let mut icmp_events = spawn_resolver(lookup, icmp_stream);

    let sweep_config = config.clone();
    let sweep = tokio::spawn(async move { send_sweep(&sweep_config).await });

    let timeout = tokio::time::sleep(deadline);
    tokio::pin!(timeout);

    let mut tcp_open = true;
    let mut icmp_open = true;
    while tcp_open || icmp_open {
        tokio::select! {
            _ = &mut timeout, if !cancel.is_cancelled() => {
                debug!("Deadline reached, cancelling receivers");
                cancel.cancel();
            }
            signal = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                if signal.is_ok() {
                    debug!("Interrupted, cancelling receivers");
                }
                cancel.cancel();
            }
            event = tcp_events.recv(), if tcp_open => match event {
                Some(e) => print_event(&e, json),
                None => tcp_open = false,
            },
            event = icmp_events.recv(), if icmp_open => match event {
                Some(e) => print_event(&e, json),
                None => icmp_open = false,
            },
        }
    }

    match sweep.await {
        Ok(result) => result?,
        Err(e) => warn!(error = %e, "Probe sweep task failed"),
    }

    Ok(())
}

fn print_event(event: &ProbeEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(error = %e, "Failed to serialize event"),
        }
        return;
    }

    match event {
        ProbeEvent::Tcp(r) => {
            println!(
                "hop {:>2}  {:>4} ms  destination reply  port {}",
                r.probe.ttl, r.rtt_ms, r.probe.src_port
            );
        }
        ProbeEvent::Icmp(r) => {
            let name = r.from_name.as_deref().unwrap_or("?");
            println!(
                "hop {:>2}  {:>4} ms  {}  ({})",
                r.probe.ttl, r.rtt_ms, name, r.from_addr
            );
        }
    }
}
