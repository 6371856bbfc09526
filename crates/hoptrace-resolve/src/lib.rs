//! Streaming reverse-DNS annotation stage.
//!
//! Consumes one stream of response events and produces the same stream with
//! ICMP events enriched by a hostname for the replying router. Lookup
//! failures fall back to the textual address; the stage never drops an event
//! and never fails the pipeline. Ordering is preserved, one in, one out.

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use hoptrace_core::ProbeEvent;

/// Capacity of the annotated output channel.
const CHANNEL_DEPTH: usize = 256;

/// Reverse name lookup seam.
///
/// The production implementation queries system DNS; tests substitute a
/// table. Returns the first name for the address, or `None` when resolution
/// fails.
#[async_trait]
pub trait ReverseLookup: Send + Sync {
    async fn lookup(&self, addr: IpAddr) -> Option<String>;
}

/// System-DNS reverse lookup via hickory.
pub struct DnsReverseLookup {
    resolver: TokioAsyncResolver,
}

impl DnsReverseLookup {
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
        }
    }
}

impl Default for DnsReverseLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReverseLookup for DnsReverseLookup {
    async fn lookup(&self, addr: IpAddr) -> Option<String> {
        match self.resolver.reverse_lookup(addr).await {
            Ok(names) => names
                .iter()
                .next()
                .map(|name| name.to_string().trim_end_matches('.').to_string()),
            Err(e) => {
                trace!(addr = %addr, error = %e, "Reverse lookup failed");
                None
            }
        }
    }
}

/// Annotates a single event, resolving ICMP router addresses and passing
/// every other kind through unchanged.
pub async fn annotate<L: ReverseLookup + ?Sized>(lookup: &L, event: ProbeEvent) -> ProbeEvent {
    match event {
        ProbeEvent::Icmp(mut response) => {
            let name = lookup
                .lookup(response.from_addr)
                .await
                .unwrap_or_else(|| response.from_addr.to_string());
            response.from_name = Some(name);
            ProbeEvent::Icmp(response)
        }
        passthrough @ ProbeEvent::Tcp(_) => passthrough,
    }
}

/// Spawns the resolver stage over `input`, returning the annotated stream.
///
/// The stage runs until the input channel closes, then closes its output;
/// it needs no cancellation signal of its own because the receivers close
/// their channels on shutdown and the closure propagates.
pub fn spawn_resolver<L: ReverseLookup + 'static>(
    lookup: Arc<L>,
    mut input: mpsc::Receiver<ProbeEvent>,
) -> mpsc::Receiver<ProbeEvent> {
    let (out_tx, out_rx) = mpsc::channel(CHANNEL_DEPTH);

    tokio::spawn(async move {
        while let Some(event) = input.recv().await {
            let annotated = annotate(lookup.as_ref(), event).await;
            if out_tx.send(annotated).await.is_err() {
                break;
            }
        }
        debug!("Resolver stage exiting");
    });

    out_rx
}
