//! Core types for path discovery.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Identity of one outstanding measurement attempt, as recovered from a
/// reply's wire bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    /// Ephemeral source port the probe was transmitted from (correlation key).
    pub src_port: u16,
    /// TTL the probe was transmitted with.
    pub ttl: u8,
}

/// A reply from the destination itself (RST or ACK from its TCP stack).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpResponse {
    /// The probe this reply answers.
    pub probe: Probe,
    /// Round-trip time, measured in the 24-bit millisecond clock space.
    pub rtt_ms: u32,
}

/// A time-exceeded reply from an intermediate router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcmpResponse {
    /// The probe this reply answers.
    pub probe: Probe,
    /// Address of the router that emitted the time-exceeded message.
    pub from_addr: IpAddr,
    /// Resolved hostname; `None` until the resolver stage populates it.
    pub from_name: Option<String>,
    /// Round-trip time, measured in the 24-bit millisecond clock space.
    pub rtt_ms: u32,
}

/// A response event emitted by one of the receivers.
///
/// Closed union over the known event kinds; consumers match exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProbeEvent {
    Tcp(TcpResponse),
    Icmp(IcmpResponse),
}

impl ProbeEvent {
    /// The probe identity embedded in this event.
    pub fn probe(&self) -> Probe {
        match self {
            ProbeEvent::Tcp(r) => r.probe,
            ProbeEvent::Icmp(r) => r.probe,
        }
    }
}

/// Configuration for one path discovery run.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    /// Destination address being probed.
    pub target: IpAddr,
    /// Destination TCP port probes are aimed at.
    pub target_port: u16,
    /// Local source address probes are sent from and receivers bind to.
    pub src_addr: IpAddr,
    /// First source port of the probe pool.
    pub probe_port_base: u16,
    /// Number of consecutive source ports in the probe pool.
    pub probe_port_count: u16,
    /// Maximum hop count; decoded TTLs above this are discarded as not ours.
    pub max_ttl: u8,
    /// Delay between successive probes in a sweep.
    pub send_delay: Duration,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            target: IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
            target_port: 443,
            src_addr: IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
            probe_port_base: 32768,
            probe_port_count: 64,
            max_ttl: 30,
            send_delay: Duration::from_millis(50),
        }
    }
}

impl TraceConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), crate::TraceError> {
        if self.max_ttl == 0 {
            return Err(crate::TraceError::InvalidConfig(
                "max_ttl must be at least 1".to_string(),
            ));
        }
        if self.probe_port_count == 0 {
            return Err(crate::TraceError::InvalidConfig(
                "probe_port_count must be at least 1".to_string(),
            ));
        }
        if self.probe_port_base.checked_add(self.probe_port_count - 1).is_none() {
            return Err(crate::TraceError::InvalidConfig(
                "probe port pool overflows the port space".to_string(),
            ));
        }
        if self.target.is_ipv4() != self.src_addr.is_ipv4() {
            return Err(crate::TraceError::InvalidConfig(
                "target and source address families differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Source port used for the probe at hop `ttl`, cycling through the pool.
    pub fn probe_port(&self, ttl: u8) -> u16 {
        debug_assert!(ttl >= 1);
        self.probe_port_base + (u16::from(ttl) - 1) % self.probe_port_count
    }

    /// True when `port` falls inside the configured probe pool.
    pub fn owns_probe_port(&self, port: u16) -> bool {
        port >= self.probe_port_base && port - self.probe_port_base < self.probe_port_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TraceConfig {
        TraceConfig {
            target: "203.0.113.7".parse().unwrap(),
            src_addr: "192.0.2.1".parse().unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let cfg = TraceConfig {
            max_ttl: 0,
            ..config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_port_pool() {
        let cfg = TraceConfig {
            probe_port_count: 0,
            ..config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_port_pool_overflow() {
        let cfg = TraceConfig {
            probe_port_base: 65500,
            probe_port_count: 100,
            ..config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_mixed_families() {
        let cfg = TraceConfig {
            src_addr: "::1".parse().unwrap(),
            ..config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_probe_port_cycles_through_pool() {
        let cfg = TraceConfig {
            probe_port_base: 40000,
            probe_port_count: 4,
            ..config()
        };
        assert_eq!(cfg.probe_port(1), 40000);
        assert_eq!(cfg.probe_port(4), 40003);
        assert_eq!(cfg.probe_port(5), 40000);
    }

    #[test]
    fn test_owns_probe_port_bounds() {
        let cfg = TraceConfig {
            probe_port_base: 40000,
            probe_port_count: 4,
            ..config()
        };
        assert!(cfg.owns_probe_port(40000));
        assert!(cfg.owns_probe_port(40003));
        assert!(!cfg.owns_probe_port(39999));
        assert!(!cfg.owns_probe_port(40004));
    }

    #[test]
    fn test_event_serialization_tags_kind() {
        let event = ProbeEvent::Tcp(TcpResponse {
            probe: Probe {
                src_port: 40000,
                ttl: 3,
            },
            rtt_ms: 12,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"tcp\""));
        assert!(json.contains("\"ttl\":3"));
    }
}
