//! CLI for hoptrace.

mod runner;

use clap::Parser;
use rand::Rng;
use std::net::IpAddr;
use std::process::ExitCode;
use std::time::Duration;

use hoptrace_core::TraceConfig;

/// Stateless TCP path discovery tool.
#[derive(Parser, Debug)]
#[command(name = "hoptrace")]
#[command(version)]
#[command(about = "Stateless TCP path discovery tool")]
pub struct Args {
    /// Destination IP address.
    #[arg(required = true)]
    pub target: IpAddr,

    /// Destination TCP port.
    #[arg(short, long, default_value = "80")]
    pub port: u16,

    /// Maximum TTL.
    #[arg(short = 'm', long = "max-ttl", default_value = "30")]
    pub max_ttl: u8,

    /// Overall deadline in milliseconds; probes unanswered by then are
    /// simply never reported.
    #[arg(long = "deadline-ms", default_value = "5000")]
    pub deadline_ms: u64,

    /// Delay between successive probes in milliseconds.
    #[arg(long = "send-delay-ms", default_value = "50")]
    pub send_delay_ms: u64,

    /// Source address to probe from; discovered via the routing table when
    /// not given.
    #[arg(long)]
    pub source: Option<IpAddr>,

    /// First source port of the probe pool; random when not given.
    #[arg(long = "probe-port-base")]
    pub probe_port_base: Option<u16>,

    /// Number of source ports in the probe pool.
    #[arg(long = "probe-port-count", default_value = "64")]
    pub probe_port_count: u16,

    /// Print events as JSON lines.
    #[arg(long)]
    pub json: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Convert CLI args to a TraceConfig.
    fn to_config(&self) -> Result<TraceConfig, String> {
        let src_addr = match self.source {
            Some(addr) => addr,
            None => runner::local_addr_for(self.target)
                .map_err(|e| format!("Failed to discover source address: {}", e))?,
        };

        let probe_port_base = self
            .probe_port_base
            .unwrap_or_else(|| rand::thread_rng().gen_range(32768..=60000));

        let config = TraceConfig {
            target: self.target,
            target_port: self.port,
            src_addr,
            probe_port_base,
            probe_port_count: self.probe_port_count,
            max_ttl: self.max_ttl,
            send_delay: Duration::from_millis(self.send_delay_ms),
        };
        config.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt().with_env_filter("debug").init();
    } else {
        tracing_subscriber::fmt().with_env_filter("info").init();
    }

    let config = match args.to_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        target = %config.target,
        port = config.target_port,
        max_ttl = config.max_ttl,
        "Starting path discovery"
    );

    match runner::run_trace(config, Duration::from_millis(args.deadline_ms), args.json).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Path discovery failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
