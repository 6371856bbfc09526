//! Core types, error handling, and the probe sequence codec for hoptrace.
//!
//! This crate provides the fundamental abstractions shared by the probing
//! engine:
//!
//! - [`TraceError`] for error handling
//! - [`Probe`], [`TcpResponse`], [`IcmpResponse`], and the [`ProbeEvent`]
//!   union emitted by the receivers
//! - [`TraceConfig`] for engine configuration
//! - the 24-bit timestamp sequence codec in [`seq`]

pub mod error;
pub mod seq;
pub mod types;

pub use error::{TraceError, TraceResult};
pub use types::{IcmpResponse, Probe, ProbeEvent, TcpResponse, TraceConfig};
