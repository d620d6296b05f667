//! This crate exposes the internal functionality of the craftscan
//! Minecraft server discovery tool.
//!
//! craftscan sweeps configured CIDR ranges for hosts answering the
//! Minecraft Java Edition Server List Ping protocol, on a repeating
//! schedule, and persists every newly discovered server to disk.
//!
//! ## Architecture Overview
//!
//! The scanning flow is driven by [`ScanScheduler`](scheduler::ScanScheduler),
//! which repeats [`ScanCoordinator`](scanner::ScanCoordinator) cycles:
//!
//! 1. **Address expansion**: CIDR ranges become a (optionally shuffled)
//!    target list, network and broadcast addresses excluded
//! 2. **Probing**: a bounded pool of concurrent probes runs the two-phase
//!    check — TCP reachability, then the status handshake
//! 3. **Classification**: every answering server is deduplicated against
//!    the identities seen earlier in the run
//! 4. **Persistence**: new servers and per-cycle summaries land as JSON
//!    files; repeat sightings only confirm liveness
//! 5. **Enrichment**: when enabled and available, nmap service detection
//!    attaches supplementary metadata without ever affecting discovery
//!
//! ## Basic Usage Example
//!
//! The following probes a single host for a running server:
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use craftscan::ports::PortPolicy;
//! use craftscan::scanner::Prober;
//!
//! #[tokio::main]
//! async fn main() {
//!     let prober = Prober::new(PortPolicy::Default, Duration::from_millis(1500), 1);
//!     if let Some(record) = prober.probe("127.0.0.1".parse().unwrap()).await {
//!         println!("found {} running {}", record.identity(), record.version);
//!     }
//! }
//! ```
//!
//! ## Error Handling
//!
//! Configuration problems abort before any scanning. Per-target network and
//! protocol failures are absorbed into "no server found"; persistence
//! failures are reported as warnings while scanning continues.
#![allow(clippy::needless_doctest_main)]
#![warn(missing_docs)]

pub mod address;

pub mod enrich;

pub mod input;

pub mod ports;

pub mod protocol;

pub mod record;

pub mod report;

pub mod scanner;

pub mod scheduler;

pub mod store;

pub mod tui;
