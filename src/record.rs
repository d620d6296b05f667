//! Data model for discovered servers and per-cycle scan summaries.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};

use chrono::{DateTime, Local};
use serde_derive::{Deserialize, Serialize};

/// Everything learned about a server from one successful status query.
///
/// A record is immutable once persisted: a later sighting of the same
/// identity confirms liveness but never overwrites the stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Address the server answered on.
    pub ip: IpAddr,
    /// Port the server answered on.
    pub port: u16,
    /// Version name reported in the status response.
    pub version: String,
    /// Protocol number reported in the status response.
    pub protocol: i32,
    /// Players online at query time.
    pub players_online: u32,
    /// Player slot limit.
    pub players_max: u32,
    /// Server description (MOTD), flattened to plain text.
    pub description: String,
    /// Round-trip time of the status query, in milliseconds.
    pub ping_ms: f64,
    /// Completion time of the status query.
    pub discovery_time: DateTime<Local>,
    /// Opaque supplementary metadata from the enrichment tool, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<BTreeMap<String, String>>,
}

impl ServerRecord {
    /// Canonical deduplication key, stable across cycles.
    pub fn identity(&self) -> String {
        SocketAddr::new(self.ip, self.port).to_string()
    }
}

/// Summary of one complete pass over the target list. Written once at cycle
/// end, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSummary {
    /// 1-based scan cycle number.
    pub scan_number: u32,
    /// When the cycle started.
    pub started_at: DateTime<Local>,
    /// When the cycle finished.
    pub finished_at: DateTime<Local>,
    /// Addresses submitted to the prober this cycle.
    pub total_targets: usize,
    /// Servers that answered this cycle, new and known alike.
    pub total_found: usize,
    /// Servers classified as new this cycle.
    pub total_new: usize,
    /// Distinct identities seen since the process started.
    pub total_unique_servers: usize,
    /// Records in the order their probes completed.
    pub servers: Vec<ServerRecord>,
}
