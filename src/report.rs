//! Durable JSON output for discovered servers and cycle summaries.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use tokio::fs;
use tokio::io;

use crate::record::{CycleSummary, ServerRecord};

/// Write-only persistence sink.
///
/// The coordinator calls `server` once per newly discovered identity and
/// `cycle` once per cycle with at least one result. Encoding is the
/// implementation's concern.
#[async_trait]
pub trait Report: Send + Sync {
    /// Persists one newly discovered server.
    async fn server(&self, record: &ServerRecord) -> io::Result<()>;
    /// Persists one cycle summary.
    async fn cycle(&self, summary: &CycleSummary) -> io::Result<()>;
}

/// Writes pretty-printed JSON files into a report directory.
#[derive(Debug, Clone)]
pub struct JsonReport {
    dir: PathBuf,
}

impl JsonReport {
    /// Creates the output directory if needed.
    pub async fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Directory the reports land in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn timestamp() -> String {
        Local::now().format("%Y%m%d_%H%M%S").to_string()
    }
}

#[async_trait]
impl Report for JsonReport {
    async fn server(&self, record: &ServerRecord) -> io::Result<()> {
        // Colons from IPv6 addresses are not filename-safe.
        let host = record.ip.to_string().replace(':', "-");
        let path = self.dir.join(format!(
            "minecraft_server_{host}_{}_{}.json",
            record.port,
            Self::timestamp()
        ));
        fs::write(path, serde_json::to_vec_pretty(record)?).await
    }

    async fn cycle(&self, summary: &CycleSummary) -> io::Result<()> {
        let path = self.dir.join(format!(
            "scan_report_{}_{}.json",
            Self::timestamp(),
            summary.scan_number
        ));
        fs::write(path, serde_json::to_vec_pretty(summary)?).await
    }
}
