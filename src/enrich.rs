//! Optional service-detection enrichment for confirmed servers.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde_derive::Deserialize;
use tokio::process::Command;
use tokio::time;

/// Upper bound for one external service-detection run.
const ENRICH_TIMEOUT: Duration = Duration::from_secs(60);

/// Capability interface for best-effort supplementary metadata.
///
/// `None` means "no enrichment". Implementations swallow every failure;
/// a confirmed server stays valid with or without enrichment.
#[async_trait]
pub trait Enrich: Send + Sync {
    /// Gathers tool-defined key/value metadata for a confirmed server.
    async fn enrich(&self, ip: IpAddr, port: u16) -> Option<BTreeMap<String, String>>;
}

/// Null object selected when enrichment is disabled or unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEnricher;

#[async_trait]
impl Enrich for NoopEnricher {
    async fn enrich(&self, _ip: IpAddr, _port: u16) -> Option<BTreeMap<String, String>> {
        None
    }
}

/// Runs nmap service detection against a confirmed server.
#[derive(Debug, Clone)]
pub struct NmapEnricher {
    binary: String,
}

impl NmapEnricher {
    /// Probes for a working nmap binary; `None` means the capability is
    /// absent and the caller should fall back to [`NoopEnricher`].
    pub async fn detect(binary: &str) -> Option<Self> {
        match Command::new(binary).arg("--version").output().await {
            Ok(out) if out.status.success() => Some(Self {
                binary: binary.to_owned(),
            }),
            _ => None,
        }
    }
}

#[async_trait]
impl Enrich for NmapEnricher {
    async fn enrich(&self, ip: IpAddr, port: u16) -> Option<BTreeMap<String, String>> {
        let run = time::timeout(
            ENRICH_TIMEOUT,
            Command::new(&self.binary)
                .args(["-sV", "-Pn", "-T4", "-oX", "-", "-p"])
                .arg(port.to_string())
                .arg(ip.to_string())
                .output(),
        )
        .await;

        let output = match run {
            Ok(Ok(out)) if out.status.success() => out,
            Ok(Ok(out)) => {
                debug!("nmap exited with {} for {ip}:{port}", out.status);
                return None;
            }
            Ok(Err(e)) => {
                debug!("nmap spawn failed for {ip}:{port}: {e}");
                return None;
            }
            Err(_) => {
                debug!("nmap timed out for {ip}:{port}");
                return None;
            }
        };

        parse_service_fields(&String::from_utf8_lossy(&output.stdout), port)
    }
}

#[derive(Debug, Deserialize)]
struct NmapRun {
    #[serde(default)]
    host: Vec<Host>,
}

#[derive(Debug, Deserialize)]
struct Host {
    ports: Option<HostPorts>,
}

#[derive(Debug, Deserialize)]
struct HostPorts {
    #[serde(default)]
    port: Vec<Port>,
}

#[derive(Debug, Deserialize)]
struct Port {
    #[serde(rename = "@portid")]
    portid: u16,
    state: Option<PortState>,
    service: Option<Service>,
}

#[derive(Debug, Deserialize)]
struct PortState {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct Service {
    #[serde(rename = "@name")]
    name: Option<String>,
    #[serde(rename = "@product")]
    product: Option<String>,
    #[serde(rename = "@version")]
    version: Option<String>,
    #[serde(rename = "@extrainfo")]
    extrainfo: Option<String>,
}

/// Pulls the matching port's service attributes out of `-oX -` output.
fn parse_service_fields(xml: &str, port: u16) -> Option<BTreeMap<String, String>> {
    let run: NmapRun = quick_xml::de::from_str(xml).ok()?;
    let entry = run
        .host
        .iter()
        .filter_map(|host| host.ports.as_ref())
        .flat_map(|ports| &ports.port)
        .find(|p| p.portid == port)?;

    let mut fields = BTreeMap::new();
    if let Some(state) = &entry.state {
        fields.insert("state".to_owned(), state.state.clone());
    }
    if let Some(service) = &entry.service {
        for (key, value) in [
            ("service", &service.name),
            ("product", &service.product),
            ("service_version", &service.version),
            ("extrainfo", &service.extrainfo),
        ] {
            if let Some(value) = value {
                fields.insert(key.to_owned(), value.clone());
            }
        }
    }

    if fields.is_empty() {
        None
    } else {
        Some(fields)
    }
}
