//! Provides a means to read, parse and hold configuration options for scans.
use anyhow::bail;
use clap::{Parser, ValueEnum};
use serde_derive::Deserialize;
use std::fs;
use std::path::PathBuf;

/// Represents the order in which the expanded address space is scanned.
///   - Serial keeps range order, then natural host order within a range.
///   - Random reshuffles the whole address space every cycle.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    Serial,
    Random,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "craftscan",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
#[allow(clippy::struct_excessive_bools)]
/// Continuous Minecraft server discovery across CIDR ranges.
/// WARNING Only sweep address space you are authorised to probe; a scan
/// cycle opens a large number of connections in a short time.
pub struct Opts {
    /// A comma-delimited list of CIDR ranges to sweep. Example: 10.0.0.0/24,192.168.0.0/16
    #[arg(short, long, value_delimiter = ',')]
    pub addresses: Vec<String>,

    /// Ports to check on every address, overriding the default and
    /// aggressive sets. Example: 25565,25566
    #[arg(short, long, value_delimiter = ',')]
    pub ports: Option<Vec<u16>>,

    /// Check the fixed set of common alternative ports on every address
    /// instead of only the well-known port.
    #[arg(long)]
    pub aggressive: bool,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(short, long, value_parser)]
    pub config_path: Option<PathBuf>,

    /// Greppable mode. Only output found servers, one per line. Useful for
    /// grep or outputting to a file.
    #[arg(short, long)]
    pub greppable: bool,

    /// Accessible mode. Turns off features which negatively affect screen readers.
    #[arg(long)]
    pub accessible: bool,

    /// The batch size for probing, it increases or slows the speed of
    /// scanning. Depends on the open file limit of your OS.
    #[arg(short, long, default_value = "500")]
    pub batch_size: u16,

    /// The timeout in milliseconds before a target is assumed to be absent.
    #[arg(short, long, default_value = "1500")]
    pub timeout: u32,

    /// The number of connection attempts before a target is assumed to be
    /// absent. If set to 0, craftscan will correct it to 1.
    #[arg(long, default_value = "1")]
    pub tries: u8,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(short, long)]
    pub ulimit: Option<u64>,

    /// The order of scanning to be performed. The "serial" option will
    /// sweep ranges in order while the "random" option reshuffles the
    /// address space every cycle.
    #[arg(long, value_enum, ignore_case = true, default_value = "random")]
    pub scan_order: ScanOrder,

    /// Seconds to wait between scan cycles.
    #[arg(short, long, default_value = "3600")]
    pub interval: u64,

    /// Stop after this many completed cycles. Unlimited when not set.
    #[arg(short, long)]
    pub max_scans: Option<u32>,

    /// Run a single cycle and exit.
    #[arg(long, conflicts_with = "max_scans")]
    pub single: bool,

    /// Enrich confirmed servers with nmap service detection when the tool
    /// is available.
    #[arg(long)]
    pub nmap: bool,

    /// Directory where server records and scan reports are written.
    #[arg(short, long, default_value = "discovered_servers")]
    pub output_dir: PathBuf,
}

impl Opts {
    pub fn read() -> Self {
        Opts::parse()
    }

    /// Startup validation; any failure here aborts before scanning.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.addresses.is_empty() {
            bail!("no addresses given; pass --addresses or set them in the config file");
        }
        if self.timeout == 0 {
            bail!("timeout must be at least 1 millisecond");
        }
        if self.batch_size == 0 {
            bail!("batch size must be at least 1");
        }
        if let Some(ports) = &self.ports {
            if ports.contains(&0) {
                bail!("port 0 cannot be probed");
            }
        }
        Ok(())
    }

    /// Merge values found within the user configuration file into the
    /// command line arguments.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(
            addresses, aggressive, greppable, accessible, batch_size, timeout, tries, scan_order,
            interval, nmap, output_dir
        );
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(ports, ulimit, max_scans);
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            addresses: vec![],
            ports: None,
            aggressive: false,
            no_config: true,
            config_path: None,
            greppable: true,
            accessible: false,
            batch_size: 0,
            timeout: 0,
            tries: 0,
            ulimit: None,
            scan_order: ScanOrder::Random,
            interval: 0,
            max_scans: None,
            single: false,
            nmap: false,
            output_dir: PathBuf::from("discovered_servers"),
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[derive(Debug, Deserialize)]
pub struct Config {
    addresses: Option<Vec<String>>,
    ports: Option<Vec<u16>>,
    aggressive: Option<bool>,
    greppable: Option<bool>,
    accessible: Option<bool>,
    batch_size: Option<u16>,
    timeout: Option<u32>,
    tries: Option<u8>,
    ulimit: Option<u64>,
    scan_order: Option<ScanOrder>,
    interval: Option<u64>,
    max_scans: Option<u32>,
    nmap: Option<bool>,
    output_dir: Option<PathBuf>,
}

#[allow(clippy::doc_link_with_quotes)]
impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct.
    ///
    /// # Format
    ///
    /// addresses = ["10.0.0.0/24", "192.168.0.0/16"]
    /// ports = [25565, 25566]
    /// greppable = true
    /// scan_order = "Random"
    /// interval = 3600
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> Self {
        let mut content = String::new();
        let config_path = custom_config_path.unwrap_or_else(default_config_path);
        if config_path.exists() {
            content = fs::read_to_string(config_path).unwrap_or_default();
        }

        let config: Self = match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                println!("Found {e} in configuration file.\nAborting scan.\n");
                std::process::exit(1);
            }
        };

        config
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> PathBuf {
    let Some(mut config_path) = dirs::home_dir() else {
        panic!("Could not infer config file path.");
    };
    config_path.push(".craftscan.toml");
    config_path
}
