//! Binary entry point: configuration, startup checks, the scan loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use log::debug;

use craftscan::address;
use craftscan::enrich::{Enrich, NmapEnricher, NoopEnricher};
use craftscan::input::{Config, Opts};
use craftscan::ports::PortPolicy;
use craftscan::report::JsonReport;
use craftscan::scanner::{Prober, ScanCoordinator};
use craftscan::scheduler::ScanScheduler;
use craftscan::store::DiscoveryStore;
use craftscan::tui::ConsoleNotifier;
use craftscan::{detail, warning};

const AVERAGE_BATCH_SIZE: u16 = 3_000;
const DEFAULT_FILE_DESCRIPTORS_LIMIT: u64 = 8_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut opts = Opts::read();
    let config = Config::read(opts.config_path.clone());
    opts.merge(&config);
    opts.validate()?;
    debug!("Main() `opts` arguments are {:?}", opts);

    let ranges = address::parse_ranges(&opts.addresses)?;
    let approx: u128 = ranges.iter().map(address::host_count).sum();
    detail!(
        format!(
            "Loaded {} ranges with approximately {approx} addresses",
            ranges.len()
        ),
        opts.greppable,
        opts.accessible
    );

    let ulimit = adjust_ulimit_size(&opts);
    let batch_size = infer_batch_size(&opts, ulimit);

    let enricher: Arc<dyn Enrich> = if opts.nmap {
        match NmapEnricher::detect("nmap").await {
            Some(enricher) => {
                detail!(
                    "nmap is enabled for enhanced scanning.",
                    opts.greppable,
                    opts.accessible
                );
                Arc::new(enricher)
            }
            None => {
                warning!(
                    "nmap requested but no working binary was found. Continuing with basic scanning only.",
                    opts.greppable,
                    opts.accessible
                );
                Arc::new(NoopEnricher)
            }
        }
    } else {
        Arc::new(NoopEnricher)
    };

    let reporter = Arc::new(
        JsonReport::new(&opts.output_dir)
            .await
            .with_context(|| {
                format!(
                    "cannot create output directory {}",
                    opts.output_dir.display()
                )
            })?,
    );
    detail!(
        format!("Writing reports to {}", reporter.dir().display()),
        opts.greppable,
        opts.accessible
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    let store = Arc::new(DiscoveryStore::new());
    let prober = Arc::new(Prober::new(
        PortPolicy::pick(opts.ports.clone(), opts.aggressive),
        Duration::from_millis(u64::from(opts.timeout)),
        opts.tries,
    ));
    let notifier = Arc::new(ConsoleNotifier {
        greppable: opts.greppable,
        accessible: opts.accessible,
    });

    let coordinator = ScanCoordinator::new(
        prober,
        enricher,
        reporter,
        notifier,
        Arc::clone(&store),
        batch_size,
        opts.greppable,
        opts.accessible,
        shutdown_rx.clone(),
    );

    let max_cycles = if opts.single { Some(1) } else { opts.max_scans };
    let scheduler = ScanScheduler::new(
        coordinator,
        Arc::clone(&store),
        ranges,
        opts.scan_order,
        Duration::from_secs(opts.interval),
        max_cycles,
        shutdown_rx,
        opts.greppable,
        opts.accessible,
    );

    let stats = scheduler.run().await;

    detail!(
        format!("Total scans performed: {}", stats.cycles_completed),
        opts.greppable,
        opts.accessible
    );
    detail!(
        format!("Total unique servers found: {}", stats.unique_servers),
        opts.greppable,
        opts.accessible
    );

    Ok(())
}

#[cfg(unix)]
fn adjust_ulimit_size(opts: &Opts) -> u64 {
    use rlimit::{getrlimit, setrlimit, Resource};

    if let Some(limit) = opts.ulimit {
        if setrlimit(Resource::NOFILE, limit, limit).is_ok() {
            detail!(
                format!("Automatically increasing ulimit value to {limit}."),
                opts.greppable,
                opts.accessible
            );
        } else {
            warning!(
                "ERROR. Failed to set ulimit value.",
                opts.greppable,
                opts.accessible
            );
        }
    }

    let (soft, _) = getrlimit(Resource::NOFILE)
        .unwrap_or((DEFAULT_FILE_DESCRIPTORS_LIMIT, DEFAULT_FILE_DESCRIPTORS_LIMIT));
    soft
}

#[cfg(not(unix))]
fn adjust_ulimit_size(_opts: &Opts) -> u64 {
    DEFAULT_FILE_DESCRIPTORS_LIMIT
}

/// Clamps the requested batch size below the open file limit so the worker
/// pool cannot exhaust file descriptors.
fn infer_batch_size(opts: &Opts, ulimit: u64) -> u16 {
    let mut batch_size = u64::from(opts.batch_size);

    if ulimit < batch_size {
        warning!(
            "File limit is lower than the requested batch size. Consider upping with --ulimit.",
            opts.greppable,
            opts.accessible
        );
        if ulimit < u64::from(AVERAGE_BATCH_SIZE) {
            batch_size = ulimit.saturating_sub(100).max(1);
        } else {
            batch_size = u64::from(AVERAGE_BATCH_SIZE);
        }
    }

    u16::try_from(batch_size).unwrap_or(u16::MAX)
}
