//! Core functionality for actual scanning behaviour.

use std::net::{IpAddr, SocketAddr};
use std::num::NonZero;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use tokio::io;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time;

use crate::enrich::Enrich;
use crate::ports::PortPolicy;
use crate::protocol;
use crate::record::{CycleSummary, ServerRecord};
use crate::report::Report;
use crate::store::DiscoveryStore;
use crate::tui::Notify;
use crate::{detail, warning};

/// Probes one target at a time: a cheap reachability check, then the status
/// handshake on the same timeout budget.
#[derive(Debug)]
pub struct Prober {
    policy: PortPolicy,
    timeout: Duration,
    tries: NonZero<u8>,
}

impl Prober {
    /// `tries` of 0 is corrected to 1.
    pub fn new(policy: PortPolicy, timeout: Duration, tries: u8) -> Self {
        Self {
            policy,
            timeout,
            tries: NonZero::new(tries).unwrap_or(NonZero::<u8>::MIN),
        }
    }

    /// Checks every candidate port in policy order, first hit wins.
    pub async fn probe(&self, ip: IpAddr) -> Option<ServerRecord> {
        for port in self.policy.order() {
            if let Some(record) = self.probe_port(ip, port).await {
                return Some(record);
            }
        }
        None
    }

    async fn probe_port(&self, ip: IpAddr, port: u16) -> Option<ServerRecord> {
        let socket = SocketAddr::new(ip, port);
        let mut stream = match self.connect(socket).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!("{socket} unreachable: {e}");
                return None;
            }
        };

        let started = Instant::now();
        let status = match time::timeout(
            self.timeout,
            protocol::status(&mut stream, &ip.to_string(), port),
        )
        .await
        {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                debug!("{socket} open but not a conforming server: {e}");
                return None;
            }
            Err(_) => {
                debug!("{socket} handshake timed out");
                return None;
            }
        };
        let latency = started.elapsed();

        Some(ServerRecord {
            ip,
            port,
            version: status.version,
            protocol: status.protocol,
            players_online: status.players_online,
            players_max: status.players_max,
            description: status.description,
            ping_ms: latency.as_secs_f64() * 1000.0,
            discovery_time: Local::now(),
            enrichment: None,
        })
    }

    /// Reachability phase. No protocol bytes are exchanged here; any
    /// failure after the last try means the target is absent.
    async fn connect(&self, socket: SocketAddr) -> io::Result<TcpStream> {
        let tries = self.tries.get();
        let mut last_err = None;
        for nr_try in 1..=tries {
            match time::timeout(self.timeout, TcpStream::connect(socket)).await {
                Ok(Ok(stream)) => {
                    debug!("connected to {socket} on try {nr_try}");
                    return Ok(stream);
                }
                Ok(Err(e)) => last_err = Some(e),
                Err(e) => last_err = Some(e.into()),
            }
        }
        Err(last_err.unwrap_or_else(|| io::Error::other("no connection attempt made")))
    }
}

enum Outcome {
    Found { record: ServerRecord, is_new: bool },
    Absent,
    Skipped,
}

/// Drives one scan cycle through a bounded worker pool.
///
/// Classification, notification and persistence all happen inside the
/// worker that completed the probe; the accumulator only collects results
/// in completion order.
pub struct ScanCoordinator {
    prober: Arc<Prober>,
    enricher: Arc<dyn Enrich>,
    reporter: Arc<dyn Report>,
    notifier: Arc<dyn Notify>,
    store: Arc<DiscoveryStore>,
    batch_size: u16,
    greppable: bool,
    accessible: bool,
    shutdown: watch::Receiver<bool>,
}

#[allow(clippy::too_many_arguments)]
impl ScanCoordinator {
    pub fn new(
        prober: Arc<Prober>,
        enricher: Arc<dyn Enrich>,
        reporter: Arc<dyn Report>,
        notifier: Arc<dyn Notify>,
        store: Arc<DiscoveryStore>,
        batch_size: u16,
        greppable: bool,
        accessible: bool,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            prober,
            enricher,
            reporter,
            notifier,
            store,
            batch_size,
            greppable,
            accessible,
            shutdown,
        }
    }

    /// Runs one complete pass over `targets`.
    ///
    /// Returns `None` when the shutdown signal was raised mid-cycle: the
    /// pass is abandoned once in-flight probes settle, no summary is built
    /// or persisted, and the cycle does not count.
    pub async fn run_cycle(
        &self,
        scan_number: u32,
        targets: Vec<IpAddr>,
    ) -> Option<CycleSummary> {
        let started_at = Local::now();
        let total_targets = targets.len();
        let bar = self.progress_bar(total_targets);

        debug!(
            "Start scanning cycle {scan_number}. Batch size {}, number of targets {total_targets}",
            self.batch_size
        );

        let mut outcomes = stream::iter(targets)
            .map(|ip| self.work(ip))
            .buffer_unordered(usize::from(self.batch_size).max(1));

        let mut servers = Vec::new();
        let mut total_new = 0;
        while let Some(outcome) = outcomes.next().await {
            bar.inc(1);
            if let Outcome::Found { record, is_new } = outcome {
                servers.push(record);
                if is_new {
                    total_new += 1;
                }
            }
        }
        drop(outcomes);
        bar.finish_and_clear();

        if *self.shutdown.borrow() {
            debug!("cycle {scan_number} abandoned after shutdown signal");
            return None;
        }

        let summary = CycleSummary {
            scan_number,
            started_at,
            finished_at: Local::now(),
            total_targets,
            total_found: servers.len(),
            total_new,
            total_unique_servers: self.store.len(),
            servers,
        };

        if summary.servers.is_empty() {
            detail!(
                "No servers found in the scanned ranges.",
                self.greppable,
                self.accessible
            );
        } else if let Err(e) = self.reporter.cycle(&summary).await {
            warning!(
                format!("failed to persist cycle summary: {e}"),
                self.greppable,
                self.accessible
            );
        }

        Some(summary)
    }

    /// One worker: probe, conditionally enrich, classify, notify, persist.
    fn work(&self, ip: IpAddr) -> impl std::future::Future<Output = Outcome> {
        let prober = Arc::clone(&self.prober);
        let enricher = Arc::clone(&self.enricher);
        let reporter = Arc::clone(&self.reporter);
        let notifier = Arc::clone(&self.notifier);
        let store = Arc::clone(&self.store);
        let shutdown = self.shutdown.clone();
        let greppable = self.greppable;
        let accessible = self.accessible;

        async move {
            // Raised shutdown stops submission; in-flight probes settle on
            // their own timeout.
            if *shutdown.borrow() {
                return Outcome::Skipped;
            }

            let Some(mut record) = prober.probe(ip).await else {
                return Outcome::Absent;
            };
            record.enrichment = enricher.enrich(record.ip, record.port).await;

            // Check-and-set: the single point of truth for new vs. known
            // under concurrent sightings of the same identity.
            let is_new = store.insert(&record.identity());
            notifier.server_found(&record, is_new);
            if is_new {
                if let Err(e) = reporter.server(&record).await {
                    warning!(
                        format!("failed to persist {}: {e}", record.identity()),
                        greppable,
                        accessible
                    );
                }
            }

            Outcome::Found { record, is_new }
        }
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if self.greppable || self.accessible {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} addresses ({per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::NoopEnricher;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct MemoryReport {
        servers: Mutex<Vec<String>>,
        cycles: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl Report for MemoryReport {
        async fn server(&self, record: &ServerRecord) -> io::Result<()> {
            self.servers.lock().unwrap().push(record.identity());
            Ok(())
        }

        async fn cycle(&self, summary: &CycleSummary) -> io::Result<()> {
            self.cycles.lock().unwrap().push(summary.scan_number);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CollectingNotifier {
        events: Mutex<Vec<(String, bool)>>,
    }

    impl Notify for CollectingNotifier {
        fn server_found(&self, record: &ServerRecord, is_new: bool) {
            self.events.lock().unwrap().push((record.identity(), is_new));
        }
    }

    /// Minimal status server speaking just enough of the protocol for the
    /// prober to confirm it.
    async fn spawn_status_server(motd: &str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let motd = motd.to_owned();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let motd = motd.clone();
                tokio::spawn(async move {
                    let _ = serve_status(&mut stream, &motd).await;
                });
            }
        });
        addr
    }

    async fn serve_status(stream: &mut TcpStream, motd: &str) -> io::Result<()> {
        let _handshake = protocol::read_packet(stream).await?;
        let _request = protocol::read_packet(stream).await?;
        let body = serde_json::json!({
            "version": {"name": "1.20.4", "protocol": 765},
            "players": {"online": 3, "max": 20},
            "description": {"text": motd},
        })
        .to_string();
        let mut payload = Vec::new();
        protocol::write_varint(&mut payload, 0x00);
        protocol::write_string(&mut payload, &body);
        protocol::write_packet(stream, &payload).await
    }

    fn prober_for(port: u16) -> Arc<Prober> {
        Arc::new(Prober::new(
            PortPolicy::Manual(vec![port]),
            Duration::from_millis(500),
            1,
        ))
    }

    fn coordinator(
        prober: Arc<Prober>,
        reporter: Arc<MemoryReport>,
        notifier: Arc<CollectingNotifier>,
        store: Arc<DiscoveryStore>,
    ) -> ScanCoordinator {
        let (_tx, rx) = watch::channel(false);
        ScanCoordinator::new(
            prober,
            Arc::new(NoopEnricher),
            reporter,
            notifier,
            store,
            8,
            true,
            false,
            rx,
        )
    }

    #[tokio::test]
    async fn prober_confirms_a_live_server() {
        let addr = spawn_status_server("hello").await;
        let prober = prober_for(addr.port());

        let record = prober.probe(addr.ip()).await.unwrap();
        assert_eq!(record.ip, addr.ip());
        assert_eq!(record.port, addr.port());
        assert_eq!(record.version, "1.20.4");
        assert_eq!(record.protocol, 765);
        assert_eq!(record.description, "hello");
        assert!(record.ping_ms >= 0.0);
    }

    #[tokio::test]
    async fn probe_is_idempotent_on_protocol_fields() {
        let addr = spawn_status_server("same").await;
        let prober = prober_for(addr.port());

        let first = prober.probe(addr.ip()).await.unwrap();
        let second = prober.probe(addr.ip()).await.unwrap();
        assert_eq!(first.version, second.version);
        assert_eq!(first.protocol, second.protocol);
        assert_eq!(first.identity(), second.identity());
    }

    #[tokio::test]
    async fn closed_port_is_absent() {
        // Bind then drop so the port is known-free.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let prober = prober_for(addr.port());
        assert!(prober.probe(addr.ip()).await.is_none());
    }

    #[tokio::test]
    async fn open_port_without_the_protocol_is_absent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                use tokio::io::AsyncWriteExt;
                let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
            }
        });

        let prober = prober_for(addr.port());
        assert!(prober.probe(addr.ip()).await.is_none());
    }

    #[tokio::test]
    async fn duplicate_targets_produce_a_single_new_event() {
        let addr = spawn_status_server("dup").await;
        let reporter = Arc::new(MemoryReport::default());
        let notifier = Arc::new(CollectingNotifier::default());
        let store = Arc::new(DiscoveryStore::new());
        let coordinator = coordinator(
            prober_for(addr.port()),
            Arc::clone(&reporter),
            Arc::clone(&notifier),
            Arc::clone(&store),
        );

        let targets = vec![addr.ip(); 8];
        let summary = coordinator.run_cycle(1, targets).await.unwrap();

        assert_eq!(summary.total_targets, 8);
        assert_eq!(summary.total_found, 8);
        assert_eq!(summary.total_new, 1);
        assert_eq!(summary.total_unique_servers, 1);

        let events = notifier.events.lock().unwrap();
        assert_eq!(events.len(), 8);
        assert_eq!(events.iter().filter(|(_, is_new)| *is_new).count(), 1);
        assert_eq!(reporter.servers.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_cycle_classifies_known_and_does_not_repersist() {
        let addr = spawn_status_server("again").await;
        let reporter = Arc::new(MemoryReport::default());
        let notifier = Arc::new(CollectingNotifier::default());
        let store = Arc::new(DiscoveryStore::new());
        let coordinator = coordinator(
            prober_for(addr.port()),
            Arc::clone(&reporter),
            Arc::clone(&notifier),
            Arc::clone(&store),
        );

        let first = coordinator.run_cycle(1, vec![addr.ip()]).await.unwrap();
        let second = coordinator.run_cycle(2, vec![addr.ip()]).await.unwrap();

        assert_eq!(first.total_new, 1);
        assert_eq!(second.total_new, 0);
        assert_eq!(second.total_found, 1);
        assert_eq!(reporter.servers.lock().unwrap().len(), 1);
        assert_eq!(*reporter.cycles.lock().unwrap(), vec![1, 2]);

        let events = notifier.events.lock().unwrap();
        assert_eq!(
            events
                .iter()
                .map(|(_, is_new)| *is_new)
                .collect::<Vec<_>>(),
            vec![true, false]
        );
    }

    #[tokio::test]
    async fn empty_cycle_builds_a_summary_but_persists_nothing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let reporter = Arc::new(MemoryReport::default());
        let notifier = Arc::new(CollectingNotifier::default());
        let coordinator = coordinator(
            prober_for(addr.port()),
            Arc::clone(&reporter),
            notifier,
            Arc::new(DiscoveryStore::new()),
        );

        let summary = coordinator.run_cycle(1, vec![addr.ip()]).await.unwrap();
        assert_eq!(summary.total_found, 0);
        assert!(reporter.servers.lock().unwrap().is_empty());
        assert!(reporter.cycles.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn shutdown_before_the_cycle_yields_no_summary() {
        let addr = spawn_status_server("late").await;
        let reporter = Arc::new(MemoryReport::default());
        let notifier = Arc::new(CollectingNotifier::default());
        let (tx, rx) = watch::channel(false);
        let coordinator = ScanCoordinator::new(
            prober_for(addr.port()),
            Arc::new(NoopEnricher),
            Arc::clone(&reporter) as Arc<dyn Report>,
            notifier,
            Arc::new(DiscoveryStore::new()),
            8,
            true,
            false,
            rx,
        );

        tx.send(true).unwrap();
        assert!(coordinator.run_cycle(1, vec![addr.ip()]).await.is_none());
        assert!(reporter.servers.lock().unwrap().is_empty());
        assert!(reporter.cycles.lock().unwrap().is_empty());
    }
}
