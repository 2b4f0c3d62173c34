use std::{
    net::{IpAddr, SocketAddr},
    sync::mpsc,
    time::{Duration, Instant},
};

use crate::{catalog::ServiceCatalog, error::ScanError, resolver};

pub use self::{
    gate::{Gate, Permit},
    method::{RetryPolicy, TcpScan},
    ping::{IcmpPing, PingStats},
    report::{aggregate, OpenPort, PortOutcome, PortResult, ScanReport, Terminal},
};

mod gate;
mod method;
mod ping;
mod report;

/// Upper bound of probe threads, no matter how wide the gate is.
pub const MAX_WORKERS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Open,
    Closed,
    /// Still out of descriptors after the last retry.
    Exhausted,
}

/// Probes a single port.
pub trait Executor: Sync {
    fn scan(&self, addr: &SocketAddr, timeout: Duration) -> PortState;
}

impl<T: Executor + ?Sized> Executor for &T {
    fn scan(&self, addr: &SocketAddr, timeout: Duration) -> PortState {
        (**self).scan(addr, timeout)
    }
}

/// Decides whether a sweep is worth running.
pub trait Liveness: Sync {
    fn is_up(&self, ip: IpAddr) -> bool;
}

impl<T: Liveness + ?Sized> Liveness for &T {
    fn is_up(&self, ip: IpAddr) -> bool {
        (**self).is_up(ip)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    ip: IpAddr,
    name: Option<String>,
}

impl Target {
    pub fn new(ip: IpAddr) -> Self {
        Self { ip, name: None }
    }

    pub fn named(ip: IpAddr, name: impl Into<String>) -> Self {
        Self {
            ip,
            name: Some(name.into()),
        }
    }

    #[inline]
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn resolved(&self) -> Self {
        match self.name {
            Some(_) => self.clone(),
            None => Self::named(self.ip, resolver::display_name(self.ip)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRequest {
    /// Ports `1..=upper` are probed.
    pub upper: u16,
    pub timeout: Duration,
    /// Maximum probes in flight.
    pub width: usize,
}

impl ScanRequest {
    pub fn new(upper: u16, timeout: Duration, width: usize) -> Self {
        Self {
            upper,
            timeout,
            width,
        }
    }
}

pub struct Scanner<'a> {
    target: Target,
    request: ScanRequest,
    catalog: &'a ServiceCatalog,
    executor: Box<dyn Executor + 'a>,
    liveness: Box<dyn Liveness + 'a>,
    workers: Option<usize>,
}

impl<'a> Scanner<'a> {
    pub fn new(target: Target, request: ScanRequest, catalog: &'a ServiceCatalog) -> Self {
        Self {
            target,
            request,
            catalog,
            executor: Box::new(TcpScan::default()),
            liveness: Box::new(IcmpPing::default()),
            workers: None,
        }
    }

    /// Probe threads; defaults to the admission width. Always capped at
    /// [`MAX_WORKERS`].
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers.max(1));
        self
    }

    pub fn executor(mut self, executor: impl Executor + 'a) -> Self {
        self.executor = Box::new(executor);
        self
    }

    pub fn liveness(mut self, liveness: impl Liveness + 'a) -> Self {
        self.liveness = Box::new(liveness);
        self
    }

    fn scan_port(&self, port: u16) -> PortResult {
        let addr = SocketAddr::new(self.target.ip, port);

        let outcome = match self.executor.scan(&addr, self.request.timeout) {
            PortState::Open => PortOutcome::Open(self.catalog.classify(port).to_owned()),
            PortState::Closed => PortOutcome::Closed,
            PortState::Exhausted => PortOutcome::Exhausted,
        };

        log::debug!("Port {} is {}", port, outcome);

        PortResult::new(port, outcome)
    }

    fn sweep(&self) -> Result<Vec<PortResult>, ScanError> {
        let gate = Gate::new(self.request.width);
        let workers = self.workers.unwrap_or(gate.width()).min(MAX_WORKERS);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("probe-{}", i))
            .build()
            .map_err(ScanError::WorkerPoolFailed)?;

        log::debug!(
            "Probing {} ports with at most {} in flight on {} workers",
            self.request.upper,
            gate.width(),
            workers
        );

        let (tx, rx) = mpsc::channel();

        // Dispatch happens on the calling thread so a full gate stalls the
        // dispatcher and never a worker. The scope is the join barrier.
        pool.in_place_scope(|s| {
            for port in 1..=self.request.upper {
                let permit = gate.acquire();
                let tx = tx.clone();

                s.spawn(move |_| {
                    let result = self.scan_port(port);
                    drop(permit);
                    // The receiver outlives the scope.
                    let _ = tx.send(result);
                });
            }
        });

        drop(tx);

        Ok(rx.into_iter().collect())
    }

    pub fn start(&self) -> Result<ScanReport, ScanError> {
        let target = self.target.resolved();

        log::info!(
            "Scanning {} ({}) ports 1-{}",
            target.ip(),
            target.name().unwrap_or_default(),
            self.request.upper
        );

        let now = Instant::now();

        if !self.liveness.is_up(target.ip()) {
            return Ok(ScanReport::host_down(target, now.elapsed()));
        }

        let outcomes = self.sweep()?;

        Ok(aggregate(target, outcomes, now.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        net::Ipv4Addr,
        sync::atomic::{AtomicUsize, Ordering},
        thread,
    };

    use pretty_assertions::assert_eq;

    use crate::catalog::ServiceEntry;

    use super::*;

    const TICK: Duration = Duration::from_millis(1);

    struct Up;

    impl Liveness for Up {
        fn is_up(&self, _: IpAddr) -> bool {
            true
        }
    }

    struct Down;

    impl Liveness for Down {
        fn is_up(&self, _: IpAddr) -> bool {
            false
        }
    }

    struct Reachable(HashSet<u16>);

    impl Executor for Reachable {
        fn scan(&self, addr: &SocketAddr, _: Duration) -> PortState {
            if self.0.contains(&addr.port()) {
                PortState::Open
            } else {
                PortState::Closed
            }
        }
    }

    #[derive(Default)]
    struct Instrumented {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Executor for Instrumented {
        fn scan(&self, _: &SocketAddr, _: Duration) -> PortState {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            thread::sleep(Duration::from_millis(3));

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            PortState::Closed
        }
    }

    fn local() -> Target {
        Target::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    fn web_catalog() -> ServiceCatalog {
        ServiceCatalog::new(vec![
            ServiceEntry::new(80, "http"),
            ServiceEntry::new(443, "https"),
        ])
    }

    #[test]
    fn host_down_dispatches_nothing() {
        let catalog = ServiceCatalog::default();
        let probe = Instrumented::default();

        let report = Scanner::new(local(), ScanRequest::new(100, TICK, 8), &catalog)
            .executor(&probe)
            .liveness(Down)
            .start()
            .unwrap();

        assert_eq!(report.terminal, Terminal::HostDown);
        assert!(report.open.is_empty());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn every_port_yields_one_outcome() {
        let catalog = ServiceCatalog::default();
        let probe = Instrumented::default();

        let report = Scanner::new(local(), ScanRequest::new(200, TICK, 16), &catalog)
            .executor(&probe)
            .liveness(Up)
            .start()
            .unwrap();

        assert_eq!(report.terminal, Terminal::Completed);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 200);
        assert_eq!(report.open_count() + report.closed, 200);
    }

    #[test]
    fn in_flight_never_exceeds_width() {
        let catalog = ServiceCatalog::default();
        let probe = Instrumented::default();

        // Plenty of threads, so only the gate can hold the line.
        Scanner::new(local(), ScanRequest::new(60, TICK, 3), &catalog)
            .executor(&probe)
            .liveness(Up)
            .workers(16)
            .start()
            .unwrap();

        let peak = probe.peak.load(Ordering::SeqCst);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 60);
        assert!((1..=3).contains(&peak), "peak was {}", peak);
    }

    #[test]
    fn open_ports_are_classified() {
        let catalog = web_catalog();
        let reachable = Reachable([80, 443].into_iter().collect());

        let report = Scanner::new(local(), ScanRequest::new(443, TICK, 32), &catalog)
            .executor(reachable)
            .liveness(Up)
            .start()
            .unwrap();

        assert_eq!(
            report.open,
            vec![
                OpenPort { port: 80, service: "http".into() },
                OpenPort { port: 443, service: "https".into() },
            ]
        );
        assert_eq!(report.closed, 441);
    }

    #[test]
    fn uncatalogued_open_port_is_unknown() {
        let catalog = web_catalog();
        let reachable = Reachable([7].into_iter().collect());

        let report = Scanner::new(local(), ScanRequest::new(10, TICK, 4), &catalog)
            .executor(reachable)
            .liveness(Up)
            .start()
            .unwrap();

        assert_eq!(
            report.open,
            vec![OpenPort { port: 7, service: "unknown".into() }]
        );
        assert_eq!(report.closed, 9);
    }

    #[test]
    fn loopback_target_is_named_localhost() {
        let catalog = ServiceCatalog::default();

        let report = Scanner::new(local(), ScanRequest::new(1, TICK, 1), &catalog)
            .executor(Reachable(HashSet::new()))
            .liveness(Up)
            .start()
            .unwrap();

        assert_eq!(report.target.name(), Some("localhost"));
    }
}
