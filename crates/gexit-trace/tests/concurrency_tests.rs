use gexit_model::{EnrichmentRecord, HopRow, TraceOutcome};
use gexit_trace::{
    run_traces, CsvHopSink, EnrichmentCache, EnrichmentService, LookupError, ProbePrimitive,
    ProbeReply, Resolve, ScheduleSettings, TraceContext, TraceError, TraceSettings,
};
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Every destination is `hops` routers deep; the last one answers as the
/// destination. Tracks how many probes run at the same time.
struct LadderProbe {
    depth: HashMap<Ipv4Addr, u8>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl LadderProbe {
    fn new(depth: HashMap<Ipv4Addr, u8>, delay: Duration) -> Self {
        Self {
            depth,
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

impl ProbePrimitive for LadderProbe {
    fn send_probe(
        &self,
        destination: Ipv4Addr,
        ttl: u8,
        _port: u16,
        _timeout: Duration,
    ) -> io::Result<Option<ProbeReply>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let depth = self.depth.get(&destination).copied().unwrap_or(u8::MAX);
        let is_final = ttl >= depth;
        let responder = if is_final {
            destination
        } else {
            Ipv4Addr::new(10, destination.octets()[3], 0, ttl)
        };
        Ok(Some(ProbeReply {
            responder: IpAddr::V4(responder),
            is_final,
            rtt: Duration::from_millis(u64::from(ttl)),
        }))
    }
}

struct TableResolver(HashMap<String, Ipv4Addr>);

impl Resolve for TableResolver {
    fn resolve(&self, destination: &str) -> Option<Ipv4Addr> {
        self.0.get(destination).copied()
    }
}

struct NoOrg;

impl EnrichmentService for NoOrg {
    fn fetch(&self, _addr: IpAddr) -> Result<EnrichmentRecord, LookupError> {
        Ok(EnrichmentRecord::default())
    }
}

fn fixture(delay: Duration) -> (Vec<String>, Arc<LadderProbe>, TraceContext) {
    let names = ["alpha.example", "bravo.example", "charlie.example", "delta.example"];
    let mut table = HashMap::new();
    let mut depth = HashMap::new();
    for (i, name) in names.iter().enumerate() {
        let addr = Ipv4Addr::new(203, 0, 113, i as u8 + 1);
        table.insert(name.to_string(), addr);
        depth.insert(addr, i as u8 + 2);
    }

    let probe = Arc::new(LadderProbe::new(depth, delay));
    let ctx = TraceContext {
        primitive: probe.clone(),
        resolver: Arc::new(TableResolver(table)),
        cache: Arc::new(EnrichmentCache::new(Arc::new(NoOrg))),
    };

    let mut destinations: Vec<String> = names.iter().map(|name| name.to_string()).collect();
    destinations.insert(2, "missing.invalid".to_string());
    (destinations, probe, ctx)
}

fn settings() -> TraceSettings {
    TraceSettings {
        max_hops: 10,
        probes: 1,
        timeout_ms: 50,
        ..TraceSettings::default()
    }
}

#[test]
fn traces_come_back_in_input_order() {
    let (destinations, _probe, ctx) = fixture(Duration::from_millis(1));
    let sink = Arc::new(CsvHopSink::new(Vec::new()).unwrap());
    let schedule = ScheduleSettings {
        workers: 4,
        submission_delay_ms: 0,
    };

    let run = run_traces(&destinations, &settings(), &schedule, &ctx, sink).unwrap();

    let order: Vec<&str> = run
        .traces
        .iter()
        .map(|trace| trace.destination.as_str())
        .collect();
    assert_eq!(order, destinations.iter().map(String::as_str).collect::<Vec<_>>());
    assert_eq!(run.summary.destinations, 5);
    assert_eq!(run.summary.reached, 4);
    assert_eq!(run.summary.unresolvable, 1);
    assert_eq!(run.traces[2].outcome, TraceOutcome::Unresolvable);
}

#[test]
fn results_match_between_worker_budgets() {
    let (destinations, _, ctx_one) = fixture(Duration::ZERO);
    let (_, _, ctx_many) = fixture(Duration::ZERO);

    let sequential = ScheduleSettings {
        workers: 1,
        submission_delay_ms: 0,
    };
    let parallel = ScheduleSettings {
        workers: 8,
        submission_delay_ms: 0,
    };

    let one = run_traces(
        &destinations,
        &settings(),
        &sequential,
        &ctx_one,
        Arc::new(CsvHopSink::new(Vec::new()).unwrap()),
    )
    .unwrap();
    let many = run_traces(
        &destinations,
        &settings(),
        &parallel,
        &ctx_many,
        Arc::new(CsvHopSink::new(Vec::new()).unwrap()),
    )
    .unwrap();

    assert_eq!(one.traces, many.traces);
}

#[test]
fn worker_budget_bounds_concurrent_probes() {
    let (destinations, probe, ctx) = fixture(Duration::from_millis(20));
    let schedule = ScheduleSettings {
        workers: 2,
        submission_delay_ms: 0,
    };

    run_traces(
        &destinations,
        &settings(),
        &schedule,
        &ctx,
        Arc::new(CsvHopSink::new(Vec::new()).unwrap()),
    )
    .unwrap();

    let peak = probe.peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak concurrency was {peak}");
    assert!(peak >= 1);
}

/// Collects rows in memory so the test can inspect the interleaving.
#[derive(Default)]
struct RowLog {
    rows: Mutex<Vec<HopRow>>,
}

impl gexit_trace::HopSink for RowLog {
    fn record_hop(
        &self,
        destination: &str,
        address: Ipv4Addr,
        hop: &gexit_model::HopRecord,
    ) -> Result<(), gexit_trace::TraceError> {
        self.rows
            .lock()
            .unwrap()
            .push(HopRow::from_hop(destination, Some(IpAddr::V4(address)), hop));
        Ok(())
    }

    fn finish_trace(
        &self,
        trace: &gexit_model::DestinationTrace,
    ) -> Result<(), gexit_trace::TraceError> {
        self.rows.lock().unwrap().extend(HopRow::marker(trace));
        Ok(())
    }
}

#[test]
fn each_destination_writes_gapless_rows() {
    let (destinations, _, ctx) = fixture(Duration::from_millis(1));
    let log = Arc::new(RowLog::default());
    let schedule = ScheduleSettings {
        workers: 3,
        submission_delay_ms: 1,
    };

    run_traces(&destinations, &settings(), &schedule, &ctx, log.clone()).unwrap();

    let rows = log.rows.lock().unwrap();
    let mut per_destination: HashMap<&str, Vec<&HopRow>> = HashMap::new();
    for row in rows.iter() {
        per_destination
            .entry(row.destination.as_str())
            .or_default()
            .push(row);
    }

    let missing = &per_destination["missing.invalid"];
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].responder_address, "Unresolvable");

    for (i, name) in ["alpha.example", "bravo.example", "charlie.example", "delta.example"]
        .iter()
        .enumerate()
    {
        let hops: Vec<String> = per_destination[name]
            .iter()
            .map(|row| row.hop_index.clone())
            .collect();
        let expected: Vec<String> = (1..=i + 2).map(|n| n.to_string()).collect();
        assert_eq!(hops, expected, "rows for {name}");
    }
}

/// Answers as the destination at TTL 1, except for one address whose probe
/// panics.
struct BrokenFor(Ipv4Addr);

impl ProbePrimitive for BrokenFor {
    fn send_probe(
        &self,
        destination: Ipv4Addr,
        _ttl: u8,
        _port: u16,
        _timeout: Duration,
    ) -> io::Result<Option<ProbeReply>> {
        if destination == self.0 {
            panic!("socket failure for {destination}");
        }
        Ok(Some(ProbeReply {
            responder: IpAddr::V4(destination),
            is_final: true,
            rtt: Duration::from_millis(1),
        }))
    }
}

#[test]
fn a_panicking_worker_fails_the_run() {
    let (destinations, _, ladder_ctx) = fixture(Duration::ZERO);
    let ctx = TraceContext {
        primitive: Arc::new(BrokenFor(Ipv4Addr::new(203, 0, 113, 2))),
        ..ladder_ctx
    };
    let schedule = ScheduleSettings {
        workers: 2,
        submission_delay_ms: 0,
    };
    let log = Arc::new(RowLog::default());

    let result = run_traces(&destinations, &settings(), &schedule, &ctx, log);

    match result {
        Err(TraceError::Incomplete {
            destination,
            missing,
            submitted,
        }) => {
            assert_eq!(destination, "bravo.example");
            assert_eq!(missing, 1);
            assert_eq!(submitted, destinations.len());
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(run) => panic!("run finished with {} traces", run.traces.len()),
    }
}
