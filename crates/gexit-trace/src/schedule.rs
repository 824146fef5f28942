use crate::error::TraceError;
use crate::runner::{trace_destination_with, TraceContext, TraceSettings};
use crate::sink::HopSink;
use gexit_model::{DestinationTrace, TraceOutcome};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleSettings {
    pub workers: usize,
    pub submission_delay_ms: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            workers: 50,
            submission_delay_ms: 100,
        }
    }
}

impl ScheduleSettings {
    pub fn validate(&self) -> Result<(), TraceError> {
        if self.workers == 0 {
            return Err(TraceError::InvalidSettings(
                "worker budget must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub destinations: usize,
    pub reached: usize,
    pub hop_limit: usize,
    pub all_timed_out: usize,
    pub unresolvable: usize,
    pub sink_errors: u64,
}

impl RunSummary {
    pub fn from_traces(traces: &[DestinationTrace]) -> Self {
        let mut summary = Self {
            destinations: traces.len(),
            ..Self::default()
        };
        for trace in traces {
            match trace.outcome {
                TraceOutcome::Reached => summary.reached += 1,
                TraceOutcome::HopLimit => summary.hop_limit += 1,
                TraceOutcome::AllTimedOut => summary.all_timed_out += 1,
                TraceOutcome::Unresolvable => summary.unresolvable += 1,
            }
        }
        summary
    }
}

pub struct ScheduledRun {
    pub traces: Vec<DestinationTrace>,
    pub summary: RunSummary,
}

/// Traces every destination on a pool of `workers` threads, submitting one
/// destination per `submission_delay_ms`. Hop rows go to `sink` as they are
/// produced; the returned traces follow the input order regardless of which
/// finished first. A destination whose worker panicked fails the whole run
/// with [`TraceError::Incomplete`].
pub fn run_traces(
    destinations: &[String],
    settings: &TraceSettings,
    schedule: &ScheduleSettings,
    ctx: &TraceContext,
    sink: Arc<dyn HopSink>,
) -> Result<ScheduledRun, TraceError> {
    settings.validate()?;
    schedule.validate()?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(schedule.workers)
        .thread_name(|index| format!("gexit-probe-{index}"))
        .panic_handler(|_| error!("probe worker panicked"))
        .build()?;

    let sink_errors = Arc::new(AtomicU64::new(0));
    let (tx, rx) = mpsc::channel::<(usize, DestinationTrace)>();
    let delay = Duration::from_millis(schedule.submission_delay_ms);

    for (index, destination) in destinations.iter().enumerate() {
        let tx = tx.clone();
        let destination = destination.clone();
        let settings = settings.clone();
        let ctx = ctx.clone();
        let sink = Arc::clone(&sink);
        let sink_errors = Arc::clone(&sink_errors);

        pool.spawn(move || {
            let trace = trace_destination_with(&destination, &settings, &ctx, |address, hop| {
                if let Err(err) = sink.record_hop(&destination, address, hop) {
                    sink_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(destination = %destination, hop = hop.hop_index, error = %err, "failed to record hop");
                }
            });
            if let Err(err) = sink.finish_trace(&trace) {
                sink_errors.fetch_add(1, Ordering::Relaxed);
                warn!(destination = %destination, error = %err, "failed to record trace end");
            }
            let _ = tx.send((index, trace));
        });

        if !delay.is_zero() && index + 1 < destinations.len() {
            sleep(delay);
        }
    }
    drop(tx);

    let mut slots: Vec<Option<DestinationTrace>> = vec![None; destinations.len()];
    for (index, trace) in rx {
        slots[index] = Some(trace);
    }

    let mut traces = Vec::with_capacity(destinations.len());
    let mut incomplete = Vec::new();
    for (destination, slot) in destinations.iter().zip(slots) {
        match slot {
            Some(trace) => traces.push(trace),
            None => {
                error!(destination = %destination, "trace did not complete");
                incomplete.push(destination);
            }
        }
    }
    if let Some(first) = incomplete.first() {
        return Err(TraceError::Incomplete {
            destination: first.to_string(),
            missing: incomplete.len(),
            submitted: destinations.len(),
        });
    }

    let mut summary = RunSummary::from_traces(&traces);
    summary.sink_errors = sink_errors.load(Ordering::Relaxed);
    info!(
        destinations = summary.destinations,
        reached = summary.reached,
        hop_limit = summary.hop_limit,
        all_timed_out = summary.all_timed_out,
        unresolvable = summary.unresolvable,
        "run finished"
    );

    Ok(ScheduledRun { traces, summary })
}
