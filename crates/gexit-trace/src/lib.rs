//! Traceroute collection: probing, enrichment and scheduling.

pub mod enrich;
pub mod error;
pub mod probe;
pub mod resolve;
pub mod runner;
pub mod schedule;
pub mod sink;

pub use enrich::{
    CacheStats, EnrichmentCache, EnrichmentService, IpInfoClient, LookupSettings,
    DEFAULT_LOOKUP_TIMEOUT, DEFAULT_LOOKUP_URL,
};
pub use error::{LookupError, TraceError};
pub use probe::{ProbePrimitive, ProbeReply, UdpProbe, DEFAULT_PORT};
pub use resolve::{Resolve, SystemResolver};
pub use runner::{
    trace_destination, trace_destination_with, TraceContext, TraceSettings, MAX_PROBES_PER_HOP,
};
pub use schedule::{run_traces, RunSummary, ScheduleSettings, ScheduledRun};
pub use sink::{CsvHopSink, HopSink};
