use crate::enrich::EnrichmentCache;
use crate::error::TraceError;
use crate::probe::{ProbePrimitive, DEFAULT_PORT};
use crate::resolve::Resolve;
use gexit_model::{DestinationTrace, HopRecord, TraceOutcome};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Largest number of probes per hop; the raw table has three sample columns.
pub const MAX_PROBES_PER_HOP: u32 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct TraceSettings {
    pub max_hops: u32,
    pub probes: u32,
    pub timeout_ms: u64,
    pub port: u16,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            max_hops: 30,
            probes: 3,
            timeout_ms: 2000,
            port: DEFAULT_PORT,
        }
    }
}

impl TraceSettings {
    pub fn validate(&self) -> Result<(), TraceError> {
        if self.max_hops < 1 || self.max_hops > u32::from(u8::MAX) {
            return Err(TraceError::InvalidSettings(format!(
                "max_hops must be between 1 and 255 (got {})",
                self.max_hops
            )));
        }
        if self.probes < 1 || self.probes > MAX_PROBES_PER_HOP {
            return Err(TraceError::InvalidSettings(format!(
                "probes per hop must be between 1 and {MAX_PROBES_PER_HOP} (got {})",
                self.probes
            )));
        }
        if self.timeout_ms == 0 {
            return Err(TraceError::InvalidSettings(
                "per-probe timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Collaborators shared by every trace of a run.
#[derive(Clone)]
pub struct TraceContext {
    pub primitive: Arc<dyn ProbePrimitive>,
    pub resolver: Arc<dyn Resolve>,
    pub cache: Arc<EnrichmentCache>,
}

pub fn trace_destination(
    destination: &str,
    settings: &TraceSettings,
    ctx: &TraceContext,
) -> DestinationTrace {
    trace_destination_with(destination, settings, ctx, |_, _| {})
}

/// Walks the TTL ladder for one destination. `on_hop` sees each hop as soon as
/// all of its probes are done, in TTL order. Probe counts and hop ceilings
/// beyond what [`TraceSettings::validate`] accepts are clamped to the nearest
/// valid value.
pub fn trace_destination_with<F>(
    destination: &str,
    settings: &TraceSettings,
    ctx: &TraceContext,
    mut on_hop: F,
) -> DestinationTrace
where
    F: FnMut(Ipv4Addr, &HopRecord),
{
    let Some(address) = ctx.resolver.resolve(destination) else {
        warn!(destination, "could not resolve, skipping");
        return DestinationTrace::unresolvable(destination);
    };

    info!(
        destination,
        %address,
        max_hops = settings.max_hops,
        timeout_ms = settings.timeout_ms,
        "tracing"
    );

    let probes = settings.probes.clamp(1, MAX_PROBES_PER_HOP);
    let max_hops = settings.max_hops.min(u32::from(u8::MAX));
    let mut hops = Vec::new();
    let mut any_reply = false;
    let mut reached = false;

    for ttl in 1..=max_hops {
        let (hop, is_final) = probe_hop(address, ttl, probes, settings, ctx);
        any_reply |= hop.responder.is_some();

        info!(
            destination,
            hop = hop.hop_index,
            responder = %hop.responder.map(|ip| ip.to_string()).unwrap_or_else(|| "*".to_string()),
            org = hop.organization(),
            rtt_ms = ?hop.rtt_ms,
            "hop"
        );
        on_hop(address, &hop);
        hops.push(hop);

        if is_final {
            reached = true;
            break;
        }
    }

    let outcome = if reached {
        TraceOutcome::Reached
    } else if !any_reply {
        TraceOutcome::AllTimedOut
    } else {
        TraceOutcome::HopLimit
    };

    DestinationTrace {
        destination: destination.to_string(),
        destination_address: Some(address.into()),
        hops,
        outcome,
    }
}

fn probe_hop(
    address: Ipv4Addr,
    ttl: u32,
    probes: u32,
    settings: &TraceSettings,
    ctx: &TraceContext,
) -> (HopRecord, bool) {
    let probe_ttl = u8::try_from(ttl).unwrap_or(u8::MAX);
    let mut rtt_ms = Vec::with_capacity(probes as usize);
    let mut responder = None;
    let mut is_final = false;

    for _ in 0..probes {
        match ctx
            .primitive
            .send_probe(address, probe_ttl, settings.port, settings.timeout())
        {
            Ok(Some(reply)) => {
                // Later replies at this TTL are assumed to share the responder.
                if responder.is_none() {
                    responder = Some(reply.responder);
                }
                is_final |= reply.is_final;
                rtt_ms.push(Some(round_ms(reply.rtt)));
            }
            Ok(None) => rtt_ms.push(None),
            Err(err) => {
                warn!(%address, ttl, error = %err, "probe failed");
                rtt_ms.push(None);
            }
        }
    }

    let enrichment = responder.map(|addr| ctx.cache.lookup(addr));

    (
        HopRecord {
            hop_index: ttl,
            responder,
            rtt_ms,
            enrichment,
        },
        is_final,
    )
}

fn round_ms(rtt: Duration) -> f64 {
    (rtt.as_secs_f64() * 100_000.0).round() / 100.0
}
