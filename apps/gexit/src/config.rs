use anyhow::{anyhow, Context, Result};
use clap::Args;
use gexit_trace::{LookupSettings, ScheduleSettings, TraceSettings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const TOKEN_ENV: &str = "IPINFO_TOKEN";

/// Probe, scheduling and lookup options. Every flag overrides the matching
/// key of the `--config` file; unset keys fall back to the built-in defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct ProbeArgs {
    /// JSON file with default values for the options below.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub max_hops: Option<u32>,

    #[arg(long)]
    pub probes: Option<u32>,

    #[arg(long)]
    pub timeout_ms: Option<u64>,

    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub workers: Option<usize>,

    #[arg(long)]
    pub submission_delay_ms: Option<u64>,

    #[arg(long)]
    pub lookup_url: Option<String>,

    #[arg(long)]
    pub lookup_timeout_ms: Option<u64>,

    /// ipinfo token; also read from IPINFO_TOKEN.
    #[arg(long)]
    pub lookup_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub max_hops: Option<u32>,
    pub probes: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub port: Option<u16>,
    pub workers: Option<usize>,
    pub submission_delay_ms: Option<u64>,
    pub lookup: LookupFileConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LookupFileConfig {
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub token: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path:?}"))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config file {path:?}"))
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub trace: TraceSettings,
    pub schedule: ScheduleSettings,
    pub lookup: LookupSettings,
}

/// The parts of a [`RunConfig`] that go into the run receipt. The lookup
/// token is left out.
#[derive(Debug, Serialize)]
pub struct ConfigSummary {
    pub trace: TraceSettings,
    pub schedule: ScheduleSettings,
    pub lookup_url: String,
    pub lookup_timeout_ms: u128,
    pub lookup_authenticated: bool,
}

impl RunConfig {
    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            trace: self.trace.clone(),
            schedule: self.schedule.clone(),
            lookup_url: self.lookup.base_url.clone(),
            lookup_timeout_ms: self.lookup.timeout.as_millis(),
            lookup_authenticated: self.lookup.token.is_some(),
        }
    }
}

impl ProbeArgs {
    pub fn resolve(&self) -> Result<RunConfig> {
        let file = match &self.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        let env_token = std::env::var(TOKEN_ENV).ok().filter(|value| !value.is_empty());
        self.merge(file, env_token)
    }

    fn merge(&self, file: FileConfig, env_token: Option<String>) -> Result<RunConfig> {
        let trace_defaults = TraceSettings::default();
        let schedule_defaults = ScheduleSettings::default();
        let lookup_defaults = LookupSettings::default();

        let trace = TraceSettings {
            max_hops: self.max_hops.or(file.max_hops).unwrap_or(trace_defaults.max_hops),
            probes: self.probes.or(file.probes).unwrap_or(trace_defaults.probes),
            timeout_ms: self
                .timeout_ms
                .or(file.timeout_ms)
                .unwrap_or(trace_defaults.timeout_ms),
            port: self.port.or(file.port).unwrap_or(trace_defaults.port),
        };
        let schedule = ScheduleSettings {
            workers: self.workers.or(file.workers).unwrap_or(schedule_defaults.workers),
            submission_delay_ms: self
                .submission_delay_ms
                .or(file.submission_delay_ms)
                .unwrap_or(schedule_defaults.submission_delay_ms),
        };

        let lookup_timeout = match self.lookup_timeout_ms.or(file.lookup.timeout_ms) {
            Some(0) => return Err(anyhow!("lookup timeout must be positive")),
            Some(ms) => Duration::from_millis(ms),
            None => lookup_defaults.timeout,
        };
        let lookup = LookupSettings {
            base_url: self
                .lookup_url
                .clone()
                .or(file.lookup.base_url)
                .unwrap_or(lookup_defaults.base_url),
            timeout: lookup_timeout,
            token: self.lookup_token.clone().or(env_token).or(file.lookup.token),
        };

        trace.validate()?;
        schedule.validate()?;

        Ok(RunConfig {
            trace,
            schedule,
            lookup,
        })
    }
}
