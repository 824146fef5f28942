//! Responder enrichment: an HTTP organization/geo lookup behind a memoizing
//! cache shared by every probing worker.

use crate::error::LookupError;
use gexit_model::EnrichmentRecord;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_LOOKUP_URL: &str = "https://ipinfo.io";
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// External organization/geo lookup for one address.
pub trait EnrichmentService: Send + Sync {
    fn fetch(&self, addr: IpAddr) -> Result<EnrichmentRecord, LookupError>;
}

#[derive(Debug, Clone)]
pub struct LookupSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub token: Option<String>,
}

impl Default for LookupSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LOOKUP_URL.to_string(),
            timeout: DEFAULT_LOOKUP_TIMEOUT,
            token: None,
        }
    }
}

/// Client for ipinfo-style `GET {base}/{ip}/json` endpoints.
pub struct IpInfoClient {
    client: reqwest::blocking::Client,
    settings: LookupSettings,
}

impl IpInfoClient {
    pub fn new(settings: LookupSettings) -> reqwest::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .user_agent(format!("gexit/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, settings })
    }
}

impl EnrichmentService for IpInfoClient {
    fn fetch(&self, addr: IpAddr) -> Result<EnrichmentRecord, LookupError> {
        let url = format!("{}/{}/json", self.settings.base_url.trim_end_matches('/'), addr);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.settings.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .map_err(|source| LookupError::Request { addr, source })?;
        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Status {
                addr,
                status: status.as_u16(),
            });
        }
        let body = response
            .text()
            .map_err(|source| LookupError::Request { addr, source })?;

        parse_ipinfo(&body).map_err(|err| LookupError::Malformed {
            addr,
            reason: err.to_string(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IpInfoBody {
    org: Option<String>,
    city: Option<String>,
    region: Option<String>,
    country: Option<String>,
    loc: Option<String>,
    postal: Option<String>,
    timezone: Option<String>,
}

pub(crate) fn parse_ipinfo(body: &str) -> serde_json::Result<EnrichmentRecord> {
    let body: IpInfoBody = serde_json::from_str(body)?;
    Ok(EnrichmentRecord {
        organization: body.org.unwrap_or_default(),
        city: body.city.unwrap_or_default(),
        region: body.region.unwrap_or_default(),
        country: body.country.unwrap_or_default(),
        coordinates: body.loc.unwrap_or_default(),
        postal_code: body.postal.unwrap_or_default(),
        timezone: body.timezone.unwrap_or_default(),
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub fetches: u64,
    pub failures: u64,
}

/// Memoizes successful lookups for the lifetime of a run. Failures are
/// returned as empty records and left uncached so the next sighting of the
/// address asks again. Two workers missing on the same address at once may
/// both fetch it; the second insert just replaces an equal record.
pub struct EnrichmentCache {
    service: Arc<dyn EnrichmentService>,
    entries: RwLock<HashMap<IpAddr, EnrichmentRecord>>,
    hits: AtomicU64,
    fetches: AtomicU64,
    failures: AtomicU64,
}

impl EnrichmentCache {
    pub fn new(service: Arc<dyn EnrichmentService>) -> Self {
        Self {
            service,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn lookup(&self, addr: IpAddr) -> EnrichmentRecord {
        if let Some(record) = self.entries.read().get(&addr) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return record.clone();
        }

        self.fetches.fetch_add(1, Ordering::Relaxed);
        match self.service.fetch(addr) {
            Ok(record) => {
                debug!(%addr, org = %record.organization, "enrichment fetched");
                self.entries.write().insert(addr, record.clone());
                record
            }
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(%addr, error = %err, "enrichment lookup failed");
                EnrichmentRecord::default()
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.read().len(),
            hits: self.hits.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ipinfo_maps_fields() {
        let body = r#"{
            "ip": "142.250.64.78",
            "hostname": "lga34s32-in-f14.1e100.net",
            "city": "New York City",
            "region": "New York",
            "country": "US",
            "loc": "40.7143,-74.0060",
            "org": "AS15169 Google LLC",
            "postal": "10001",
            "timezone": "America/New_York"
        }"#;
        let record = parse_ipinfo(body).unwrap();
        assert_eq!(record.organization, "AS15169 Google LLC");
        assert_eq!(record.coordinates, "40.7143,-74.0060");
        assert_eq!(record.postal_code, "10001");
        assert_eq!(record.timezone, "America/New_York");
    }

    #[test]
    fn parse_ipinfo_accepts_bogon_answers() {
        let record = parse_ipinfo(r#"{"ip": "10.0.0.1", "bogon": true}"#).unwrap();
        assert!(record.is_empty());
    }

    #[test]
    fn parse_ipinfo_rejects_non_json() {
        assert!(parse_ipinfo("<html>rate limited</html>").is_err());
    }
}
