use gexit_model::EnrichmentRecord;
use gexit_trace::{EnrichmentCache, EnrichmentService, LookupError};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::thread;

/// Fails the first `failures` requests for each address, then answers.
struct FlakyService {
    failures: u32,
    calls: Mutex<HashMap<IpAddr, u32>>,
}

impl FlakyService {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn calls_for(&self, addr: IpAddr) -> u32 {
        self.calls.lock().unwrap().get(&addr).copied().unwrap_or(0)
    }
}

impl EnrichmentService for FlakyService {
    fn fetch(&self, addr: IpAddr) -> Result<EnrichmentRecord, LookupError> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            let entry = calls.entry(addr).or_insert(0);
            *entry += 1;
            *entry
        };
        if attempt <= self.failures {
            return Err(LookupError::Status { addr, status: 503 });
        }
        Ok(EnrichmentRecord {
            organization: format!("AS64496 Org for {addr}"),
            country: "NL".to_string(),
            ..EnrichmentRecord::default()
        })
    }
}

fn addr(text: &str) -> IpAddr {
    text.parse().unwrap()
}

#[test]
fn successful_lookup_is_memoized() {
    let service = Arc::new(FlakyService::new(0));
    let cache = EnrichmentCache::new(service.clone());
    let ip = addr("192.0.2.10");

    let first = cache.lookup(ip);
    let second = cache.lookup(ip);

    assert_eq!(first, second);
    assert_eq!(first.organization, "AS64496 Org for 192.0.2.10");
    assert_eq!(service.calls_for(ip), 1);

    let stats = cache.stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.fetches, 1);
    assert_eq!(stats.failures, 0);
}

#[test]
fn failed_lookup_is_retried_next_time() {
    let service = Arc::new(FlakyService::new(1));
    let cache = EnrichmentCache::new(service.clone());
    let ip = addr("192.0.2.20");

    let first = cache.lookup(ip);
    assert!(first.is_empty());

    let second = cache.lookup(ip);
    assert_eq!(second.country, "NL");
    assert_eq!(service.calls_for(ip), 2);

    let third = cache.lookup(ip);
    assert_eq!(third, second);
    assert_eq!(service.calls_for(ip), 2);
    assert_eq!(cache.stats().failures, 1);
}

#[test]
fn concurrent_lookups_leave_one_entry_per_address() {
    let service = Arc::new(FlakyService::new(0));
    let cache = Arc::new(EnrichmentCache::new(service.clone()));
    let addresses: Vec<IpAddr> = (1..=8).map(|n| addr(&format!("192.0.2.{n}"))).collect();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let addresses = addresses.clone();
            thread::spawn(move || {
                for ip in addresses {
                    assert_eq!(cache.lookup(ip).organization, format!("AS64496 Org for {ip}"));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = cache.stats();
    assert_eq!(stats.entries, addresses.len());
    assert_eq!(stats.hits + stats.fetches, 64);
    for ip in &addresses {
        let calls = service.calls_for(*ip);
        assert!((1..=8).contains(&calls), "{ip} fetched {calls} times");
    }
}
