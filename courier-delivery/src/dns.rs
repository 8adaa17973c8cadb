//! MX resolution for outbound delivery.
//!
//! Only MX records are consulted: a domain without them has nowhere to
//! deliver to and its recipients are retried later.
//!
//! # Caching Strategy
//!
//! - **DNS TTL by default**: entries live as long as the smallest record TTL
//! - **Bounded TTLs**: clamped to a configurable min (60s) and max (3600s)
//! - **Optional override**: `cache_ttl_secs` replaces the record TTL outright
//! - **Lock-free**: `DashMap` provides concurrent access without mutex contention

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use hickory_resolver::{
    TokioResolver, config::ResolverOpts, name_server::TokioConnectionProvider,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur during MX resolution.
#[derive(Debug, Error)]
pub enum DnsError {
    /// The domain has no MX records.
    #[error("No mail servers found for domain: {0}")]
    NoMailServers(String),

    /// DNS query failed due to network or resolver issues.
    #[error("DNS lookup failed: {0}")]
    LookupFailed(#[from] hickory_resolver::ResolveError),
}

/// Configuration for the DNS resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsConfig {
    /// DNS query timeout in seconds (default: 5)
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,

    /// Cache TTL override in seconds
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,

    /// Minimum cache TTL in seconds (default: 60)
    #[serde(default = "defaults::min_cache_ttl_secs")]
    pub min_cache_ttl_secs: u64,

    /// Maximum cache TTL in seconds (default: 3600)
    #[serde(default = "defaults::max_cache_ttl_secs")]
    pub max_cache_ttl_secs: u64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: defaults::timeout_secs(),
            cache_ttl_secs: None,
            min_cache_ttl_secs: defaults::min_cache_ttl_secs(),
            max_cache_ttl_secs: defaults::max_cache_ttl_secs(),
        }
    }
}

mod defaults {
    pub const fn timeout_secs() -> u64 {
        5
    }

    pub const fn min_cache_ttl_secs() -> u64 {
        60
    }

    pub const fn max_cache_ttl_secs() -> u64 {
        3600
    }
}

/// A mail exchanger for a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MxCandidate {
    pub host: String,
    /// Lower values are tried first
    pub preference: u16,
}

impl MxCandidate {
    #[must_use]
    pub fn new(host: impl Into<String>, preference: u16) -> Self {
        Self {
            host: host.into(),
            preference,
        }
    }
}

/// Orders candidates by ascending preference. Equal preferences keep the
/// order the resolver returned them in.
#[must_use]
pub fn sort_candidates(mut candidates: Vec<MxCandidate>) -> Vec<MxCandidate> {
    candidates.sort_by_key(|candidate| candidate.preference);
    candidates
}

/// Looks up the exchangers for a domain.
#[async_trait]
pub trait MxResolver: Send + Sync {
    async fn resolve(&self, domain: &str) -> Result<Vec<MxCandidate>, DnsError>;
}

/// Cached DNS result with expiration time.
#[derive(Debug, Clone)]
struct CachedResult {
    candidates: Arc<Vec<MxCandidate>>,
    expires_at: Instant,
}

/// MX resolver backed by the system DNS configuration, with a concurrent
/// TTL cache.
#[derive(Debug)]
pub struct DnsResolver {
    resolver: TokioResolver,
    cache: DashMap<String, CachedResult>,
    config: DnsConfig,
}

impl DnsResolver {
    /// Creates a resolver from the system configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the system DNS configuration cannot be loaded.
    pub fn new(config: DnsConfig) -> Result<Self, DnsError> {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(config.timeout_secs);

        let resolver = TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(opts)
            .build();

        Ok(Self {
            resolver,
            cache: DashMap::new(),
            config,
        })
    }

    async fn resolve_uncached(&self, domain: &str) -> Result<(Vec<MxCandidate>, u32), DnsError> {
        let lookup = match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => lookup,
            Err(err) if err.is_no_records_found() => {
                debug!("No MX records found for {domain}");
                return Err(DnsError::NoMailServers(domain.to_string()));
            }
            Err(err) => {
                warn!("MX lookup failed for {domain}: {err}");
                return Err(DnsError::LookupFailed(err));
            }
        };

        let min_ttl = lookup
            .as_lookup()
            .records()
            .iter()
            .map(hickory_resolver::proto::rr::Record::ttl)
            .min()
            .unwrap_or(300);

        let candidates: Vec<MxCandidate> = lookup
            .iter()
            .map(|mx| {
                let host = mx.exchange().to_utf8();
                let host = host.trim_end_matches('.').to_string();
                debug!("Found MX record: {host} (preference: {})", mx.preference());
                MxCandidate::new(host, mx.preference())
            })
            .collect();

        if candidates.is_empty() {
            return Err(DnsError::NoMailServers(domain.to_string()));
        }

        Ok((candidates, min_ttl))
    }
}

#[async_trait]
impl MxResolver for DnsResolver {
    async fn resolve(&self, domain: &str) -> Result<Vec<MxCandidate>, DnsError> {
        if let Some(cached) = self.cache.get(domain) {
            if cached.expires_at > Instant::now() {
                debug!("Cache hit for {domain}, {} candidate(s)", cached.candidates.len());
                return Ok(cached.candidates.as_ref().clone());
            }
            debug!("Cache entry expired for {domain}");
        }

        let (candidates, dns_ttl) = self.resolve_uncached(domain).await?;
        let candidates = Arc::new(sort_candidates(candidates));

        let cache_ttl = self.config.cache_ttl_secs.unwrap_or_else(|| {
            u64::from(dns_ttl).clamp(self.config.min_cache_ttl_secs, self.config.max_cache_ttl_secs)
        });

        self.cache.insert(
            domain.to_string(),
            CachedResult {
                candidates: Arc::clone(&candidates),
                expires_at: Instant::now() + Duration::from_secs(cache_ttl),
            },
        );

        debug!(
            "Cached result for {domain}, DNS TTL: {dns_ttl}s, cache TTL: {cache_ttl}s, {} candidate(s)",
            candidates.len()
        );
        Ok(candidates.as_ref().clone())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn candidates_sort_by_preference() {
        let sorted = sort_candidates(vec![
            MxCandidate::new("mx2", 20),
            MxCandidate::new("mx1", 10),
        ]);

        assert_eq!(
            sorted,
            vec![MxCandidate::new("mx1", 10), MxCandidate::new("mx2", 20)]
        );
    }

    #[test]
    fn equal_preferences_keep_their_order() {
        let sorted = sort_candidates(vec![
            MxCandidate::new("c", 10),
            MxCandidate::new("backup", 50),
            MxCandidate::new("a", 10),
            MxCandidate::new("b", 10),
        ]);

        let hosts: Vec<&str> = sorted.iter().map(|c| c.host.as_str()).collect();
        assert_eq!(hosts, vec!["c", "a", "b", "backup"]);
    }

    #[test]
    fn config_defaults() {
        let config = DnsConfig::default();
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.cache_ttl_secs, None);
        assert_eq!(config.min_cache_ttl_secs, 60);
        assert_eq!(config.max_cache_ttl_secs, 3600);
    }

    #[tokio::test]
    #[ignore = "Requires network access"]
    async fn resolves_real_exchangers() {
        let resolver = DnsResolver::new(DnsConfig::default()).unwrap();
        let candidates = resolver.resolve("gmail.com").await.unwrap();

        assert!(!candidates.is_empty());
        assert!(candidates.windows(2).all(|w| w[0].preference <= w[1].preference));
    }
}
