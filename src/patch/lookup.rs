//! Resolve a client version to the patches it still needs

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::patch::cache::LookupCache;
use crate::patch::catalog::PatchCatalog;
use crate::patch::error::{LookupError, ParseError, StorageError};
use crate::patch::identifier::VersionIdentifier;
use crate::patch::types::{PatchEntry, PatchList};

/// Where the client version string came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSource {
    /// Explicit `version` request parameter
    Query,
    /// Client identification header (User-Agent)
    Header,
}

impl VersionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionSource::Query => "query string",
            VersionSource::Header => "header",
        }
    }
}

/// Pick the version string: an explicit parameter wins over the header.
/// Empty values count as absent.
pub fn resolve_version_source<'a>(
    query: Option<&'a str>,
    header: Option<&'a str>,
) -> Result<(&'a str, VersionSource), ParseError> {
    let present = |value: Option<&'a str>| value.filter(|v| !v.is_empty());

    present(query)
        .map(|v| (v, VersionSource::Query))
        .or_else(|| present(header).map(|v| (v, VersionSource::Header)))
        .ok_or(ParseError::Missing)
}

/// Counters for cache effectiveness
#[derive(Debug, Default)]
pub struct LookupStats {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_puts: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    /// Results not cached because a publish landed during the catalog query
    pub stale_puts: u64,
}

impl LookupStats {
    pub fn snapshot(&self) -> LookupStatsSnapshot {
        LookupStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_puts: self.stale_puts.load(Ordering::Relaxed),
        }
    }
}

pub struct LookupService {
    catalog: Arc<dyn PatchCatalog>,
    cache: Arc<dyn LookupCache>,
    stats: LookupStats,
}

impl LookupService {
    pub fn new(catalog: Arc<dyn PatchCatalog>, cache: Arc<dyn LookupCache>) -> Self {
        Self {
            catalog,
            cache,
            stats: LookupStats::default(),
        }
    }

    pub fn stats(&self) -> LookupStatsSnapshot {
        self.stats.snapshot()
    }

    /// Parse `raw` and return every patch newer than it, ascending
    pub fn lookup(&self, raw: &str) -> Result<PatchList, LookupError> {
        let version = VersionIdentifier::parse(raw)?;
        self.lookup_version(&version)
    }

    pub fn lookup_version(&self, version: &VersionIdentifier) -> Result<PatchList, LookupError> {
        match self.cache.get(version) {
            Ok(Some(entries)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit for {}", version);
                return Ok(entries);
            }
            Ok(None) => {}
            Err(e) => warn!("Cache read failed for {}, treating as miss: {}", version, e),
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        debug!("Cache miss for {}", version);

        // Read before the query so a publish committed meanwhile is detected
        let generation = self.cache.generation();
        let records = self.catalog.query_newer(version)?;
        let entries: Vec<PatchEntry> = records.iter().map(PatchEntry::from).collect();
        let entries = PatchList::from_entries(&entries).map_err(StorageError::from)?;

        match self.cache.put(version, entries.clone(), generation) {
            Ok(true) => {}
            Ok(false) => {
                self.stats.stale_puts.fetch_add(1, Ordering::Relaxed);
                debug!("Catalog changed during lookup for {}, not caching", version);
            }
            Err(e) => warn!("Failed to cache result for {}: {}", version, e),
        }

        Ok(entries)
    }
}
