//! Conflict, rebase and ETag caches
//!
//! The orchestrator and services only touch cached state through
//! [`VersionCache`], so a distributed backend can replace
//! [`InMemoryCache`] without changing call sites.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};

/// Cache operations used by the services
pub trait VersionCache: Send + Sync {
    /// `None` means conflicts were never computed for `version`
    fn get_conflicts(&self, version: &str) -> Option<Vec<String>>;

    /// Replace the cached conflict list. `None` clears without inserting.
    fn put_conflicts(&self, version: &str, conflicts: Option<Vec<String>>);

    /// `None` means `version` was never rebased
    fn get_latest_rebase(&self, version: &str) -> Option<DateTime<Utc>>;

    fn put_latest_rebase(&self, version: &str, at: DateTime<Utc>);

    /// Fingerprint of `content`, computed only when nothing is cached for
    /// `(version, file)`. Callers evict on mutation.
    fn get_or_compute_etag(&self, version: &str, file: &str, content: &str) -> String;

    fn evict_etag(&self, version: &str, file: &str);

    /// Drop every ETag of `version`, e.g. after its checkout moved
    fn evict_etags(&self, version: &str);

    /// Drop every entry belonging to `version`
    fn clear_version(&self, version: &str);
}

/// Process-wide cache backed by concurrent maps
#[derive(Default)]
pub struct InMemoryCache {
    conflicts: DashMap<String, Vec<String>>,
    latest_rebase: DashMap<String, DateTime<Utc>>,
    etags: DashMap<(String, String), String>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn etag_count(&self) -> usize {
        self.etags.len()
    }
}

impl VersionCache for InMemoryCache {
    fn get_conflicts(&self, version: &str) -> Option<Vec<String>> {
        self.conflicts.get(version).map(|c| c.value().clone())
    }

    fn put_conflicts(&self, version: &str, conflicts: Option<Vec<String>>) {
        self.conflicts.remove(version);
        if let Some(conflicts) = conflicts {
            tracing::debug!(
                "Caching {} conflict(s) for version {}",
                conflicts.len(),
                version
            );
            self.conflicts.insert(version.to_string(), conflicts);
        }
    }

    fn get_latest_rebase(&self, version: &str) -> Option<DateTime<Utc>> {
        self.latest_rebase.get(version).map(|t| *t.value())
    }

    fn put_latest_rebase(&self, version: &str, at: DateTime<Utc>) {
        self.latest_rebase.remove(version);
        self.latest_rebase.insert(version.to_string(), at);
    }

    fn get_or_compute_etag(&self, version: &str, file: &str, content: &str) -> String {
        self.etags
            .entry((version.to_string(), file.to_string()))
            .or_insert_with(|| {
                tracing::trace!("Computing ETag for {} in version {}", file, version);
                fingerprint(content)
            })
            .value()
            .clone()
    }

    fn evict_etag(&self, version: &str, file: &str) {
        if self
            .etags
            .remove(&(version.to_string(), file.to_string()))
            .is_some()
        {
            tracing::trace!("Evicted ETag for {} in version {}", file, version);
        }
    }

    fn evict_etags(&self, version: &str) {
        let before = self.etags.len();
        self.etags.retain(|(v, _), _| v != version);
        tracing::trace!(
            "Evicted {} ETag(s) of version {}",
            before.saturating_sub(self.etags.len()),
            version
        );
    }

    fn clear_version(&self, version: &str) {
        self.conflicts.remove(version);
        self.latest_rebase.remove(version);
        self.etags.retain(|(v, _), _| v != version);
        tracing::debug!("Cleared cached state for version {}", version);
    }
}

/// Quoted SHA-256 hex digest, ready for an `ETag` header
pub fn fingerprint(content: &str) -> String {
    format!("\"{:x}\"", Sha256::digest(content.as_bytes()))
}
