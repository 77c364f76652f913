//! Version context registry
//!
//! Maps a version identifier to the collaborators bound to it. Contexts are
//! built on first use and live until the version is evicted. Two callers
//! racing on first access may both build a context; only one is kept, which
//! is fine because building one touches neither disk nor network.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use super::review::{ChangeReviewClient, VersionReview};
use super::working_copy::{WorkingCopy, WorkingCopyStore};
use crate::error::Result;

/// Collaborators bound to one version
pub struct VersionContext {
    working_copy: WorkingCopy,
    review: VersionReview,
    write_lock: Mutex<()>,
}

impl VersionContext {
    fn new(working_copy: WorkingCopy, review: VersionReview) -> Self {
        Self {
            working_copy,
            review,
            write_lock: Mutex::new(()),
        }
    }

    pub fn version(&self) -> &str {
        self.working_copy.version()
    }

    pub fn working_copy(&self) -> &WorkingCopy {
        &self.working_copy
    }

    pub fn review(&self) -> &VersionReview {
        &self.review
    }

    /// Serializes mutating work (write, delete, checkout) on this version
    pub async fn lock_for_write(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }
}

pub struct VersionRegistry {
    store: WorkingCopyStore,
    client: Arc<dyn ChangeReviewClient>,
    contexts: DashMap<String, Arc<VersionContext>>,
}

impl VersionRegistry {
    pub fn new(store: WorkingCopyStore, client: Arc<dyn ChangeReviewClient>) -> Self {
        Self {
            store,
            client,
            contexts: DashMap::new(),
        }
    }

    pub fn head_branch(&self) -> &str {
        self.client.head_branch()
    }

    pub fn client(&self) -> &Arc<dyn ChangeReviewClient> {
        &self.client
    }

    /// Context for `version`, created on first request
    pub fn context(&self, version: &str) -> Result<Arc<VersionContext>> {
        if let Some(context) = self.contexts.get(version) {
            return Ok(Arc::clone(context.value()));
        }

        let context = Arc::new(VersionContext::new(
            self.store.working_copy(version)?,
            VersionReview::new(version, Arc::clone(&self.client)),
        ));

        let entry = self
            .contexts
            .entry(version.to_string())
            .or_insert_with(|| {
                tracing::debug!("Created context for version {}", version);
                context
            });
        Ok(Arc::clone(entry.value()))
    }

    pub fn working_copy(&self, version: &str) -> Result<WorkingCopy> {
        Ok(self.context(version)?.working_copy().clone())
    }

    pub fn review(&self, version: &str) -> Result<VersionReview> {
        Ok(self.context(version)?.review().clone())
    }

    /// Forget the context of `version`. Holders of the old context keep it
    /// until they drop it.
    pub fn evict(&self, version: &str) -> Option<Arc<VersionContext>> {
        let removed = self.contexts.remove(version).map(|(_, context)| context);
        if removed.is_some() {
            tracing::debug!("Evicted context for version {}", version);
        }
        removed
    }

    /// Keep only contexts whose version satisfies `keep`
    pub fn retain(&self, keep: impl Fn(&str) -> bool) {
        self.contexts.retain(|version, _| keep(version));
    }

    pub fn evict_all(&self) {
        self.contexts.clear();
    }

    pub fn contains(&self, version: &str) -> bool {
        self.contexts.contains_key(version)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
