//! Change-review integration
//!
//! The review service is reached through the narrow [`ChangeReviewClient`]
//! trait. [`GerritClient`] talks to Gerrit's REST API;
//! [`InMemoryReviewClient`] keeps changes in process for local runs and
//! tests. [`VersionReview`] binds a client to one version identifier.

pub mod gerrit;
pub mod memory;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{RegvaultError, Result};
use crate::models::{ChangeInfo, ChangeKind, ChangeStatus, TransitionOutcome};

pub use gerrit::GerritClient;
pub use memory::InMemoryReviewClient;

/// Operations consumed from the review service.
///
/// `change_key` is the review service's identifier of a change
/// ([`ChangeInfo::id`]). A missing change is always reported as
/// [`RegvaultError::ChangeNotFound`]; every other failure as
/// [`RegvaultError::ReviewCommunication`].
#[async_trait]
pub trait ChangeReviewClient: Send + Sync {
    /// Branch that pending changes target; it never has a change itself
    fn head_branch(&self) -> &str;

    /// Look up an open or closed change by number
    async fn change_by_number(&self, number: u64) -> Result<ChangeInfo>;

    async fn change_metadata(&self, change_key: &str) -> Result<ChangeInfo>;

    /// Files touched by the current patch set relative to its parent
    async fn changed_files(&self, change_key: &str) -> Result<BTreeMap<String, ChangeKind>>;

    async fn rebase(&self, change_key: &str) -> Result<TransitionOutcome>;

    async fn submit(&self, change_key: &str) -> Result<TransitionOutcome>;

    async fn decline(&self, change_key: &str) -> Result<TransitionOutcome>;

    async fn post_review(&self, change_key: &str, label: &str, value: i16) -> Result<()>;

    /// Changes that are neither merged nor abandoned
    async fn open_changes(&self) -> Result<Vec<ChangeInfo>>;

    async fn create_change(&self, subject: &str, description: Option<&str>)
        -> Result<ChangeInfo>;

    /// Most recently merged change on the head branch
    async fn last_merged(&self) -> Result<Option<ChangeInfo>>;

    /// Resolve a version identifier to its pending change.
    ///
    /// The head branch resolves to `None`. Anything that is neither the
    /// head branch nor a known change number is `ChangeNotFound`.
    async fn find_change_for(&self, version: &str) -> Result<Option<ChangeInfo>> {
        if version == self.head_branch() {
            return Ok(None);
        }

        let number: u64 = version
            .parse()
            .map_err(|_| RegvaultError::ChangeNotFound(version.to_string()))?;
        self.change_by_number(number).await.map(Some)
    }
}

/// A review client bound to one version
#[derive(Clone)]
pub struct VersionReview {
    version: String,
    client: Arc<dyn ChangeReviewClient>,
}

impl VersionReview {
    pub fn new(version: &str, client: Arc<dyn ChangeReviewClient>) -> Self {
        Self {
            version: version.to_string(),
            client,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn is_head(&self) -> bool {
        self.version == self.client.head_branch()
    }

    /// The version's pending change, `None` for the head branch
    pub async fn change(&self) -> Result<Option<ChangeInfo>> {
        self.client.find_change_for(&self.version).await
    }

    /// The version's change in any state; the head branch is read-only.
    /// Transitions on a closed change are left to the review service.
    pub async fn require_change(&self) -> Result<ChangeInfo> {
        self.change()
            .await?
            .ok_or_else(|| RegvaultError::HeadVersionReadOnly(self.version.clone()))
    }

    /// Like [`change`](Self::change), but a merged or abandoned change is
    /// `VersionClosed`; only an open change accepts content updates
    pub async fn pending_change(&self) -> Result<Option<ChangeInfo>> {
        match self.change().await? {
            Some(change) if change.status != ChangeStatus::Open => {
                tracing::debug!(
                    "Version {} is closed ({:?}), refusing content access",
                    self.version,
                    change.status
                );
                Err(RegvaultError::VersionClosed(self.version.clone()))
            }
            change => Ok(change),
        }
    }

    /// The version's open change; the head branch is read-only
    pub async fn require_pending_change(&self) -> Result<ChangeInfo> {
        self.pending_change()
            .await?
            .ok_or_else(|| RegvaultError::HeadVersionReadOnly(self.version.clone()))
    }

    pub async fn changed_files(&self, change: &ChangeInfo) -> Result<BTreeMap<String, ChangeKind>> {
        self.client.changed_files(&change.id).await
    }

    pub async fn rebase(&self) -> Result<TransitionOutcome> {
        let change = self.require_change().await?;
        self.client.rebase(&change.id).await
    }

    pub async fn submit(&self) -> Result<TransitionOutcome> {
        let change = self.require_change().await?;
        self.client.submit(&change.id).await
    }

    pub async fn decline(&self) -> Result<TransitionOutcome> {
        let change = self.require_change().await?;
        self.client.decline(&change.id).await
    }

    pub async fn vote(&self, label: &str, value: i16) -> Result<()> {
        let change = self.require_change().await?;
        self.client.post_review(&change.id, label, value).await
    }
}
