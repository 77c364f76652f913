//! In-process review service
//!
//! Holds changes in memory with the same lifecycle rules as the real
//! service: transitions on closed changes are rejected, submitted changes
//! become the latest merge. Used for local runs without a review server and
//! by the test suites.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::ChangeReviewClient;
use crate::error::{RegvaultError, Result};
use crate::models::{ChangeInfo, ChangeKind, ChangeStatus, TransitionOutcome};

pub struct InMemoryReviewClient {
    head_branch: String,
    project: String,
    changes: DashMap<u64, ChangeInfo>,
    files: DashMap<u64, BTreeMap<String, ChangeKind>>,
    rejections: DashMap<u64, String>,
    reviews: DashMap<u64, Vec<(String, i16)>>,
    next_number: AtomicU64,
}

impl InMemoryReviewClient {
    pub fn new(head_branch: &str, project: &str) -> Self {
        Self {
            head_branch: head_branch.to_string(),
            project: project.to_string(),
            changes: DashMap::new(),
            files: DashMap::new(),
            rejections: DashMap::new(),
            reviews: DashMap::new(),
            next_number: AtomicU64::new(1),
        }
    }

    /// Register an open change whose first patch set is
    /// `refs/changes/<nn>/<number>/1`
    pub fn insert_change(
        &self,
        number: u64,
        subject: &str,
        files: BTreeMap<String, ChangeKind>,
    ) -> ChangeInfo {
        let now = Utc::now();
        let info = ChangeInfo {
            number,
            change_id: format!("I{:040x}", number),
            id: format!("{}~{}", self.project, number),
            project: self.project.clone(),
            branch: self.head_branch.clone(),
            subject: subject.to_string(),
            topic: None,
            owner: None,
            mergeable: Some(true),
            status: ChangeStatus::Open,
            created: Some(now),
            updated: Some(now),
            submitted: None,
            labels: BTreeMap::new(),
            current_ref: Some(patch_set_ref(number, 1)),
        };

        self.changes.insert(number, info.clone());
        self.files.insert(number, files);
        self.next_number.fetch_max(number + 1, Ordering::SeqCst);
        info
    }

    pub fn set_changed_files(&self, number: u64, files: BTreeMap<String, ChangeKind>) {
        self.files.insert(number, files);
    }

    pub fn set_current_ref(&self, number: u64, current_ref: &str) {
        if let Some(mut change) = self.changes.get_mut(&number) {
            change.current_ref = Some(current_ref.to_string());
        }
    }

    /// Make every later transition on `number` come back rejected
    pub fn reject_transitions(&self, number: u64, reason: &str) {
        self.rejections.insert(number, reason.to_string());
    }

    /// Votes posted on `number`, oldest first
    pub fn reviews(&self, number: u64) -> Vec<(String, i16)> {
        self.reviews
            .get(&number)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    fn number_for(&self, change_key: &str) -> Result<u64> {
        self.changes
            .iter()
            .find(|entry| entry.id == change_key || entry.change_id == change_key)
            .map(|entry| *entry.key())
            .ok_or_else(|| RegvaultError::ChangeNotFound(change_key.to_string()))
    }

    fn transition(
        &self,
        change_key: &str,
        apply: impl FnOnce(&mut ChangeInfo),
    ) -> Result<TransitionOutcome> {
        let number = self.number_for(change_key)?;

        if let Some(reason) = self.rejections.get(&number) {
            return Ok(TransitionOutcome::Rejected(reason.value().clone()));
        }

        let mut change = self
            .changes
            .get_mut(&number)
            .ok_or_else(|| RegvaultError::ChangeNotFound(change_key.to_string()))?;

        match change.status {
            ChangeStatus::Open => {
                apply(change.value_mut());
                change.updated = Some(Utc::now());
                Ok(TransitionOutcome::Applied)
            }
            ChangeStatus::Merged => Ok(TransitionOutcome::Rejected("change is merged".to_string())),
            ChangeStatus::Abandoned => Ok(TransitionOutcome::Rejected(
                "change is abandoned".to_string(),
            )),
        }
    }
}

#[async_trait]
impl ChangeReviewClient for InMemoryReviewClient {
    fn head_branch(&self) -> &str {
        &self.head_branch
    }

    async fn change_by_number(&self, number: u64) -> Result<ChangeInfo> {
        self.changes
            .get(&number)
            .map(|c| c.value().clone())
            .ok_or_else(|| RegvaultError::ChangeNotFound(number.to_string()))
    }

    async fn change_metadata(&self, change_key: &str) -> Result<ChangeInfo> {
        let number = self.number_for(change_key)?;
        self.change_by_number(number).await
    }

    async fn changed_files(&self, change_key: &str) -> Result<BTreeMap<String, ChangeKind>> {
        let number = self.number_for(change_key)?;
        Ok(self
            .files
            .get(&number)
            .map(|f| f.value().clone())
            .unwrap_or_default())
    }

    async fn rebase(&self, change_key: &str) -> Result<TransitionOutcome> {
        self.transition(change_key, |_| {})
    }

    async fn submit(&self, change_key: &str) -> Result<TransitionOutcome> {
        self.transition(change_key, |change| {
            change.status = ChangeStatus::Merged;
            change.submitted = Some(Utc::now());
        })
    }

    async fn decline(&self, change_key: &str) -> Result<TransitionOutcome> {
        self.transition(change_key, |change| {
            change.status = ChangeStatus::Abandoned;
        })
    }

    async fn post_review(&self, change_key: &str, label: &str, value: i16) -> Result<()> {
        let number = self.number_for(change_key)?;
        self.reviews
            .entry(number)
            .or_default()
            .push((label.to_string(), value));

        if let Some(mut change) = self.changes.get_mut(&number) {
            change.labels.insert(label.to_string(), value > 0);
        }
        Ok(())
    }

    async fn open_changes(&self) -> Result<Vec<ChangeInfo>> {
        let mut open: Vec<ChangeInfo> = self
            .changes
            .iter()
            .filter(|c| c.status == ChangeStatus::Open)
            .map(|c| c.value().clone())
            .collect();
        open.sort_by_key(|c| c.number);
        Ok(open)
    }

    async fn create_change(
        &self,
        subject: &str,
        description: Option<&str>,
    ) -> Result<ChangeInfo> {
        let number = self.next_number.load(Ordering::SeqCst);
        let mut info = self.insert_change(number, subject, BTreeMap::new());
        if let Some(description) = description {
            info.topic = Some(description.to_string());
            if let Some(mut change) = self.changes.get_mut(&number) {
                change.topic = info.topic.clone();
            }
        }
        Ok(info)
    }

    async fn last_merged(&self) -> Result<Option<ChangeInfo>> {
        Ok(self
            .changes
            .iter()
            .filter(|c| c.status == ChangeStatus::Merged)
            .max_by_key(|c| c.submitted)
            .map(|c| c.value().clone()))
    }
}

/// Gerrit-style patch set ref: `refs/changes/<last two digits>/<number>/<patch set>`
pub fn patch_set_ref(number: u64, patch_set: u32) -> String {
    format!("refs/changes/{:02}/{}/{}", number % 100, number, patch_set)
}
