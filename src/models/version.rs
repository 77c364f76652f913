//! Version and change models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle state of a pending change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeStatus {
    Open,
    Merged,
    Abandoned,
}

impl ChangeStatus {
    pub fn from_gerrit(status: &str) -> Self {
        match status {
            "MERGED" => ChangeStatus::Merged,
            "ABANDONED" => ChangeStatus::Abandoned,
            _ => ChangeStatus::Open,
        }
    }
}

/// Metadata of a pending change, as reported by the review service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeInfo {
    /// Change number; doubles as the version identifier of a candidate
    pub number: u64,
    pub change_id: String,
    pub id: String,
    pub project: String,
    pub branch: String,
    pub subject: String,
    pub topic: Option<String>,
    pub owner: Option<String>,
    pub mergeable: Option<bool>,
    pub status: ChangeStatus,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub submitted: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: BTreeMap<String, bool>,
    /// Fetchable ref of the current patch set
    pub current_ref: Option<String>,
}

impl ChangeInfo {
    pub fn version_id(&self) -> String {
        self.number.to_string()
    }

    /// Commit message used when amending this change's commit
    pub fn commit_message(&self) -> String {
        format!("{}\n\nChange-Id: {}\n", self.subject, self.change_id)
    }
}

/// Result of a review-state transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "outcome", content = "reason")]
pub enum TransitionOutcome {
    Applied,
    /// The service refused the transition (already merged, conflicting, ...)
    Rejected(String),
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied)
    }
}

/// Version metadata combined with cached rebase state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDetails {
    #[serde(flatten)]
    pub info: ChangeInfo,
    /// `None` until conflicts have been computed for this version
    pub conflicts: Option<Vec<String>>,
    pub latest_rebase: Option<DateTime<Utc>>,
}
