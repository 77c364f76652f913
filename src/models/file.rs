//! File listing models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a file as seen from one version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    Current,
    New,
    Changed,
    Deleted,
}

/// One row of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub status: FileStatus,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

impl FileEntry {
    /// Repository-relative path of this entry
    pub fn full_path(&self) -> String {
        if self.path.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.path, self.name)
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.status == FileStatus::Deleted
    }
}

/// First and last commit timestamps touching a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDates {
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Per-file change kind reported by the review service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
    Copied,
    Rewritten,
}

impl ChangeKind {
    /// Parse the single-letter status code used in Gerrit file listings.
    /// An absent code means the file was modified.
    pub fn from_code(code: Option<&str>) -> Self {
        match code {
            Some("A") => ChangeKind::Added,
            Some("D") => ChangeKind::Deleted,
            Some("R") => ChangeKind::Renamed,
            Some("C") => ChangeKind::Copied,
            Some("W") => ChangeKind::Rewritten,
            _ => ChangeKind::Modified,
        }
    }

    /// Listing status for a file touched by a pending change.
    ///
    /// Renames map to `Changed` even when content is byte-identical: the
    /// listing reports whether the version touched the file.
    pub fn file_status(self) -> FileStatus {
        match self {
            ChangeKind::Added => FileStatus::New,
            ChangeKind::Deleted => FileStatus::Deleted,
            ChangeKind::Modified
            | ChangeKind::Renamed
            | ChangeKind::Copied
            | ChangeKind::Rewritten => FileStatus::Changed,
        }
    }
}
