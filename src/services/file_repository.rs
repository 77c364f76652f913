//! Versioned file repository
//!
//! Merges the committed listing of a version's checkout with the file-level
//! diff of its pending change, and routes writes through that change. Every
//! call is stateless given the current git and review state.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::cache_service::VersionCache;
use super::registry::{VersionContext, VersionRegistry};
use crate::error::{RegvaultError, Result};
use crate::models::{ChangeInfo, FileEntry, FileStatus};
use crate::utils::paths;

/// Result of a delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeleteOutcome {
    Deleted,
    /// Nothing to delete; the version is left untouched
    AlreadyAbsent,
}

pub struct VersionedFileRepository {
    registry: Arc<VersionRegistry>,
    cache: Arc<dyn VersionCache>,
}

impl VersionedFileRepository {
    pub fn new(registry: Arc<VersionRegistry>, cache: Arc<dyn VersionCache>) -> Self {
        Self { registry, cache }
    }

    pub fn registry(&self) -> &Arc<VersionRegistry> {
        &self.registry
    }

    /// Files directly under `path`, sorted by name.
    ///
    /// Without a pending change every entry is `Current`. With one, each
    /// diff entry in `path` overrides the committed entry of the same name
    /// or is added on its own.
    pub async fn list_files(&self, version: &str, path: &str) -> Result<Vec<FileEntry>> {
        let context = self.registry.context(version)?;
        let change = context.review().change().await?;
        self.merged_listing(&context, change.as_ref(), path).await
    }

    /// Whether `path` is listed, and not as deleted, in its directory
    pub async fn file_exists(&self, version: &str, path: &str) -> Result<bool> {
        let (dir, name) = paths::split_file_path(path);
        let listing = self.list_files(version, &dir).await?;
        Ok(listing
            .iter()
            .any(|entry| entry.name == name && !entry.is_deleted()))
    }

    /// Content of `path` in the version's checkout
    pub async fn read_file(&self, version: &str, path: &str) -> Result<String> {
        let context = self.registry.context(version)?;
        context.working_copy().read_file(path)
    }

    /// Write `path` into the version's pending change.
    ///
    /// The head branch has no change and is read-only here.
    pub async fn write_file(&self, version: &str, path: &str, content: &str) -> Result<()> {
        let path = paths::validate_file_path(path)?;
        let context = self.registry.context(version)?;
        let _guard = context.lock_for_write().await;

        let change = context.review().require_pending_change().await?;
        context.working_copy().write_file(&path, content, &change)?;
        self.cache.evict_etag(version, &path);

        tracing::info!("Updated {} in version {}", path, version);
        Ok(())
    }

    /// Delete `path` from the version's pending change. Deleting a file
    /// that is not listed is a no-op.
    pub async fn delete_file(&self, version: &str, path: &str) -> Result<DeleteOutcome> {
        let path = paths::validate_file_path(path)?;
        let context = self.registry.context(version)?;
        let _guard = context.lock_for_write().await;

        let change = context.review().pending_change().await?;
        let (dir, name) = paths::split_file_path(&path);
        let listing = self.merged_listing(&context, change.as_ref(), &dir).await?;
        if !listing.iter().any(|e| e.name == name && !e.is_deleted()) {
            tracing::debug!("{} is absent from version {}, nothing to delete", path, version);
            return Ok(DeleteOutcome::AlreadyAbsent);
        }

        let change = change.ok_or_else(|| RegvaultError::HeadVersionReadOnly(version.to_string()))?;
        context.working_copy().delete_file(&path, &change)?;
        self.cache.evict_etag(version, &path);

        tracing::info!("Deleted {} from version {}", path, version);
        Ok(DeleteOutcome::Deleted)
    }

    /// Bring the version's checkout up to date.
    ///
    /// Clones when absent, then checks out the latest patch set of the
    /// pending change, or the tip of the head branch for the head version.
    /// A merged or abandoned version is never cloned again. Cached ETags of
    /// the version are dropped whenever the checked-out commit moves.
    pub async fn pull(&self, version: &str) -> Result<()> {
        let context = self.registry.context(version)?;
        let _guard = context.lock_for_write().await;

        let change = context.review().pending_change().await?;
        let working_copy = context.working_copy();
        working_copy.ensure_cloned()?;
        let before = working_copy.head_commit()?;

        let target = match &change {
            Some(change) => change.current_ref.clone().ok_or_else(|| {
                RegvaultError::ReviewCommunication(format!(
                    "change {} has no current patch set",
                    change.number
                ))
            })?,
            None => format!("refs/heads/{}", self.registry.head_branch()),
        };

        working_copy.fetch_and_checkout(&target)?;
        let after = working_copy.head_commit()?;
        if before != after {
            self.cache.evict_etags(version);
        }

        tracing::debug!("Pulled version {} at {}", version, target);
        Ok(())
    }

    async fn merged_listing(
        &self,
        context: &VersionContext,
        change: Option<&ChangeInfo>,
        path: &str,
    ) -> Result<Vec<FileEntry>> {
        let dir = paths::normalize_dir(path);
        let working_copy = context.working_copy();

        let names = working_copy.list_files(&dir)?;
        let mut dates = if names.is_empty() {
            Default::default()
        } else {
            working_copy.directory_dates(&dir)?
        };

        let mut entries = BTreeMap::new();
        for name in names {
            let dates = dates.remove(&name);
            entries.insert(
                name.clone(),
                FileEntry {
                    name,
                    path: dir.clone(),
                    status: FileStatus::Current,
                    created: dates.map(|d| d.created),
                    updated: dates.map(|d| d.updated),
                },
            );
        }

        let change = match change {
            Some(change) => change,
            None => return Ok(entries.into_values().collect()),
        };

        let diff = context.review().changed_files(change).await?;
        for (file_path, kind) in diff {
            if file_path.starts_with('/') {
                continue;
            }
            let (parent, name) = paths::split_file_path(&file_path);
            if parent != dir {
                continue;
            }

            let status = kind.file_status();
            entries
                .entry(name.clone())
                .and_modify(|entry| {
                    entry.status = status;
                    entry.updated = change.updated;
                })
                .or_insert_with(|| FileEntry {
                    name,
                    path: dir.clone(),
                    status,
                    created: None,
                    updated: change.updated,
                });
        }

        Ok(entries.into_values().collect())
    }
}
