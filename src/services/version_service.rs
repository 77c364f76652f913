//! Version lifecycle: candidates, rebase, submit, decline and votes

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use super::cache_service::VersionCache;
use super::file_repository::VersionedFileRepository;
use super::registry::VersionRegistry;
use crate::config::ArtifactsConfig;
use crate::error::Result;
use crate::models::{ChangeInfo, FileEntry, FileStatus, TransitionOutcome, VersionDetails};

/// Files a candidate touches, per artifact kind
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionChanges {
    pub forms: Vec<FileEntry>,
    pub processes: Vec<FileEntry>,
}

pub struct VersionService {
    registry: Arc<VersionRegistry>,
    files: Arc<VersionedFileRepository>,
    cache: Arc<dyn VersionCache>,
    artifacts: ArtifactsConfig,
}

impl VersionService {
    pub fn new(
        files: Arc<VersionedFileRepository>,
        cache: Arc<dyn VersionCache>,
        artifacts: ArtifactsConfig,
    ) -> Self {
        Self {
            registry: Arc::clone(files.registry()),
            files,
            cache,
            artifacts,
        }
    }

    pub fn head_branch(&self) -> &str {
        self.registry.head_branch()
    }

    /// Open candidate versions
    pub async fn list_versions(&self) -> Result<Vec<ChangeInfo>> {
        self.registry.client().open_changes().await
    }

    /// Last change merged into the head branch, if any
    pub async fn head_info(&self) -> Result<Option<ChangeInfo>> {
        self.registry.client().last_merged().await
    }

    /// Open a new candidate and return its version identifier
    pub async fn create_version(&self, subject: &str, description: Option<&str>) -> Result<String> {
        let change = self
            .registry
            .client()
            .create_change(subject, description)
            .await?;
        tracing::info!("Created version {} '{}'", change.number, subject);
        Ok(change.version_id())
    }

    pub async fn version_details(&self, version: &str) -> Result<VersionDetails> {
        let info = self.registry.review(version)?.require_change().await?;
        Ok(VersionDetails {
            info,
            conflicts: self.cache.get_conflicts(version),
            latest_rebase: self.cache.get_latest_rebase(version),
        })
    }

    /// Forms and processes the version adds, changes or deletes
    pub async fn version_changes(&self, version: &str) -> Result<VersionChanges> {
        let forms = self
            .touched(version, &self.artifacts.forms_dir, &self.artifacts.form_extension)
            .await?;
        let processes = self
            .touched(
                version,
                &self.artifacts.processes_dir,
                &self.artifacts.process_extension,
            )
            .await?;
        Ok(VersionChanges { forms, processes })
    }

    /// Rebase the version onto the head branch.
    ///
    /// On success the checkout is refreshed and the version is recorded as
    /// conflict-free. On refusal the conflicting paths are computed locally
    /// and cached.
    pub async fn rebase(&self, version: &str) -> Result<TransitionOutcome> {
        let context = self.registry.context(version)?;
        let outcome = context.review().rebase().await?;

        match &outcome {
            TransitionOutcome::Applied => {
                self.cache.put_latest_rebase(version, Utc::now());
                self.files.pull(version).await?;
                self.cache.put_conflicts(version, Some(Vec::new()));
                tracing::info!("Rebased version {}", version);
            }
            TransitionOutcome::Rejected(reason) => {
                let conflicts = {
                    let _guard = context.lock_for_write().await;
                    context.working_copy().conflicts_with_head()?
                };
                tracing::info!(
                    "Rebase of version {} refused ({}), {} conflicting file(s)",
                    version,
                    reason,
                    conflicts.len()
                );
                self.cache.put_conflicts(version, Some(conflicts));
            }
        }

        Ok(outcome)
    }

    pub async fn submit(&self, version: &str) -> Result<TransitionOutcome> {
        let outcome = self.registry.review(version)?.submit().await?;
        if outcome.is_applied() {
            tracing::info!("Submitted version {}", version);
            self.tear_down(version).await?;
            // head content moves with the merge
            self.cache.evict_etags(self.head_branch());
        }
        Ok(outcome)
    }

    pub async fn decline(&self, version: &str) -> Result<TransitionOutcome> {
        let outcome = self.registry.review(version)?.decline().await?;
        if outcome.is_applied() {
            tracing::info!("Declined version {}", version);
            self.tear_down(version).await?;
        }
        Ok(outcome)
    }

    pub async fn vote(&self, version: &str, label: &str, value: i16) -> Result<()> {
        self.registry.review(version)?.vote(label, value).await
    }

    async fn touched(&self, version: &str, dir: &str, extension: &str) -> Result<Vec<FileEntry>> {
        let suffix = format!(".{}", extension);
        let entries = self.files.list_files(version, dir).await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.status != FileStatus::Current && e.name.ends_with(&suffix))
            .collect())
    }

    /// Forget everything held locally for a closed version
    async fn tear_down(&self, version: &str) -> Result<()> {
        if let Some(context) = self.registry.evict(version) {
            let _guard = context.lock_for_write().await;
            context.working_copy().discard()?;
        } else {
            self.registry.working_copy(version)?.discard()?;
            self.registry.evict(version);
        }
        self.cache.clear_version(version);
        Ok(())
    }
}
