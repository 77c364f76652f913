//! Forms, business processes and the data-model tables file
//!
//! Artifacts are plain files in kind-specific directories. Listings and
//! reads hand out the cached content ETag so the HTTP layer can check
//! `If-Match` before calling `put` or `delete`.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use super::cache_service::VersionCache;
use super::file_repository::{DeleteOutcome, VersionedFileRepository};
use crate::config::ArtifactsConfig;
use crate::error::{RegvaultError, Result};
use crate::models::FileEntry;
use crate::utils::paths;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactKind {
    Form,
    Process,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Form => write!(f, "form"),
            ArtifactKind::Process => write!(f, "process"),
        }
    }
}

/// Listing row of an artifact
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactEntry {
    #[serde(flatten)]
    pub file: FileEntry,
    /// Absent for deleted artifacts
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactContent {
    pub name: String,
    pub content: String,
    pub etag: String,
}

pub struct ArtifactService {
    files: Arc<VersionedFileRepository>,
    cache: Arc<dyn VersionCache>,
    config: ArtifactsConfig,
}

impl ArtifactService {
    pub fn new(
        files: Arc<VersionedFileRepository>,
        cache: Arc<dyn VersionCache>,
        config: ArtifactsConfig,
    ) -> Self {
        Self {
            files,
            cache,
            config,
        }
    }

    fn location(&self, kind: ArtifactKind) -> (&str, &str) {
        match kind {
            ArtifactKind::Form => (
                self.config.forms_dir.as_str(),
                self.config.form_extension.as_str(),
            ),
            ArtifactKind::Process => (
                self.config.processes_dir.as_str(),
                self.config.process_extension.as_str(),
            ),
        }
    }

    /// Repository path of artifact `name`; the extension is optional
    fn artifact_path(&self, kind: ArtifactKind, name: &str) -> Result<String> {
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return Err(RegvaultError::InvalidPath(name.to_string()));
        }

        let (dir, extension) = self.location(kind);
        let suffix = format!(".{}", extension);
        let file_name = if name.ends_with(&suffix) {
            name.to_string()
        } else {
            format!("{}{}", name, suffix)
        };
        paths::validate_file_path(&paths::join(&paths::normalize_dir(dir), &file_name))
    }

    /// Artifacts of `kind` in `version`, each live one with its ETag
    pub async fn list(&self, version: &str, kind: ArtifactKind) -> Result<Vec<ArtifactEntry>> {
        let (dir, extension) = self.location(kind);
        let suffix = format!(".{}", extension);
        let entries = self.files.list_files(version, dir).await?;

        let mut artifacts = Vec::with_capacity(entries.len());
        for file in entries.into_iter().filter(|e| e.name.ends_with(&suffix)) {
            let etag = if file.is_deleted() {
                None
            } else {
                self.etag_for(version, &file.full_path()).await?
            };
            artifacts.push(ArtifactEntry { file, etag });
        }

        tracing::debug!(
            "Listed {} {} artifact(s) in version {}",
            artifacts.len(),
            kind,
            version
        );
        Ok(artifacts)
    }

    pub async fn get(&self, version: &str, kind: ArtifactKind, name: &str) -> Result<ArtifactContent> {
        let path = self.artifact_path(kind, name)?;
        if !self.files.file_exists(version, &path).await? {
            return Err(RegvaultError::file_not_found(path, version));
        }

        let content = self.files.read_file(version, &path).await?;
        let etag = self.cache.get_or_compute_etag(version, &path, &content);
        let (_, file_name) = paths::split_file_path(&path);

        Ok(ArtifactContent {
            name: file_name,
            content,
            etag,
        })
    }

    /// Create or replace an artifact; returns the new ETag
    pub async fn put(
        &self,
        version: &str,
        kind: ArtifactKind,
        name: &str,
        content: &str,
    ) -> Result<String> {
        let path = self.artifact_path(kind, name)?;
        self.files.write_file(version, &path, content).await?;
        self.cache.evict_etag(version, &path);
        Ok(self.cache.get_or_compute_etag(version, &path, content))
    }

    pub async fn delete(&self, version: &str, kind: ArtifactKind, name: &str) -> Result<DeleteOutcome> {
        let path = self.artifact_path(kind, name)?;
        let outcome = self.files.delete_file(version, &path).await?;
        self.cache.evict_etag(version, &path);
        Ok(outcome)
    }

    /// Content of the data-model tables file
    pub async fn tables_content(&self, version: &str) -> Result<String> {
        let path = paths::validate_file_path(&self.config.tables_file)?;
        tracing::debug!("Reading {} for version {}", path, version);

        if !self.files.file_exists(version, &path).await? {
            return Err(RegvaultError::file_not_found(path, version));
        }
        self.files.read_file(version, &path).await
    }

    pub async fn put_tables_content(&self, version: &str, content: &str) -> Result<()> {
        let path = paths::validate_file_path(&self.config.tables_file)?;
        self.files.write_file(version, &path, content).await?;
        tracing::debug!(
            "Updated {} in version {}, {} bytes",
            path,
            version,
            content.len()
        );
        Ok(())
    }

    /// A listed file the checkout does not hold yet has no ETag
    async fn etag_for(&self, version: &str, path: &str) -> Result<Option<String>> {
        match self.files.read_file(version, path).await {
            Ok(content) => Ok(Some(self.cache.get_or_compute_etag(version, path, &content))),
            Err(RegvaultError::FileNotFoundInVersion { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
