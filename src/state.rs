//! Shared application state

use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::Result;
use crate::services::artifact_service::ArtifactService;
use crate::services::cache_service::{InMemoryCache, VersionCache};
use crate::services::file_repository::VersionedFileRepository;
use crate::services::registry::VersionRegistry;
use crate::services::review::{ChangeReviewClient, GerritClient};
use crate::services::version_service::VersionService;
use crate::services::working_copy::WorkingCopyStore;

/// Services shared by every request handler
pub struct AppState {
    pub config: AppConfig,
    pub cache: Arc<InMemoryCache>,
    pub registry: Arc<VersionRegistry>,
    pub files: Arc<VersionedFileRepository>,
    pub versions: VersionService,
    pub artifacts: ArtifactService,
}

impl AppState {
    pub fn new(config: AppConfig, review_client: Arc<dyn ChangeReviewClient>) -> Self {
        let cache = Arc::new(InMemoryCache::new());
        let shared_cache: Arc<dyn VersionCache> = cache.clone();

        let store = WorkingCopyStore::new(config.storage.clone());
        let registry = Arc::new(VersionRegistry::new(store, review_client));
        let files = Arc::new(VersionedFileRepository::new(
            Arc::clone(&registry),
            Arc::clone(&shared_cache),
        ));
        let versions = VersionService::new(
            Arc::clone(&files),
            Arc::clone(&shared_cache),
            config.artifacts.clone(),
        );
        let artifacts = ArtifactService::new(
            Arc::clone(&files),
            shared_cache,
            config.artifacts.clone(),
        );

        Self {
            config,
            cache,
            registry,
            files,
            versions,
            artifacts,
        }
    }

    /// Wire the state against the configured Gerrit instance
    pub fn from_config(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let client = GerritClient::new(&config.review, &config.storage.head_branch)?;
        tracing::info!(
            "Using Gerrit at {} for project '{}'",
            config.review.base_url,
            config.review.project
        );
        Ok(Self::new(config, Arc::new(client)))
    }
}
