//! Start-up cache warming
//!
//! Every open version and the head branch get their own task that makes
//! sure the checkout exists and is current, then lists forms and processes
//! so their ETags are cached before the first request arrives.

use futures_util::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::artifact_service::ArtifactKind;
use crate::error::Result;
use crate::state::AppState;

/// Spawn the warm-up pass and return immediately.
///
/// Failures are logged per version and never affect the other versions.
/// Awaiting the handle is optional; it resolves to the number of versions
/// that warmed up successfully.
pub fn start(app: Arc<AppState>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut versions = vec![app.versions.head_branch().to_string()];
        match app.versions.list_versions().await {
            Ok(open) => versions.extend(open.iter().map(|c| c.version_id())),
            Err(e) => tracing::warn!("Warm-up could not list open versions: {}", e),
        }

        tracing::info!("Warming up {} version(s)", versions.len());

        let tasks = versions.into_iter().map(|version| {
            let app = Arc::clone(&app);
            tokio::spawn(async move {
                match warm_version(&app, &version).await {
                    Ok(()) => {
                        tracing::debug!("Version {} warmed up", version);
                        true
                    }
                    Err(e) => {
                        tracing::warn!("Warm-up failed for version {}: {}", version, e);
                        false
                    }
                }
            })
        });

        let warmed = join_all(tasks)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();
        tracing::info!("Warm-up complete, {} version(s) ready", warmed);
        warmed
    })
}

async fn warm_version(app: &AppState, version: &str) -> Result<()> {
    app.files.pull(version).await?;
    app.artifacts.list(version, ArtifactKind::Form).await?;
    app.artifacts.list(version, ArtifactKind::Process).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::ChangeKind;
    use crate::services::review::InMemoryReviewClient;
    use crate::test_utils::TestRepo;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_warm_up_clones_and_primes_etags() {
        let upstream = TestRepo::new();
        upstream.create_commit(
            "Initial registry",
            &[
                ("forms/citizen.json", "{}"),
                ("bpmn/onboarding.bpmn", "<definitions/>"),
            ],
        );

        let client = Arc::new(InMemoryReviewClient::new("master", "registry"));
        let change = client.insert_change(
            42,
            "Candidate",
            BTreeMap::from([("forms/extra.json".to_string(), ChangeKind::Added)]),
        );
        upstream.create_patch_set(
            "refs/changes/42/42/1",
            "Candidate",
            &change.change_id,
            &[("forms/extra.json", Some("{\"extra\":true}"))],
        );
        // no patch set was ever published for this one
        client.insert_change(43, "Broken", BTreeMap::new());

        let root = TempDir::new().unwrap();
        let config = AppConfig {
            storage: upstream.storage_config(root.path()),
            ..AppConfig::default()
        };
        let app = Arc::new(AppState::new(config, client));

        let warmed = start(Arc::clone(&app)).await.unwrap();

        assert_eq!(warmed, 2);
        assert!(root.path().join("master").join(".git").exists());
        assert!(root.path().join("42").join(".git").exists());
        // master: citizen + onboarding, 42: citizen + extra + onboarding
        assert_eq!(app.cache.etag_count(), 5);
    }
}
