//! Application configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RegvaultError, Result};

pub const DEFAULT_HEAD_BRANCH: &str = "master";

/// Git storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    /// Directory holding one working copy per version
    pub repositories_root: PathBuf,

    /// Clone URL of the upstream repository
    pub remote_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    pub head_branch: String,

    pub author_name: String,
    pub author_email: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let repositories_root = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("regvault")
            .join("repositories");

        Self {
            repositories_root,
            remote_url: String::new(),
            username: None,
            password: None,
            head_branch: DEFAULT_HEAD_BRANCH.to_string(),
            author_name: "regvault".to_string(),
            author_email: "regvault@localhost".to_string(),
        }
    }
}

/// Gerrit REST settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReviewConfig {
    pub base_url: String,
    pub project: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    pub timeout_secs: u64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            project: String::new(),
            username: None,
            password: None,
            timeout_secs: 30,
        }
    }
}

/// Where each artifact kind lives inside the repository
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArtifactsConfig {
    pub forms_dir: String,
    pub form_extension: String,
    pub processes_dir: String,
    pub process_extension: String,
    pub tables_file: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            forms_dir: "forms".to_string(),
            form_extension: "json".to_string(),
            processes_dir: "bpmn".to_string(),
            process_extension: "bpmn".to_string(),
            tables_file: "data-model/createTables.xml".to_string(),
        }
    }
}

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub review: ReviewConfig,

    #[serde(default)]
    pub artifacts: ArtifactsConfig,
}

impl AppConfig {
    /// Load configuration from a JSON file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.head_branch.trim().is_empty() {
            return Err(RegvaultError::Config("headBranch must not be empty".to_string()));
        }

        url::Url::parse(&self.review.base_url).map_err(|e| {
            RegvaultError::Config(format!(
                "invalid review baseUrl '{}': {}",
                self.review.base_url, e
            ))
        })?;

        Ok(())
    }
}
