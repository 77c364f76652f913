//! Service layer for Regvault
//!
//! Working copies and the review client sit at the bottom; the registry
//! binds them per version, the file repository merges their views, and the
//! version and artifact services build on top.

pub mod artifact_service;
pub mod cache_service;
pub mod file_repository;
pub mod registry;
pub mod review;
pub mod version_service;
pub mod warmup;
pub mod working_copy;

pub use artifact_service::{ArtifactContent, ArtifactEntry, ArtifactKind, ArtifactService};
pub use cache_service::{InMemoryCache, VersionCache};
pub use file_repository::{DeleteOutcome, VersionedFileRepository};
pub use registry::{VersionContext, VersionRegistry};
pub use review::{ChangeReviewClient, GerritClient, InMemoryReviewClient, VersionReview};
pub use version_service::{VersionChanges, VersionService};
pub use working_copy::{WorkingCopy, WorkingCopyStore};
