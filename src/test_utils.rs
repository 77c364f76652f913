//! Test utilities for creating temporary upstream repositories

#![cfg(test)]

use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::config::StorageConfig;

const HEAD_REF: &str = "refs/heads/master";

/// A temporary bare repository acting as the clone and push remote.
///
/// Bare, because local pushes only work against bare repositories.
/// Commits are authored through an in-memory index.
pub struct TestRepo {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl TestRepo {
    /// Create a new empty repository whose head branch is `master`
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("upstream.git");

        let mut opts = git2::RepositoryInitOptions::new();
        opts.bare(true).initial_head("master");
        git2::Repository::init_opts(&path, &opts).expect("Failed to init repo");

        Self { dir, path }
    }

    /// Create a repository with an initial commit
    pub fn with_initial_commit() -> Self {
        let test_repo = Self::new();
        test_repo.create_commit("Initial commit", &[("README.md", "# Registry")]);
        test_repo
    }

    /// Clone URL of this repository
    pub fn url(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    pub fn repo(&self) -> git2::Repository {
        git2::Repository::open(&self.path).expect("Failed to open repo")
    }

    /// Storage config cloning from this repository into `root`
    pub fn storage_config(&self, root: &Path) -> StorageConfig {
        StorageConfig {
            repositories_root: root.to_path_buf(),
            remote_url: self.url(),
            ..StorageConfig::default()
        }
    }

    /// Commit files onto `master`
    pub fn create_commit(&self, message: &str, files: &[(&str, &str)]) -> git2::Oid {
        let files: Vec<(&str, Option<&str>)> = files.iter().map(|(n, c)| (*n, Some(*c))).collect();
        self.commit_on(Some(HEAD_REF), message, &files)
    }

    /// Publish a patch set the way the review service does: a commit on
    /// top of `master` reachable only through `refname`.
    ///
    /// `None` content deletes the file in the patch set.
    pub fn create_patch_set(
        &self,
        refname: &str,
        subject: &str,
        change_id: &str,
        files: &[(&str, Option<&str>)],
    ) -> git2::Oid {
        let message = format!("{}\n\nChange-Id: {}\n", subject, change_id);
        let oid = self.commit_on(None, &message, files);
        self.repo()
            .reference(refname, oid, true, "patch set")
            .expect("Failed to create change ref");
        oid
    }

    /// Content of `path` in the tree of `refname`, if present
    pub fn file_at_ref(&self, refname: &str, path: &str) -> Option<String> {
        let repo = self.repo();
        let commit = repo.find_reference(refname).ok()?.peel_to_commit().ok()?;
        let entry = commit.tree().ok()?.get_path(Path::new(path)).ok()?;
        let blob = repo.find_blob(entry.id()).ok()?;
        Some(String::from_utf8_lossy(blob.content()).to_string())
    }

    /// Commit message at `refname`
    pub fn message_at_ref(&self, refname: &str) -> Option<String> {
        let repo = self.repo();
        let commit = repo.find_reference(refname).ok()?.peel_to_commit().ok()?;
        commit.message().map(str::to_string)
    }

    fn commit_on(
        &self,
        update_ref: Option<&str>,
        message: &str,
        files: &[(&str, Option<&str>)],
    ) -> git2::Oid {
        let repo = self.repo();
        let parent = repo
            .find_reference(HEAD_REF)
            .ok()
            .and_then(|r| r.peel_to_commit().ok());

        let mut index = git2::Index::new().expect("Failed to create index");
        if let Some(parent) = &parent {
            index
                .read_tree(&parent.tree().expect("Failed to get tree"))
                .expect("Failed to read tree");
        }

        for (name, content) in files {
            match content {
                Some(content) => {
                    let blob = repo.blob(content.as_bytes()).expect("Failed to write blob");
                    index
                        .add(&index_entry(name, blob, content.len()))
                        .expect("Failed to stage file");
                }
                None => {
                    index
                        .remove(Path::new(name), 0)
                        .expect("Failed to unstage file");
                }
            }
        }

        let tree_oid = index.write_tree_to(&repo).expect("Failed to write tree");
        let tree = repo.find_tree(tree_oid).expect("Failed to find tree");
        let sig = git2::Signature::now("Test User", "test@example.com")
            .expect("Failed to create signature");
        let parents: Vec<&git2::Commit> = parent.as_ref().into_iter().collect();

        repo.commit(update_ref, &sig, &sig, message, &tree, &parents)
            .expect("Failed to create commit")
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

fn index_entry(path: &str, id: git2::Oid, size: usize) -> git2::IndexEntry {
    git2::IndexEntry {
        ctime: git2::IndexTime::new(0, 0),
        mtime: git2::IndexTime::new(0, 0),
        dev: 0,
        ino: 0,
        mode: 0o100644,
        uid: 0,
        gid: 0,
        file_size: size as u32,
        id,
        flags: 0,
        flags_extended: 0,
        path: path.as_bytes().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_repo_on_master() {
        let repo = TestRepo::with_initial_commit();
        assert_eq!(
            repo.file_at_ref(HEAD_REF, "README.md").as_deref(),
            Some("# Registry")
        );
    }

    #[test]
    fn test_patch_set_does_not_move_master() {
        let repo = TestRepo::with_initial_commit();
        let master = repo.repo().refname_to_id(HEAD_REF).unwrap();

        repo.create_patch_set(
            "refs/changes/01/1/1",
            "Add form",
            "I1",
            &[("forms/a.json", Some("{}")), ("README.md", None)],
        );

        assert_eq!(repo.repo().refname_to_id(HEAD_REF).unwrap(), master);
        assert_eq!(
            repo.file_at_ref("refs/changes/01/1/1", "forms/a.json").as_deref(),
            Some("{}")
        );
        assert!(repo.file_at_ref("refs/changes/01/1/1", "README.md").is_none());
        assert!(repo.file_at_ref(HEAD_REF, "forms/a.json").is_none());
    }
}
