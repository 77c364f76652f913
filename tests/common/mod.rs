//! Shared fixtures for the integration tests

#![allow(dead_code)]

use git2::{Index, IndexEntry, IndexTime, Oid, Repository, RepositoryInitOptions, Signature};
use regvault_lib::config::{AppConfig, StorageConfig};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const MASTER: &str = "refs/heads/master";

/// Bare upstream repository standing in for the Gerrit-hosted project
pub struct Upstream {
    _dir: TempDir,
    path: PathBuf,
}

impl Upstream {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("registry.git");

        let mut opts = RepositoryInitOptions::new();
        opts.bare(true).initial_head("master");
        Repository::init_opts(&path, &opts).expect("Failed to init upstream");

        Self { _dir: dir, path }
    }

    pub fn repo(&self) -> Repository {
        Repository::open(&self.path).expect("Failed to open upstream")
    }

    /// Config cloning from this upstream into `root`
    pub fn config(&self, root: &Path) -> AppConfig {
        AppConfig {
            storage: StorageConfig {
                repositories_root: root.to_path_buf(),
                remote_url: self.path.to_string_lossy().to_string(),
                ..StorageConfig::default()
            },
            ..AppConfig::default()
        }
    }

    /// Advance master
    pub fn commit(&self, message: &str, files: &[(&str, Option<&str>)]) -> Oid {
        self.write_commit(Some(MASTER), message, files)
    }

    /// Publish a patch set on top of master under `refname`
    pub fn publish_patch_set(
        &self,
        refname: &str,
        subject: &str,
        change_id: &str,
        files: &[(&str, Option<&str>)],
    ) -> Oid {
        let message = format!("{}\n\nChange-Id: {}\n", subject, change_id);
        let oid = self.write_commit(None, &message, files);
        self.repo()
            .reference(refname, oid, true, "publish patch set")
            .expect("Failed to publish patch set");
        oid
    }

    pub fn file_at(&self, refname: &str, path: &str) -> Option<String> {
        let repo = self.repo();
        let tree = repo.find_reference(refname).ok()?.peel_to_tree().ok()?;
        let entry = tree.get_path(Path::new(path)).ok()?;
        let blob = repo.find_blob(entry.id()).ok()?;
        Some(String::from_utf8_lossy(blob.content()).to_string())
    }

    fn write_commit(
        &self,
        update_ref: Option<&str>,
        message: &str,
        files: &[(&str, Option<&str>)],
    ) -> Oid {
        let repo = self.repo();
        let parent = repo
            .find_reference(MASTER)
            .and_then(|r| r.peel_to_commit())
            .ok();

        let mut index = Index::new().expect("Failed to create index");
        if let Some(parent) = &parent {
            index
                .read_tree(&parent.tree().expect("Failed to read parent tree"))
                .expect("Failed to load parent tree");
        }

        for (path, content) in files {
            match content {
                Some(content) => {
                    let id = repo.blob(content.as_bytes()).expect("Failed to write blob");
                    index
                        .add(&blob_entry(path, id, content.len()))
                        .expect("Failed to add entry");
                }
                None => index
                    .remove(Path::new(path), 0)
                    .expect("Failed to remove entry"),
            }
        }

        let tree_id = index.write_tree_to(&repo).expect("Failed to write tree");
        let tree = repo.find_tree(tree_id).expect("Failed to find tree");
        let author = Signature::now("Registry Admin", "admin@example.com")
            .expect("Failed to create signature");
        let parents: Vec<_> = parent.iter().collect();

        repo.commit(update_ref, &author, &author, message, &tree, &parents)
            .expect("Failed to commit")
    }
}

fn blob_entry(path: &str, id: Oid, size: usize) -> IndexEntry {
    IndexEntry {
        ctime: IndexTime::new(0, 0),
        mtime: IndexTime::new(0, 0),
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
