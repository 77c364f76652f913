//! Per-version git working copies
//!
//! Every version gets its own clone under the configured repositories
//! root. Listing, history and content lookups read the checkout's HEAD
//! commit; writes amend that commit and push it back for review, so a
//! candidate version always carries exactly one commit on top of the head
//! branch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Cred, CredentialType, FetchOptions, PushOptions, RemoteCallbacks, Repository};

use crate::config::StorageConfig;
use crate::error::{RegvaultError, Result};
use crate::models::{ChangeInfo, FileDates};
use crate::utils::{paths, text};

const REMOTE_NAME: &str = "origin";

/// Housekeeping file that keeps empty directories in git
const KEEP_FILE: &str = ".gitkeep";

/// Local ref receiving the fetched patch set
const REVIEW_REF: &str = "refs/regvault/review";

/// Local ref receiving the fetched head branch, used for conflict checks
const HEAD_TRACKING_REF: &str = "refs/regvault/head";

/// Hands out working copies bound to a version directory
#[derive(Clone)]
pub struct WorkingCopyStore {
    config: Arc<StorageConfig>,
}

impl WorkingCopyStore {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn root(&self) -> &Path {
        &self.config.repositories_root
    }

    pub fn head_branch(&self) -> &str {
        &self.config.head_branch
    }

    /// Working copy for `version`; nothing touches the disk until used
    pub fn working_copy(&self, version: &str) -> Result<WorkingCopy> {
        paths::validate_version(version)?;
        Ok(WorkingCopy {
            version: version.to_string(),
            dir: self.config.repositories_root.join(version),
            config: Arc::clone(&self.config),
        })
    }
}

/// Git checkout of a single version
#[derive(Clone)]
pub struct WorkingCopy {
    version: String,
    dir: PathBuf,
    config: Arc<StorageConfig>,
}

impl WorkingCopy {
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_cloned(&self) -> bool {
        self.dir.exists() && Repository::open(&self.dir).is_ok()
    }

    /// Clone the head branch unless a readable clone already exists.
    ///
    /// An unreadable clone is removed and cloned again.
    pub fn ensure_cloned(&self) -> Result<()> {
        if self.dir.exists() {
            match Repository::open(&self.dir) {
                Ok(_) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        "Working copy for version {} is unreadable ({}), cloning again",
                        self.version,
                        e
                    );
                    std::fs::remove_dir_all(&self.dir)?;
                }
            }
        }

        if let Some(parent) = self.dir.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(
            "Cloning {} ({}) for version {}",
            self.config.remote_url,
            self.config.head_branch,
            self.version
        );

        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(remote_callbacks(&self.config));

        let mut builder = RepoBuilder::new();
        builder.branch(&self.config.head_branch);
        builder.fetch_options(fetch_opts);

        if let Err(e) = builder.clone(&self.config.remote_url, &self.dir) {
            // a half-written clone would be mistaken for a corrupt one later
            if self.dir.exists() {
                let _ = std::fs::remove_dir_all(&self.dir);
            }
            return Err(RegvaultError::StorageUnavailable(format!(
                "failed to clone {}: {}",
                self.config.remote_url, e
            )));
        }

        Ok(())
    }

    /// Fetch `change_ref` and make it the checked-out commit.
    ///
    /// The working tree is only touched once the fetched commit resolved,
    /// so a failed fetch leaves the previous checkout in place.
    pub fn fetch_and_checkout(&self, change_ref: &str) -> Result<()> {
        let repo = self.open()?;
        let commit = self.fetch_commit(&repo, change_ref, REVIEW_REF)?;

        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(true);
        repo.checkout_tree(commit.as_object(), Some(&mut checkout))?;
        repo.set_head_detached(commit.id())?;

        tracing::debug!(
            "Checked out {} ({}) for version {}",
            change_ref,
            commit.id(),
            self.version
        );
        Ok(())
    }

    /// Names of regular files directly under `path` in the checkout
    pub fn list_files(&self, path: &str) -> Result<Vec<String>> {
        let repo = self.open()?;
        let tree = match head_tree(&repo)? {
            Some(tree) => tree,
            None => return Ok(Vec::new()),
        };

        let dir = paths::normalize_dir(path);
        let tree = if dir.is_empty() {
            tree
        } else {
            match tree.get_path(Path::new(&dir)) {
                Ok(entry) if entry.kind() == Some(git2::ObjectType::Tree) => {
                    repo.find_tree(entry.id())?
                }
                _ => return Ok(Vec::new()),
            }
        };

        let names = tree
            .iter()
            .filter(|entry| entry.kind() == Some(git2::ObjectType::Blob))
            .filter_map(|entry| entry.name().map(str::to_string))
            .filter(|name| name != KEEP_FILE)
            .collect();

        Ok(names)
    }

    /// Commit checked out in the working copy, `None` when HEAD is unborn
    pub fn head_commit(&self) -> Result<Option<git2::Oid>> {
        let repo = self.open()?;
        let head = repo.head().ok().and_then(|h| h.target());
        Ok(head)
    }

    /// First and last commit timestamps touching `path`, walking from HEAD
    pub fn file_dates(&self, path: &str) -> Result<Option<FileDates>> {
        let (dir, name) = paths::split_file_path(path);
        Ok(self.directory_dates(&dir)?.remove(&name))
    }

    /// First and last commit timestamps of every file directly under `path`
    /// that any commit reachable from HEAD touched, in a single history walk
    pub fn directory_dates(&self, path: &str) -> Result<HashMap<String, FileDates>> {
        let repo = self.open()?;
        let dir = paths::normalize_dir(path);
        let mut dates: HashMap<String, FileDates> = HashMap::new();

        let mut revwalk = repo.revwalk()?;
        revwalk.set_sorting(git2::Sort::TIME)?;
        if revwalk.push_head().is_err() {
            return Ok(dates);
        }

        let mut diff_opts = git2::DiffOptions::new();
        if !dir.is_empty() {
            diff_opts.pathspec(dir.as_str());
        }

        // newest first: the first hit is the update, the last the creation
        for oid in revwalk {
            let commit = repo.find_commit(oid?)?;
            let time = commit_time(&commit);

            for file in touched_files(&repo, &commit, &mut diff_opts)? {
                let (parent, name) = paths::split_file_path(&file);
                if parent != dir {
                    continue;
                }
                dates
                    .entry(name)
                    .and_modify(|d| d.created = time)
                    .or_insert(FileDates {
                        created: time,
                        updated: time,
                    });
            }
        }

        Ok(dates)
    }

    /// Content of `path` in the checkout
    pub fn read_file(&self, path: &str) -> Result<String> {
        let repo = self.open()?;
        let path = path.trim_matches('/');
        let not_found = || RegvaultError::file_not_found(path, &self.version);

        let tree = head_tree(&repo)?.ok_or_else(not_found)?;
        let entry = tree.get_path(Path::new(path)).map_err(|_| not_found())?;
        let blob = repo.find_blob(entry.id()).map_err(|_| not_found())?;

        text::decode_utf8(blob.content())
    }

    /// Write `content` to `path` and amend the change's commit
    pub fn write_file(&self, path: &str, content: &str, change: &ChangeInfo) -> Result<()> {
        let path = paths::validate_file_path(path)?;
        self.ensure_on_change(change)?;
        let repo = self.open()?;

        let full_path = self.dir.join(&path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&full_path, content)?;

        let mut index = repo.index()?;
        index.add_path(Path::new(&path))?;
        index.write()?;

        tracing::debug!("Wrote {} in version {}", path, self.version);
        self.amend_and_push(&repo, &mut index, change)
    }

    /// Remove `path` and amend the change's commit
    pub fn delete_file(&self, path: &str, change: &ChangeInfo) -> Result<()> {
        let path = paths::validate_file_path(path)?;
        self.ensure_on_change(change)?;
        let repo = self.open()?;

        let full_path = self.dir.join(&path);
        if full_path.exists() {
            std::fs::remove_file(&full_path)?;
        }

        let mut index = repo.index()?;
        index.remove_path(Path::new(&path))?;
        index.write()?;

        tracing::debug!("Deleted {} in version {}", path, self.version);
        self.amend_and_push(&repo, &mut index, change)
    }

    /// Paths that conflict when merging the checkout with the latest head branch
    pub fn conflicts_with_head(&self) -> Result<Vec<String>> {
        let repo = self.open()?;
        let head_ref = format!("refs/heads/{}", self.config.head_branch);
        let theirs = self.fetch_commit(&repo, &head_ref, HEAD_TRACKING_REF)?;
        let ours = repo.head()?.peel_to_commit()?;
        let index = repo.merge_commits(&ours, &theirs, None)?;

        let mut conflicts = Vec::new();
        if index.has_conflicts() {
            for conflict in index.conflicts()? {
                let conflict = conflict?;
                let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
                if let Some(entry) = entry {
                    conflicts.push(String::from_utf8_lossy(&entry.path).to_string());
                }
            }
        }

        conflicts.sort();
        conflicts.dedup();
        Ok(conflicts)
    }

    /// Remove the working copy from disk
    pub fn discard(&self) -> Result<()> {
        if self.dir.exists() {
            tracing::info!("Removing working copy for version {}", self.version);
            std::fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }

    fn open(&self) -> Result<Repository> {
        if !self.dir.exists() {
            return Err(RegvaultError::StorageUnavailable(format!(
                "working copy for version '{}' is not cloned",
                self.version
            )));
        }

        Repository::open(&self.dir).map_err(|e| {
            RegvaultError::WorkingTreeCorrupt(format!("{}: {}", self.dir.display(), e))
        })
    }

    /// Fetch `remote_ref` into `local_ref` and resolve it to a commit.
    ///
    /// The local ref is dropped first so a remote ref that no longer
    /// exists cannot resolve to a stale commit.
    fn fetch_commit<'r>(
        &self,
        repo: &'r Repository,
        remote_ref: &str,
        local_ref: &str,
    ) -> Result<git2::Commit<'r>> {
        if let Ok(mut stale) = repo.find_reference(local_ref) {
            stale.delete()?;
        }

        let refspec = format!("+{}:{}", remote_ref, local_ref);
        self.fetch(repo, &refspec)?;

        repo.find_reference(local_ref)
            .and_then(|r| r.peel_to_commit())
            .map_err(|_| {
                RegvaultError::StorageUnavailable(format!(
                    "{} not found on {}",
                    remote_ref, self.config.remote_url
                ))
            })
    }

    fn fetch(&self, repo: &Repository, refspec: &str) -> Result<()> {
        let mut remote = repo.find_remote(REMOTE_NAME)?;
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(remote_callbacks(&self.config));

        remote
            .fetch(&[refspec], Some(&mut fetch_opts), None)
            .map_err(|e| {
                RegvaultError::StorageUnavailable(format!("fetch of {} failed: {}", refspec, e))
            })
    }

    /// Check out the change's patch set if HEAD is not already its commit
    fn ensure_on_change(&self, change: &ChangeInfo) -> Result<()> {
        let on_change = {
            let repo = self.open()?;
            let head = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
            head.and_then(|c| c.message().map(|m| carries_change_id(m, &change.change_id)))
                .unwrap_or(false)
        };

        if on_change {
            return Ok(());
        }

        match change.current_ref.as_deref() {
            Some(change_ref) => self.fetch_and_checkout(change_ref),
            None => Err(RegvaultError::WorkingTreeCorrupt(format!(
                "checkout of version '{}' is not on change {} and no patch set ref is known",
                self.version, change.change_id
            ))),
        }
    }

    fn amend_and_push(
        &self,
        repo: &Repository,
        index: &mut git2::Index,
        change: &ChangeInfo,
    ) -> Result<()> {
        let tree_oid = index.write_tree()?;
        let tree = repo.find_tree(tree_oid)?;
        let signature = git2::Signature::now(&self.config.author_name, &self.config.author_email)?;
        let head = repo.head()?.peel_to_commit()?;
        let message = change.commit_message();

        let amended = head.amend(
            Some("HEAD"),
            None,
            Some(&signature),
            None,
            Some(&message),
            Some(&tree),
        )?;
        tracing::debug!(
            "Amended change {} in version {} to {}",
            change.change_id,
            self.version,
            amended
        );

        self.push_for_review(repo)
    }

    fn push_for_review(&self, repo: &Repository) -> Result<()> {
        let mut remote = repo.find_remote(REMOTE_NAME)?;
        let refspec = format!("+HEAD:refs/for/{}", self.config.head_branch);

        let mut callbacks = remote_callbacks(&self.config);
        callbacks.push_update_reference(|refname, status| match status {
            Some(message) => Err(git2::Error::from_str(&format!(
                "{} rejected: {}",
                refname, message
            ))),
            None => Ok(()),
        });

        let mut push_opts = PushOptions::new();
        push_opts.remote_callbacks(callbacks);

        remote
            .push(&[refspec.as_str()], Some(&mut push_opts))
            .map_err(|e| RegvaultError::StorageUnavailable(format!("push failed: {}", e)))?;

        tracing::info!("Pushed version {} for review", self.version);
        Ok(())
    }
}

fn remote_callbacks(config: &StorageConfig) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();

    if let (Some(username), Some(password)) =
        (config.username.as_deref(), config.password.as_deref())
    {
        callbacks.credentials(move |_url, _username_from_url, allowed_types| {
            if allowed_types.contains(CredentialType::USER_PASS_PLAINTEXT) {
                return Cred::userpass_plaintext(username, password);
            }
            if allowed_types.contains(CredentialType::DEFAULT) {
                return Cred::default();
            }
            Err(git2::Error::from_str("no authentication available"))
        });
    }

    callbacks
}

fn head_tree(repo: &Repository) -> Result<Option<git2::Tree<'_>>> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_tree()?)),
        Err(e)
            if e.code() == git2::ErrorCode::UnbornBranch
                || e.code() == git2::ErrorCode::NotFound =>
        {
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Paths a commit changes relative to its first parent
fn touched_files(
    repo: &Repository,
    commit: &git2::Commit,
    diff_opts: &mut git2::DiffOptions,
) -> Result<Vec<String>> {
    let tree = commit.tree()?;
    let parent_tree = match commit.parent(0) {
        Ok(parent) => Some(parent.tree()?),
        Err(_) => None,
    };

    let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(diff_opts))?;
    Ok(diff
        .deltas()
        .filter_map(|delta| delta.new_file().path().or_else(|| delta.old_file().path()))
        .map(|path| path.to_string_lossy().to_string())
        .collect())
}

fn commit_time(commit: &git2::Commit) -> DateTime<Utc> {
    DateTime::from_timestamp(commit.time().seconds(), 0).unwrap_or_default()
}

fn carries_change_id(message: &str, change_id: &str) -> bool {
    message
        .lines()
        .any(|line| line.trim() == format!("Change-Id: {}", change_id))
}
