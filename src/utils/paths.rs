//! Repository-relative path handling
//!
//! Directory arguments arrive in several shapes (`"forms"`, `"/forms/"`,
//! `"/"`, `""`). Everything below the service boundary works with the
//! normalized form: no leading or trailing separator, root is `""`.

use crate::error::{RegvaultError, Result};

/// Normalize a directory argument; root becomes `""`
pub fn normalize_dir(path: &str) -> String {
    path.trim_matches('/').to_string()
}

/// Split a file path into its normalized parent directory and file name
pub fn split_file_path(path: &str) -> (String, String) {
    let trimmed = path.trim_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => (trimmed[..pos].to_string(), trimmed[pos + 1..].to_string()),
        None => (String::new(), trimmed.to_string()),
    }
}

/// Join a normalized directory and a file name
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Validate a file path for writing into a working tree.
///
/// Returns the normalized relative path. Rejects empty paths and any
/// component that would escape the working tree or touch git metadata.
pub fn validate_file_path(path: &str) -> Result<String> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(RegvaultError::InvalidPath(path.to_string()));
    }

    let bad_component = trimmed
        .split('/')
        .any(|c| c.is_empty() || c == "." || c == ".." || c == ".git");
    if bad_component || trimmed.contains('\\') {
        return Err(RegvaultError::InvalidPath(path.to_string()));
    }

    Ok(trimmed.to_string())
}

/// Validate a version identifier for use as a directory name
pub fn validate_version(version: &str) -> Result<()> {
    let valid = !version.is_empty()
        && version != "."
        && version != ".."
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(RegvaultError::InvalidPath(version.to_string()))
    }
}
