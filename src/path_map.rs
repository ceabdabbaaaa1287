//! Pairing of a local filesystem path with its remote equivalent.
//!
//! Mirrors the teacher's `RootRelativePath`: the remote side is always
//! normalized to forward slashes, because the remote host's path syntax may
//! differ from the local one (e.g. local Windows, remote Linux), so a local
//! `PathBuf` would carry the wrong separator semantics if reused directly.

use std::path::{Path, PathBuf};

/// A (local, remote) path pair. Either side may be absent while staging is
/// still in progress (e.g. the remote side isn't known until `prepare_remote`
/// has computed the destination).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathPair {
    pub local: Option<PathBuf>,
    pub remote: Option<String>,
}

impl PathPair {
    pub fn new(local: PathBuf, remote: String) -> Self {
        PathPair { local: Some(local), remote: Some(remote) }
    }

    pub fn local_only(local: PathBuf) -> Self {
        PathPair { local: Some(local), remote: None }
    }
}

impl IntoIterator for PathPair {
    type Item = (Option<PathBuf>, Option<String>);
    type IntoIter = std::iter::Once<(Option<PathBuf>, Option<String>)>;

    fn into_iter(self) -> Self::IntoIter {
        std::iter::once((self.local, self.remote))
    }
}

/// Converts a local, platform-specific absolute path into POSIX form
/// (forward slashes), suitable for joining into remote paths which are
/// always POSIX (the remote worker tree lives under `/var/tmp/...`).
pub fn to_posix_path(path: &Path) -> String {
    let s = path.to_string_lossy();
    s.replace('\\', "/")
}

/// True if `path` is `root` or a strict descendant of it.
pub fn is_subdir(path: &Path, root: &Path) -> bool {
    path == root || path.starts_with(root)
}

/// Joins a remote POSIX root with a relative POSIX path, using `/`
/// unconditionally (the remote side is never native-separator).
pub fn posix_join(root: &str, rel: &str) -> String {
    if rel.is_empty() {
        root.to_string()
    } else {
        format!("{}/{}", root.trim_end_matches('/'), rel)
    }
}

/// Normalizes a leading `~` in a remote path to the remote home directory
/// the same way the teacher's `fix_home_prefix` normalizes local `~`
/// prefixes before building commands.
pub fn fix_home_prefix(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        format!("$HOME/{rest}")
    } else if path == "~" {
        "$HOME".to_string()
    } else {
        path.to_string()
    }
}

/// Filesystem-safe rendering of a plan name, used as the one path segment
/// that disambiguates one plan's remote directory tree from another's on
/// the same host. Non-alphanumeric runs collapse to a single `-`; an empty
/// result (e.g. a name with no alphanumerics at all) falls back to `"plan"`
/// rather than producing an empty path segment.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_sep = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('-');
            last_was_sep = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "plan".to_string()
    } else {
        slug
    }
}
