//! Computes deduplicated file/directory push plans from the pool's `push`
//! configuration.
//!
//! Mirrors the source's `_build_push_lists`/`_build_push_dests`, but shape
//! detection is reified as [`PushItem`] rather than runtime `isinstance`
//! checks: a `push` list built from a single kind of item statically can't
//! represent a mixture, but the pool configuration is still free-form user
//! input (e.g. parsed from a config file), so we still validate it at
//! runtime and return [`Error::BadPushConfig`] for anything the caller
//! didn't keep consistent.

use std::path::{Path, PathBuf};

use log::{error, warn};

use crate::error::{Error, Result};
use crate::path_map::{is_subdir, posix_join, to_posix_path, PathPair};

/// One entry of the `push` configuration: either a bare source path (the
/// destination is computed for you) or an explicit (source, dest) pair.
#[derive(Debug, Clone)]
pub enum PushItem {
    Source(PathBuf),
    Pair(PathBuf, String),
}

/// Output of [`plan_push`].
#[derive(Debug, Clone, Default)]
pub struct StagingPlan {
    pub push_files: Vec<PathPair>,
    pub push_dirs: Vec<PathPair>,
    /// Set when `push_relative_dir` was used to compute destinations; the
    /// directory must be created on the remote before any transfer.
    pub remote_push_dir: Option<String>,
}

/// Given the pool's `push` config and (optionally) `push_relative_dir`,
/// computes the deduplicated list of files and directories to push along
/// with their remote destinations.
pub fn plan_push(
    push: &[PushItem],
    push_relative_dir: Option<&Path>,
    remote_testplan_path: &str,
) -> Result<StagingPlan> {
    if push.is_empty() {
        return Ok(StagingPlan::default());
    }

    let all_sources = push.iter().all(|i| matches!(i, PushItem::Source(_)));
    let all_pairs = push.iter().all(|i| matches!(i, PushItem::Pair(..)));
    if !all_sources && !all_pairs {
        return Err(Error::BadPushConfig);
    }

    let mut remote_push_dir = None;
    let locations: Vec<(PathBuf, String)> = if all_sources {
        let sources: Vec<PathBuf> = push
            .iter()
            .map(|i| match i {
                PushItem::Source(p) => p.clone(),
                PushItem::Pair(..) => unreachable!(),
            })
            .collect();
        let dests = build_push_dests(&sources, push_relative_dir, remote_testplan_path, &mut remote_push_dir)?;
        sources.into_iter().zip(dests).collect()
    } else {
        if push_relative_dir.is_some() {
            warn!("ignoring push_relative_dir configuration as explicit destination paths have been provided");
        }
        push.iter()
            .map(|i| match i {
                PushItem::Pair(src, dst) => (src.clone(), dst.clone()),
                PushItem::Source(_) => unreachable!(),
            })
            .collect()
    };

    let mut push_files = Vec::new();
    let mut push_dirs = Vec::new();
    for (source, dest) in locations {
        let source = strip_trailing_sep(&source);
        if source.is_file() {
            push_files.push(PathPair::new(source, dest));
        } else if source.is_dir() {
            push_dirs.push(PathPair::new(source, dest));
        } else {
            error!("item {:?} cannot be pushed: not a file or directory", source);
        }
    }

    dedup_dirs(&mut push_dirs);

    Ok(StagingPlan { push_files, push_dirs, remote_push_dir })
}

fn build_push_dests(
    sources: &[PathBuf],
    push_relative_dir: Option<&Path>,
    remote_testplan_path: &str,
    remote_push_dir_out: &mut Option<String>,
) -> Result<Vec<String>> {
    match push_relative_dir {
        Some(root) => {
            let remote_push_dir = posix_join(remote_testplan_path, "push_files");
            *remote_push_dir_out = Some(remote_push_dir.clone());
            sources
                .iter()
                .map(|source| to_relative_push_dest(source, root, &remote_push_dir))
                .collect()
        }
        None => Ok(sources.iter().map(|s| to_posix_path(s)).collect()),
    }
}

fn to_relative_push_dest(local_path: &Path, relative_root: &Path, remote_push_dir: &str) -> Result<String> {
    if !is_subdir(local_path, relative_root) {
        return Err(Error::PushNotUnderRoot {
            path: local_path.to_path_buf(),
            root: relative_root.to_path_buf(),
        });
    }
    let rel = local_path
        .strip_prefix(relative_root)
        .expect("is_subdir guarantees this strips cleanly");
    Ok(posix_join(remote_push_dir, &to_posix_path(rel)))
}

/// Strips a single trailing path separator, matching `source.rstrip(os.sep)`
/// in the original: `/a/b/` and `/a/b` must classify identically.
fn strip_trailing_sep(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    let trimmed = s.trim_end_matches(['/', '\\']);
    PathBuf::from(trimmed)
}

/// Sorts directories by local path and drops any entry whose local path is
/// a (string) prefix of its predecessor's, unconditionally — the source's
/// `len(push_dirs) > 1` guard is redundant (an empty or single-element list
/// can't contain a duplicate), so this only runs the sort+scan, never an
/// extra special case.
fn dedup_dirs(push_dirs: &mut Vec<PathPair>) {
    push_dirs.sort_by(|a, b| a.local.cmp(&b.local));
    let mut result: Vec<PathPair> = Vec::with_capacity(push_dirs.len());
    for dir in push_dirs.drain(..) {
        let is_dup = result
            .last()
            .and_then(|prev: &PathPair| prev.local.as_deref())
            .zip(dir.local.as_deref())
            .map(|(prev, cur)| cur.starts_with(prev))
            .unwrap_or(false);
        if !is_dup {
            result.push(dir);
        }
    }
    *push_dirs = result;
}
