//! The frozen description of how a worker's remote workspace was prepared,
//! handed back to the pool over the control plane on `MetadataPull`.
//!
//! Mirrors the source's `WorkerSetupMetadata`: a plain value object computed
//! once at the end of `prepare_remote` and returned byte-identical on every
//! subsequent pull, since the pool may ask more than once (e.g. a retried
//! connection) and the answer can't change mid-run.

use serde::{Deserialize, Serialize};

use crate::path_map::PathPair;

/// Snapshot of everything a worker did to set up its remote side, taken
/// once `prepare_remote` completes and never recomputed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupMetadata {
    /// Files that were pushed, as (local, remote) pairs.
    pub push_files: Vec<(String, String)>,
    /// Directories that were pushed, as (local, remote) pairs, already
    /// deduplicated.
    pub push_dirs: Vec<(String, String)>,
    /// The remote directory push destinations were computed relative to,
    /// if `push_relative_dir` was used.
    pub push_dir: Option<String>,
    /// Ordered shell tokens the remote child should run before serving its
    /// first task. Recorded verbatim; nothing on the pool side copies or
    /// executes these.
    pub setup_script: Vec<String>,
    /// Environment variables the worker's commands are run with.
    pub env: Vec<(String, String)>,
    /// Local/remote workspace path pair the worker ended up with.
    pub workspace_paths: WorkspacePaths,
    /// Whether the workspace directory tree was actually transferred, as
    /// opposed to symlinked to a preexisting or shared copy.
    pub workspace_pushed: bool,
    /// Remote equivalent of the local working directory the plan is
    /// running from: the same path, relative to the workspace, resolved
    /// under `workspace_paths.remote`.
    pub working_dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspacePaths {
    pub local: String,
    pub remote: String,
}

impl SetupMetadata {
    pub fn from_pairs(push_files: &[PathPair], push_dirs: &[PathPair]) -> (Vec<(String, String)>, Vec<(String, String)>) {
        let to_owned_pairs = |pairs: &[PathPair]| -> Vec<(String, String)> {
            pairs
                .iter()
                .filter_map(|p| {
                    let local = p.local.as_ref()?.to_string_lossy().into_owned();
                    let remote = p.remote.clone()?;
                    Some((local, remote))
                })
                .collect()
        };
        (to_owned_pairs(push_files), to_owned_pairs(push_dirs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn metadata_round_trips_through_bincode() {
        let meta = SetupMetadata {
            push_files: vec![("/a/b.txt".into(), "/remote/b.txt".into())],
            push_dirs: vec![],
            push_dir: Some("/remote/push".into()),
            setup_script: vec!["pip".into(), "install".into(), "-e".into(), ".".into()],
            env: vec![("FOO".into(), "bar".into())],
            workspace_paths: WorkspacePaths {
                local: "/local/ws".into(),
                remote: "/remote/ws".into(),
            },
            workspace_pushed: true,
            working_dir: "/remote/ws".into(),
        };
        let bytes = bincode::serialize(&meta).unwrap();
        let back: SetupMetadata = bincode::deserialize(&bytes).unwrap();
        assert_eq!(meta, back);
    }

    #[test]
    fn from_pairs_drops_incomplete_entries() {
        let complete = PathPair::new(PathBuf::from("/a"), "/remote/a".to_string());
        let incomplete = PathPair::local_only(PathBuf::from("/b"));
        let (files, _) = SetupMetadata::from_pairs(&[complete, incomplete], &[]);
        assert_eq!(files, vec![("/a".to_string(), "/remote/a".to_string())]);
    }
}
