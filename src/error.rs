//! Structured error kinds for the remote worker pool.
//!
//! Configuration errors abort plan startup; transfer errors during `push`
//! are fatal (the remote is assumed unhealthy); errors during `pull` and
//! the abort path's `fetch_results` are best-effort and are logged by the
//! caller rather than propagated through this type.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("command {argv:?} exited with code {exitcode}")]
    RemoteCommandFailed { argv: Vec<String>, exitcode: i32 },

    #[error("push config must be either all source paths or all (source, dest) pairs, not a mixture")]
    BadPushConfig,

    #[error("push source {path} is not under push_relative_dir {root}")]
    PushNotUnderRoot { path: PathBuf, root: PathBuf },

    #[error("working directory {cwd} is not inside workspace {ws}")]
    WorkingDirOutsideWorkspace { ws: PathBuf, cwd: PathBuf },

    #[error("timed out waiting for {what}")]
    TimeoutExpired { what: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("invalid glob pattern {pattern:?}: {source}")]
    BadGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}
