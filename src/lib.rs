//! Provisions worker processes on remote hosts over an ssh-like transport:
//! stages files and workspaces, spawns subprocesses, and brokers a small
//! control plane for setup metadata and heartbeats.

pub mod config;
pub mod control;
pub mod error;
pub mod logging;
pub mod path_map;
pub mod remote_pool;
pub mod remote_worker;
pub mod setup_metadata;
pub mod staging;
pub mod timing;
pub mod transport;
pub mod workspace;

pub use config::PoolConfig;
pub use error::{Error, Result};
pub use remote_pool::RemotePool;
pub use remote_worker::{RemoteWorker, WorkerParams, WorkerState};
pub use setup_metadata::SetupMetadata;
pub use transport::{DefaultTransport, Transport};
