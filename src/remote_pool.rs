//! Owns a set of [`RemoteWorker`]s keyed by host and drives them as a group.
//!
//! Mirrors the source's `RemotePool`/`_add_workers`: workers are built from
//! the pool config at construction time, `start` prepares all of them, and
//! `stop`/`abort` tear every one down, collecting whichever pulls failed
//! rather than stopping at the first one.
//!
//! Matches the "parallel workers, cooperative per worker" scheduling model:
//! each worker's staging/teardown blocks on its own subprocesses, so `start`
//! and `stop` fan out one `crossbeam` scoped thread per worker rather than
//! serializing them, the same way the teacher's sync/deploy passes over
//! many paths run each one on its own thread under a scope.

use std::collections::HashMap;
use std::path::Path;

use log::{info, warn};

use crate::config::PoolConfig;
use crate::error::Result;
use crate::path_map::PathPair;
use crate::remote_worker::{RemoteWorker, WorkerParams};
use crate::transport::Transport;

/// A running pool of remote workers, one (or more, via `workers_per_host`)
/// per configured host.
pub struct RemotePool<'t> {
    workers: HashMap<String, RemoteWorker<'t>>,
    transport: &'t dyn Transport,
}

impl<'t> RemotePool<'t> {
    pub fn new(config: &PoolConfig, transport: &'t dyn Transport) -> Self {
        let mut workers = HashMap::new();
        let plan_slug = crate::path_map::slugify(&config.plan_name);
        for host in &config.hosts {
            for index in 0..config.workers_per_host {
                let worker_id = if config.workers_per_host == 1 {
                    host.clone()
                } else {
                    format!("{host}-{index}")
                };
                let params = WorkerParams {
                    host: host.clone(),
                    remote_user: config.remote_user.clone(),
                    remote_root: config.remote_root.clone(),
                    worker_id: worker_id.clone(),
                    push: config.push.clone(),
                    push_relative_dir: config.push_relative_dir.clone(),
                    remote_workspace: config.remote_workspace.clone(),
                    child_script: config.child_script.clone(),
                    setup_script: config.setup_script.clone(),
                    env: config.env.clone(),
                    workspace_exclude: config.workspace_exclude.clone(),
                    push_exclude: config.push_exclude.clone(),
                    pull: config.pull.clone(),
                    pull_exclude: config.pull_exclude.clone(),
                    pool_type: config.pool_type,
                    remote_pool_size: config.workers_per_host,
                    testplan_path: config.testplan_path.clone(),
                    plan_slug: plan_slug.clone(),
                    local_lib_path: config.local_lib_path.clone(),
                    log_level: config.log_level,
                    remote_is_windows: config.remote_is_windows,
                };
                workers.insert(worker_id, RemoteWorker::new(params, transport));
            }
        }
        RemotePool { workers, transport }
    }

    pub fn worker_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn worker(&self, id: &str) -> Option<&RemoteWorker<'t>> {
        self.workers.get(id)
    }

    pub fn worker_mut(&mut self, id: &str) -> Option<&mut RemoteWorker<'t>> {
        self.workers.get_mut(id)
    }

    /// Prepares every worker's remote side and launches its remote child
    /// process. Returns the ids of workers that failed either step; the
    /// caller decides whether a partial pool is acceptable.
    ///
    /// The address each worker's child is told to report back to
    /// (`--address`) is that worker's own control-plane listener, bound at
    /// the end of `prepare_remote`.
    ///
    /// `local_cwd` is the local working directory the plan is actually
    /// running from; it must be `local_workspace` or a descendant of it.
    ///
    /// Every worker's staging and launch runs on its own thread: one
    /// worker's blocking transport calls never delay another's.
    pub fn start(&mut self, local_workspace: &Path, local_cwd: &Path) -> Vec<(String, crate::error::Error)> {
        let outcomes: Vec<(String, Option<crate::error::Error>)> = crossbeam::thread::scope(|scope| {
            let handles: Vec<_> = self
                .workers
                .iter_mut()
                .map(|(id, worker)| {
                    let id = id.clone();
                    scope.spawn(move |_| {
                        if let Err(err) = worker.prepare_remote(local_workspace, local_cwd) {
                            warn!("worker {id} failed to prepare: {err}");
                            return (id, Some(err));
                        }
                        let listen_addr = worker
                            .control_addr()
                            .expect("prepare_remote binds a control-plane listener on success")
                            .to_string();
                        if let Err(err) = worker.spawn(&listen_addr) {
                            warn!("worker {id} failed to launch: {err}");
                            return (id, Some(err));
                        }
                        info!("worker {id} prepared and launched");
                        (id, None)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("worker start thread panicked")).collect()
        })
        .expect("worker start scope panicked");

        outcomes.into_iter().filter_map(|(id, err)| err.map(|e| (id, e))).collect()
    }

    /// Gracefully stops every worker, pulling `results` from each and
    /// returning the entries that could not be pulled, per worker id. Runs
    /// one thread per worker so a slow pull on one host doesn't delay the
    /// others' teardown.
    pub fn stop(&mut self, results: &[PathPair]) -> HashMap<String, Vec<PathPair>> {
        let outcomes: Vec<(String, Vec<PathPair>)> = crossbeam::thread::scope(|scope| {
            let handles: Vec<_> = self
                .workers
                .iter_mut()
                .map(|(id, worker)| {
                    let id = id.clone();
                    scope.spawn(move |_| (id, worker.stop(results)))
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("worker stop thread panicked")).collect()
        })
        .expect("worker stop scope panicked");

        outcomes.into_iter().filter(|(_, failed)| !failed.is_empty()).collect()
    }

    /// Aborts every worker regardless of state, best-effort, one thread per
    /// worker.
    pub fn abort(&mut self, results: &[PathPair]) {
        crossbeam::thread::scope(|scope| {
            for worker in self.workers.values_mut() {
                scope.spawn(move |_| worker.abort(results));
            }
        })
        .expect("worker abort scope panicked");
    }

    /// Pulls the frozen setup metadata for a specific worker over its
    /// control-plane listener, if it has one.
    pub fn pull_metadata(&self, id: &str) -> Result<Option<crate::setup_metadata::SetupMetadata>> {
        let worker = match self.workers.get(id) {
            Some(w) => w,
            None => return Ok(None),
        };
        match worker.control_addr() {
            Some(addr) => Ok(Some(crate::control::pull_metadata(addr)?)),
            None => Ok(None),
        }
    }
}
