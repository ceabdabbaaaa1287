//! Drives a single remote worker through its lifecycle: stage files and
//! workspace, run the setup script, accept commands, and eventually pull
//! results back or abort.
//!
//! Mirrors the source's `RemoteWorker`, with `_prepare_remote` split across
//! [`RemoteWorker::prepare_remote`] (directory layout, pushes, workspace,
//! setup script) and control-plane serving handled by [`control`], which the
//! worker stands up once setup completes so the pool can pull its frozen
//! [`SetupMetadata`] or send heartbeats.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::config::PoolType;
use crate::control::ControlServer;
use crate::error::{Error, Result};
use crate::path_map::{posix_join, to_posix_path, PathPair};
use crate::setup_metadata::{SetupMetadata, WorkspacePaths};
use crate::staging::{plan_push, PushItem};
use crate::timing::wait_until;
use crate::transport::{exec_remote, CopyOptions, ExecOptions, Transport};
use crate::workspace::{stage_workspace, ExecWorkspaceCheck, WorkspaceCheck};

/// Lifecycle state of a [`RemoteWorker`], matching the source's state
/// machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Staging,
    Ready,
    Running,
    Stopping,
    Done,
}

/// Per-worker parameters resolved from the pool config. Kept separate from
/// [`crate::config::PoolConfig`] since a pool config describes every host at
/// once, while a worker needs a single host and a single remote directory
/// layout.
#[derive(Debug, Clone)]
pub struct WorkerParams {
    pub host: String,
    pub remote_user: String,
    pub remote_root: String,
    pub worker_id: String,
    pub push: Vec<PushItem>,
    pub push_relative_dir: Option<PathBuf>,
    pub remote_workspace: Option<String>,
    /// Local path to the worker's own child executable/script, copied to
    /// `<remote_testplan_path>/child.py` before anything else is staged.
    pub child_script: Option<PathBuf>,
    /// Ordered shell tokens the remote child should run before serving its
    /// first task. The pool records these into `SetupMetadata` verbatim; it
    /// neither copies nor executes them itself.
    pub setup_script: Vec<String>,
    pub env: Vec<(String, String)>,
    pub workspace_exclude: Vec<String>,
    pub push_exclude: Vec<String>,
    pub pull: Vec<PathPair>,
    pub pull_exclude: Vec<String>,
    pub pool_type: PoolType,
    pub remote_pool_size: usize,
    pub testplan_path: Option<String>,
    /// Slugified plan name, used as the final path segment of
    /// `remote_testplan_path` so two plans never share a remote directory
    /// tree on the same host.
    pub plan_slug: String,
    /// Local path of the library this pool ships with, used to rewrite
    /// `--testplan` into the remote workspace when it lives inside the
    /// workspace and `testplan_path` wasn't set explicitly.
    pub local_lib_path: Option<PathBuf>,
    pub log_level: i32,
    pub remote_is_windows: bool,
}

impl WorkerParams {
    /// Root directory this worker's files live under, e.g.
    /// `/var/tmp/alice/testplan/remote_workspaces/my-plan`.
    pub fn remote_testplan_path(&self) -> String {
        let user_segment = if self.remote_user.is_empty() { "testplan".to_string() } else { format!("{}/testplan", self.remote_user) };
        posix_join(&posix_join(&self.remote_root, &user_segment), &format!("remote_workspaces/{}", self.plan_slug))
    }

    /// Single destination path this worker's workspace ends up at on the
    /// remote host, derived from the local workspace's own directory name
    /// the same way the source names it after `workspace.split(os.sep)[-1]`.
    pub fn remote_workspace(&self, local_workspace: &Path) -> String {
        let basename = local_workspace.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        posix_join(&self.remote_testplan_path(), &basename)
    }

    /// `<remote_testplan_path>/runpath/<host>`, where this worker's run
    /// artifacts land.
    pub fn remote_testplan_runpath(&self) -> String {
        posix_join(&posix_join(&self.remote_testplan_path(), "runpath"), &self.host)
    }

    /// `<remote_testplan_path>/child.py`, where the worker's child script
    /// is copied to.
    pub fn remote_child_path(&self) -> String {
        posix_join(&self.remote_testplan_path(), "child.py")
    }
}

/// A single remote worker, as seen by the pool: owns its control-plane
/// listener once setup completes and remembers its frozen setup metadata.
pub struct RemoteWorker<'t> {
    params: WorkerParams,
    transport: &'t dyn Transport,
    state: WorkerState,
    setup_metadata: Option<SetupMetadata>,
    control: Option<ControlServer>,
    child: Option<std::process::Child>,
}

impl<'t> RemoteWorker<'t> {
    pub fn new(params: WorkerParams, transport: &'t dyn Transport) -> Self {
        RemoteWorker {
            params,
            transport,
            state: WorkerState::Idle,
            setup_metadata: None,
            control: None,
            child: None,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn setup_metadata(&self) -> Option<&SetupMetadata> {
        self.setup_metadata.as_ref()
    }

    pub fn control_addr(&self) -> Option<std::net::SocketAddr> {
        self.control.as_ref().map(|c| c.local_addr())
    }

    /// Creates the remote directory layout, pushes files/dirs/workspace,
    /// runs the setup script, freezes [`SetupMetadata`], and starts the
    /// control-plane listener. Idempotent metadata means this must run
    /// exactly once per worker.
    ///
    /// `local_cwd` is the local working directory the plan is actually
    /// running from (invariant: must be `local_workspace` or a descendant
    /// of it); the worker's remote working directory is the same relative
    /// path resolved under the remote workspace.
    pub fn prepare_remote(&mut self, local_workspace: &Path, local_cwd: &Path) -> Result<()> {
        if self.state != WorkerState::Idle {
            return Err(Error::InvalidConfig { reason: format!("prepare_remote called twice for {}", self.params.host) });
        }
        self.state = WorkerState::Staging;

        let testplan_path = self.params.remote_testplan_path();
        self.mkdir_remote(&testplan_path)?;
        self.mkdir_remote(&self.params.remote_testplan_runpath())?;

        if let Some(local_child) = self.params.child_script.clone() {
            self.copy_one(&local_child, &self.params.remote_child_path(), &[])?;
        }

        if let Ok(deps_dir) = std::env::var("TESTPLAN_DEPENDENCIES_PATH") {
            let local_deps = Path::new(&deps_dir).join("dependencies.py");
            let remote_deps = posix_join(&testplan_path, "dependencies.py");
            self.copy_one(&local_deps, &remote_deps, &[])?;
        }

        let check = ExecWorkspaceCheck { transport: self.transport };
        let remote_workspace = self.params.remote_workspace(local_workspace);
        let placement = stage_workspace(
            self.transport,
            &check,
            &self.params.host,
            local_workspace,
            &remote_workspace,
            self.params.remote_workspace.as_deref(),
            &self.params.workspace_exclude,
        )?;

        if !crate::path_map::is_subdir(local_cwd, local_workspace) {
            return Err(Error::WorkingDirOutsideWorkspace {
                ws: local_workspace.to_path_buf(),
                cwd: local_cwd.to_path_buf(),
            });
        }
        let cwd_rel = local_cwd
            .strip_prefix(local_workspace)
            .expect("is_subdir guarantees this strips cleanly");
        let remote_working_dir = posix_join(&placement.remote_workspace, &to_posix_path(cwd_rel));

        let plan = plan_push(&self.params.push, self.params.push_relative_dir.as_deref(), &testplan_path)?;
        if let Some(remote_push_dir) = &plan.remote_push_dir {
            self.mkdir_remote(remote_push_dir)?;
        }
        self.push_entries(&plan.push_files)?;
        self.push_entries(&plan.push_dirs)?;

        let (push_files, push_dirs) = SetupMetadata::from_pairs(&plan.push_files, &plan.push_dirs);
        self.setup_metadata = Some(SetupMetadata {
            push_files,
            push_dirs,
            push_dir: plan.remote_push_dir,
            setup_script: self.params.setup_script.clone(),
            env: self.params.env.clone(),
            workspace_paths: WorkspacePaths {
                local: to_posix_path(local_workspace),
                remote: placement.remote_workspace,
            },
            workspace_pushed: placement.workspace_pushed,
            working_dir: remote_working_dir,
        });

        self.control = Some(ControlServer::spawn("127.0.0.1:0", self.setup_metadata.clone().unwrap())?);
        self.state = WorkerState::Ready;
        info!("worker {} ready at {}", self.params.host, testplan_path);
        Ok(())
    }

    /// Runs a command in the worker's working directory. The working
    /// directory must resolve inside the workspace; anything else is a
    /// configuration mistake, not a runtime condition to tolerate.
    pub fn run_command(&mut self, argv: &[String], cwd: Option<&str>) -> Result<crate::transport::ExecOutput> {
        if self.state != WorkerState::Ready && self.state != WorkerState::Running {
            return Err(Error::InvalidConfig { reason: "run_command called before the worker is ready".to_string() });
        }
        let metadata = self
            .setup_metadata
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig { reason: "run_command called before prepare_remote".to_string() })?;

        let workspace = Path::new(&metadata.workspace_paths.remote);
        if let Some(cwd) = cwd {
            if !crate::path_map::is_subdir(Path::new(cwd), workspace) {
                return Err(Error::WorkingDirOutsideWorkspace {
                    ws: workspace.to_path_buf(),
                    cwd: PathBuf::from(cwd),
                });
            }
        }

        self.state = WorkerState::Running;
        let cd_target = cwd.unwrap_or(&metadata.working_dir).to_string();
        let mut cmd_tokens = vec!["cd".to_string(), cd_target, "&&".to_string()];
        cmd_tokens.extend(argv.iter().cloned());
        let opts = ExecOptions::checked().with_label(&self.params.host);
        let out = exec_remote(self.transport, &self.params.host, &cmd_tokens, &opts)?;
        Ok(out)
    }

    /// Builds the argv that launches this worker's remote child process.
    /// Flag names and the order within each `--flag value` pair are a
    /// stable contract the remote child binary parses against.
    pub fn proc_cmd(&self, listen_addr: &str) -> Result<Vec<String>> {
        let metadata = self
            .setup_metadata
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig { reason: "proc_cmd called before prepare_remote".to_string() })?;

        let interpreter = if self.params.remote_is_windows {
            std::env::var("PYTHON3_REMOTE_BINARY")
                .or_else(|_| std::env::var("PYTHON2_REMOTE_BINARY"))
                .map_err(|_| Error::InvalidConfig {
                    reason: "neither PYTHON3_REMOTE_BINARY nor PYTHON2_REMOTE_BINARY is set for a windows-like remote".to_string(),
                })?
        } else {
            std::env::current_exe()?.to_string_lossy().into_owned()
        };

        let mut cmd = vec![
            interpreter,
            "-uB".to_string(),
            self.params.remote_child_path(),
            "--index".to_string(),
            self.params.host.clone(),
            "--address".to_string(),
            listen_addr.to_string(),
            "--type".to_string(),
            "remote_worker".to_string(),
            "--log-level".to_string(),
            self.params.log_level.to_string(),
            "--wd".to_string(),
            metadata.working_dir.clone(),
            "--runpath".to_string(),
            self.params.remote_testplan_runpath(),
            "--remote-pool-type".to_string(),
            self.params.pool_type.as_str().to_string(),
            "--remote-pool-size".to_string(),
            self.params.remote_pool_size.to_string(),
        ];

        if let Some(testplan_path) = self.testplan_import_path(metadata) {
            cmd.push("--testplan".to_string());
            cmd.push(testplan_path);
        }

        if !metadata.workspace_pushed {
            if let Ok(deps) = std::env::var("TESTPLAN_DEPENDENCIES_PATH") {
                cmd.push("--testplan-deps".to_string());
                cmd.push(deps);
            }
        }

        Ok(self.transport.shell(&self.params.host, &cmd))
    }

    /// Resolves the path to pass as `--testplan`: an explicit override wins
    /// outright; otherwise, if the library this pool ships with lives inside
    /// the local workspace, its path is rewritten to the equivalent location
    /// under the remote workspace. If it lives outside the workspace (the
    /// common case, e.g. an installed package), no flag is added at all and
    /// the remote child falls back to its own installed copy.
    fn testplan_import_path(&self, metadata: &SetupMetadata) -> Option<String> {
        if let Some(testplan_path) = &self.params.testplan_path {
            return Some(testplan_path.clone());
        }
        let lib_root = self.params.local_lib_path.as_ref()?.parent()?;
        let local_workspace = Path::new(&metadata.workspace_paths.local);
        if !lib_root.starts_with(local_workspace) {
            return None;
        }
        let rel = lib_root.strip_prefix(local_workspace).ok()?;
        Some(posix_join(&metadata.workspace_paths.remote, &to_posix_path(rel)))
    }

    /// Launches the remote child process built by [`proc_cmd`] and leaves it
    /// running, transitioning the worker into [`WorkerState::Running`].
    /// Does not wait for the child to exit; [`stop`]/[`abort`] terminate it.
    pub fn spawn(&mut self, listen_addr: &str) -> Result<()> {
        if self.state != WorkerState::Ready {
            return Err(Error::InvalidConfig { reason: format!("spawn called while worker {} is not ready", self.params.host) });
        }
        let argv = self.proc_cmd(listen_addr)?;
        let child = crate::transport::spawn_piped(&argv)?;
        self.child = Some(child);
        self.state = WorkerState::Running;
        info!("worker {} launched remote child process", self.params.host);
        Ok(())
    }

    /// Pulls a remote file or directory back to a local destination.
    /// Failures here are logged and swallowed by the caller (the pool), not
    /// this method, matching the source's best-effort pull semantics.
    pub fn pull(&self, pull: &PathPair) -> Result<()> {
        let remote = pull.remote.as_deref().ok_or_else(|| Error::InvalidConfig { reason: "pull entry missing remote path".to_string() })?;
        let local = pull.local.as_ref().ok_or_else(|| Error::InvalidConfig { reason: "pull entry missing local path".to_string() })?;
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let src = crate::transport::remote_copy_spec(&self.params.remote_user, &self.params.host, remote);
        let dst = to_posix_path(local);
        let opts = CopyOptions { exclude: self.params.pull_exclude.clone() };
        let argv = self.transport.copy(&src, &dst, &opts);
        crate::transport::exec(&argv, &ExecOptions::checked().with_label("pull"))?;
        Ok(())
    }

    /// Best-effort pull of everything configured to come back, used both by
    /// the normal stop path and by `abort`. Individual failures are logged,
    /// not propagated, since one missing result file shouldn't block the
    /// rest from being fetched.
    pub fn fetch_results(&self, results: &[PathPair]) -> Vec<PathPair> {
        let mut failed = Vec::new();
        for entry in results {
            if let Err(err) = self.pull(entry) {
                warn!("failed to pull {:?} from {}: {err}", entry.remote, self.params.host);
                failed.push(entry.clone());
            }
        }
        failed
    }

    /// Normal shutdown: fetch results, pull any configured `pull` entries,
    /// tear down the control-plane listener, and terminate the remote child
    /// process if one was launched.
    pub fn stop(&mut self, results: &[PathPair]) -> Vec<PathPair> {
        self.state = WorkerState::Stopping;
        let mut to_fetch = results.to_vec();
        to_fetch.extend(self.params.pull.iter().cloned());
        let failed = self.fetch_results(&to_fetch);
        self.control.take();
        if let Some(mut child) = self.child.take() {
            crate::transport::kill(&mut child);
        }
        self.state = WorkerState::Done;
        failed
    }

    /// Abrupt shutdown from any state: still attempts to fetch whatever
    /// results exist, but never fails the caller if that doesn't work.
    pub fn abort(&mut self, results: &[PathPair]) {
        debug!("aborting worker {}", self.params.host);
        let mut to_fetch = results.to_vec();
        to_fetch.extend(self.params.pull.iter().cloned());
        let _ = self.fetch_results(&to_fetch);
        self.control.take();
        if let Some(mut child) = self.child.take() {
            crate::transport::kill(&mut child);
        }
        self.state = WorkerState::Done;
    }

    fn mkdir_remote(&self, path: &str) -> Result<()> {
        self.run_checked(&["mkdir".to_string(), "-p".to_string(), path.to_string()])
    }

    fn run_checked(&self, cmd_tokens: &[String]) -> Result<()> {
        exec_remote(self.transport, &self.params.host, cmd_tokens, &ExecOptions::checked())?;
        Ok(())
    }

    fn copy_one(&self, local: &Path, remote: &str, exclude: &[String]) -> Result<()> {
        let src = to_posix_path(local);
        let dst = crate::transport::remote_copy_spec(&self.params.remote_user, &self.params.host, remote);
        let opts = CopyOptions { exclude: exclude.to_vec() };
        let argv = self.transport.copy(&src, &dst, &opts);
        crate::transport::exec(&argv, &ExecOptions::checked().with_label("copy_one"))?;
        Ok(())
    }

    fn push_entries(&self, entries: &[PathPair]) -> Result<()> {
        for entry in entries {
            let (local, remote) = match (&entry.local, &entry.remote) {
                (Some(l), Some(r)) => (l, r),
                _ => continue,
            };
            self.copy_one(local, remote, &self.params.push_exclude)?;
        }
        Ok(())
    }
}

/// Waits until a worker's control-plane listener answers a heartbeat, used
/// right after `prepare_remote` to confirm the worker is actually reachable
/// before the pool starts dispatching commands to it.
pub fn wait_until_reachable(worker: &RemoteWorker, timeout: std::time::Duration) -> Result<()> {
    let addr = worker.control_addr().ok_or_else(|| Error::InvalidConfig { reason: "worker has no control-plane listener yet".to_string() })?;
    wait_until(
        || crate::control::heartbeat(addr).unwrap_or(false),
        timeout,
        std::time::Duration::from_millis(20),
        "worker control-plane heartbeat",
    )
}
