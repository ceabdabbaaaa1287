//! Pool configuration: a plain struct built through `with_*` setters and
//! validated explicitly, replacing the source's dynamic per-field
//! `ConfigOption`/schema registration (`RemotePoolConfig.get_options()`)
//! with Rust's usual constructor-plus-builder idiom.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::staging::PushItem;

/// Default remote root under which worker workspaces are staged, matching
/// the source's `/var/tmp/<user>/testplan` convention.
pub const DEFAULT_REMOTE_ROOT: &str = "/var/tmp";

/// Default number of concurrent workers when the caller doesn't specify one
/// per host.
pub const DEFAULT_WORKERS_PER_HOST: usize = 1;

/// Default interval between heartbeat probes.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default time to wait for a worker to finish setup before giving up.
pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(300);

/// Default `remote_mkdir` argv prefix.
pub fn default_remote_mkdir() -> Vec<String> {
    vec!["/bin/mkdir".to_string(), "-p".to_string()]
}

/// Default signals that trigger the pool's abort path (SIGINT, SIGTERM).
pub const DEFAULT_ABORT_SIGNALS: [i32; 2] = [2, 15];

/// Local pool implementation the remote child process should run, forwarded
/// via `--remote-pool-type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolType {
    Thread,
    Process,
}

impl PoolType {
    pub fn as_str(self) -> &'static str {
        match self {
            PoolType::Thread => "thread",
            PoolType::Process => "process",
        }
    }
}

impl Default for PoolType {
    fn default() -> Self {
        PoolType::Thread
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub hosts: Vec<String>,
    /// Name of the plan this pool belongs to. Slugified and used as the
    /// final path segment of `remote_testplan_path`, so two plans never
    /// share a remote directory tree on the same host.
    pub plan_name: String,
    pub push: Vec<PushItem>,
    pub push_relative_dir: Option<PathBuf>,
    pub remote_workspace: Option<String>,
    pub remote_user: String,
    pub remote_root: String,
    /// Ordered shell tokens the remote child runs before any task. Recorded
    /// into `SetupMetadata` verbatim; the pool neither copies nor executes
    /// these itself, since it's the remote child's job to run them before
    /// serving its first task.
    pub setup_script: Vec<String>,
    pub env: Vec<(String, String)>,
    pub workers_per_host: usize,
    /// Local path to the worker's own child executable, copied to each
    /// worker's remote testplan directory before anything else is staged.
    pub child_script: Option<PathBuf>,
    /// Local path of the library this pool ships with, used to rewrite
    /// `--testplan` into the remote workspace when it lives inside the
    /// workspace and `testplan_path` wasn't set explicitly. Defaults to the
    /// current executable's path, the same way the source locates its own
    /// package via `module_abspath`.
    pub local_lib_path: Option<PathBuf>,
    pub workspace_exclude: Vec<String>,
    pub push_exclude: Vec<String>,
    pub pull: Vec<crate::path_map::PathPair>,
    pub pull_exclude: Vec<String>,
    pub heartbeat_interval: Duration,
    pub setup_timeout: Duration,
    /// Local pool implementation forwarded to the remote child
    /// (`--remote-pool-type`).
    pub pool_type: PoolType,
    /// Listen address the pool's control plane advertises to workers, and
    /// the `--address` flag of the remote child's launch command. Defaults
    /// to `127.0.0.1` at `RemotePool::new` time if left unset.
    pub host: Option<String>,
    /// Port the pool's control plane binds; 0 requests an ephemeral port.
    pub port: u16,
    /// Path to import the library from on the remote, overriding the
    /// workspace-relative rewrite.
    pub testplan_path: Option<String>,
    /// Whether the remote cleans up `push_files`/`push_dirs` on exit.
    pub delete_pushed: bool,
    /// `mkdir` invocation prefix used to create remote directories.
    pub remote_mkdir: Vec<String>,
    /// Signals that trigger the pool's abort path.
    pub abort_signals: Vec<i32>,
    /// Numeric log level forwarded to the remote child's `--log-level`.
    pub log_level: i32,
    /// True if the remote host's interpreter selection should use the
    /// Windows-style `PYTHON3_REMOTE_BINARY`/`PYTHON2_REMOTE_BINARY`
    /// environment variables instead of the local interpreter path.
    pub remote_is_windows: bool,
}

impl PoolConfig {
    /// Starts a config for the given hosts, with every other field at its
    /// default.
    pub fn new(hosts: Vec<String>) -> Self {
        PoolConfig {
            hosts,
            plan_name: "plan".to_string(),
            push: Vec::new(),
            push_relative_dir: None,
            remote_workspace: None,
            remote_user: String::new(),
            remote_root: DEFAULT_REMOTE_ROOT.to_string(),
            setup_script: Vec::new(),
            env: Vec::new(),
            workers_per_host: DEFAULT_WORKERS_PER_HOST,
            child_script: None,
            local_lib_path: std::env::current_exe().ok(),
            workspace_exclude: Vec::new(),
            push_exclude: Vec::new(),
            pull: Vec::new(),
            pull_exclude: Vec::new(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
            pool_type: PoolType::default(),
            host: None,
            port: 0,
            testplan_path: None,
            delete_pushed: false,
            remote_mkdir: default_remote_mkdir(),
            abort_signals: DEFAULT_ABORT_SIGNALS.to_vec(),
            log_level: 20,
            remote_is_windows: false,
        }
    }

    pub fn with_push(mut self, push: Vec<PushItem>) -> Self {
        self.push = push;
        self
    }

    pub fn with_push_relative_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.push_relative_dir = Some(dir.into());
        self
    }

    pub fn with_remote_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.remote_workspace = Some(workspace.into());
        self
    }

    pub fn with_remote_user(mut self, user: impl Into<String>) -> Self {
        self.remote_user = user.into();
        self
    }

    pub fn with_remote_root(mut self, root: impl Into<String>) -> Self {
        self.remote_root = root.into();
        self
    }

    pub fn with_setup_script(mut self, tokens: Vec<String>) -> Self {
        self.setup_script = tokens;
        self
    }

    pub fn with_plan_name(mut self, plan_name: impl Into<String>) -> Self {
        self.plan_name = plan_name.into();
        self
    }

    pub fn with_local_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_lib_path = Some(path.into());
        self
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn with_workers_per_host(mut self, workers: usize) -> Self {
        self.workers_per_host = workers;
        self
    }

    pub fn with_child_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.child_script = Some(script.into());
        self
    }

    pub fn with_workspace_exclude(mut self, exclude: Vec<String>) -> Self {
        self.workspace_exclude = exclude;
        self
    }

    pub fn with_push_exclude(mut self, exclude: Vec<String>) -> Self {
        self.push_exclude = exclude;
        self
    }

    pub fn with_pull(mut self, pull: Vec<crate::path_map::PathPair>) -> Self {
        self.pull = pull;
        self
    }

    pub fn with_pull_exclude(mut self, exclude: Vec<String>) -> Self {
        self.pull_exclude = exclude;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    pub fn with_pool_type(mut self, pool_type: PoolType) -> Self {
        self.pool_type = pool_type;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_testplan_path(mut self, path: impl Into<String>) -> Self {
        self.testplan_path = Some(path.into());
        self
    }

    pub fn with_delete_pushed(mut self, delete_pushed: bool) -> Self {
        self.delete_pushed = delete_pushed;
        self
    }

    pub fn with_remote_mkdir(mut self, remote_mkdir: Vec<String>) -> Self {
        self.remote_mkdir = remote_mkdir;
        self
    }

    pub fn with_abort_signals(mut self, abort_signals: Vec<i32>) -> Self {
        self.abort_signals = abort_signals;
        self
    }

    pub fn with_log_level(mut self, log_level: i32) -> Self {
        self.log_level = log_level;
        self
    }

    pub fn with_remote_is_windows(mut self, remote_is_windows: bool) -> Self {
        self.remote_is_windows = remote_is_windows;
        self
    }

    /// Validates cross-field invariants that individual setters can't catch
    /// on their own (e.g. a setter doesn't know yet whether `hosts` will end
    /// up empty).
    pub fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(Error::InvalidConfig { reason: "at least one host is required".to_string() });
        }
        if self.workers_per_host == 0 {
            return Err(Error::InvalidConfig { reason: "workers_per_host must be at least 1".to_string() });
        }
        if self.remote_mkdir.is_empty() {
            return Err(Error::InvalidConfig { reason: "remote_mkdir must not be empty".to_string() });
        }
        if let Some(script) = &self.child_script {
            if !script.is_file() {
                return Err(Error::InvalidConfig {
                    reason: format!("child_script {} is not a file", script.display()),
                });
            }
        }
        for pattern in self.workspace_exclude.iter().chain(&self.push_exclude).chain(&self.pull_exclude) {
            globset::Glob::new(pattern).map_err(|source| Error::BadGlob { pattern: pattern.clone(), source })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_populated() {
        let cfg = PoolConfig::new(vec!["host1".to_string()]);
        assert_eq!(cfg.workers_per_host, DEFAULT_WORKERS_PER_HOST);
        assert_eq!(cfg.remote_root, DEFAULT_REMOTE_ROOT);
        assert!(cfg.push.is_empty());
        assert_eq!(cfg.pool_type, PoolType::Thread);
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.remote_mkdir, default_remote_mkdir());
        assert_eq!(cfg.abort_signals, DEFAULT_ABORT_SIGNALS.to_vec());
    }

    #[test]
    fn empty_remote_mkdir_fails_validation() {
        let cfg = PoolConfig::new(vec!["host1".to_string()]).with_remote_mkdir(vec![]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn pool_type_setter_overrides_default() {
        let cfg = PoolConfig::new(vec!["host1".to_string()]).with_pool_type(PoolType::Process);
        assert_eq!(cfg.pool_type, PoolType::Process);
        assert_eq!(cfg.pool_type.as_str(), "process");
    }

    #[test]
    fn empty_hosts_fails_validation() {
        let cfg = PoolConfig::new(vec![]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_workers_per_host_fails_validation() {
        let cfg = PoolConfig::new(vec!["host1".to_string()]).with_workers_per_host(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn setup_script_tokens_are_carried_verbatim() {
        let cfg = PoolConfig::new(vec!["host1".to_string()])
            .with_setup_script(vec!["pip".to_string(), "install".to_string(), "-e".to_string(), ".".to_string()]);
        assert_eq!(cfg.setup_script, vec!["pip", "install", "-e", "."]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn plan_name_defaults_to_plan_and_can_be_overridden() {
        let cfg = PoolConfig::new(vec!["host1".to_string()]);
        assert_eq!(cfg.plan_name, "plan");
        let cfg = cfg.with_plan_name("My Plan");
        assert_eq!(cfg.plan_name, "My Plan");
    }

    #[test]
    fn missing_child_script_fails_validation() {
        let cfg = PoolConfig::new(vec!["host1".to_string()]).with_child_script("/does/not/exist");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_exclude_glob_fails_validation() {
        let cfg = PoolConfig::new(vec!["host1".to_string()]).with_workspace_exclude(vec!["[".to_string()]);
        assert!(matches!(cfg.validate(), Err(Error::BadGlob { .. })));
    }

    #[test]
    fn bad_push_exclude_glob_fails_validation() {
        let cfg = PoolConfig::new(vec!["host1".to_string()]).with_push_exclude(vec!["[".to_string()]);
        assert!(matches!(cfg.validate(), Err(Error::BadGlob { .. })));
    }

    #[test]
    fn valid_config_passes() {
        let cfg = PoolConfig::new(vec!["host1".to_string(), "host2".to_string()])
            .with_workers_per_host(4)
            .with_workspace_exclude(vec!["*.pyc".to_string()]);
        assert!(cfg.validate().is_ok());
    }
}
