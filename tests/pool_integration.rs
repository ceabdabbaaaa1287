//! End-to-end scenarios driving a pool against an in-process fake transport
//! (no real `ssh`/`scp` available in this environment), exercising the same
//! paths a real remote host would.

use std::path::PathBuf;
use std::sync::Mutex;

use remote_worker_pool::config::PoolConfig;
use remote_worker_pool::remote_pool::RemotePool;
use remote_worker_pool::remote_worker::WorkerState;
use remote_worker_pool::transport::{CopyOptions, Transport};

/// Records every command it was asked to build, and reports "not present"
/// for workspace checks so every scenario exercises the transfer path.
struct RecordingTransport {
    copies: Mutex<Vec<(String, String)>>,
}

impl RecordingTransport {
    fn new() -> Self {
        RecordingTransport { copies: Mutex::new(Vec::new()) }
    }
}

impl Transport for RecordingTransport {
    fn shell(&self, _host: &str, _cmd_tokens: &[String]) -> Vec<String> {
        vec!["true".to_string()]
    }

    fn copy(&self, src: &str, dst: &str, _opts: &CopyOptions) -> Vec<String> {
        self.copies.lock().unwrap().push((src.to_string(), dst.to_string()));
        vec!["true".to_string()]
    }

    fn link(&self, _path: &str, _link: &str) -> Vec<String> {
        vec!["true".to_string()]
    }

    fn remote_filepath_exists(&self, _host: &str, _path: &str) -> Vec<String> {
        vec!["false".to_string()]
    }
}

#[test]
fn pool_with_two_hosts_stages_and_runs_independently() {
    let config = PoolConfig::new(vec!["hostA".to_string(), "hostB".to_string()]);
    let transport = RecordingTransport::new();
    let tmp = tempfile::tempdir().unwrap();
    let mut pool = RemotePool::new(&config, &transport);

    let failed = pool.start(tmp.path(), tmp.path());
    assert!(failed.is_empty());

    for id in pool.worker_ids() {
        assert_eq!(pool.worker(&id).unwrap().state(), WorkerState::Running);
        let meta = pool.pull_metadata(&id).unwrap().unwrap();
        assert!(meta.workspace_pushed);
    }

    let failures = pool.stop(&[]);
    assert!(failures.is_empty());
}

#[test]
fn metadata_pull_is_idempotent_across_repeated_queries() {
    let config = PoolConfig::new(vec!["hostA".to_string()]);
    let transport = RecordingTransport::new();
    let tmp = tempfile::tempdir().unwrap();
    let mut pool = RemotePool::new(&config, &transport);
    pool.start(tmp.path(), tmp.path());

    let first = pool.pull_metadata("hostA").unwrap().unwrap();
    let second = pool.pull_metadata("hostA").unwrap().unwrap();
    let third = pool.pull_metadata("hostA").unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(second, third);
}

#[test]
fn workers_per_host_multiplies_worker_count() {
    let config = PoolConfig::new(vec!["hostA".to_string()]).with_workers_per_host(3);
    let transport = RecordingTransport::new();
    let tmp = tempfile::tempdir().unwrap();
    let mut pool = RemotePool::new(&config, &transport);
    pool.start(tmp.path(), tmp.path());
    assert_eq!(pool.worker_ids(), vec!["hostA-0", "hostA-1", "hostA-2"]);
}

#[test]
fn invalid_config_is_rejected_before_touching_the_pool() {
    let config = PoolConfig::new(vec![]);
    assert!(config.validate().is_err());
}

#[test]
fn setup_script_tokens_pass_validation_untouched() {
    let config = PoolConfig::new(vec!["hostA".to_string()])
        .with_setup_script(vec!["echo".to_string(), "hi".to_string()]);
    assert!(config.validate().is_ok());
}

#[test]
fn running_a_command_exercises_the_remote_shell_path() {
    let config = PoolConfig::new(vec!["hostA".to_string()]);
    let transport = RecordingTransport::new();
    let tmp = tempfile::tempdir().unwrap();
    let mut pool = RemotePool::new(&config, &transport);
    pool.start(tmp.path(), tmp.path());

    let worker = pool.worker_mut("hostA").unwrap();
    let out = worker.run_command(&["true".to_string()], None).unwrap();
    assert_eq!(out.exitcode, 0);
    assert_eq!(worker.state(), WorkerState::Running);
}

#[test]
fn stop_pulls_configured_results_back_to_local_paths() {
    let config = PoolConfig::new(vec!["hostA".to_string()]);
    let transport = RecordingTransport::new();
    let tmp = tempfile::tempdir().unwrap();
    let mut pool = RemotePool::new(&config, &transport);
    pool.start(tmp.path(), tmp.path());

    let local_result = tmp.path().join("results").join("out.log");
    let results = vec![remote_worker_pool::path_map::PathPair::new(
        local_result.clone(),
        "/remote/out.log".to_string(),
    )];
    let failures = pool.stop(&results);
    assert!(failures.is_empty());
    assert!(local_result.parent().unwrap().is_dir());
}

#[test]
fn abort_tears_down_every_worker_regardless_of_state() {
    let config = PoolConfig::new(vec!["hostA".to_string(), "hostB".to_string()]);
    let transport = RecordingTransport::new();
    let mut pool = RemotePool::new(&config, &transport);
    // No `start` call: workers are still idle when aborted.
    pool.abort(&[]);
    for id in pool.worker_ids() {
        assert_eq!(pool.worker(&id).unwrap().state(), WorkerState::Done);
    }
}

#[test]
fn remote_paths_use_posix_separators_even_if_local_ones_would_not() {
    let local = PathBuf::from("a/b/c");
    assert_eq!(remote_worker_pool::path_map::to_posix_path(&local), "a/b/c");
}
