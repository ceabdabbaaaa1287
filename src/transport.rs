//! Builds host-specific command lines and runs subprocesses reliably.
//!
//! This is the only place that shells out. The default implementation wraps
//! `ssh`/`scp`/`ln`, but every builder is also exposed as a free function so
//! callers can inject their own via [`Transport`], the way the source
//! allowed `ssh_cmd`/`copy_cmd`/`link_cmd` to be swapped out.

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Instant;

use log::{debug, trace};

use crate::error::{Error, Result};

/// Options accepted by [`Transport::copy`].
#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    pub exclude: Vec<String>,
}

/// Options accepted by [`Transport::exec`].
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub label: Option<String>,
    pub check: bool,
    pub capture_stdout: bool,
    pub capture_stderr: bool,
}

impl ExecOptions {
    pub fn checked() -> Self {
        ExecOptions { check: true, ..Default::default() }
    }

    pub fn unchecked() -> Self {
        ExecOptions { check: false, ..Default::default() }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Result of running a subprocess via [`Transport::exec`].
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub exitcode: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Capability set of command builders for talking to a remote host.
/// Implementations build argvs only; running them goes through `exec`.
pub trait Transport: Send + Sync {
    /// Builds a remote-shell invocation for `host` whose payload is the
    /// space-joined `cmd_tokens`.
    fn shell(&self, host: &str, cmd_tokens: &[String]) -> Vec<String>;

    /// Builds a copy command. Either `src` or `dst` may be a `user@host:path`
    /// remote spec; `opts.exclude` is a sequence of glob patterns.
    fn copy(&self, src: &str, dst: &str, opts: &CopyOptions) -> Vec<String>;

    /// Builds a symlink command: `link -> path` on the remote.
    fn link(&self, path: &str, link: &str) -> Vec<String>;

    /// Builds a probe command whose exit status indicates whether `path`
    /// exists on `host`. Used as the default `copy_workspace_check`.
    fn remote_filepath_exists(&self, host: &str, path: &str) -> Vec<String> {
        self.shell(host, &["test".to_string(), "-e".to_string(), path.to_string()])
    }
}

/// Default transport: `ssh` for remote shell and link, `scp`/rsync-style
/// `--exclude` flags for copy.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTransport;

impl Transport for DefaultTransport {
    fn shell(&self, host: &str, cmd_tokens: &[String]) -> Vec<String> {
        vec!["ssh".to_string(), host.to_string(), cmd_tokens.join(" ")]
    }

    fn copy(&self, src: &str, dst: &str, opts: &CopyOptions) -> Vec<String> {
        let mut argv = vec!["scp".to_string(), "-r".to_string()];
        for pattern in &opts.exclude {
            argv.push(format!("--exclude={pattern}"));
        }
        argv.push(src.to_string());
        argv.push(dst.to_string());
        argv
    }

    fn link(&self, path: &str, link: &str) -> Vec<String> {
        vec!["ln".to_string(), "-s".to_string(), path.to_string(), link.to_string()]
    }
}

/// Formats a local path or `user@host:path` remote path for use as a copy
/// source/destination.
pub fn remote_copy_spec(user: &str, host: &str, path: &str) -> String {
    if user.is_empty() {
        format!("{host}:{path}")
    } else {
        format!("{user}@{host}:{path}")
    }
}

/// Runs a subprocess, priming its stdin with `y\n` to pre-accept any
/// host-key/interactive prompt the underlying transport might raise, then
/// waits for it to exit. This byte sequence is a contract some remote-shell
/// tools expect on first connection.
pub fn exec(argv: &[String], opts: &ExecOptions) -> Result<ExecOutput> {
    trace!("exec {:?}", argv);
    let start = Instant::now();

    let (program, args) = argv.split_first().expect("argv must be non-empty");
    let mut command = Command::new(program);
    command.args(args);
    command.stdin(Stdio::piped());
    command.stdout(if opts.capture_stdout { Stdio::piped() } else { Stdio::inherit() });
    command.stderr(if opts.capture_stderr { Stdio::piped() } else { Stdio::inherit() });

    let mut child = command.spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(b"y\n");
        // Drop closes stdin, signalling no more input is coming.
    }

    let output = child.wait_with_output()?;
    let exitcode = output.status.code().unwrap_or(-1);

    if let Some(label) = &opts.label {
        debug!("command [{label}] finished in {:?}", start.elapsed());
    }

    if opts.check && exitcode != 0 {
        return Err(Error::RemoteCommandFailed { argv: argv.to_vec(), exitcode });
    }

    Ok(ExecOutput { exitcode, stdout: output.stdout, stderr: output.stderr })
}

/// Composition of [`Transport::shell`] followed by [`exec`].
pub fn exec_remote(
    transport: &dyn Transport,
    host: &str,
    cmd_tokens: &[String],
    opts: &ExecOptions,
) -> Result<ExecOutput> {
    let argv = transport.shell(host, cmd_tokens);
    exec(&argv, opts)
}

/// Spawns a long-running subprocess without waiting for it, priming its
/// stdin with the same `y\n` sequence as [`exec`] and leaving stdout/stderr
/// inherited. Used to launch the remote worker's child process, which is
/// expected to keep running until [`kill`] tears it down.
pub fn spawn_piped(argv: &[String]) -> Result<std::process::Child> {
    trace!("spawn {:?}", argv);
    let (program, args) = argv.split_first().expect("argv must be non-empty");
    let mut command = Command::new(program);
    command.args(args);
    command.stdin(Stdio::piped());
    command.stdout(Stdio::inherit());
    command.stderr(Stdio::inherit());

    let mut child = command.spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(b"y\n");
    }
    Ok(child)
}

/// Terminates a spawned child best-effort: if it has already exited this is
/// a no-op, otherwise it is killed and reaped so no zombie is left behind.
pub fn kill(child: &mut std::process::Child) {
    match child.try_wait() {
        Ok(Some(_)) => {}
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
        }
        Err(err) => debug!("failed to check child status before kill: {err}"),
    }
}
