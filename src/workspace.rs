//! Decides how the worker's workspace directory gets onto the remote host.
//!
//! Mirrors the source's `_copy_workspace`: three mutually exclusive paths,
//! tried in order, each cheaper than the last.
//!   1. `remote_workspace` was configured explicitly: symlink to it, push
//!      nothing.
//!   2. `copy_workspace_check` reports the remote already has an identical
//!      workspace (e.g. shared filesystem): symlink to it, push nothing.
//!   3. Otherwise: transfer the whole workspace tree and remember that we
//!      did (`workspace_pushed = true`), since the pull phase needs to know
//!      whether results live under a pushed copy or the original tree.

use crate::error::Result;
use crate::path_map::{fix_home_prefix, to_posix_path};
use crate::transport::{CopyOptions, ExecOptions, Transport};
use log::{debug, info};
use std::path::Path;

/// Outcome of [`stage_workspace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePlacement {
    /// The path workers should treat as their working directory root.
    pub remote_workspace: String,
    /// Whether the workspace tree was actually copied (as opposed to
    /// symlinked to a preexisting or shared one).
    pub workspace_pushed: bool,
}

/// A check for whether the remote already has a usable workspace at the
/// computed destination. Exposed as a trait so tests don't need a real
/// remote host; [`exit_code_check`] adapts a [`Transport`] into one.
pub trait WorkspaceCheck {
    /// Returns `true` if the remote workspace can be reused as-is.
    fn workspace_already_present(&self, host: &str, remote_path: &str) -> Result<bool>;
}

/// Default check: runs the transport's `copy_workspace_check` equivalent
/// (a remote `test -e`) and treats exit code 0 as "already present".
pub struct ExecWorkspaceCheck<'a> {
    pub transport: &'a dyn Transport,
}

impl<'a> WorkspaceCheck for ExecWorkspaceCheck<'a> {
    fn workspace_already_present(&self, host: &str, remote_path: &str) -> Result<bool> {
        let argv = self.transport.remote_filepath_exists(host, remote_path);
        let out = crate::transport::exec(&argv, &ExecOptions::unchecked())?;
        Ok(out.exitcode == 0)
    }
}

/// Decides placement and, if needed, performs the transfer.
///
/// `local_workspace` is the worker's local directory; `remote_workspace` is
/// the single destination path this worker's workspace ends up at on the
/// remote host, whether that's a transferred copy, a symlink to a
/// preconfigured location, or a symlink to a shared copy that was already
/// there. `preconfigured_remote_workspace` is the user's explicit
/// `remote_workspace` override, if any.
pub fn stage_workspace(
    transport: &dyn Transport,
    check: &dyn WorkspaceCheck,
    host: &str,
    local_workspace: &Path,
    remote_workspace: &str,
    preconfigured_remote_workspace: Option<&str>,
    exclude: &[String],
) -> Result<WorkspacePlacement> {
    if let Some(preset) = preconfigured_remote_workspace {
        let preset = fix_home_prefix(preset);
        info!("using preconfigured remote workspace {preset}");
        link_to(transport, &preset, remote_workspace)?;
        return Ok(WorkspacePlacement {
            remote_workspace: remote_workspace.to_string(),
            workspace_pushed: false,
        });
    }

    let local_posix = to_posix_path(local_workspace);
    if check.workspace_already_present(host, &local_posix)? {
        debug!("remote already has a copy of {local_posix}, linking instead of transferring");
        link_to(transport, &local_posix, remote_workspace)?;
        return Ok(WorkspacePlacement {
            remote_workspace: remote_workspace.to_string(),
            workspace_pushed: false,
        });
    }

    transfer_workspace(transport, host, local_workspace, remote_workspace, exclude)?;
    Ok(WorkspacePlacement {
        remote_workspace: remote_workspace.to_string(),
        workspace_pushed: true,
    })
}

fn link_to(transport: &dyn Transport, target: &str, link: &str) -> Result<()> {
    let argv = transport.link(target, link);
    crate::transport::exec(&argv, &ExecOptions::checked().with_label("link_workspace"))?;
    Ok(())
}

fn transfer_workspace(
    transport: &dyn Transport,
    host: &str,
    local_workspace: &Path,
    remote_workspace: &str,
    exclude: &[String],
) -> Result<()> {
    let src = to_posix_path(local_workspace);
    let dst = crate::transport::remote_copy_spec("", host, remote_workspace);
    let opts = CopyOptions { exclude: exclude.to_vec() };
    let argv = transport.copy(&src, &dst, &opts);
    crate::transport::exec(&argv, &ExecOptions::checked().with_label("transfer_workspace"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::path::PathBuf;

    struct FakeTransport {
        linked: Cell<Option<(String, String)>>,
        copied: Cell<Option<(String, String)>>,
    }

    impl FakeTransport {
        fn new() -> Self {
            FakeTransport { linked: Cell::new(None), copied: Cell::new(None) }
        }
    }

    impl Transport for FakeTransport {
        fn shell(&self, _host: &str, _cmd_tokens: &[String]) -> Vec<String> {
            vec!["true".to_string()]
        }

        fn copy(&self, src: &str, dst: &str, _opts: &CopyOptions) -> Vec<String> {
            self.copied.set(Some((src.to_string(), dst.to_string())));
            vec!["true".to_string()]
        }

        fn link(&self, path: &str, link: &str) -> Vec<String> {
            self.linked.set(Some((path.to_string(), link.to_string())));
            vec!["true".to_string()]
        }
    }

    struct AlwaysPresent;
    impl WorkspaceCheck for AlwaysPresent {
        fn workspace_already_present(&self, _host: &str, _remote_path: &str) -> Result<bool> {
            Ok(true)
        }
    }

    struct NeverPresent;
    impl WorkspaceCheck for NeverPresent {
        fn workspace_already_present(&self, _host: &str, _remote_path: &str) -> Result<bool> {
            Ok(false)
        }
    }

    #[test]
    fn preconfigured_remote_workspace_symlinks_and_skips_transfer() {
        let t = FakeTransport::new();
        let placement = stage_workspace(
            &t,
            &NeverPresent,
            "host1",
            &PathBuf::from("/local/ws"),
            "/remote/testplan/ws",
            Some("/shared/preset_ws"),
            &[],
        )
        .unwrap();
        assert!(!placement.workspace_pushed);
        assert_eq!(placement.remote_workspace, "/remote/testplan/ws");
        assert_eq!(t.linked.take(), Some(("/shared/preset_ws".to_string(), "/remote/testplan/ws".to_string())));
        assert!(t.copied.take().is_none());
    }

    #[test]
    fn preconfigured_remote_workspace_normalizes_a_leading_tilde() {
        let t = FakeTransport::new();
        let placement = stage_workspace(
            &t,
            &NeverPresent,
            "host1",
            &PathBuf::from("/local/ws"),
            "/remote/testplan/ws",
            Some("~/preset_ws"),
            &[],
        )
        .unwrap();
        assert_eq!(placement.remote_workspace, "/remote/testplan/ws");
        assert_eq!(t.linked.take(), Some(("$HOME/preset_ws".to_string(), "/remote/testplan/ws".to_string())));
    }

    #[test]
    fn existing_remote_workspace_links_to_the_local_path_instead_of_transferring() {
        let t = FakeTransport::new();
        let placement = stage_workspace(
            &t,
            &AlwaysPresent,
            "host1",
            &PathBuf::from("/local/ws"),
            "/remote/testplan/ws",
            None,
            &[],
        )
        .unwrap();
        assert!(!placement.workspace_pushed);
        assert_eq!(placement.remote_workspace, "/remote/testplan/ws");
        assert_eq!(t.linked.take(), Some(("/local/ws".to_string(), "/remote/testplan/ws".to_string())));
        assert!(t.copied.take().is_none());
    }

    #[test]
    fn missing_remote_workspace_transfers_and_marks_pushed() {
        let t = FakeTransport::new();
        let placement = stage_workspace(
            &t,
            &NeverPresent,
            "host1",
            &PathBuf::from("/local/ws"),
            "/remote/testplan/ws",
            None,
            &["*.pyc".to_string()],
        )
        .unwrap();
        assert!(placement.workspace_pushed);
        assert_eq!(placement.remote_workspace, "/remote/testplan/ws");
        assert!(t.linked.take().is_none());
        let (src, dst) = t.copied.take().unwrap();
        assert_eq!(src, "/local/ws");
        assert_eq!(dst, "host1:/remote/testplan/ws");
    }
}
