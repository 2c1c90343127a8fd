//! Runs OCI-style lifecycle hooks (prestart, create-runtime, poststart,
//! poststop) with JSON container state piped to the hook's stdin.
//!
//! Grounded on `containers-youki`'s hook runner: spawn the hook binary,
//! write state JSON to stdin, wait with a timeout. Timeout is implemented
//! with `std::sync::mpsc::RecvTimeoutError` rather than an async runtime or
//! a new channel crate, since `std::sync::mpsc` already does the job and
//! the teacher pulls in no async runtime.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

use serde::Serialize;

use crate::core::config::Hook;
use crate::error::{Error, Result};

/// Default timeout applied to a hook with no explicit `timeout` set.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The OCI-shaped container state JSON piped to each hook's stdin.
#[derive(Debug, Clone, Serialize)]
pub struct HookState {
    pub id: String,
    pub status: String,
    pub pid: i32,
    pub bundle: String,
    pub annotations: std::collections::HashMap<String, String>,
}

/// Run every hook in `hooks` in order against `state`. The first failure
/// aborts the remaining hooks in the list and is returned to the caller.
pub fn run_hooks(hooks: &[Hook], state: &HookState) -> Result<()> {
    for hook in hooks {
        run_hook(hook, state)?;
    }
    Ok(())
}

fn run_hook(hook: &Hook, state: &HookState) -> Result<()> {
    let state_json = serde_json::to_vec(state)?;

    let mut cmd = Command::new(&hook.path);
    cmd.args(&hook.args)
        .envs(parse_env(&hook.env))
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::io(hook.path.clone(), e))?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(&state_json);
    }

    let timeout = hook
        .timeout
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TIMEOUT);

    wait_with_timeout(child, hook, timeout)
}

/// Wait for the hook child with a timeout, using a background thread plus a
/// one-shot channel. The child is killed if the timeout elapses.
fn wait_with_timeout(
    mut child: std::process::Child,
    hook: &Hook,
    timeout: Duration,
) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    let pid = child.id();

    std::thread::spawn(move || {
        let result = child.wait_with_output();
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(output)) if output.status.success() => Ok(()),
        Ok(Ok(output)) => Err(Error::ChildFailure(format!(
            "hook {} exited with status {}: {}",
            hook.path.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr)
        ))),
        Ok(Err(e)) => Err(Error::io(hook.path.clone(), e)),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid as i32),
                nix::sys::signal::Signal::SIGKILL,
            );
            Err(Error::ChildFailure(format!(
                "hook {} timed out after {timeout:?}",
                hook.path.display()
            )))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::ChildFailure(format!(
            "hook {} worker thread disconnected unexpectedly",
            hook.path.display()
        ))),
    }
}

fn parse_env(entries: &[String]) -> Vec<(String, String)> {
    entries
        .iter()
        .filter_map(|e| e.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sample_state() -> HookState {
        HookState {
            id: "abc123".to_string(),
            status: "created".to_string(),
            pid: 1234,
            bundle: "/tmp/bundle".to_string(),
            annotations: Default::default(),
        }
    }

    #[test]
    fn successful_hook_passes() {
        let hook = Hook {
            path: PathBuf::from("/bin/true"),
            args: vec![],
            env: vec![],
            timeout: Some(5),
        };
        assert!(run_hook(&hook, &sample_state()).is_ok());
    }

    #[test]
    fn failing_hook_reports_error() {
        let hook = Hook {
            path: PathBuf::from("/bin/false"),
            args: vec![],
            env: vec![],
            timeout: Some(5),
        };
        assert!(run_hook(&hook, &sample_state()).is_err());
    }

    #[test]
    fn parse_env_splits_on_equals() {
        let parsed = parse_env(&["FOO=bar".to_string(), "BAD".to_string()]);
        assert_eq!(parsed, vec![("FOO".to_string(), "bar".to_string())]);
    }
}
