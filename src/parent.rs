//! The host-side handle to a container's child stub.
//!
//! Grounded on the teacher's `platform/linux/process.rs` fork/pipe/exec
//! skeleton (`parent_process`/`child_process` split), generalized into a
//! reusable handle type per spec §9's "polymorphism over parent processes"
//! redesign note: a tagged enum (`ParentProcess::Init`/`::Setns`) instead of
//! a trait-object hierarchy.

use std::ffi::CString;
use std::fs::{self, File};
use std::io::Read;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::path::Path;

use nix::sys::signal::Signal;
use nix::sys::socket::{socket, AddressFamily, SockFlag, SockType};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};

use crate::error::{is_benign_terminate_error, Error, Result};

/// The environment-variable name the init stub reads its bootstrap fd from.
pub const ENV_INITTYPE: &str = "_LIBCONTAINER_INITTYPE";
pub const ENV_INITPIPE: &str = "_LIBCONTAINER_INITPIPE";
pub const ENV_LOGPIPE: &str = "_LIBCONTAINER_LOGPIPE";
pub const ENV_STATEDIR: &str = "_LIBCONTAINER_STATEDIR";
pub const ENV_LOGLEVEL: &str = "_LIBCONTAINER_LOGLEVEL";
pub const ENV_FIFOFD: &str = "_LIBCONTAINER_FIFOFD";
pub const ENV_CONSOLE: &str = "_LIBCONTAINER_CONSOLE";

/// The host-side handle to a container's pid-1, reached either by spawning
/// a fresh init stub (`Init`) or by joining an already-running container's
/// namespaces for a secondary process (`Setns`).
pub enum ParentProcess {
    Init(InitParent),
    Setns(SetnsParent),
}

impl ParentProcess {
    pub fn pid(&self) -> i32 {
        match self {
            ParentProcess::Init(p) => p.pid.as_raw(),
            ParentProcess::Setns(p) => p.pid.as_raw(),
        }
    }

    /// Kernel-reported start-time ticks (field 22 of `/proc/<pid>/stat`),
    /// used to detect pid reuse.
    pub fn start_time(&self) -> Result<u64> {
        read_start_time(self.pid())
    }

    pub fn signal(&self, sig: Signal) -> Result<()> {
        nix::sys::signal::kill(Pid::from_raw(self.pid()), sig)
            .map_err(|e| Error::syscall("kill", e))
    }

    /// Kill and reap the child, swallowing "already exited" style errors.
    pub fn terminate(&self) -> Result<()> {
        match self.signal(Signal::SIGKILL) {
            Ok(()) => {}
            Err(e) if is_benign_terminate_error(&e) => return Ok(()),
            Err(e) => return Err(e),
        }
        match waitpid(Pid::from_raw(self.pid()), None) {
            Ok(_) | Err(nix::errno::Errno::ECHILD) => Ok(()),
            Err(e) => Err(Error::syscall("waitpid", e)),
        }
    }

    /// Symbolic names of the stdio destinations this process inherited,
    /// for the state document's `external_descriptors` field.
    pub fn external_descriptors(&self) -> &[String] {
        match self {
            ParentProcess::Init(p) => &p.external_descriptors,
            ParentProcess::Setns(p) => &p.external_descriptors,
        }
    }

    /// Spawn the background log-forwarder thread, if this handle owns a log
    /// pipe (only `Init` does — `Setns` processes share the container's
    /// existing log pipe).
    pub fn forward_child_logs(&mut self) -> Option<std::thread::JoinHandle<()>> {
        match self {
            ParentProcess::Init(p) => p.forward_child_logs(),
            ParentProcess::Setns(_) => None,
        }
    }

    pub fn wait(&self) -> Result<i32> {
        loop {
            match waitpid(Pid::from_raw(self.pid()), None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(code),
                Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(128 + sig as i32),
                Ok(_) => continue,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(Error::syscall("waitpid", e)),
            }
        }
    }
}

/// The handle to a freshly spawned init stub: owns the init pipe (bootstrap
/// message + phase-1 handshake) and the log pipe (forwarded child log
/// records).
pub struct InitParent {
    pub pid: Pid,
    init_sock: OwnedFd,
    log_read: Option<OwnedFd>,
    pub external_descriptors: Vec<String>,
}

/// The handle to a process that joined an already-running container's
/// namespaces (an `exec`'d process, not the container's pid-1).
pub struct SetnsParent {
    pub pid: Pid,
    pub external_descriptors: Vec<String>,
}

impl InitParent {
    /// Spawn the init stub: re-exec `/proc/self/exe init`, wire up the init
    /// socketpair and log pipe, and write the bootstrap message. Returns
    /// before phase-1 completes; callers await completion via
    /// [`InitParent::await_phase1`].
    ///
    /// # Safety
    ///
    /// Calls `fork()`; the child immediately execs or `_exit`s, so no other
    /// thread state is observed across the fork boundary.
    pub fn spawn(
        bootstrap_message: &[u8],
        state_dir: &Path,
        rootfs: &Path,
        extra_env: &[(&str, String)],
        mount_fds: &[OwnedFd],
    ) -> Result<Self> {
        let (parent_sock, child_sock) = socketpair_seqpacket()?;
        let (log_read, log_write) = nix::unistd::pipe().map_err(|e| Error::syscall("pipe", e))?;

        let child_sock_raw = child_sock.into_raw_fd();
        let log_write_raw = log_write.into_raw_fd();

        // SAFETY: single-threaded at this point in the lifecycle (the core
        // serializes all public operations on one mutex), so fork is sound.
        match unsafe { unistd::fork() }.map_err(|e| Error::syscall("fork", e))? {
            ForkResult::Parent { child } => {
                unsafe {
                    libc::close(child_sock_raw);
                    libc::close(log_write_raw);
                }
                write_bootstrap(&parent_sock, bootstrap_message, mount_fds)?;
                Ok(Self {
                    pid: child,
                    init_sock: parent_sock,
                    log_read: Some(log_read),
                    external_descriptors: vec![
                        "pipe:[stdin]".to_string(),
                        "pipe:[stdout]".to_string(),
                        "pipe:[stderr]".to_string(),
                    ],
                })
            }
            ForkResult::Child => {
                drop(log_read);
                drop(parent_sock);
                exec_init_stub(
                    child_sock_raw,
                    log_write_raw,
                    state_dir,
                    rootfs,
                    extra_env,
                );
                // exec_init_stub never returns on success.
                std::process::exit(127);
            }
        }
    }

    /// Block until the init stub reports phase-1 completion (namespaces
    /// entered, cgroup applied, id-maps installed) over the init socket.
    pub fn await_phase1(&self) -> Result<()> {
        let mut buf = [0u8; 1];
        let n = nix::sys::socket::recv(self.init_sock.as_raw_fd(), &mut buf, nix::sys::socket::MsgFlags::empty())
            .map_err(|e| Error::syscall("recv(init_sock)", e))?;
        if n == 0 {
            return Err(Error::ChildFailure(
                "init stub closed the init pipe before signaling readiness".to_string(),
            ));
        }
        Ok(())
    }

    fn forward_child_logs(&mut self) -> Option<std::thread::JoinHandle<()>> {
        let read_fd = self.log_read.take()?;
        Some(std::thread::spawn(move || {
            let mut file = unsafe { File::from_raw_fd(read_fd.into_raw_fd()) };
            let mut buf = String::new();
            if file.read_to_string(&mut buf).is_ok() {
                for line in buf.lines() {
                    log::info!(target: "craterun::init", "{line}");
                }
            }
        }))
    }
}

fn socketpair_seqpacket() -> Result<(OwnedFd, OwnedFd)> {
    nix::sys::socket::socketpair(
        AddressFamily::Unix,
        SockType::SeqPacket,
        None,
        SockFlag::SOCK_CLOEXEC,
    )
    .map_err(|e| Error::syscall("socketpair", e))
}

/// Send the bootstrap message, attaching any bind-mount source fds via
/// `SCM_RIGHTS` (spec §4.2) so the init stub never has to re-resolve those
/// paths from inside the new namespaces.
fn write_bootstrap(sock: &OwnedFd, message: &[u8], mount_fds: &[OwnedFd]) -> Result<()> {
    use nix::sys::socket::{sendmsg, ControlMessage, MsgFlags};
    use std::io::IoSlice;

    let iov = [IoSlice::new(message)];
    let raw_fds: Vec<RawFd> = mount_fds.iter().map(|f| f.as_raw_fd()).collect();
    let cmsgs = if raw_fds.is_empty() {
        Vec::new()
    } else {
        vec![ControlMessage::ScmRights(&raw_fds)]
    };

    sendmsg::<()>(sock.as_raw_fd(), &iov, &cmsgs, MsgFlags::empty(), None)
        .map_err(|e| Error::syscall("sendmsg(bootstrap)", e))?;
    Ok(())
}

/// Re-exec this binary as `init`, wiring the bootstrap fds into the
/// environment the stub expects (spec §4.2 step 3). Does not return on
/// success.
fn exec_init_stub(
    init_sock: RawFd,
    log_write: RawFd,
    state_dir: &Path,
    _rootfs: &Path,
    extra_env: &[(&str, String)],
) -> ! {
    let exe = CString::new("/proc/self/exe").unwrap();
    let argv = [CString::new("craterun").unwrap(), CString::new("init").unwrap()];

    let mut env: Vec<CString> = vec![
        cstring_env(ENV_INITTYPE, "standard"),
        cstring_env(ENV_INITPIPE, &init_sock.to_string()),
        cstring_env(ENV_LOGPIPE, &log_write.to_string()),
        cstring_env(ENV_STATEDIR, &state_dir.display().to_string()),
        cstring_env(ENV_LOGLEVEL, "info"),
    ];
    for (k, v) in extra_env {
        env.push(cstring_env(k, v));
    }

    let _ = nix::unistd::execve(&exe, &argv, &env);
    // execve only returns on error.
    std::process::exit(127)
}

fn cstring_env(key: &str, value: &str) -> CString {
    CString::new(format!("{key}={value}")).expect("env value must not contain NUL")
}

fn read_start_time(pid: i32) -> Result<u64> {
    let path = format!("/proc/{pid}/stat");
    let data = fs::read_to_string(&path).map_err(|e| Error::io(path.clone().into(), e))?;
    // Field 22, but the comm field (field 2) is parenthesized and may
    // itself contain spaces, so split after the last ')'.
    let after_comm = data
        .rsplit_once(')')
        .map(|(_, rest)| rest)
        .ok_or_else(|| Error::Other(format!("malformed {path}")))?;
    after_comm
        .split_whitespace()
        .nth(19) // fields after comm: state(0) ppid(1) ... starttime is index 19 here
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Other(format!("could not parse starttime from {path}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_start_time_for_self() {
        let pid = std::process::id() as i32;
        let start = read_start_time(pid);
        assert!(start.is_ok());
    }

    #[test]
    fn cstring_env_formats_key_value() {
        let c = cstring_env("FOO", "bar");
        assert_eq!(c.to_str().unwrap(), "FOO=bar");
    }
}
