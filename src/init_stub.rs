//! The in-container half of the two-process bootstrap (spec §4.2): the
//! process `/proc/self/exe init` re-execs into, invoked from `main` when
//! `argv[1] == "init"`.
//!
//! Grounded on the teacher's `platform/linux/process.rs::init_container`,
//! rewritten against the bootstrap TLV decoder and the richer
//! [`crate::core::config::Config`] instead of the teacher's flat
//! `ContainerConfig`.

use std::env;
use std::ffi::CString;
use std::io::IoSliceMut;
use std::os::fd::RawFd;
use std::path::PathBuf;

use nix::cmsg_space;
use nix::sched::CloneFlags;
use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{self, ForkResult};

use crate::bootstrap::{self, BootstrapMessage};
use crate::core::config::{Config, NamespaceType, Process};
use crate::core::state;
use crate::error::{Error, Result};
use crate::{fifo, mounts, namespaces};

/// Entry point for `craterun init`. Never returns: either the user's
/// command replaces this process, or setup failed and the process exits
/// non-zero after writing a message to the log pipe (best-effort) and
/// stderr.
pub fn run() -> ! {
    match run_inner() {
        Ok(()) => unreachable!("exec replaces the process on success"),
        Err(e) => {
            eprintln!("craterun init: {e:#}");
            std::process::exit(1);
        }
    }
}

fn env_fd(name: &str) -> Result<RawFd> {
    env::var(name)
        .map_err(|_| Error::Other(format!("missing env var {name}")))?
        .parse::<RawFd>()
        .map_err(|_| Error::Other(format!("invalid fd in env var {name}")))
}

/// Receive the bootstrap message, plus any bind-mount source fds the parent
/// attached via `SCM_RIGHTS` (spec §4.2's mount-source-fd protocol). The fds
/// arrive in the same order the parent opened them in (every `Some` entry of
/// the decoded message's `mount_sources`, in index order).
fn recv_bootstrap(init_sock: RawFd) -> Result<(BootstrapMessage, Vec<RawFd>)> {
    let mut buf = vec![0u8; 64 * 1024];
    let mut iov = [IoSliceMut::new(&mut buf)];
    let mut cmsg_buf = cmsg_space!([RawFd; 16]);

    let msg = recvmsg::<()>(
        init_sock,
        &mut iov,
        Some(&mut cmsg_buf),
        MsgFlags::MSG_CMSG_CLOEXEC,
    )
    .map_err(|e| Error::syscall("recvmsg(bootstrap)", e))?;

    let mut fds = Vec::new();
    for cmsg in msg.cmsgs().map_err(|e| Error::syscall("cmsgs(bootstrap)", e))? {
        if let ControlMessageOwned::ScmRights(received) = cmsg {
            fds.extend(received);
        }
    }

    let decoded = bootstrap::decode(&buf[..msg.bytes]).map_err(|e| Error::InvalidConfig(e.to_string()))?;
    Ok((decoded, fds))
}

/// Zip the bootstrap message's per-mount `Some`/`None` markers against the
/// flat list of fds received via ancillary data, producing a `mount_fds`
/// list aligned 1:1 with `Config::mounts` for [`mounts::apply_mounts`].
fn align_mount_fds(mount_sources: &[Option<String>], fds: &[RawFd]) -> Vec<Option<RawFd>> {
    let mut received = fds.iter().copied();
    mount_sources
        .iter()
        .map(|marker| marker.as_ref().and_then(|_| received.next()))
        .collect()
}

fn run_inner() -> Result<()> {
    let init_sock = env_fd(crate::parent::ENV_INITPIPE)?;
    let state_dir = PathBuf::from(
        env::var(crate::parent::ENV_STATEDIR)
            .map_err(|_| Error::Other("missing env var _LIBCONTAINER_STATEDIR".to_string()))?,
    );

    let (msg, mount_fds) = recv_bootstrap(init_sock)?;
    let aligned_mount_fds = align_mount_fds(&msg.mount_sources, &mount_fds);
    let doc = state::load(&state_dir)?;
    let config = doc.config;
    let process_bytes = std::fs::read(state_dir.join("process.json"))
        .map_err(|e| Error::io(state_dir.join("process.json"), e))?;
    let process: Process = serde_json::from_slice(&process_bytes)?;

    apply_namespaces(&msg)?;
    apply_id_maps(&msg)?;

    let clone_flags = CloneFlags::from_bits_truncate(msg.clone_flags);
    if clone_flags.contains(CloneFlags::CLONE_NEWPID) {
        // `unshare(CLONE_NEWPID)` only affects children forked afterwards;
        // fork once more so the grandchild becomes pid 1 of the new
        // namespace, mirroring the teacher's inner-fork split.
        match unsafe { unistd::fork() }.map_err(|e| Error::syscall("fork(pidns)", e))? {
            ForkResult::Parent { child } => {
                let code = match waitpid(child, None) {
                    Ok(WaitStatus::Exited(_, c)) => c,
                    Ok(WaitStatus::Signaled(_, sig, _)) => 128 + sig as i32,
                    _ => 1,
                };
                std::process::exit(code);
            }
            ForkResult::Child => {}
        }
    }

    if config.has_new_namespace(NamespaceType::Uts) {
        namespaces::set_hostname(&config.hostname)?;
    }

    setup_mounts(&config, &aligned_mount_fds)?;

    if let Some(adj) = msg.oom_score_adj {
        let _ = std::fs::write("/proc/self/oom_score_adj", adj.to_string());
    }

    // Phase 1 complete: namespaces entered, id-maps installed, mounts done.
    // Signal the parent over the init socket.
    nix::sys::socket::send(init_sock, &[1u8], MsgFlags::empty())
        .map_err(|e| Error::syscall("send(phase1)", e))?;

    if process.init {
        wait_on_exec_fifo(&state_dir)?;
    }

    exec_process(&process)
}

fn apply_namespaces(msg: &BootstrapMessage) -> Result<()> {
    let flags = CloneFlags::from_bits_truncate(msg.clone_flags) & !CloneFlags::CLONE_NEWPID;
    namespaces::unshare_namespaces(flags)?;
    namespaces::setns_all(&msg.ns_paths)?;
    Ok(())
}

fn apply_id_maps(msg: &BootstrapMessage) -> Result<()> {
    if msg.setgroup {
        let _ = std::fs::write("/proc/self/setgroups", "deny");
    }
    if let Some(uid_map) = &msg.uid_map {
        std::fs::write("/proc/self/uid_map", uid_map)
            .map_err(|e| Error::io(PathBuf::from("/proc/self/uid_map"), e))?;
    }
    if let Some(gid_map) = &msg.gid_map {
        std::fs::write("/proc/self/gid_map", gid_map)
            .map_err(|e| Error::io(PathBuf::from("/proc/self/gid_map"), e))?;
    }
    Ok(())
}

fn setup_mounts(config: &Config, mount_fds: &[Option<RawFd>]) -> Result<()> {
    mounts::make_mount_private()?;
    mounts::bind_mount_rootfs(&config.rootfs)?;
    mounts::mount_proc(&config.rootfs)?;
    mounts::apply_mounts(&config.rootfs, &config.mounts, mount_fds)?;
    mounts::pivot_root(&config.rootfs)?;
    mounts::mount_proc_in_new_root()?;
    mounts::mount_dev_in_new_root()?;
    Ok(())
}

fn wait_on_exec_fifo(state_dir: &std::path::Path) -> Result<()> {
    use std::io::Write;

    let path = fifo::fifo_path(state_dir);
    // Blocking open-for-write: unblocks once the host calls `Container::exec`
    // and opens the other end for reading (spec §4.3).
    let mut f = std::fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .map_err(|e| Error::io(path.clone(), e))?;
    f.write_all(&[1u8]).map_err(|e| Error::io(path, e))?;
    Ok(())
}

fn exec_process(process: &Process) -> Result<()> {
    if process.args.is_empty() {
        return Err(Error::InvalidConfig("no command specified".to_string()));
    }

    unistd::chdir(process.cwd.as_str()).map_err(|e| Error::syscall("chdir", e))?;

    let program = CString::new(process.args[0].as_str())
        .map_err(|_| Error::InvalidConfig(format!("invalid command: {}", process.args[0])))?;
    let args: Vec<CString> = process
        .args
        .iter()
        .map(|a| CString::new(a.as_str()).map_err(|_| Error::InvalidConfig("invalid argument".to_string())))
        .collect::<Result<_>>()?;

    let mut env: Vec<CString> = process
        .env
        .iter()
        .filter_map(|e| CString::new(e.as_str()).ok())
        .collect();
    if !process.env.iter().any(|e| e.starts_with("PATH=")) {
        env.push(
            CString::new("PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin")
                .unwrap(),
        );
    }

    nix::unistd::execve(&program, &args, &env).map_err(|e| Error::syscall("execve", e))?;
    unreachable!("execve only returns on error, which is propagated above")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_fd_parses_valid_number() {
        std::env::set_var("TEST_INIT_FD", "7");
        assert_eq!(env_fd("TEST_INIT_FD").unwrap(), 7);
        std::env::remove_var("TEST_INIT_FD");
    }

    #[test]
    fn env_fd_rejects_missing_var() {
        std::env::remove_var("TEST_INIT_FD_MISSING");
        assert!(env_fd("TEST_INIT_FD_MISSING").is_err());
    }
}
