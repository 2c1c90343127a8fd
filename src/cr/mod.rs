//! The checkpoint/restore driver: spawns the C/R helper, drives the RPC
//! handshake, and dispatches its asynchronous notifications (spec §4.6).
//!
//! No single pack file implements a CRIU RPC loop in Rust; grounded on the
//! shape spec §4.6 describes directly, using the same length-framed-socket
//! idiom the teacher already uses for its init pipe (`nix::unistd::pipe`/
//! fork) generalized to `nix::sys::socket::socketpair` with
//! `SOCK_SEQPACKET`.

pub mod rpc;

use std::collections::HashMap;
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::sys::wait::waitpid;
use nix::unistd::{self, ForkResult, Pid};

use crate::core::config::{MountConfig, VethPair};
use crate::error::{Error, Result};
use crate::network::NetworkStrategy;
use rpc::{CriuNotify, CriuOpts, CriuRequest, CriuResponse, ReqType};

/// Minimum accepted helper version (3.0.0).
pub const MIN_VERSION: u32 = 30000;
const FEATURE_NETWORK_EXTERNAL_NS: u32 = 31100;
const FEATURE_PID_EXTERNAL_NS: u32 = 31500;
const FEATURE_CGROUP_V2_FREEZER: u32 = 31400;
const FEATURE_LSM_PROFILE: u32 = 31600;
const FEATURE_STATUS_NOTIFICATIONS: u32 = 31500;

/// Options for [`CrDriver::dump`].
#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
    pub images_dir: PathBuf,
    pub leave_running: bool,
    pub pre_dump: bool,
    pub mem_track: bool,
    pub tcp_established: bool,
}

/// Options for [`CrDriver::restore`].
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub images_dir: PathBuf,
    pub detach: bool,
}

/// Callbacks the driver invokes for each notification type the RPC loop
/// dispatches (spec §4.6.1). Kept as trait-object closures so `CrDriver`
/// does not need to know about `Container` internals.
pub struct NotifyHandlers<'a> {
    pub post_dump: &'a dyn Fn() -> Result<()>,
    pub network: &'a dyn NetworkStrategy,
    pub setup_namespaces: &'a dyn Fn(i32) -> Result<()>,
    pub post_restore: &'a dyn Fn(i32) -> Result<()>,
    pub orphan_pts_master: &'a dyn Fn(RawFd) -> Result<()>,
    pub status_ready: &'a dyn Fn(RawFd) -> Result<()>,
}

/// The host-side handle to a running `criu swrk` helper process.
pub struct CrDriver {
    helper_pid: Pid,
    sock: OwnedFd,
    version: Option<u32>,
    features: HashMap<String, bool>,
}

impl CrDriver {
    /// Spawn `criu swrk 3` with the server half of a fresh `SOCK_SEQPACKET`
    /// pair at fd 3.
    ///
    /// # Safety
    ///
    /// Calls `fork()`; the child immediately execs or `_exit`s.
    pub fn spawn() -> Result<Self> {
        let (client, server) = socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::empty(),
        )
        .map_err(|e| Error::syscall("socketpair(cr)", e))?;

        let server_raw = server.into_raw_fd();

        match unsafe { unistd::fork() }.map_err(|e| Error::syscall("fork(cr helper)", e))? {
            ForkResult::Parent { child } => {
                unsafe { libc::close(server_raw) };
                Ok(Self {
                    helper_pid: child,
                    sock: client,
                    version: None,
                    features: HashMap::new(),
                })
            }
            ForkResult::Child => {
                // Move the server socket onto fd 3, the contract `criu swrk`
                // expects.
                if server_raw != 3 {
                    let _ = nix::unistd::dup2(server_raw, 3);
                    unsafe { libc::close(server_raw) };
                }
                drop(client);
                let program = std::ffi::CString::new("criu").unwrap();
                let args = [
                    std::ffi::CString::new("criu").unwrap(),
                    std::ffi::CString::new("swrk").unwrap(),
                    std::ffi::CString::new("3").unwrap(),
                ];
                let _ = nix::unistd::execvp(&program, &args);
                std::process::exit(127);
            }
        }
    }

    fn fd(&self) -> RawFd {
        self.sock.as_raw_fd()
    }

    /// Query and cache the helper's version, rejecting anything below
    /// [`MIN_VERSION`].
    pub fn negotiate_version(&mut self) -> Result<u32> {
        rpc::send_frame(self.fd(), &CriuRequest::new(ReqType::Version, CriuOpts::default()))?;
        let (resp, _fds) = rpc::recv_frame(self.fd())?;
        let version = resp.version.unwrap_or(0);
        if version < MIN_VERSION {
            return Err(Error::VersionTooOld {
                found: version,
                minimum: MIN_VERSION,
            });
        }
        self.version = Some(version);
        Ok(version)
    }

    /// Gate a specific feature behind the helper's negotiated version.
    fn require_version(&self, feature: &'static str, minimum: u32) -> Result<()> {
        let have = self.version.unwrap_or(0);
        if have < minimum {
            return Err(Error::FeatureMissing(format!(
                "{feature} requires helper version >= {minimum}, have {have}"
            )));
        }
        Ok(())
    }

    /// Send a `FEATURE_CHECK` request for the given sparse feature set and
    /// verify every requested feature is present.
    pub fn feature_check(&mut self, required: &HashMap<String, bool>) -> Result<()> {
        let mut req = CriuRequest::new(ReqType::FeatureCheck, CriuOpts::default());
        req.features = required.clone();
        rpc::send_frame(self.fd(), &req)?;
        let (resp, _fds) = rpc::recv_frame(self.fd())?;

        self.features = resp.features.clone();
        for (name, wanted) in required {
            if *wanted && !resp.features.get(name).copied().unwrap_or(false) {
                return Err(Error::FeatureMissing(name.clone()));
            }
        }
        Ok(())
    }

    /// Dump flow (spec §4.6 "Dump flow").
    pub fn dump(
        &mut self,
        mounts: &[MountConfig],
        devices: &[PathBuf],
        opts: &DumpOptions,
        handlers: NotifyHandlers<'_>,
    ) -> Result<()> {
        std::fs::create_dir_all(&opts.images_dir).map_err(|e| Error::io(opts.images_dir.clone(), e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&opts.images_dir, std::fs::Permissions::from_mode(0o700));
        }

        if opts.pre_dump {
            self.require_version("mem_track pre-dump", FEATURE_CGROUP_V2_FREEZER)?;
        }

        let mut ext_mnt = Vec::new();
        for m in mounts {
            if m.is_bind {
                ext_mnt.push((m.destination.display().to_string(), m.destination.display().to_string()));
            }
        }
        let external: Vec<String> = devices.iter().map(|d| d.display().to_string()).collect();

        let descriptors: Vec<String> = Vec::new();
        let descriptors_path = opts.images_dir.join("descriptors.json");
        std::fs::write(&descriptors_path, serde_json::to_string(&descriptors)?)
            .map_err(|e| Error::io(descriptors_path, e))?;

        // Kept open until the rpc loop returns so the fd number stays valid
        // for a `status-ready` notify; both ends close automatically when
        // dropped at the end of this function (spec §4.6 "status fd").
        let (_status_read, status_write) =
            nix::unistd::pipe().map_err(|e| Error::syscall("pipe(status)", e))?;

        let criu_opts = CriuOpts {
            ext_mnt,
            external,
            tcp_established: opts.tcp_established,
            manage_cgroups: true,
            notify_scripts: true,
            status_fd: Some(status_write.as_raw_fd()),
            ..Default::default()
        };

        let req_type = if opts.pre_dump { ReqType::PreDump } else { ReqType::Dump };
        self.rpc_loop(CriuRequest::new(req_type, criu_opts), handlers)
    }

    /// Restore flow (spec §4.6 "Restore flow").
    pub fn restore(
        &mut self,
        root: &Path,
        rootfs: &Path,
        mounts: &[MountConfig],
        veth_pairs: &[VethPair],
        opts: &RestoreOptions,
        handlers: NotifyHandlers<'_>,
    ) -> Result<()> {
        let scratch = crate::mounts::bind_mount_criu_root(root, rootfs)?;
        crate::mounts::prepare_restore_mounts(&scratch, mounts)?;

        let mut ext_mnt = Vec::new();
        for m in mounts {
            if m.is_bind && !crate::mounts::is_under_tmpfs(&m.destination, mounts) {
                ext_mnt.push((m.destination.display().to_string(), m.destination.display().to_string()));
            }
        }

        let veths: Vec<(String, String)> = veth_pairs
            .iter()
            .map(|v| (v.host_interface.clone(), v.container_interface.clone()))
            .collect();

        let descriptors_path = opts.images_dir.join("descriptors.json");
        let descriptors: Vec<String> = std::fs::read_to_string(&descriptors_path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        let inherit_fd: Vec<(String, RawFd)> = descriptors
            .iter()
            .enumerate()
            .filter(|(_, d)| d.contains("pipe:"))
            .map(|(i, d)| (d.clone(), i as RawFd))
            .collect();

        let (_status_read, status_write) =
            nix::unistd::pipe().map_err(|e| Error::syscall("pipe(status)", e))?;

        let criu_opts = CriuOpts {
            root: Some(scratch.display().to_string()),
            ext_mnt,
            veths,
            inherit_fd,
            manage_cgroups: true,
            notify_scripts: true,
            status_fd: Some(status_write.as_raw_fd()),
            ..Default::default()
        };

        let result = self.rpc_loop(CriuRequest::new(ReqType::Restore, criu_opts), handlers);

        if opts.detach {
            let _ = crate::mounts::unmount_detached(&scratch);
        }
        result
    }

    /// The shared RPC loop: send one request, then process responses until
    /// a terminal (non-`Notify`) response arrives (spec §4.6 "RPC loop").
    fn rpc_loop(&mut self, request: CriuRequest, handlers: NotifyHandlers<'_>) -> Result<()> {
        let is_pre_dump = request.req_type == ReqType::PreDump;
        rpc::send_frame(self.fd(), &request)?;

        loop {
            let (resp, fds): (CriuResponse, Vec<RawFd>) = rpc::recv_frame(self.fd())?;

            if !resp.success {
                return Err(Error::HelperFailure {
                    request_type: format!("{:?}", resp.req_type),
                    errno: resp.cr_errno,
                    log: resp.log.unwrap_or_default(),
                });
            }

            match resp.req_type {
                ReqType::FeatureCheck => {
                    self.features = resp.features.clone();
                }
                ReqType::Notify => {
                    let orphan_fd = fds.first().copied();
                    self.dispatch_notify(resp.notify.as_ref(), &handlers, &request.opts, orphan_fd)?;
                    let mut reply = CriuRequest::new(ReqType::Notify, CriuOpts::default());
                    reply.notify_success = Some(true);
                    rpc::send_frame(self.fd(), &reply)?;
                    continue;
                }
                ReqType::Dump | ReqType::PreDump | ReqType::Restore => break,
                ReqType::Version => break,
            }
        }

        let _ = nix::sys::socket::shutdown(self.fd(), nix::sys::socket::Shutdown::Write);
        match waitpid(self.helper_pid, None) {
            Ok(nix::sys::wait::WaitStatus::Exited(_, 0)) => Ok(()),
            Ok(status) if is_pre_dump => {
                // The helper is intentionally killed after a pre-dump.
                let _ = status;
                Ok(())
            }
            Ok(status) => Err(Error::ChildFailure(format!(
                "criu helper exited abnormally: {status:?}"
            ))),
            Err(e) => Err(Error::syscall("waitpid(cr helper)", e)),
        }
    }

    fn dispatch_notify(
        &self,
        notify: Option<&CriuNotify>,
        handlers: &NotifyHandlers<'_>,
        request_opts: &CriuOpts,
        orphan_pts_fd: Option<RawFd>,
    ) -> Result<()> {
        let Some(notify) = notify else {
            return Ok(());
        };

        match notify.script.as_str() {
            "post-dump" => (handlers.post_dump)(),
            "network-lock" => handlers.network.lock(),
            "network-unlock" => handlers.network.unlock(),
            "setup-namespaces" => {
                let pid = notify.pid.ok_or_else(|| {
                    Error::Other("setup-namespaces notification missing pid".to_string())
                })?;
                (handlers.setup_namespaces)(pid)
            }
            "post-restore" => {
                let pid = notify.pid.ok_or_else(|| {
                    Error::Other("post-restore notification missing pid".to_string())
                })?;
                (handlers.post_restore)(pid)
            }
            "orphan-pts-master" => match orphan_pts_fd {
                Some(fd) => (handlers.orphan_pts_master)(fd),
                None => {
                    log::warn!("orphan-pts-master notification received with no ancillary fd");
                    Ok(())
                }
            },
            "status-ready" => match request_opts.status_fd {
                Some(fd) => (handlers.status_ready)(fd),
                None => {
                    log::warn!("status-ready notification received but no status_fd was requested");
                    Ok(())
                }
            },
            other => {
                log::debug!("unhandled criu notification: {other}");
                Ok(())
            }
        }
    }
}

/// Version gates referenced by callers building a [`CriuOpts`] before
/// invoking the driver, matching spec §4.6's per-feature minimums.
pub fn feature_gate(feature: &str) -> Option<u32> {
    match feature {
        "network_external_ns" => Some(FEATURE_NETWORK_EXTERNAL_NS),
        "pid_external_ns" => Some(FEATURE_PID_EXTERNAL_NS),
        "cgroup_v2_freezer" => Some(FEATURE_CGROUP_V2_FREEZER),
        "lsm_profile" => Some(FEATURE_LSM_PROFILE),
        "status_notifications" => Some(FEATURE_STATUS_NOTIFICATIONS),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_gate_known_names() {
        assert_eq!(feature_gate("pid_external_ns"), Some(FEATURE_PID_EXTERNAL_NS));
        assert_eq!(feature_gate("nonexistent"), None);
    }

    #[test]
    fn min_version_matches_spec() {
        assert_eq!(MIN_VERSION, 30000);
    }
}
