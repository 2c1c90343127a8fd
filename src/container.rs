//! The public container lifecycle API.
//!
//! Grounded on `containers-youki`'s `Container` (field layout: `state`,
//! `root`, getter/setter shape, `refresh_status`/`save`/`load`) and the
//! teacher's `platform/linux/process.rs` for the actual fork/start
//! mechanics, merged behind the richer API spec §4.1 demands.

use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Mutex};
use std::time::Duration;

use chrono::Utc;
use nix::fcntl::{open, OFlag};
use nix::sys::signal::Signal;
use nix::sys::stat::Mode;

use crate::cgroup::{self, CgroupStats, FreezerState, Manager as CgroupManager};
use crate::core::config::{Config, NamespaceType, Process};
use crate::core::state::{self, StateDocument};
use crate::cr::{CrDriver, DumpOptions, NotifyHandlers, RestoreOptions};
use crate::error::{Error, Result};
use crate::hooks::{self, HookState};
use crate::intel_rdt::{self, RdtManager};
use crate::namespaces;
use crate::network::HostPassthrough;
use crate::parent::{ParentProcess, SetnsParent};
use crate::state_machine::{State, Status};
use crate::stats::Stats;
use crate::{bootstrap, fifo};

/// Everything about a container that mutates across its lifetime, guarded
/// by [`Container::mu`] (spec §3's single exclusive lock).
struct Inner {
    config: Config,
    cgroup_mgr: Box<dyn CgroupManager>,
    intel_rdt_mgr: Box<dyn RdtManager>,
    init_process: Option<ParentProcess>,
    init_process_start_time: u64,
    state: State,
    created: chrono::DateTime<Utc>,
    criu_version: Option<u32>,
}

/// A single container instance. Cheap to hold (most fields live behind the
/// `Mutex`); all public methods serialize on it.
pub struct Container {
    id: String,
    root: PathBuf,
    inner: Mutex<Inner>,
}

/// OCI-shaped status view returned by [`Container::oci_state`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct OciState {
    pub id: String,
    pub status: String,
    pub pid: Option<i32>,
    pub bundle: String,
    pub annotations: HashMap<String, String>,
}

impl Container {
    /// Construct a brand-new container (no persisted state yet). `run`/
    /// `cmd_run` callers use this; `load` reconstructs one from disk.
    pub fn new(id: String, root: PathBuf, config: Config) -> Self {
        let cgroup_mgr: Box<dyn CgroupManager> = Box::new(cgroup::CgroupV2::new(&id));
        let intel_rdt_mgr: Box<dyn RdtManager> = Box::new(intel_rdt::ResctrlManager::new(&id));

        Self {
            inner: Mutex::new(Inner {
                config,
                cgroup_mgr,
                intel_rdt_mgr,
                init_process: None,
                init_process_start_time: 0,
                state: State::Stopped,
                created: Utc::now(),
                criu_version: None,
            }),
            id,
            root,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reconstruct a `Container` from its persisted [`StateDocument`],
    /// re-deriving live state via [`Container::status`] rather than
    /// trusting the document's state blindly.
    pub fn load(id: &str) -> Result<Self> {
        let root = state::container_dir(id)?;
        let doc = state::load(&root)?;

        let init_state = if doc.init_process_pid > 0 && state::pid_alive(doc.init_process_pid) {
            if fifo::exists(&root) {
                State::Created
            } else {
                State::Running
            }
        } else {
            State::Stopped
        };

        let container = Self::new(doc.id.clone(), root, doc.config.clone());
        {
            let mut inner = container.inner.lock().expect("mutex poisoned");
            inner.state = init_state;
            inner.created = doc.created;
            inner.init_process_start_time = doc.init_process_start_time;
        }
        Ok(container)
    }

    /// Refresh and return the current status (spec §4.1 `status()`).
    pub fn status(&self) -> Result<Status> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        self.refresh_locked(&mut inner)?;
        Ok(inner.state.status())
    }

    fn refresh_locked(&self, inner: &mut Inner) -> Result<()> {
        if matches!(inner.state, State::Stopped) {
            return Ok(());
        }

        if inner.cgroup_mgr.exists() {
            if let Ok(FreezerState::Frozen) = inner.cgroup_mgr.freezer_state() {
                inner.state = State::Paused;
                return Ok(());
            }
        }

        let alive = inner
            .init_process
            .as_ref()
            .map(|p| state::pid_alive(p.pid()))
            .unwrap_or(false);

        if !alive {
            inner.state = State::Stopped;
            return Ok(());
        }

        inner.state = if fifo::exists(&self.root) {
            State::Created
        } else {
            State::Running
        };
        Ok(())
    }

    /// Full state document (spec §4.1 `state()`), with namespace paths
    /// synthesized from `/proc/<pid>/ns/*`.
    pub fn state(&self) -> Result<StateDocument> {
        let inner = self.inner.lock().expect("mutex poisoned");
        let pid = inner.init_process.as_ref().map(|p| p.pid()).unwrap_or(0);

        let mut namespace_paths = HashMap::new();
        if pid > 0 {
            for ty in NamespaceType::CANONICAL_ORDER {
                namespace_paths.insert(
                    ty.wire_name().to_string(),
                    namespaces::proc_ns_path(pid, ty),
                );
            }
        }

        let mut doc = StateDocument::new(&self.id, inner.config.clone());
        doc.init_process_pid = pid;
        doc.init_process_start_time = inner.init_process_start_time;
        doc.created = inner.created;
        doc.rootless = inner.config.rootless;
        doc.cgroup_paths = inner.cgroup_mgr.paths();
        doc.namespace_paths = namespace_paths;
        doc.external_descriptors = inner
            .init_process
            .as_ref()
            .map(|p| p.external_descriptors().to_vec())
            .unwrap_or_default();
        doc.intel_rdt_path = inner.intel_rdt_mgr.path().map(Path::to_path_buf);
        Ok(doc)
    }

    pub fn oci_state(&self) -> Result<OciState> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        self.refresh_locked(&mut inner)?;
        let status = inner.state.status();
        let pid = if status == Status::Stopped {
            None
        } else {
            inner.init_process.as_ref().map(|p| p.pid())
        };

        Ok(OciState {
            id: self.id.clone(),
            status: status.to_string(),
            pid,
            bundle: inner.config.rootfs.display().to_string(),
            annotations: inner.config.labels.clone(),
        })
    }

    /// All pids currently in the container's cgroup. Empty once the
    /// cgroup itself is gone (systemd-slice auto-removal after stop).
    pub fn processes(&self) -> Result<Vec<i32>> {
        let inner = self.inner.lock().expect("mutex poisoned");
        if !inner.cgroup_mgr.exists() {
            return Ok(Vec::new());
        }
        inner.cgroup_mgr.all_pids()
    }

    pub fn stats(&self) -> Result<Stats> {
        let inner = self.inner.lock().expect("mutex poisoned");
        let cgroup = inner.cgroup_mgr.stats()?;
        let rdt = inner.intel_rdt_mgr.stats()?;
        Ok(Stats {
            cgroup,
            rdt,
            veths: Vec::new(),
        })
    }

    /// Update cgroup (and RDT) resources on a running container. On
    /// partial failure, rolls back to the previous resources and returns
    /// the original error (spec §4.1 `set`).
    pub fn set(&self, config: Config) -> Result<()> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        self.refresh_locked(&mut inner)?;
        if inner.state.status() == Status::Stopped {
            return Err(Error::NotRunning);
        }

        let previous = inner.config.cgroup.clone();
        if let Err(e) = inner.cgroup_mgr.set(&config.cgroup) {
            let _ = inner.cgroup_mgr.set(&previous);
            return Err(e);
        }

        inner.config.cgroup = config.cgroup;
        let doc = self.state_locked(&inner);
        state::save(&doc, &self.root)?;
        Ok(())
    }

    fn state_locked(&self, inner: &Inner) -> StateDocument {
        let mut doc = StateDocument::new(&self.id, inner.config.clone());
        doc.init_process_pid = inner.init_process.as_ref().map(|p| p.pid()).unwrap_or(0);
        doc.init_process_start_time = inner.init_process_start_time;
        doc.created = inner.created;
        doc.rootless = inner.config.rootless;
        doc.cgroup_paths = inner.cgroup_mgr.paths();
        doc.intel_rdt_path = inner.intel_rdt_mgr.path().map(Path::to_path_buf);
        doc
    }

    /// Open an `O_PATH` fd for each bind mount's source when the config
    /// requires mount-source-fd passing (spec §4.2), so the init stub never
    /// has to re-resolve a source path from inside the new user+mount
    /// namespaces (which would allow a symlink swapped in between `start`
    /// and the stub's mount call to redirect the bind onto an arbitrary host
    /// path). Returns the per-mount `Some(source)`/`None` markers encoded
    /// into the bootstrap message alongside the opened fds, in the same
    /// order.
    fn open_mount_sources(&self, config: &Config) -> Result<(Vec<Option<String>>, Vec<OwnedFd>)> {
        if !config.needs_mount_source_fds() {
            return Ok((vec![None; config.mounts.len()], Vec::new()));
        }

        let mut markers = Vec::with_capacity(config.mounts.len());
        let mut fds = Vec::new();
        for m in &config.mounts {
            if !m.is_bind {
                markers.push(None);
                continue;
            }
            let fd = open(&m.source, OFlag::O_PATH | OFlag::O_CLOEXEC, Mode::empty())
                .map_err(|e| Error::syscall("open(mount source)", e))?;
            use std::os::fd::FromRawFd;
            fds.push(unsafe { OwnedFd::from_raw_fd(fd) });
            markers.push(Some(m.source.display().to_string()));
        }
        Ok((markers, fds))
    }

    /// Start protocol (spec §4.2). Creates the exec-FIFO for an init
    /// process, spawns the stub, writes the bootstrap message, and blocks
    /// for phase-1 completion.
    pub fn start(&self, process: &Process) -> Result<()> {
        let mut inner = self.inner.lock().expect("mutex poisoned");

        if !inner.state.can_start() {
            return Err(Error::AlreadyExists(
                "container has already been started".to_string(),
            ));
        }

        if inner.config.cgroup.skip_devices {
            return Err(Error::InvalidConfig(
                "skip_devices=true is not supported: the runtime does not \
                 implement device allow-list enforcement"
                    .to_string(),
            ));
        }

        if process.init {
            if fifo::exists(&self.root) {
                return Err(Error::AlreadyExists(
                    "container already has a pending exec-fifo".to_string(),
                ));
            }
            let (host_uid, host_gid) = inner.config.host_root_ids();
            fifo::create(&self.root, host_uid, host_gid)?;
        }

        let clone_flags = namespaces::clone_flags_for(&inner.config).bits() as u32;
        let (mount_sources, mount_fds) = self.open_mount_sources(&inner.config)?;
        let bootstrap_msg = bootstrap::encode(&inner.config, clone_flags, &mount_sources)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        // The bootstrap TLV only carries namespace/id-map wiring; the stub
        // needs the full rootfs/mount/process plan too, so stash it in the
        // state directory it's handed via `_LIBCONTAINER_STATEDIR` before it
        // is spawned (overwritten with the final document once started).
        state::ensure_state_dir()?;
        std::fs::create_dir_all(&self.root).map_err(|e| Error::io(self.root.clone(), e))?;
        let preliminary = self.state_locked(&inner);
        state::save(&preliminary, &self.root)?;
        let process_path = self.root.join("process.json");
        std::fs::write(&process_path, serde_json::to_vec(process)?)
            .map_err(|e| Error::io(process_path, e))?;

        let mut extra_env = Vec::new();
        if process.init {
            extra_env.push(("_LIBCONTAINER_FIFOFD", "3".to_string()));
        }

        let parent = crate::parent::InitParent::spawn(
            &bootstrap_msg,
            &self.root,
            &inner.config.rootfs,
            &extra_env,
            &mount_fds,
        )?;
        let pid = parent.pid;
        parent.await_phase1()?;

        let mut handle = ParentProcess::Init(parent);
        let _log_thread = handle.forward_child_logs();

        inner
            .cgroup_mgr
            .apply(pid.as_raw(), &inner.config.cgroup)?;
        let _ = inner.intel_rdt_mgr.apply(pid.as_raw());

        inner.init_process_start_time = handle.start_time().unwrap_or(0);
        inner.init_process = Some(handle);

        inner.state = State::Created;
        inner.created = Utc::now();

        let doc = self.state_locked(&inner);
        state::save(&doc, &self.root)?;

        if process.init {
            hooks::run_hooks(
                &inner.config.hooks.poststart,
                &HookState {
                    id: self.id.clone(),
                    status: inner.state.status().to_string(),
                    pid: pid.as_raw(),
                    bundle: inner.config.rootfs.display().to_string(),
                    annotations: inner.config.labels.clone(),
                },
            )?;
        }

        Ok(())
    }

    /// `run()`: start then, if init, immediately exec.
    pub fn run(&self, process: &Process) -> Result<()> {
        self.start(process)?;
        if process.init {
            self.exec()?;
        }
        Ok(())
    }

    /// Unblock the init's FIFO wait (spec §4.3).
    pub fn exec(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        let next = inner.state.to_running()?;

        let pid = inner
            .init_process
            .as_ref()
            .map(|p| p.pid())
            .unwrap_or(0);

        fifo::wait_and_consume(&self.root, pid)?;
        inner.state = next;

        let doc = self.state_locked(&inner);
        state::save(&doc, &self.root)?;
        Ok(())
    }

    /// Deliver a signal, either to every pid in the cgroup or to the init
    /// process alone (spec §4.1 `signal`).
    pub fn signal(&self, sig: Signal, all: bool) -> Result<()> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        self.refresh_locked(&mut inner)?;

        if all {
            if inner.state.status() == Status::Stopped && !inner.cgroup_mgr.exists() {
                return Ok(());
            }
            for pid in inner.cgroup_mgr.all_pids()? {
                let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), sig);
            }
            return Ok(());
        }

        if !inner.state.can_signal() {
            return Err(Error::PausedOrStopped);
        }

        if sig == Signal::SIGKILL && inner.state.status() == Status::Paused {
            inner.cgroup_mgr.freeze(FreezerState::Thawed)?;
        }

        if let Some(p) = &inner.init_process {
            p.signal(sig)?;
        }
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        self.refresh_locked(&mut inner)?;
        let next = inner.state.to_paused()?;
        inner.cgroup_mgr.freeze(FreezerState::Frozen)?;
        inner.state = next;
        let doc = self.state_locked(&inner);
        state::save(&doc, &self.root)?;
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        let next = inner.state.to_resumed()?;
        inner.cgroup_mgr.freeze(FreezerState::Thawed)?;
        inner.state = next;
        let doc = self.state_locked(&inner);
        state::save(&doc, &self.root)?;
        Ok(())
    }

    /// Checkpoint the container's current process tree to `opts.images_dir`
    /// (spec §4.6 "Dump flow"). On success, stops the container unless
    /// `opts.leave_running`.
    pub fn checkpoint(&self, opts: &DumpOptions) -> Result<()> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        self.refresh_locked(&mut inner)?;
        if !matches!(inner.state.status(), Status::Running | Status::Paused) {
            return Err(Error::NotRunning);
        }

        let mut driver = CrDriver::spawn()?;
        driver.negotiate_version()?;

        let root = self.root.clone();
        let post_dump = move || -> Result<()> {
            std::fs::write(root.join("checkpoint"), []).map_err(|e| {
                Error::io(root.join("checkpoint"), e)
            })
        };
        let network = HostPassthrough;
        let noop_pid = |_pid: i32| -> Result<()> { Ok(()) };
        let noop_fd = |_fd: std::os::fd::RawFd| -> Result<()> { Ok(()) };

        let handlers = NotifyHandlers {
            post_dump: &post_dump,
            network: &network,
            setup_namespaces: &noop_pid,
            post_restore: &noop_pid,
            orphan_pts_master: &noop_fd,
            status_ready: &noop_fd,
        };

        let device_paths: Vec<PathBuf> = inner.config.devices.iter().map(|d| d.path.clone()).collect();
        driver.dump(&inner.config.mounts, &device_paths, opts, handlers)?;

        if !opts.leave_running {
            if let Some(p) = &inner.init_process {
                let _ = p.terminate();
            }
            inner.state = inner.state.to_destroyed();
            let doc = self.state_locked(&inner);
            state::save(&doc, &self.root)?;
        }
        Ok(())
    }

    /// Restore a checkpointed container from `opts.images_dir` (spec §4.6
    /// "Restore flow"). On the helper's `post-restore` notification, the
    /// container transitions to [`State::Restored`].
    pub fn restore(&self, process: &Process, opts: &RestoreOptions) -> Result<()> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        if !inner.state.can_start() {
            return Err(Error::AlreadyExists(
                "container must be stopped before restore".to_string(),
            ));
        }
        inner.state = State::Created;

        let mut driver = CrDriver::spawn()?;
        driver.negotiate_version()?;

        let restored_pid = std::cell::Cell::new(None::<i32>);
        let id = self.id.clone();
        let rootfs_display = inner.config.rootfs.display().to_string();
        let labels = inner.config.labels.clone();
        let hooks_cfg = inner.config.hooks.clone();
        let init_enabled = process.init;

        let noop_fd = |_fd: std::os::fd::RawFd| -> Result<()> { Ok(()) };
        let network = HostPassthrough;

        let setup_namespaces = |pid: i32| -> Result<()> {
            let state = HookState {
                id: id.clone(),
                status: Status::Created.to_string(),
                pid,
                bundle: rootfs_display.clone(),
                annotations: labels.clone(),
            };
            hooks::run_hooks(&hooks_cfg.prestart, &state)?;
            hooks::run_hooks(&hooks_cfg.create_runtime, &state)?;
            Ok(())
        };

        let post_restore = |pid: i32| -> Result<()> {
            restored_pid.set(Some(pid));
            Ok(())
        };

        let marker_post_dump = || -> Result<()> { Ok(()) };

        let handlers = NotifyHandlers {
            post_dump: &marker_post_dump,
            network: &network,
            setup_namespaces: &setup_namespaces,
            post_restore: &post_restore,
            orphan_pts_master: &noop_fd,
            status_ready: &noop_fd,
        };

        driver.restore(
            &self.root,
            &inner.config.rootfs,
            &inner.config.mounts,
            inner.config.network.veth_pairs(),
            opts,
            handlers,
        )?;

        let pid = restored_pid.get().ok_or_else(|| {
            Error::ChildFailure("restore completed without a post-restore notification".to_string())
        })?;

        inner
            .cgroup_mgr
            .apply(pid, &inner.config.cgroup)?;

        inner.init_process = Some(ParentProcess::Setns(SetnsParent {
            pid: nix::unistd::Pid::from_raw(pid),
            external_descriptors: Vec::new(),
        }));
        inner.state = inner.state.to_restored(opts.images_dir.clone())?;
        inner.created = Utc::now();

        let doc = self.state_locked(&inner);
        state::save(&doc, &self.root)?;
        let _ = std::fs::remove_file(self.root.join("checkpoint"));

        if init_enabled {
            hooks::run_hooks(
                &inner.config.hooks.poststart,
                &HookState {
                    id: self.id.clone(),
                    status: inner.state.status().to_string(),
                    pid,
                    bundle: inner.config.rootfs.display().to_string(),
                    annotations: inner.config.labels.clone(),
                },
            )?;
        }

        Ok(())
    }

    /// Idempotent: destroying an already-stopped container succeeds as a
    /// no-op (spec §4.5 `Stopped::destroy`).
    pub fn destroy(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("mutex poisoned");

        if let Some(p) = &inner.init_process {
            let _ = p.terminate();
        }
        inner.init_process = None;
        inner.state = inner.state.to_destroyed();

        let _ = inner.cgroup_mgr.destroy();
        let _ = inner.intel_rdt_mgr.destroy();
        let _ = fifo::remove(&self.root);

        hooks::run_hooks(
            &inner.config.hooks.poststop,
            &HookState {
                id: self.id.clone(),
                status: Status::Stopped.to_string(),
                pid: 0,
                bundle: inner.config.rootfs.display().to_string(),
                annotations: inner.config.labels.clone(),
            },
        )?;

        state::remove_container_dir(&self.id)?;
        Ok(())
    }

    /// Stream of OOM events, backed by a background thread polling cgroup
    /// v2's `memory.events` `oom_kill` counter (spec §4.7). A v1
    /// eventfd-based implementation is not provided — see DESIGN.md's Open
    /// Question on this trait boundary. Dropping the receiver stops the
    /// thread on its next send.
    pub fn notify_oom(&self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel();
        let events_path = {
            let inner = self.inner.lock().expect("mutex poisoned");
            inner.cgroup_mgr.path().join("memory.events")
        };

        std::thread::spawn(move || {
            let mut last = read_oom_kill(&events_path);
            loop {
                std::thread::sleep(NOTIFY_POLL_INTERVAL);
                if !events_path.exists() {
                    return;
                }
                let current = read_oom_kill(&events_path);
                if current > last {
                    last = current;
                    if tx.send(()).is_err() {
                        return;
                    }
                }
            }
        });

        rx
    }

    /// Stream of memory-pressure events at the given PSI level (`"some"` or
    /// `"full"`), backed by polling cgroup v2's `memory.pressure` (spec
    /// §4.7).
    pub fn notify_memory_pressure(&self, level: &str) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel();
        let pressure_path = {
            let inner = self.inner.lock().expect("mutex poisoned");
            inner.cgroup_mgr.path().join("memory.pressure")
        };
        let level = level.to_string();

        std::thread::spawn(move || {
            let mut last = read_pressure_total(&pressure_path, &level);
            loop {
                std::thread::sleep(NOTIFY_POLL_INTERVAL);
                if !pressure_path.exists() {
                    return;
                }
                let current = read_pressure_total(&pressure_path, &level);
                if current > last {
                    last = current;
                    if tx.send(()).is_err() {
                        return;
                    }
                }
            }
        });

        rx
    }
}

/// Poll cadence for [`Container::notify_oom`]/[`Container::notify_memory_pressure`].
const NOTIFY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Parse the `oom_kill` counter out of a cgroup v2 `memory.events` file.
fn read_oom_kill(path: &Path) -> u64 {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| {
            s.lines()
                .find_map(|l| l.strip_prefix("oom_kill "))
                .and_then(|v| v.trim().parse().ok())
        })
        .unwrap_or(0)
}

/// Parse the `total=` field of the given PSI level line (`"some"`/`"full"`)
/// out of a cgroup v2 `memory.pressure` file.
fn read_pressure_total(path: &Path, level: &str) -> u64 {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| {
            s.lines()
                .find(|l| l.starts_with(level))
                .and_then(|l| l.split_whitespace().find_map(|f| f.strip_prefix("total=")))
                .and_then(|v| v.parse().ok())
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{CgroupResources, Hooks, NetworkMode};
    use serial_test::serial;

    fn sample_config() -> Config {
        Config {
            rootfs: PathBuf::from("/tmp/rootfs"),
            readonly_rootfs: false,
            hostname: "craterun".to_string(),
            namespaces: vec![],
            mounts: vec![],
            cgroup: CgroupResources::default(),
            cgroups_path: None,
            uid_mappings: vec![],
            gid_mappings: vec![],
            hooks: Hooks::default(),
            labels: HashMap::new(),
            rlimits: vec![],
            devices: vec![],
            network: NetworkMode::default(),
            rootless: false,
            oom_score_adj: None,
            parent_death_signal: None,
        }
    }

    #[test]
    #[serial]
    fn fresh_container_reports_stopped() {
        let tmp = tempfile::tempdir().unwrap();
        let container = Container::new("abc123".to_string(), tmp.path().to_path_buf(), sample_config());
        assert_eq!(container.status().unwrap(), Status::Stopped);
    }

    #[test]
    #[serial]
    fn destroy_on_fresh_container_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let container = Container::new("abc123".to_string(), tmp.path().to_path_buf(), sample_config());
        assert!(container.destroy().is_ok());
        assert!(container.destroy().is_ok());
    }

    #[test]
    #[serial]
    fn skip_devices_rejected_without_fifo() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = sample_config();
        cfg.cgroup.skip_devices = true;
        let container = Container::new("abc123".to_string(), tmp.path().to_path_buf(), cfg);
        let err = container.start(&Process::init_with_args(vec!["/bin/true".into()]));
        assert!(matches!(err, Err(Error::InvalidConfig(_))));
        assert!(!fifo::exists(tmp.path()));
    }
}
