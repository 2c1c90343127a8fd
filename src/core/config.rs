//! Container configuration: the immutable-once-set snapshot a [`crate::container::Container`]
//! is built from (namespaces, mounts, cgroup spec, id-mappings, hooks, labels,
//! rlimits, devices, networks, rootless flags, OOM score adj, parent death signal).
//!
//! Generalized from the teacher's `core::model::ContainerConfig`, which only carried
//! rootfs/cmd/hostname/memory/cpu/pids/uid/gid.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Namespace kinds this runtime understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceType {
    Mount,
    Uts,
    Ipc,
    User,
    Pid,
    Network,
    Cgroup,
}

impl NamespaceType {
    /// The canonical order namespaces are entered/joined in. Mirrors runc's
    /// convention of joining user first (it changes the meaning of every other
    /// namespace operation) and cgroup last.
    pub const CANONICAL_ORDER: [NamespaceType; 7] = [
        NamespaceType::User,
        NamespaceType::Mount,
        NamespaceType::Uts,
        NamespaceType::Ipc,
        NamespaceType::Network,
        NamespaceType::Pid,
        NamespaceType::Cgroup,
    ];

    /// The name used under `/proc/<pid>/ns/<name>`.
    pub fn proc_name(&self) -> &'static str {
        match self {
            NamespaceType::Mount => "mnt",
            NamespaceType::Uts => "uts",
            NamespaceType::Ipc => "ipc",
            NamespaceType::User => "user",
            NamespaceType::Pid => "pid",
            NamespaceType::Network => "net",
            NamespaceType::Cgroup => "cgroup",
        }
    }

    /// The wire-format name used in the bootstrap `NsPaths` attribute and in
    /// state-document namespace-path keys.
    pub fn wire_name(&self) -> &'static str {
        match self {
            NamespaceType::Mount => "mnt",
            NamespaceType::Uts => "uts",
            NamespaceType::Ipc => "ipc",
            NamespaceType::User => "user",
            NamespaceType::Pid => "pid",
            NamespaceType::Network => "net",
            NamespaceType::Cgroup => "cgroup",
        }
    }

    /// Inverse of [`NamespaceType::wire_name`], used by the init stub to
    /// decode a bootstrap message's `NsPaths` attribute.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        Some(match name {
            "mnt" => NamespaceType::Mount,
            "uts" => NamespaceType::Uts,
            "ipc" => NamespaceType::Ipc,
            "user" => NamespaceType::User,
            "pid" => NamespaceType::Pid,
            "net" => NamespaceType::Network,
            "cgroup" => NamespaceType::Cgroup,
            _ => return None,
        })
    }
}

/// A single namespace entry: either "create a new one" (`path: None`) or
/// "join this existing one" (`path: Some(..)`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    pub ns_type: NamespaceType,
    pub path: Option<PathBuf>,
}

impl NamespaceConfig {
    pub fn new(ns_type: NamespaceType) -> Self {
        Self { ns_type, path: None }
    }

    pub fn join(ns_type: NamespaceType, path: PathBuf) -> Self {
        Self {
            ns_type,
            path: Some(path),
        }
    }
}

/// A bind or filesystem mount to set up inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub fs_type: String,
    pub options: Vec<String>,
    pub is_bind: bool,
}

impl MountConfig {
    pub fn bind(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            fs_type: "none".to_string(),
            options: vec!["bind".to_string()],
            is_bind: true,
        }
    }
}

/// A single uid/gid mapping line (`container_id host_id size`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMap {
    pub container_id: u32,
    pub host_id: u32,
    pub size: u32,
}

impl IdMap {
    /// Render as the `"cid hid size\n"` line the bootstrap encoder expects.
    pub fn to_line(&self) -> String {
        format!("{} {} {}\n", self.container_id, self.host_id, self.size)
    }
}

/// A single OCI-style lifecycle hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    pub path: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub timeout: Option<u64>,
}

/// The four lifecycle hook lists the C/R driver and start protocol invoke.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hooks {
    pub prestart: Vec<Hook>,
    pub create_runtime: Vec<Hook>,
    pub poststart: Vec<Hook>,
    pub poststop: Vec<Hook>,
}

/// A single POSIX rlimit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rlimit {
    pub kind: RlimitKind,
    pub soft: u64,
    pub hard: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RlimitKind {
    Nofile,
    Nproc,
    Core,
    Fsize,
    Memlock,
}

/// A device node to create/allow inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub path: PathBuf,
    pub kind: char,
    pub major: i64,
    pub minor: i64,
    pub file_mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

/// A host-veth/container-veth pairing, forwarded to the C/R helper during
/// checkpoint/restore (spec §4.6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VethPair {
    pub host_interface: String,
    pub container_interface: String,
}

/// How the container's network namespace is provisioned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkMode {
    /// Share the host's network namespace; no `CLONE_NEWNET`.
    #[default]
    Host,
    /// A new, isolated network namespace with the given veth pairs attached
    /// by an external network strategy (see [`crate::network`]).
    Isolated { veth_pairs: Vec<VethPair> },
}

impl NetworkMode {
    /// The veth pairs to hand to the C/R driver, empty under `Host`.
    pub fn veth_pairs(&self) -> &[VethPair] {
        match self {
            NetworkMode::Host => &[],
            NetworkMode::Isolated { veth_pairs } => veth_pairs,
        }
    }
}

/// Resource limits applied through the cgroup manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CgroupResources {
    pub memory_limit: Option<u64>,
    pub cpu_quota_us: Option<i64>,
    pub cpu_period_us: Option<u64>,
    pub pids_limit: Option<u64>,
    /// If true, `start()` must reject this config (spec §4.1/§7): the
    /// runtime does not implement device allow-list enforcement, so
    /// skipping it silently would be a security regression.
    pub skip_devices: bool,
}

/// The full, immutable-once-set container configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub rootfs: PathBuf,
    pub readonly_rootfs: bool,
    pub hostname: String,
    pub namespaces: Vec<NamespaceConfig>,
    pub mounts: Vec<MountConfig>,
    pub cgroup: CgroupResources,
    pub cgroups_path: Option<PathBuf>,
    pub uid_mappings: Vec<IdMap>,
    pub gid_mappings: Vec<IdMap>,
    pub hooks: Hooks,
    pub labels: HashMap<String, String>,
    pub rlimits: Vec<Rlimit>,
    pub devices: Vec<DeviceConfig>,
    pub network: NetworkMode,
    pub rootless: bool,
    pub oom_score_adj: Option<i32>,
    pub parent_death_signal: Option<i32>,
}

impl Config {
    /// Namespaces that request a brand-new instance (no join path), in
    /// canonical clone order.
    pub fn new_namespaces(&self) -> Vec<NamespaceType> {
        NamespaceType::CANONICAL_ORDER
            .iter()
            .copied()
            .filter(|ty| {
                self.namespaces
                    .iter()
                    .any(|ns| ns.ns_type == *ty && ns.path.is_none())
            })
            .collect()
    }

    pub fn has_new_namespace(&self, ty: NamespaceType) -> bool {
        self.namespaces
            .iter()
            .any(|ns| ns.ns_type == ty && ns.path.is_none())
    }

    pub fn join_path(&self, ty: NamespaceType) -> Option<&PathBuf> {
        self.namespaces
            .iter()
            .find(|ns| ns.ns_type == ty)
            .and_then(|ns| ns.path.as_ref())
    }

    /// Whether sending pre-opened bind-mount source fds to the init stub is
    /// required (spec §4.2): new user+mount namespaces, not rootless, and at
    /// least one bind mount.
    pub fn needs_mount_source_fds(&self) -> bool {
        self.has_new_namespace(NamespaceType::User)
            && self.has_new_namespace(NamespaceType::Mount)
            && !self.rootless
            && self.mounts.iter().any(|m| m.is_bind)
    }

    /// The host uid/gid that the container's root (container-side uid/gid 0)
    /// resolves to, derived from the configured id-maps. Falls back to the
    /// caller's own uid/gid when no mapping is configured (no new user
    /// namespace), matching the fact that the container's root is then just
    /// this process.
    pub fn host_root_ids(&self) -> (u32, u32) {
        let uid = self
            .uid_mappings
            .iter()
            .find(|m| m.container_id == 0)
            .map(|m| m.host_id)
            .unwrap_or_else(|| nix::unistd::getuid().as_raw());
        let gid = self
            .gid_mappings
            .iter()
            .find(|m| m.container_id == 0)
            .map(|m| m.host_id)
            .unwrap_or_else(|| nix::unistd::getgid().as_raw());
        (uid, gid)
    }
}

/// A request to execute a process in a container: either the container's
/// `init` process (`Start`/`Run`) or an additional `exec`'d process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    pub init: bool,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: String,
    pub uid: u32,
    pub gid: u32,
    pub console_socket: Option<PathBuf>,
}

impl Process {
    pub fn init_with_args(args: Vec<String>) -> Self {
        Self {
            init: true,
            args,
            env: Vec::new(),
            cwd: "/".to_string(),
            uid: 0,
            gid: 0,
            console_socket: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
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
    fn id_map_line_format() {
        let m = IdMap {
            container_id: 0,
            host_id: 1000,
            size: 1,
        };
        assert_eq!(m.to_line(), "0 1000 1\n");
    }

    #[test]
    fn new_namespaces_respects_canonical_order() {
        let mut cfg = base_config();
        cfg.namespaces = vec![
            NamespaceConfig::new(NamespaceType::Pid),
            NamespaceConfig::new(NamespaceType::User),
            NamespaceConfig::new(NamespaceType::Mount),
        ];
        assert_eq!(
            cfg.new_namespaces(),
            vec![NamespaceType::User, NamespaceType::Mount, NamespaceType::Pid]
        );
    }

    #[test]
    fn join_path_only_for_join_entries() {
        let mut cfg = base_config();
        cfg.namespaces = vec![NamespaceConfig::join(
            NamespaceType::Network,
            PathBuf::from("/proc/123/ns/net"),
        )];
        assert!(!cfg.has_new_namespace(NamespaceType::Network));
        assert_eq!(
            cfg.join_path(NamespaceType::Network),
            Some(&PathBuf::from("/proc/123/ns/net"))
        );
    }

    #[test]
    fn needs_mount_source_fds_requires_all_conditions() {
        let mut cfg = base_config();
        cfg.namespaces = vec![
            NamespaceConfig::new(NamespaceType::User),
            NamespaceConfig::new(NamespaceType::Mount),
        ];
        cfg.mounts = vec![MountConfig::bind("/src", "/dst")];
        assert!(cfg.needs_mount_source_fds());

        cfg.rootless = true;
        assert!(!cfg.needs_mount_source_fds());
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = base_config();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.hostname, cfg.hostname);
    }
}
