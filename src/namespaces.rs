//! Clone-flag selection, setns join-path ordering, and `/proc/<pid>/ns/*`
//! path synthesis.
//!
//! Grounded on the teacher's `platform/linux/namespaces.rs`
//! (`container_clone_flags`/`unshare_namespaces`), generalized from a fixed
//! flag set to one driven by [`crate::core::config::Config`], and on
//! `containers-youki`'s namespace-apply pattern for setns join ordering.

use std::path::PathBuf;

use nix::sched::CloneFlags;

use crate::bootstrap::NsJoin;
use crate::core::config::{Config, NamespaceType};
use crate::error::{Error, Result};

/// Map a [`NamespaceType`] to its `CLONE_NEW*` flag.
fn clone_flag(ty: NamespaceType) -> CloneFlags {
    match ty {
        NamespaceType::Mount => CloneFlags::CLONE_NEWNS,
        NamespaceType::Uts => CloneFlags::CLONE_NEWUTS,
        NamespaceType::Ipc => CloneFlags::CLONE_NEWIPC,
        NamespaceType::User => CloneFlags::CLONE_NEWUSER,
        NamespaceType::Pid => CloneFlags::CLONE_NEWPID,
        NamespaceType::Network => CloneFlags::CLONE_NEWNET,
        NamespaceType::Cgroup => CloneFlags::CLONE_NEWCGROUP,
    }
}

/// The clone flags for every namespace the config wants newly created, in
/// canonical order. Used to build the `CloneFlags` bootstrap attribute.
pub fn clone_flags_for(config: &Config) -> CloneFlags {
    config
        .new_namespaces()
        .into_iter()
        .fold(CloneFlags::empty(), |acc, ty| acc | clone_flag(ty))
}

/// `unshare(2)` with the given flags, called from within the init stub after
/// `clone`/`fork`.
pub fn unshare_namespaces(flags: CloneFlags) -> Result<()> {
    nix::sched::unshare(flags).map_err(|e| Error::syscall("unshare", e))
}

/// Join an existing namespace by opening its `/proc/<pid>/ns/<name>` path
/// and calling `setns(2)`. Callers must join in [`NamespaceType::CANONICAL_ORDER`]
/// — user first, since it redefines the meaning of every later join.
pub fn setns(path: &std::path::Path, ty: NamespaceType) -> Result<()> {
    use std::os::unix::io::AsFd;

    let file = std::fs::File::open(path).map_err(|e| Error::io(path.to_path_buf(), e))?;
    nix::sched::setns(file.as_fd(), clone_flag(ty)).map_err(|e| Error::syscall("setns", e))
}

/// Join every requested namespace, in canonical order (user first, since it
/// redefines the meaning of every later join), regardless of the order
/// `joins` was supplied in.
pub fn setns_all(joins: &[NsJoin]) -> Result<()> {
    for ty in NamespaceType::CANONICAL_ORDER {
        if let Some(join) = joins.iter().find(|j| j.ns_type == ty) {
            setns(&join.path, ty)?;
        }
    }
    Ok(())
}

/// Set the hostname inside a UTS namespace.
pub fn set_hostname(name: &str) -> Result<()> {
    nix::unistd::sethostname(name).map_err(|e| Error::syscall("sethostname", e))
}

/// The `/proc/<pid>/ns/<name>` path for a namespace type and pid, used both
/// to build setns join paths for secondary processes and to populate the
/// state document's `namespace_paths` map.
pub fn proc_ns_path(pid: i32, ty: NamespaceType) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/ns/{}", ty.proc_name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::NamespaceConfig;

    fn base_config() -> Config {
        Config {
            rootfs: PathBuf::from("/tmp/rootfs"),
            readonly_rootfs: false,
            hostname: "craterun".to_string(),
            namespaces: vec![],
            mounts: vec![],
            cgroup: Default::default(),
            cgroups_path: None,
            uid_mappings: vec![],
            gid_mappings: vec![],
            hooks: Default::default(),
            labels: Default::default(),
            rlimits: vec![],
            devices: vec![],
            network: Default::default(),
            rootless: false,
            oom_score_adj: None,
            parent_death_signal: None,
        }
    }

    #[test]
    fn clone_flags_only_cover_new_namespaces() {
        let mut cfg = base_config();
        cfg.namespaces = vec![
            NamespaceConfig::new(NamespaceType::Mount),
            NamespaceConfig::new(NamespaceType::Pid),
            NamespaceConfig::join(NamespaceType::Network, PathBuf::from("/proc/1/ns/net")),
        ];
        let flags = clone_flags_for(&cfg);
        assert!(flags.contains(CloneFlags::CLONE_NEWNS));
        assert!(flags.contains(CloneFlags::CLONE_NEWPID));
        assert!(!flags.contains(CloneFlags::CLONE_NEWNET));
    }

    #[test]
    fn proc_ns_path_uses_kernel_names() {
        assert_eq!(
            proc_ns_path(42, NamespaceType::Network),
            PathBuf::from("/proc/42/ns/net")
        );
        assert_eq!(
            proc_ns_path(42, NamespaceType::Mount),
            PathBuf::from("/proc/42/ns/mnt")
        );
    }
}
