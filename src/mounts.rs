//! Bind-mount preparation, the pivot-root dance, and (for restore) the
//! transient scratch bind-mount the C/R helper requires.
//!
//! Grounded directly on the teacher's `platform/linux/mounts.rs`, kept
//! almost verbatim for the pivot_root sequence, generalized to walk
//! [`crate::core::config::MountConfig`] entries and extended with
//! `bind_mount_criu_root` for restore (spec §4.6).

use std::fs;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

use nix::mount::{mount, umount2, MntFlags, MsFlags};

use crate::core::config::MountConfig;
use crate::error::{Error, Result};

/// Make the entire mount tree private so our changes do not leak to the host.
pub fn make_mount_private() -> Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| Error::syscall("mount(MS_PRIVATE)", e))?;
    Ok(())
}

/// Bind-mount the rootfs onto itself so it becomes a mount point (required
/// for `pivot_root`).
pub fn bind_mount_rootfs(rootfs: &Path) -> Result<()> {
    mount(
        Some(rootfs),
        rootfs,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| Error::syscall("mount(bind rootfs)", e))?;
    Ok(())
}

/// Apply every [`MountConfig`] entry inside the new root. Bind mounts use
/// the already-open source fd when one was passed via the bootstrap
/// mount-source protocol (spec §4.2), mounting through `/proc/self/fd/<fd>`
/// so the source can never be re-resolved through a path an attacker
/// controls from inside the new namespaces; otherwise the source path is
/// resolved directly, which is only safe when mount-source fd passing was
/// not required (rootless or no new user+mount namespace pair).
pub fn apply_mounts(rootfs: &Path, mounts: &[MountConfig], mount_fds: &[Option<RawFd>]) -> Result<()> {
    for (i, m) in mounts.iter().enumerate() {
        let dest = rootfs.join(m.destination.strip_prefix("/").unwrap_or(&m.destination));
        fs::create_dir_all(&dest).map_err(|e| Error::io(dest.clone(), e))?;

        let flags = if m.is_bind {
            MsFlags::MS_BIND
        } else {
            MsFlags::empty()
        };

        let fstype = if m.fs_type == "none" {
            None
        } else {
            Some(m.fs_type.as_str())
        };

        let fd_source;
        let source: &str = match mount_fds.get(i).copied().flatten() {
            Some(fd) => {
                fd_source = format!("/proc/self/fd/{fd}");
                &fd_source
            }
            None => &m.source,
        };

        mount(Some(source), &dest, fstype, flags, None::<&str>)
            .map_err(|e| Error::syscall("mount(apply_mounts)", e))?;
    }
    Ok(())
}

/// Whether `dest` lives strictly under some other mount's destination that
/// is itself a `tmpfs`. Used by restore to skip re-preparing mount points
/// CRIU will recreate implicitly when it restores the tmpfs contents
/// (spec §4.6 step 4).
pub fn is_under_tmpfs(dest: &Path, mounts: &[MountConfig]) -> bool {
    mounts.iter().any(|other| {
        other.fs_type == "tmpfs" && dest != other.destination && dest.starts_with(&other.destination)
    })
}

/// Pre-mount bind sources onto the restore scratch root (spec §4.6 step 4),
/// mirroring [`apply_mounts`] but against `scratch` instead of the live
/// rootfs, and skipping any destination nested under a tmpfs mount (CRIU
/// restores tmpfs contents itself; pre-mounting under it would just be
/// overmounted and orphaned). Non-bind entries still get their destination
/// directory created but are not mounted here — CRIU recreates those.
pub fn prepare_restore_mounts(scratch: &Path, mounts: &[MountConfig]) -> Result<()> {
    for m in mounts {
        if is_under_tmpfs(&m.destination, mounts) {
            continue;
        }

        let dest = scratch.join(m.destination.strip_prefix("/").unwrap_or(&m.destination));
        fs::create_dir_all(&dest).map_err(|e| Error::io(dest.clone(), e))?;

        if !m.is_bind {
            continue;
        }

        mount(
            Some(&m.source),
            &dest,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
        .map_err(|e| Error::syscall("mount(prepare_restore_mounts)", e))?;
    }
    Ok(())
}

/// Perform `pivot_root` to make `new_root` the new `/` and put the old root
/// under `new_root/.pivot_old`. Then unmount and remove the old root.
pub fn pivot_root(new_root: &Path) -> Result<()> {
    let put_old = new_root.join(".pivot_old");
    fs::create_dir_all(&put_old).map_err(|e| Error::io(put_old.clone(), e))?;

    nix::unistd::pivot_root(new_root, &put_old).map_err(|e| Error::syscall("pivot_root", e))?;

    nix::unistd::chdir("/").map_err(|e| Error::syscall("chdir", e))?;

    umount_old_root("/.pivot_old")?;
    Ok(())
}

/// Unmount the old root and remove the directory.
fn umount_old_root(path: &str) -> Result<()> {
    umount2(path, MntFlags::MNT_DETACH).map_err(|e| Error::syscall("umount2", e))?;
    fs::remove_dir(path).map_err(|e| Error::io(PathBuf::from(path), e))?;
    Ok(())
}

/// Mount `/proc` inside the new root (pre-pivot path).
pub fn mount_proc(rootfs: &Path) -> Result<()> {
    let proc_dir = rootfs.join("proc");
    fs::create_dir_all(&proc_dir).map_err(|e| Error::io(proc_dir.clone(), e))?;

    mount(
        Some("proc"),
        &proc_dir,
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        None::<&str>,
    )
    .map_err(|e| Error::syscall("mount(proc)", e))?;
    Ok(())
}

/// Mount `/proc` at `/proc` (used after pivot_root when `/` is already the
/// new root).
pub fn mount_proc_in_new_root() -> Result<()> {
    let proc_dir = Path::new("/proc");
    fs::create_dir_all(proc_dir).map_err(|e| Error::io(proc_dir.to_path_buf(), e))?;

    mount(
        Some("proc"),
        proc_dir,
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        None::<&str>,
    )
    .map_err(|e| Error::syscall("mount(/proc)", e))?;
    Ok(())
}

/// Mount a minimal `/dev` with a tmpfs, then populate essential device
/// nodes.
pub fn mount_dev_in_new_root() -> Result<()> {
    let dev_dir = Path::new("/dev");
    fs::create_dir_all(dev_dir).map_err(|e| Error::io(dev_dir.to_path_buf(), e))?;

    mount(
        Some("tmpfs"),
        dev_dir,
        Some("tmpfs"),
        MsFlags::MS_NOSUID,
        Some("mode=0755,size=65536k"),
    )
    .map_err(|e| Error::syscall("mount(tmpfs /dev)", e))?;

    create_dev_nodes();
    Ok(())
}

/// Create minimal device nodes inside the container's `/dev`. Failures are
/// ignored: devtmpfs already provides these on many hosts, and mknod
/// requires a capability this process may not hold after userns mapping.
fn create_dev_nodes() {
    use nix::sys::stat;

    let perm = stat::Mode::from_bits_truncate(0o666);
    let devices = [
        ("/dev/null", stat::makedev(1, 3)),
        ("/dev/zero", stat::makedev(1, 5)),
        ("/dev/urandom", stat::makedev(1, 9)),
        ("/dev/tty", stat::makedev(5, 0)),
    ];

    for (path, dev) in &devices {
        let _ = stat::mknod(Path::new(path), stat::SFlag::S_IFCHR, perm, *dev);
    }
}

/// Bind-mount the rootfs into `<root>/criu-root`, a scratch mount point the
/// C/R helper requires to have an un-overmounted parent (spec §4.6 step 1).
/// Returns the scratch path so the caller can record it for detached
/// unmount on return.
pub fn bind_mount_criu_root(root: &Path, rootfs: &Path) -> Result<PathBuf> {
    let scratch = root.join("criu-root");
    fs::create_dir_all(&scratch).map_err(|e| Error::io(scratch.clone(), e))?;

    mount(
        Some(rootfs),
        &scratch,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| Error::syscall("mount(criu-root)", e))?;

    Ok(scratch)
}

/// Detach-unmount a scratch bind mount created by [`bind_mount_criu_root`].
pub fn unmount_detached(path: &Path) -> Result<()> {
    umount2(path, MntFlags::MNT_DETACH).map_err(|e| Error::syscall("umount2(detach)", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn criu_root_path_is_under_container_root() {
        let root = Path::new("/var/lib/craterun/abc123");
        assert_eq!(
            root.join("criu-root"),
            PathBuf::from("/var/lib/craterun/abc123/criu-root")
        );
    }
}
