use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use nix::sys::signal::Signal;

use crate::cli::{Cli, Command};
use crate::container::Container;
use crate::core::config::{CgroupResources, Config, NamespaceConfig, NamespaceType, Process};
use crate::core::state;
use crate::cr::{DumpOptions, RestoreOptions};

/// Dispatch a parsed CLI command to the appropriate handler.
pub fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            rootfs,
            memory,
            cpu,
            pids,
            uid,
            gid,
            hostname,
            cmd,
        } => cmd_run(rootfs, memory, cpu, pids, uid, gid, hostname, cmd),
        Command::Start {
            rootfs,
            memory,
            cpu,
            pids,
            uid,
            gid,
            hostname,
            cmd,
        } => cmd_start(rootfs, memory, cpu, pids, uid, gid, hostname, cmd),
        Command::Ps => cmd_ps(),
        Command::State { id } => cmd_state(&id),
        Command::Rm { id, force } => cmd_rm(&id, force),
        Command::Logs { id } => cmd_logs(&id),
        Command::Exec { id, cmd } => cmd_exec(&id, &cmd),
        Command::Pause { id } => cmd_pause(&id),
        Command::Resume { id } => cmd_resume(&id),
        Command::Signal { id, signal, all } => cmd_signal(&id, &signal, all),
        Command::Checkpoint {
            id,
            image_path,
            leave_running,
            pre_dump,
            tcp_established,
        } => cmd_checkpoint(&id, &image_path, leave_running, pre_dump, tcp_established),
        Command::Restore {
            id,
            image_path,
            detach,
        } => cmd_restore(&id, &image_path, detach),
    }
}

// ─── config construction ────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn build_config(
    rootfs: String,
    memory: Option<u64>,
    cpu: Option<String>,
    pids: Option<u64>,
    uid: Option<u32>,
    gid: Option<u32>,
    hostname: String,
) -> Result<Config> {
    #[cfg(not(target_os = "linux"))]
    {
        bail!("craterun only runs on Linux");
    }

    validate_rootfs(&rootfs)?;

    let (cpu_quota_us, cpu_period_us) = match &cpu {
        Some(spec) => {
            let mut parts = spec.split_whitespace();
            let quota = parts
                .next()
                .context("--cpu must be \"quota period\"")?
                .parse()
                .context("invalid cpu quota")?;
            let period = parts
                .next()
                .context("--cpu must be \"quota period\"")?
                .parse()
                .context("invalid cpu period")?;
            (Some(quota), Some(period))
        }
        None => (None, None),
    };

    let mut uid_mappings = Vec::new();
    let mut gid_mappings = Vec::new();
    if let Some(uid) = uid {
        uid_mappings.push(crate::core::config::IdMap {
            container_id: 0,
            host_id: uid,
            size: 1,
        });
    }
    if let Some(gid) = gid {
        gid_mappings.push(crate::core::config::IdMap {
            container_id: 0,
            host_id: gid,
            size: 1,
        });
    }

    Ok(Config {
        rootfs: PathBuf::from(rootfs),
        readonly_rootfs: false,
        hostname,
        namespaces: vec![
            NamespaceConfig::new(NamespaceType::Mount),
            NamespaceConfig::new(NamespaceType::Pid),
            NamespaceConfig::new(NamespaceType::Uts),
            NamespaceConfig::new(NamespaceType::Ipc),
            NamespaceConfig::new(NamespaceType::Network),
        ],
        mounts: vec![],
        cgroup: CgroupResources {
            memory_limit: memory,
            cpu_quota_us,
            cpu_period_us,
            pids_limit: pids,
            skip_devices: false,
        },
        cgroups_path: None,
        uid_mappings,
        gid_mappings,
        hooks: Default::default(),
        labels: HashMap::new(),
        rlimits: vec![],
        devices: vec![],
        network: Default::default(),
        rootless: false,
        oom_score_adj: None,
        parent_death_signal: None,
    })
}

/// Refuse rootfs paths that would be dangerous or obviously wrong, ported
/// from the teacher's own pre-flight check.
fn validate_rootfs(rootfs: &str) -> Result<()> {
    if rootfs.is_empty() {
        bail!("rootfs path must not be empty");
    }

    let path = std::path::Path::new(rootfs);
    if !path.exists() {
        bail!("rootfs path '{rootfs}' does not exist");
    }
    let canon = fs::canonicalize(path)
        .with_context(|| format!("cannot canonicalize rootfs path '{rootfs}'"))?;

    if canon == std::path::Path::new("/") {
        bail!("refusing to use '/' as rootfs — this would destroy the host");
    }

    let looks_like_root =
        canon.join("bin").is_dir() || canon.join("usr").is_dir() || canon.join("etc").is_dir();
    if !looks_like_root {
        bail!(
            "rootfs '{}' does not look like a filesystem root (no bin/, usr/, or etc/ found). \
             Please provide a path to an extracted rootfs (e.g. Alpine minirootfs).",
            canon.display()
        );
    }

    Ok(())
}

fn new_container(config: Config) -> Result<Container> {
    let id = crate::core::id::generate_id();
    let root = state::container_dir(&id)?;
    Ok(Container::new(id, root, config))
}

// ─── run / start ────────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    rootfs: String,
    memory: Option<u64>,
    cpu: Option<String>,
    pids: Option<u64>,
    uid: Option<u32>,
    gid: Option<u32>,
    hostname: String,
    cmd: Vec<String>,
) -> Result<()> {
    state::ensure_state_dir()?;
    let config = build_config(rootfs, memory, cpu, pids, uid, gid, hostname)?;
    let container = new_container(config)?;
    let process = Process::init_with_args(cmd);

    container.run(&process).context("failed to run container")?;
    println!("{}", container.id());

    let status_text = container.status()?;
    log::info!("container {} is {status_text}", container.id());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_start(
    rootfs: String,
    memory: Option<u64>,
    cpu: Option<String>,
    pids: Option<u64>,
    uid: Option<u32>,
    gid: Option<u32>,
    hostname: String,
    cmd: Vec<String>,
) -> Result<()> {
    state::ensure_state_dir()?;
    let config = build_config(rootfs, memory, cpu, pids, uid, gid, hostname)?;
    let container = new_container(config)?;
    let process = Process::init_with_args(cmd);

    container.start(&process).context("failed to start container")?;
    println!("{}", container.id());
    Ok(())
}

// ─── ps ─────────────────────────────────────────────────────────────────────

fn cmd_ps() -> Result<()> {
    let ids = state::list_containers()?;

    println!(
        "{:<18} {:<8} {:<10} {:<24} {}",
        "CONTAINER ID", "PID", "STATUS", "CREATED", "COMMAND"
    );

    for id in ids {
        let container = match Container::load(&id) {
            Ok(c) => c,
            Err(_) => continue,
        };
        let status = match container.status() {
            Ok(s) => s,
            Err(_) => continue,
        };
        let doc = match container.state() {
            Ok(d) => d,
            Err(_) => continue,
        };

        let pid_str = if doc.init_process_pid > 0 {
            doc.init_process_pid.to_string()
        } else {
            "-".to_string()
        };
        let created = doc.created.format("%Y-%m-%d %H:%M:%S UTC");
        let cmd_str = doc.config.rootfs.display().to_string();

        println!(
            "{:<18} {:<8} {:<10} {:<24} {}",
            &id[..16.min(id.len())],
            pid_str,
            status,
            created,
            cmd_str
        );
    }

    Ok(())
}

// ─── state ──────────────────────────────────────────────────────────────────

fn cmd_state(id_prefix: &str) -> Result<()> {
    let id = state::resolve_id(id_prefix)?;
    let container = Container::load(&id)?;
    let oci_state = container.oci_state()?;
    println!("{}", serde_json::to_string_pretty(&oci_state)?);
    Ok(())
}

// ─── rm ─────────────────────────────────────────────────────────────────────

fn cmd_rm(id_prefix: &str, force: bool) -> Result<()> {
    let id = state::resolve_id(id_prefix)?;
    let container = Container::load(&id)?;
    let status = container.status()?;

    if status == crate::state_machine::Status::Running && !force {
        bail!("container {id} is still running. Use --force to remove a running container.");
    }

    container.destroy().context("failed to destroy container")?;
    println!("Removed container {id}");
    Ok(())
}

// ─── logs ───────────────────────────────────────────────────────────────────

fn cmd_logs(id_prefix: &str) -> Result<()> {
    let id = state::resolve_id(id_prefix)?;

    let stdout_path = state::log_path(&id, state::STDOUT_LOG)?;
    let stderr_path = state::log_path(&id, state::STDERR_LOG)?;

    if stdout_path.exists() {
        let contents = fs::read_to_string(&stdout_path).context("failed to read stdout.log")?;
        if !contents.is_empty() {
            print!("{contents}");
        }
    }

    if stderr_path.exists() {
        let contents = fs::read_to_string(&stderr_path).context("failed to read stderr.log")?;
        if !contents.is_empty() {
            eprint!("{contents}");
        }
    }

    Ok(())
}

// ─── exec ───────────────────────────────────────────────────────────────────

fn cmd_exec(id_prefix: &str, cmd: &[String]) -> Result<()> {
    if cmd.is_empty() {
        bail!("no command specified for exec");
    }

    let id = state::resolve_id(id_prefix)?;
    let container = Container::load(&id)?;
    let status = container.status()?;

    if status != crate::state_machine::Status::Running {
        bail!("container {id} is not running");
    }

    let mut process = Process::init_with_args(cmd.to_vec());
    process.init = false;

    // A standalone exec joins the running container's namespaces; the
    // container core's `start`/`run` path is for pid-1 only, so this drives
    // the setns + chroot dance directly, mirroring the teacher's
    // `exec_in_container` but against the new namespace-path lookup.
    let doc = container.state()?;
    exec_in_running_container(doc.init_process_pid, &process)
}

fn exec_in_running_container(pid: i32, process: &Process) -> Result<()> {
    use std::ffi::CString;

    for ty in crate::core::config::NamespaceType::CANONICAL_ORDER {
        if ty == crate::core::config::NamespaceType::User {
            continue;
        }
        let path = crate::namespaces::proc_ns_path(pid, ty);
        if !path.exists() {
            continue;
        }
        crate::namespaces::setns(&path, ty)
            .with_context(|| format!("failed to setns into {path:?} for pid {pid}"))?;
    }

    let root_path = format!("/proc/{pid}/root");
    nix::unistd::chroot(root_path.as_str()).context("failed to chroot into container root")?;
    nix::unistd::chdir(process.cwd.as_str()).context("chdir into process cwd")?;

    let program = CString::new(process.args[0].as_str())
        .with_context(|| format!("invalid command: {}", process.args[0]))?;
    let args: Vec<CString> = process
        .args
        .iter()
        .map(|a| CString::new(a.as_str()).context("invalid argument"))
        .collect::<Result<_>>()?;

    let env: Vec<CString> = vec![
        CString::new("PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin").unwrap(),
        CString::new("TERM=xterm").unwrap(),
    ];

    nix::unistd::execve(&program, &args, &env)
        .with_context(|| format!("execve '{}' failed", process.args[0]))?;

    unreachable!()
}

// ─── pause / resume ─────────────────────────────────────────────────────────

fn cmd_pause(id_prefix: &str) -> Result<()> {
    let id = state::resolve_id(id_prefix)?;
    Container::load(&id)?.pause().context("failed to pause container")?;
    Ok(())
}

fn cmd_resume(id_prefix: &str) -> Result<()> {
    let id = state::resolve_id(id_prefix)?;
    Container::load(&id)?.resume().context("failed to resume container")?;
    Ok(())
}

// ─── signal ─────────────────────────────────────────────────────────────────

fn cmd_signal(id_prefix: &str, signal: &str, all: bool) -> Result<()> {
    let id = state::resolve_id(id_prefix)?;
    let sig = parse_signal(signal)?;
    Container::load(&id)?
        .signal(sig, all)
        .context("failed to signal container")?;
    Ok(())
}

fn parse_signal(raw: &str) -> Result<Signal> {
    if let Ok(n) = raw.parse::<i32>() {
        return Signal::try_from(n).with_context(|| format!("invalid signal number {n}"));
    }
    let name = if raw.to_uppercase().starts_with("SIG") {
        raw.to_uppercase()
    } else {
        format!("SIG{}", raw.to_uppercase())
    };
    Signal::from_str(&name).with_context(|| format!("unknown signal: {raw}"))
}

// ─── checkpoint / restore ───────────────────────────────────────────────────

fn cmd_checkpoint(
    id_prefix: &str,
    image_path: &str,
    leave_running: bool,
    pre_dump: bool,
    tcp_established: bool,
) -> Result<()> {
    let id = state::resolve_id(id_prefix)?;
    let container = Container::load(&id)?;

    let opts = DumpOptions {
        images_dir: PathBuf::from(image_path),
        leave_running,
        pre_dump,
        mem_track: pre_dump,
        tcp_established,
    };
    container.checkpoint(&opts).context("checkpoint failed")?;
    println!("Checkpointed container {id}");
    Ok(())
}

fn cmd_restore(id_prefix: &str, image_path: &str, detach: bool) -> Result<()> {
    let id = state::resolve_id(id_prefix)?;
    let container = Container::load(&id)?;

    let opts = RestoreOptions {
        images_dir: PathBuf::from(image_path),
        detach,
    };
    let process = Process::init_with_args(vec![]);
    container.restore(&process, &opts).context("restore failed")?;
    println!("Restored container {id}");
    Ok(())
}
