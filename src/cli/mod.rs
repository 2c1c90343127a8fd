pub mod commands;

use clap::{Parser, Subcommand};

/// CrateRun — a minimal Linux container runtime.
#[derive(Parser, Debug)]
#[command(name = "craterun", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create and run a new container (equivalent to `create` + `start`).
    Run {
        /// Path to the root filesystem (e.g. an extracted Alpine minirootfs).
        #[arg(long)]
        rootfs: String,

        /// Memory limit in bytes (e.g. 67108864 for 64 MiB). Passed to cgroup memory.max.
        #[arg(long)]
        memory: Option<u64>,

        /// CPU bandwidth in the form `quota period` (microseconds), e.g. "100000 100000" for 100 %.
        /// Passed to cgroup cpu.max.
        #[arg(long)]
        cpu: Option<String>,

        /// Maximum number of PIDs in the container.
        #[arg(long)]
        pids: Option<u64>,

        /// UID to map inside the container (host UID that becomes root inside). Optional.
        #[arg(long)]
        uid: Option<u32>,

        /// GID to map inside the container. Optional.
        #[arg(long)]
        gid: Option<u32>,

        /// Hostname to set inside the container (default: "craterun").
        #[arg(long, default_value = "craterun")]
        hostname: String,

        /// The command (and arguments) to execute inside the container.
        /// Everything after `--` is treated as the command.
        #[arg(last = true, required = true)]
        cmd: Vec<String>,
    },

    /// Create a container and leave it at `Created`, without running it.
    Start {
        #[arg(long)]
        rootfs: String,
        #[arg(long)]
        memory: Option<u64>,
        #[arg(long)]
        cpu: Option<String>,
        #[arg(long)]
        pids: Option<u64>,
        #[arg(long)]
        uid: Option<u32>,
        #[arg(long)]
        gid: Option<u32>,
        #[arg(long, default_value = "craterun")]
        hostname: String,
        #[arg(last = true, required = true)]
        cmd: Vec<String>,
    },

    /// List containers.
    Ps,

    /// Print the full OCI-shaped state of a container as JSON.
    State {
        /// Container ID (or unique prefix).
        id: String,
    },

    /// Remove a stopped container.
    Rm {
        /// Container ID (or unique prefix).
        id: String,

        /// Force-remove even if the container is still running.
        #[arg(long)]
        force: bool,
    },

    /// Print the stdout/stderr logs of a container.
    Logs {
        /// Container ID (or unique prefix).
        id: String,
    },

    /// Execute a command inside a running container.
    Exec {
        /// Container ID (or unique prefix).
        id: String,

        /// The command (and arguments) to execute.
        #[arg(last = true, required = true)]
        cmd: Vec<String>,
    },

    /// Freeze a container's processes.
    Pause {
        id: String,
    },

    /// Thaw a previously paused container.
    Resume {
        id: String,
    },

    /// Send a signal to a container's init process (or every process in its
    /// cgroup with `--all`).
    Signal {
        id: String,

        /// Signal name or number (e.g. "TERM", "SIGKILL", "9").
        signal: String,

        #[arg(long)]
        all: bool,
    },

    /// Checkpoint a running (or paused) container into an image directory.
    Checkpoint {
        id: String,

        #[arg(long)]
        image_path: String,

        /// Leave the container running after the checkpoint completes.
        #[arg(long)]
        leave_running: bool,

        /// Capture a pre-dump iteration only (requires a live helper).
        #[arg(long)]
        pre_dump: bool,

        #[arg(long)]
        tcp_established: bool,
    },

    /// Restore a container previously checkpointed with `checkpoint`.
    Restore {
        id: String,

        #[arg(long)]
        image_path: String,

        /// Unmount the transient restore scratch mount once restore completes.
        #[arg(long)]
        detach: bool,
    },
}

/// Parse CLI arguments. Called from `main`.
pub fn parse() -> Cli {
    Cli::parse()
}
