mod bootstrap;
mod cgroup;
mod cli;
mod container;
mod core;
mod cr;
mod error;
mod fifo;
mod hooks;
mod init_stub;
mod intel_rdt;
mod mounts;
mod namespaces;
mod network;
mod parent;
mod state_machine;
mod stats;

use std::process;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if std::env::args().nth(1).as_deref() == Some("init") {
        init_stub::run();
    }

    let args = cli::parse();

    if let Err(e) = cli::commands::dispatch(args) {
        eprintln!("craterun: {e:#}");
        process::exit(1);
    }
}
