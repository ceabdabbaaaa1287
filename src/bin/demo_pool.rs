//! Thin CLI wrapper for exercising a remote worker pool by hand: provisions
//! the configured hosts, runs one command on each, then tears the pool down.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, LevelFilter};

use remote_worker_pool::config::PoolConfig;
use remote_worker_pool::remote_pool::RemotePool;
use remote_worker_pool::transport::DefaultTransport;
use remote_worker_pool::{logging, path_map::PathPair};

/// Provisions a pool of remote workers and runs a command on each.
#[derive(Parser, Debug)]
#[command(name = "remote-worker-pool-demo", version)]
struct Args {
    /// Hosts to provision, e.g. `--host user@host1 --host host2`.
    #[arg(long = "host", required = true)]
    hosts: Vec<String>,

    /// Local workspace directory to stage on each worker.
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Command to run on each worker once it is ready.
    #[arg(long, default_value = "true")]
    cmd: String,

    /// Number of workers to start per host.
    #[arg(long, default_value_t = 1)]
    workers_per_host: usize,

    /// Remote base directory workers are staged under.
    #[arg(long, default_value = "/var/tmp")]
    remote_root: String,

    #[arg(long, default_value_t = false)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    logging::init(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info });

    let config = PoolConfig::new(args.hosts.clone())
        .with_workers_per_host(args.workers_per_host)
        .with_remote_root(args.remote_root);

    if let Err(err) = config.validate() {
        error!("invalid configuration: {err}");
        std::process::exit(1);
    }

    let transport = DefaultTransport;
    let mut pool = RemotePool::new(&config, &transport);

    let progress = ProgressBar::new_spinner();
    progress.enable_steady_tick(Duration::from_millis(120));
    progress.set_style(ProgressStyle::with_template("{spinner} {msg}").expect("static template is valid"));
    progress.set_message(format!("staging {} worker(s)...", pool.worker_ids().len()));

    let cwd = std::env::current_dir().unwrap_or_else(|_| args.workspace.clone());
    let failed = pool.start(&args.workspace, &cwd);
    progress.finish_with_message(format!("staged {} worker(s), {} failed", pool.worker_ids().len(), failed.len()));
    for (id, err) in &failed {
        error!("worker {id} failed to start: {err}");
    }

    let cmd_tokens: Vec<String> = args.cmd.split_whitespace().map(str::to_string).collect();
    for id in pool.worker_ids() {
        if failed.iter().any(|(failed_id, _)| failed_id == &id) {
            continue;
        }
        let worker = pool.worker_mut(&id).expect("id came from worker_ids()");
        match worker.run_command(&cmd_tokens, None) {
            Ok(out) => info!("worker {id} exited with code {}", out.exitcode),
            Err(err) => error!("worker {id} failed to run command: {err}"),
        }
    }

    let results: Vec<PathPair> = Vec::new();
    let failures = pool.stop(&results);
    for (id, entries) in failures {
        error!("worker {id} failed to pull {} result(s)", entries.len());
    }
}
