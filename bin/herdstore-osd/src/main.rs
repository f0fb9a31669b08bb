//! Herdstore OSD - object storage daemon
//!
//! Wires the work-queue engine and the multi-disk placement layer together
//! and runs the process completion loop on the shared eventfd.

use anyhow::{Context, Result};
use clap::Parser;
use herdstore_common::config::Config;
use herdstore_storage::{MultiDisk, Recovery};
use herdstore_wqueue::{NoopTracer, StaticMembership, WorkQueueEngine};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "herdstore-osd")]
#[command(about = "Herdstore object storage daemon")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/herdstore/osd.toml")]
    config: String,

    /// Storage paths to use (overrides the config file)
    #[arg(long)]
    disks: Vec<PathBuf>,

    /// Legacy single-disk object path
    #[arg(long)]
    obj_path: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Cluster node count used for dynamic thread roofs
    #[arg(long)]
    nr_nodes: Option<usize>,
}

/// Stand-in orchestrator until cluster recovery is wired up
struct LogRecovery;

impl Recovery for LogRecovery {
    fn start_recovery(&self) {
        info!("recovery kicked for the current view");
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config: Config = if std::path::Path::new(&args.config).exists() {
        let raw = std::fs::read_to_string(&args.config)
            .with_context(|| format!("reading {}", args.config))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", args.config))?
    } else {
        Config::default()
    };

    // CLI arguments win over the config file
    let log_level = if args.log_level != "info" {
        args.log_level.clone()
    } else {
        config.logging.level.clone()
    };
    let disks = if args.disks.is_empty() {
        config.storage.disks.clone()
    } else {
        args.disks.clone()
    };
    let obj_path = args.obj_path.unwrap_or(config.storage.obj_path);
    let nr_nodes = args.nr_nodes.unwrap_or(config.node.nr_nodes);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        node = %config.node.name,
        nr_disks = disks.len(),
        obj_path = %obj_path.display(),
        "starting herdstore OSD"
    );

    let engine = WorkQueueEngine::new(
        Arc::new(StaticMembership::new(nr_nodes)),
        Arc::new(NoopTracer),
    )?;
    let recover_queue = engine.ordered_queue(&config.storage.recovery_queue)?;

    let md = MultiDisk::new(
        obj_path,
        &disks,
        config.storage.multidisk,
        recover_queue,
        Arc::new(LogRecovery),
    );

    for disk in md.info() {
        info!(
            idx = disk.idx,
            path = %disk.path.display(),
            free = disk.free,
            used = disk.used,
            "storage path online"
        );
    }
    info!(total_space = md.total_space(), "placement layer ready");

    completion_loop(&engine)
}

/// The process completion thread: wait on the shared eventfd and deliver
/// `done` steps as workers finish.
fn completion_loop(engine: &WorkQueueEngine) -> Result<()> {
    let mut fds = [libc::pollfd {
        fd: engine.completion_fd(),
        events: libc::POLLIN,
        revents: 0,
    }];

    loop {
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), 1, -1) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err).context("polling the completion fd");
        }
        if fds[0].revents & libc::POLLIN != 0 {
            engine.dispatch_completions();
        }
    }
}
