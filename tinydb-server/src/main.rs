//! # TinyDB Server
//!
//! Composition root: builds the config, restores state from a snapshot
//! if one is present, spawns the background threads (TTL sweeper,
//! snapshotter, worker pool), and runs the tokio accept loop until
//! ctrl-c, writing the exit snapshot on the way out.

use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tinydb_common::Config;
use tinydb_engine::{ttl, RuntimeContext};

use tinydb_server::executor::{ConnectionState, ServerState, SnapshotterHandle};
use tinydb_server::pubsub::PubSubRegistry;
use tinydb_server::server::handle_connection;
use tinydb_server::workerpool::WorkerPool;

const DEFAULT_TTL_SWEEP_INTERVAL_SECS: u64 = 1;
const DEFAULT_SNAPSHOT_INTERVAL_SECS: u64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::default();
    let context = Arc::new(RuntimeContext::new(config.num_initial_databases, config.num_shards));

    restore_snapshot(&context, &config);

    let pubsub = Arc::new(PubSubRegistry::new());
    let workers = Arc::new(WorkerPool::start(config.worker_pool_size, config.worker_queue_capacity));

    let ttl_sweeper = ttl::TtlSweeperHandle::start(context.clone(), DEFAULT_TTL_SWEEP_INTERVAL_SECS);
    let snapshotter = SnapshotterHandle::start(
        context.clone(),
        DEFAULT_SNAPSHOT_INTERVAL_SECS,
        config.default_snapshot_name.clone(),
    );

    let state = Arc::new(ServerState {
        engine: context,
        pubsub,
        workers,
        config: config.clone(),
        ttl_sweeper: Mutex::new(Some(ttl_sweeper)),
        snapshotter: Mutex::new(Some(snapshotter)),
    });

    let [a, b, c, d] = config.host;
    let listener = TcpListener::bind((Ipv4Addr::new(a, b, c, d), config.port)).await?;
    info!(port = config.port, "tinydb listening");

    let accept_state = state.clone();
    let accept_loop = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let conn_state = accept_state.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, conn_state).await {
                            warn!(%err, "connection task ended with error");
                        }
                    });
                }
                Err(err) => {
                    error!(%err, "accept failed");
                }
            }
        }
    });

    tokio::select! {
        _ = accept_loop => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    write_exit_snapshot(&state, &config);

    if let Some(sweeper) = state.ttl_sweeper.lock().take() {
        sweeper.stop();
    }
    if let Some(snapshotter) = state.snapshotter.lock().take() {
        snapshotter.stop();
    }

    Ok(())
}

/// Loads `config.default_snapshot_name` into the freshly created context
/// if the file exists. Mirrors `tinydb_snapshot.c`'s startup restore;
/// absence of the file is not an error, it just means a fresh store.
fn restore_snapshot(context: &Arc<RuntimeContext>, config: &Config) {
    let path = &config.default_snapshot_name;
    if !std::path::Path::new(path).exists() {
        return;
    }

    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(err) => {
            warn!(path, %err, "failed to open startup snapshot, starting fresh");
            return;
        }
    };
    let mut reader = std::io::BufReader::new(file);
    match tinydb_engine::snapshot::import(&mut reader, context.databases.num_shards()) {
        Ok((databases, users)) => {
            context.databases.apply_imported(databases);
            context.users.write().replace(users);
            info!(path, "restored snapshot at startup");
        }
        Err(err) => {
            warn!(path, %err, "failed to parse startup snapshot, starting fresh");
        }
    }
}

/// Writes the clean-shutdown snapshot using a dedicated connection state
/// authenticated as the default user, so the same executor path used by
/// clients runs the export.
fn write_exit_snapshot(state: &Arc<ServerState>, config: &Config) {
    let mut conn = ConnectionState::new(0);
    let cmd = tinydb_server::parser::ParsedCommand {
        name: "export".to_string(),
        argv: vec![tinydb_server::parser::Arg::String(config.default_exit_snapshot_name.clone())],
    };
    let reply = tinydb_server::executor::execute(state, &mut conn, &cmd);
    info!(path = %config.default_exit_snapshot_name, reply, "wrote exit snapshot");
}
