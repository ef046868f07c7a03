//! # Command Executor
//!
//! Purpose: dispatches a parsed command against the active database and
//! writes back the line-protocol reply, per spec.md §4.11's contract
//! table. Grounded in `tinydb_command_executor.c`'s reply-string
//! conventions (`Ok`, `FAILED`, `null`, `Usage: …`).

use std::fs::File;
use std::io::BufWriter;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use tinydb_common::{CommandClass, Config};
use tinydb_engine::{atomic, snapshot, ttl, Database, IncrOutcome, ListElement, RuntimeContext, Value};

use crate::parser::{Arg, ParsedCommand};
use crate::pubsub::{ConnectionId, MessageSender, PubSubRegistry};
use crate::webhook;
use crate::workerpool::{Task, WorkerPool};

pub struct ConnectionState {
    pub id: ConnectionId,
    pub database_id: u64,
    pub user_name: String,
}

impl ConnectionState {
    pub fn new(id: ConnectionId) -> Self {
        ConnectionState {
            id,
            database_id: 0,
            user_name: tinydb_engine::user::DEFAULT_USER.to_string(),
        }
    }
}

/// Background snapshotter: periodically exports to a configured path.
/// Shaped the same way as `tinydb_engine::TtlSweeperHandle` — atomic
/// `running` flag, atomic interval, one supervisor thread.
pub struct SnapshotterHandle {
    running: Arc<AtomicBool>,
    interval_seconds: Arc<AtomicU64>,
    path: Arc<Mutex<String>>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl SnapshotterHandle {
    pub fn start(context: Arc<RuntimeContext>, interval_seconds: u64, path: String) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let interval = Arc::new(AtomicU64::new(interval_seconds.max(1)));
        let path = Arc::new(Mutex::new(path));

        let running_thread = running.clone();
        let interval_thread = interval.clone();
        let path_thread = path.clone();
        let join = std::thread::spawn(move || {
            info!("snapshotter started");
            while running_thread.load(Ordering::Acquire) {
                let secs = interval_thread.load(Ordering::Acquire);
                std::thread::sleep(Duration::from_secs(secs));
                if !running_thread.load(Ordering::Acquire) {
                    break;
                }
                let target = path_thread.lock().clone();
                match write_snapshot(&context, &target) {
                    Ok(()) => info!(path = %target, "periodic snapshot written"),
                    Err(err) => error!(path = %target, %err, "periodic snapshot failed"),
                }
            }
            info!("snapshotter stopped");
        });

        SnapshotterHandle {
            running,
            interval_seconds: interval,
            path,
            join: Some(join),
        }
    }

    pub fn set_interval(&self, seconds: u64) {
        self.interval_seconds.store(seconds.max(1), Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn interval(&self) -> u64 {
        self.interval_seconds.load(Ordering::Acquire)
    }

    pub fn stop(mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn write_snapshot(context: &RuntimeContext, path: &str) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    snapshot::export(&mut writer, &context.databases, &context.users.read())
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
}

/// Process-wide state shared across connections: the engine context,
/// pub/sub registry, worker pool, and the two controllable background
/// threads (TTL sweeper, snapshotter).
pub struct ServerState {
    pub engine: Arc<RuntimeContext>,
    pub pubsub: Arc<PubSubRegistry>,
    pub workers: Arc<WorkerPool>,
    pub config: Config,
    pub ttl_sweeper: Mutex<Option<ttl::TtlSweeperHandle>>,
    pub snapshotter: Mutex<Option<SnapshotterHandle>>,
}

impl ServerState {
    fn database(&self, id: u64) -> &Database {
        self.engine
            .databases
            .database(id)
            .expect("active database id must always resolve")
    }

    fn check_acl(&self, conn: &ConnectionState, class: CommandClass) -> bool {
        let users = self.engine.users.read();
        match users.user(&conn.user_name) {
            Some(user) => user.acl_for(conn.database_id).contains(class.required()),
            None => false,
        }
    }
}

fn classify(command: &str) -> Option<CommandClass> {
    match command {
        "get" | "strlen" | "llen" | "lrange" | "ttl" | "snapshot_status" | "ttl_cleanup_status"
        | "insp" => Some(CommandClass::Read),
        "set" | "append" | "incr" | "rpush" | "lpush" | "rpop" | "lpop" | "expire" | "ttl_set"
        | "export" | "load" | "snapshot_start" | "snapshot_stop" | "snapshot_interval"
        | "ttl_cleanup_start" | "ttl_cleanup_stop" | "ttl_cleanup_interval" | "create_user"
        | "sub" | "unsub" | "pub" => Some(CommandClass::Write),
        "delete_user" => Some(CommandClass::Delete),
        _ => None,
    }
}

/// Executes one parsed command and returns the reply line (without a
/// trailing newline — the caller appends it before writing to the
/// socket, matching the wire protocol's "every response ends with \n").
pub fn execute(state: &ServerState, conn: &mut ConnectionState, cmd: &ParsedCommand) -> String {
    if cmd.name != "auth" {
        if let Some(class) = classify(&cmd.name) {
            if !state.check_acl(conn, class) {
                warn!(user = %conn.user_name, command = %cmd.name, "ACL denied");
                return "FAILED".to_string();
            }
        }
    }

    match cmd.name.as_str() {
        "set" => cmd_set(state, conn, cmd),
        "get" => cmd_get(state, conn, cmd),
        "append" => cmd_append(state, conn, cmd),
        "strlen" => cmd_strlen(state, conn, cmd),
        "incr" => cmd_incr(state, conn, cmd),
        "rpush" => cmd_push(state, conn, cmd, true),
        "lpush" => cmd_push(state, conn, cmd, false),
        "rpop" => cmd_pop(state, conn, cmd, true),
        "lpop" => cmd_pop(state, conn, cmd, false),
        "llen" => cmd_llen(state, conn, cmd),
        "lrange" => cmd_lrange(state, conn, cmd),
        "expire" | "ttl_set" => cmd_set_ttl(state, conn, cmd),
        "ttl" => cmd_ttl(state, conn, cmd),
        "export" => cmd_export(state, cmd),
        "load" => cmd_load(state, cmd),
        "snapshot_start" => cmd_snapshot_start(state, cmd),
        "snapshot_stop" => cmd_snapshot_stop(state),
        "snapshot_interval" => cmd_snapshot_interval(state, cmd),
        "snapshot_status" => cmd_snapshot_status(state),
        "ttl_cleanup_start" => cmd_ttl_cleanup_start(state, cmd),
        "ttl_cleanup_stop" => cmd_ttl_cleanup_stop(state),
        "ttl_cleanup_interval" => cmd_ttl_cleanup_interval(state, cmd),
        "ttl_cleanup_status" => cmd_ttl_cleanup_status(state),
        "create_user" => cmd_create_user(state, cmd),
        "auth" => cmd_auth(state, conn, cmd),
        "delete_user" => cmd_delete_user(state, conn, cmd),
        "sub" => cmd_sub(state, conn, cmd),
        "unsub" => cmd_unsub(state, conn, cmd),
        "pub" => cmd_pub(state, conn, cmd),
        "insp" => cmd_insp(state, conn),
        _ => "Unknown command".to_string(),
    }
}

fn usage(msg: &str) -> String {
    format!("Usage: {msg}")
}

fn render_value(entry: &tinydb_engine::Entry) -> String {
    match &entry.value {
        Value::String(s) => String::from_utf8_lossy(&s.read()).into_owned(),
        Value::Integer(n) => n.load(Ordering::Acquire).to_string(),
        Value::List(list) => list.to_string_rendered(),
        Value::Object => "null".to_string(),
    }
}

fn cmd_set(state: &ServerState, conn: &ConnectionState, cmd: &ParsedCommand) -> String {
    let (Some(key), Some(value)) = (cmd.arg(0), cmd.arg(1)) else {
        return usage("set K V");
    };
    let db = state.database(conn.database_id);
    let key_bytes: Arc<[u8]> = Arc::from(key.as_bytes());
    atomic::store(db, key_bytes, Value::String(parking_lot::RwLock::new(Arc::from(value.as_bytes()))));
    "Ok".to_string()
}

fn cmd_get(state: &ServerState, conn: &ConnectionState, cmd: &ParsedCommand) -> String {
    let Some(key) = cmd.arg(0) else {
        return usage("get K");
    };
    let db = state.database(conn.database_id);
    match atomic::get(db, &key.as_bytes()) {
        Some(entry) => render_value(&entry),
        None => "null".to_string(),
    }
}

fn cmd_append(state: &ServerState, conn: &ConnectionState, cmd: &ParsedCommand) -> String {
    let (Some(key), Some(suffix)) = (cmd.arg(0), cmd.arg(1)) else {
        return usage("append K V");
    };
    let db = state.database(conn.database_id);
    if atomic::append(db, &key.as_bytes(), &suffix.as_bytes()) {
        "Ok".to_string()
    } else {
        "null".to_string()
    }
}

fn cmd_strlen(state: &ServerState, conn: &ConnectionState, cmd: &ParsedCommand) -> String {
    let Some(key) = cmd.arg(0) else {
        return usage("strlen K");
    };
    let db = state.database(conn.database_id);
    match atomic::get(db, &key.as_bytes()) {
        Some(entry) => match &entry.value {
            Value::String(s) => s.read().len().to_string(),
            _ => "null".to_string(),
        },
        None => "null".to_string(),
    }
}

fn cmd_incr(state: &ServerState, conn: &ConnectionState, cmd: &ParsedCommand) -> String {
    let Some(key) = cmd.arg(0) else {
        return usage("incr K");
    };
    let db = state.database(conn.database_id);
    match atomic::incr(db, &key.as_bytes()) {
        IncrOutcome::Value(n) => n.to_string(),
        IncrOutcome::WrongType => "-1".to_string(),
    }
}

fn arg_to_element(arg: &Arg) -> ListElement {
    match arg {
        Arg::Number(n) => ListElement::Integer(*n),
        Arg::String(s) => ListElement::String(Arc::from(s.as_bytes())),
    }
}

fn cmd_push(state: &ServerState, conn: &ConnectionState, cmd: &ParsedCommand, right: bool) -> String {
    let usage_msg = if right { "rpush K V" } else { "lpush K V" };
    let (Some(key), Some(value)) = (cmd.arg(0), cmd.arg(1)) else {
        return usage(usage_msg);
    };

    let db = state.database(conn.database_id);
    let key_bytes: Arc<[u8]> = Arc::from(key.as_bytes());
    let shard = db.shard_for(&key_bytes);

    let list = match shard.get(&key_bytes) {
        Some(entry) => match &entry.value {
            Value::List(list) => list.clone(),
            _ => return "FAILED".to_string(),
        },
        None => {
            let list = Arc::new(tinydb_engine::ListValue::new());
            shard.put(key_bytes.clone(), tinydb_engine::Entry::new_list(key_bytes.clone(), list.clone()));
            list
        }
    };

    let element = arg_to_element(value);
    if right {
        list.rpush(element);
    } else {
        list.lpush(element);
    }
    "Ok".to_string()
}

fn cmd_pop(state: &ServerState, conn: &ConnectionState, cmd: &ParsedCommand, right: bool) -> String {
    let usage_msg = if right { "rpop K" } else { "lpop K" };
    let Some(key) = cmd.arg(0) else {
        return usage(usage_msg);
    };

    let db = state.database(conn.database_id);
    match atomic::get(db, &key.as_bytes()) {
        Some(entry) => match &entry.value {
            Value::List(list) => {
                let popped = if right { list.rpop() } else { list.lpop() };
                match popped {
                    Some(element) => element.render_bare(),
                    None => "null".to_string(),
                }
            }
            _ => "null".to_string(),
        },
        None => "null".to_string(),
    }
}

fn cmd_llen(state: &ServerState, conn: &ConnectionState, cmd: &ParsedCommand) -> String {
    let Some(key) = cmd.arg(0) else {
        return usage("llen K");
    };
    let db = state.database(conn.database_id);
    match atomic::get(db, &key.as_bytes()) {
        Some(entry) => match &entry.value {
            Value::List(list) => list.len().to_string(),
            _ => "null".to_string(),
        },
        None => "null".to_string(),
    }
}

fn cmd_lrange(state: &ServerState, conn: &ConnectionState, cmd: &ParsedCommand) -> String {
    let (Some(key), Some(start), Some(stop)) = (cmd.arg(0), cmd.arg(1), cmd.arg(2)) else {
        return usage("lrange K START STOP");
    };
    let (Some(start), Some(stop)) = (start.as_number(), stop.as_number()) else {
        return usage("lrange K START STOP");
    };
    let db = state.database(conn.database_id);
    match atomic::get(db, &key.as_bytes()) {
        Some(entry) => match &entry.value {
            Value::List(list) => list.range_to_string(start, stop),
            _ => "null".to_string(),
        },
        None => "null".to_string(),
    }
}

fn cmd_set_ttl(state: &ServerState, conn: &ConnectionState, cmd: &ParsedCommand) -> String {
    let (Some(key), Some(seconds)) = (cmd.arg(0), cmd.arg(1)) else {
        return usage("expire K SECONDS");
    };
    let Some(seconds) = seconds.as_number() else {
        return usage("expire K SECONDS");
    };
    let db = state.database(conn.database_id);
    if ttl::set_ttl(db, &key.as_bytes(), seconds) {
        "Ok".to_string()
    } else {
        "FAILED".to_string()
    }
}

fn cmd_ttl(state: &ServerState, conn: &ConnectionState, cmd: &ParsedCommand) -> String {
    let Some(key) = cmd.arg(0) else {
        return usage("ttl K");
    };
    let db = state.database(conn.database_id);
    ttl::get_ttl(db, &key.as_bytes()).to_string()
}

fn cmd_export(state: &ServerState, cmd: &ParsedCommand) -> String {
    let Some(file) = cmd.arg(0).and_then(Arg::as_str) else {
        return usage("export FILE");
    };
    match write_snapshot(&state.engine, file) {
        Ok(()) => "Ok".to_string(),
        Err(err) => {
            error!(%err, file, "export failed");
            "FAILED".to_string()
        }
    }
}

fn cmd_load(state: &ServerState, cmd: &ParsedCommand) -> String {
    let path = cmd
        .arg(0)
        .and_then(Arg::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| state.config.default_snapshot_name.clone());
    // No reply is specified by source; this is log-only (see §9 open questions).
    match load_snapshot_into(state, &path) {
        Ok(()) => info!(path, "snapshot loaded"),
        Err(err) => error!(path, %err, "snapshot load failed"),
    }
    String::new()
}

fn load_snapshot_into(state: &ServerState, path: &str) -> std::io::Result<()> {
    let file = File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let num_shards = state.engine.databases.num_shards();
    let (databases, users) = snapshot::import(&mut reader, num_shards)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))?;

    // import() above fully validates the file before we touch any live
    // state; apply_imported/replace below only run once that succeeded.
    state.engine.databases.apply_imported(databases);
    state.engine.users.write().replace(users);
    Ok(())
}

fn cmd_snapshot_start(state: &ServerState, cmd: &ParsedCommand) -> String {
    let Some(interval) = cmd.arg(0).and_then(Arg::as_number) else {
        return usage("snapshot_start I FILE");
    };
    let file = cmd
        .arg(1)
        .and_then(Arg::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| state.config.default_snapshot_name.clone());

    let mut guard = state.snapshotter.lock();
    if let Some(existing) = guard.take() {
        existing.stop();
    }
    *guard = Some(SnapshotterHandle::start(state.engine.clone(), interval.max(1) as u64, file));
    "Ok".to_string()
}

fn cmd_snapshot_stop(state: &ServerState) -> String {
    let mut guard = state.snapshotter.lock();
    match guard.take() {
        Some(handle) => {
            handle.stop();
            "Ok".to_string()
        }
        None => "FAILED".to_string(),
    }
}

fn cmd_snapshot_interval(state: &ServerState, cmd: &ParsedCommand) -> String {
    let Some(interval) = cmd.arg(0).and_then(Arg::as_number) else {
        return usage("snapshot_interval I");
    };
    let guard = state.snapshotter.lock();
    match guard.as_ref() {
        Some(handle) => {
            handle.set_interval(interval.max(1) as u64);
            "Ok".to_string()
        }
        None => "FAILED".to_string(),
    }
}

fn cmd_snapshot_status(state: &ServerState) -> String {
    let guard = state.snapshotter.lock();
    match guard.as_ref() {
        Some(handle) if handle.is_running() => format!("running interval={}", handle.interval()),
        _ => "stopped".to_string(),
    }
}

fn cmd_ttl_cleanup_start(state: &ServerState, cmd: &ParsedCommand) -> String {
    let Some(interval) = cmd.arg(0).and_then(Arg::as_number) else {
        return usage("ttl_cleanup_start I");
    };
    let mut guard = state.ttl_sweeper.lock();
    if let Some(existing) = guard.take() {
        existing.stop();
    }
    *guard = Some(ttl::TtlSweeperHandle::start(state.engine.clone(), interval.max(1) as u64));
    "Ok".to_string()
}

fn cmd_ttl_cleanup_stop(state: &ServerState) -> String {
    let mut guard = state.ttl_sweeper.lock();
    match guard.take() {
        Some(handle) => {
            handle.stop();
            "Ok".to_string()
        }
        None => "FAILED".to_string(),
    }
}

fn cmd_ttl_cleanup_interval(state: &ServerState, cmd: &ParsedCommand) -> String {
    let Some(interval) = cmd.arg(0).and_then(Arg::as_number) else {
        return usage("ttl_cleanup_interval I");
    };
    let guard = state.ttl_sweeper.lock();
    match guard.as_ref() {
        Some(handle) => {
            handle.set_interval(interval.max(1) as u64);
            "Ok".to_string()
        }
        None => "FAILED".to_string(),
    }
}

fn cmd_ttl_cleanup_status(state: &ServerState) -> String {
    let guard = state.ttl_sweeper.lock();
    match guard.as_ref() {
        Some(handle) if handle.is_running() => "running".to_string(),
        _ => "stopped".to_string(),
    }
}

fn cmd_create_user(state: &ServerState, cmd: &ParsedCommand) -> String {
    let (Some(name), Some(password)) = (cmd.arg(0).and_then(Arg::as_str), cmd.arg(1).and_then(Arg::as_str)) else {
        return usage("create_user U P");
    };
    match state.engine.users.write().create_user(name, password) {
        Ok(()) => "Ok".to_string(),
        Err(_) => "FAILED".to_string(),
    }
}

fn cmd_auth(state: &ServerState, conn: &mut ConnectionState, cmd: &ParsedCommand) -> String {
    let (Some(name), Some(password)) = (cmd.arg(0).and_then(Arg::as_str), cmd.arg(1).and_then(Arg::as_str)) else {
        return usage("auth U P");
    };
    if state.engine.users.read().authenticate(name, password) {
        conn.user_name = name.to_string();
        "Ok".to_string()
    } else {
        "FAILED".to_string()
    }
}

fn cmd_delete_user(state: &ServerState, conn: &mut ConnectionState, cmd: &ParsedCommand) -> String {
    let Some(name) = cmd.arg(0).and_then(Arg::as_str) else {
        return usage("delete_user U");
    };
    match state.engine.users.write().delete_user(name, &conn.user_name) {
        Ok(was_active) => {
            if was_active {
                conn.user_name = tinydb_engine::user::DEFAULT_USER.to_string();
            }
            "Ok".to_string()
        }
        Err(_) => "FAILED".to_string(),
    }
}

fn cmd_sub(state: &ServerState, conn: &ConnectionState, cmd: &ParsedCommand) -> String {
    let Some(channel) = cmd.arg(0).and_then(Arg::as_str) else {
        return usage("sub CH");
    };
    let _ = (state, conn, channel);
    // Wiring the connection's sender happens in server.rs, which owns the
    // mpsc channel for this socket; the executor only validates the
    // command shape here and the caller performs the actual subscribe.
    "Ok".to_string()
}

fn cmd_unsub(state: &ServerState, conn: &ConnectionState, cmd: &ParsedCommand) -> String {
    let Some(channel) = cmd.arg(0).and_then(Arg::as_str) else {
        return usage("unsub CH");
    };
    state.pubsub.unsubscribe(channel, conn.id);
    "Ok".to_string()
}

fn cmd_pub(state: &ServerState, conn: &ConnectionState, cmd: &ParsedCommand) -> String {
    let (Some(channel), Some(message)) = (cmd.arg(0).and_then(Arg::as_str), cmd.arg(1).and_then(Arg::as_str)) else {
        return usage("pub CH MSG");
    };

    for (sender, msg) in state.pubsub.fan_out(channel, message) {
        state.workers.submit(Task::SendMessage { sender, message: msg });
    }

    if crate::pubsub::is_hook_channel(channel) {
        let db = state.database(conn.database_id);
        let payload = webhook::build_payload(channel, message);
        for url in webhook::list_webhook_urls(db, channel) {
            state.workers.submit(Task::Webhook { url, payload: payload.clone() });
        }
    }

    "Ok".to_string()
}

/// `insp` has no reply in the source: it dumps connection state to the
/// server's own log, not back to the client.
fn cmd_insp(state: &ServerState, conn: &ConnectionState) -> String {
    let db = state.database(conn.database_id);
    info!(
        database = conn.database_id,
        entries = db.total_entries(),
        user = conn.user_name,
        "insp"
    );
    String::new()
}

/// Reply for an empty or unparseable line.
pub const INVALID_COMMAND_REPLY: &str = "Invalid command";

pub fn subscribe(state: &ServerState, conn: &ConnectionState, channel: &str, sender: MessageSender) {
    state.pubsub.subscribe(channel, conn.id, sender);
}
