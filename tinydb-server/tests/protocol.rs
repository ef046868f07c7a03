//! End-to-end tests that drive the real line protocol over a loopback
//! TCP socket, covering the store/list/TTL/auth/pub-sub contract a
//! client actually sees.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use tinydb_common::Config;
use tinydb_engine::RuntimeContext;
use tinydb_server::executor::ServerState;
use tinydb_server::pubsub::PubSubRegistry;
use tinydb_server::server::handle_connection;
use tinydb_server::workerpool::WorkerPool;

async fn spawn_server(config: Config) -> std::net::SocketAddr {
    let context = Arc::new(RuntimeContext::new(config.num_initial_databases, config.num_shards));
    let state = Arc::new(ServerState {
        engine: context,
        pubsub: Arc::new(PubSubRegistry::new()),
        workers: Arc::new(WorkerPool::start(config.worker_pool_size, config.worker_queue_capacity)),
        config,
        ttl_sweeper: Mutex::new(None),
        snapshotter: Mutex::new(None),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let state = state.clone();
            tokio::spawn(async move {
                let _ = handle_connection(stream, state).await;
            });
        }
    });

    addr
}

struct Client {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        Client {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    async fn send(&mut self, line: &str) -> String {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        let mut reply = String::new();
        self.reader.read_line(&mut reply).await.unwrap();
        reply.trim_end_matches(['\r', '\n']).to_string()
    }

    /// For commands like `insp`/`load` that never send a reply. Lines on
    /// one connection are dispatched strictly in order, so a subsequent
    /// `send()` only gets its reply once this one has fully run.
    async fn send_no_reply(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }
}

fn test_config() -> Config {
    Config::default().with_num_shards(4)
}

#[tokio::test]
async fn set_get_roundtrip() {
    let addr = spawn_server(test_config()).await;
    let mut client = Client::connect(addr).await;

    assert_eq!(client.send("set name alice").await, "Ok");
    assert_eq!(client.send("get name").await, "alice");
    assert_eq!(client.send("get missing").await, "null");
}

#[tokio::test]
async fn append_and_strlen() {
    let addr = spawn_server(test_config()).await;
    let mut client = Client::connect(addr).await;

    client.send("set greeting hello").await;
    assert_eq!(client.send("append greeting world").await, "Ok");
    assert_eq!(client.send("get greeting").await, "helloworld");
    assert_eq!(client.send("strlen greeting").await, "10");
}

#[tokio::test]
async fn incr_creates_and_increments() {
    let addr = spawn_server(test_config()).await;
    let mut client = Client::connect(addr).await;

    assert_eq!(client.send("incr counter").await, "1");
    assert_eq!(client.send("incr counter").await, "2");
}

#[tokio::test]
async fn list_push_pop_range() {
    let addr = spawn_server(test_config()).await;
    let mut client = Client::connect(addr).await;

    assert_eq!(client.send("rpush mylist a").await, "Ok");
    assert_eq!(client.send("rpush mylist b").await, "Ok");
    assert_eq!(client.send("lpush mylist z").await, "Ok");
    assert_eq!(client.send("llen mylist").await, "3");
    assert_eq!(client.send("lpop mylist").await, "z");
    assert_eq!(client.send("rpop mylist").await, "b");
    assert_eq!(client.send("llen mylist").await, "1");
}

#[tokio::test]
async fn push_on_non_list_key_fails() {
    let addr = spawn_server(test_config()).await;
    let mut client = Client::connect(addr).await;

    client.send("set k 1").await;
    assert_eq!(client.send("rpush k a").await, "FAILED");
}

#[tokio::test]
async fn ttl_expire_and_query() {
    let addr = spawn_server(test_config()).await;
    let mut client = Client::connect(addr).await;

    client.send("set k v").await;
    assert_eq!(client.send("expire k 30").await, "Ok");
    let remaining: i64 = client.send("ttl k").await.parse().unwrap();
    assert!(remaining > 0 && remaining <= 30);
    assert_eq!(client.send("expire missing 30").await, "FAILED");
    assert_eq!(client.send("ttl missing").await, "-1");
}

#[tokio::test]
async fn read_only_user_is_denied_writes() {
    let addr = spawn_server(test_config()).await;
    let mut client = Client::connect(addr).await;

    // new users are granted read-only access on database 0
    assert_eq!(client.send("create_user readonly secret").await, "Ok");
    assert_eq!(client.send("auth readonly secret").await, "Ok");
    assert_eq!(client.send("set k v").await, "FAILED");
    assert_eq!(client.send("get k").await, "null");
}

#[tokio::test]
async fn create_user_then_auth_switches_identity() {
    let addr = spawn_server(test_config()).await;
    let mut client = Client::connect(addr).await;

    assert_eq!(client.send("create_user alice hunter2").await, "Ok");
    assert_eq!(client.send("auth alice hunter2").await, "Ok");
    assert_eq!(client.send("auth alice wrongpass").await, "FAILED");

    // `insp` dumps to the server log rather than replying; just confirm
    // it doesn't disrupt the connection and the identity switch held.
    client.send_no_reply("insp").await;
    assert_eq!(client.send("get k").await, "null");
}

#[tokio::test]
async fn unrecognized_leading_word_replies_invalid() {
    let addr = spawn_server(test_config()).await;
    let mut client = Client::connect(addr).await;

    assert_eq!(client.send("bogus x y").await, "Invalid command");
}

#[tokio::test]
async fn pub_sub_delivers_to_subscriber_on_its_own_connection() {
    let addr = spawn_server(test_config()).await;
    let mut subscriber = Client::connect(addr).await;
    let mut publisher = Client::connect(addr).await;

    assert_eq!(subscriber.send("sub news").await, "Ok");
    assert_eq!(publisher.send("pub news hello").await, "Ok");

    let mut pushed = String::new();
    subscriber.reader.read_line(&mut pushed).await.unwrap();
    assert_eq!(pushed.trim_end_matches(['\r', '\n']), "hello");
}

#[tokio::test]
async fn export_then_load_restores_data() {
    let addr = spawn_server(test_config()).await;
    let mut client = Client::connect(addr).await;

    let path = tempfile::NamedTempFile::new().unwrap().into_temp_path();
    let path_str = path.to_str().unwrap().to_string();

    client.send("set k v").await;
    assert_eq!(client.send(&format!("export {path_str}")).await, "Ok");

    client.send("set k changed").await;
    client.send_no_reply(&format!("load {path_str}")).await;

    assert_eq!(client.send("get k").await, "v");
}
