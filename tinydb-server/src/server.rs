//! # TCP Server
//!
//! One tokio task per connection. A read loop pulls lines off the
//! socket into a growable buffer, dispatches each through the executor,
//! and funnels the reply into a single per-connection channel; a second
//! task owns the write half and drains that channel. Pub/sub pushes go
//! through the same channel (via the sender handed to
//! `executor::subscribe`), so command replies and published messages
//! never race for the socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::executor::{self, ConnectionState, ServerState};
use crate::parser::parse_line;
use crate::pubsub::ConnectionId;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Handles one client connection end to end: accept, read, dispatch,
/// reply, until EOF, a protocol error, or the line limit is exceeded.
pub async fn handle_connection(stream: TcpStream, state: Arc<ServerState>) -> std::io::Result<()> {
    let conn_id = next_connection_id();
    let peer = stream.peer_addr().ok();
    let (mut read_half, write_half) = stream.into_split();

    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(run_writer(write_half, reply_rx));

    let mut conn = ConnectionState::new(conn_id);
    let mut buffer = BytesMut::with_capacity(4 * 1024);
    let max_buffer = state.config.command_buffer_size;

    let result = read_loop(&mut read_half, &mut buffer, max_buffer, &state, &mut conn, &reply_tx).await;

    state.pubsub.unsubscribe_all(conn_id);
    drop(reply_tx);
    let _ = writer_task.await;

    match &result {
        Ok(()) => info!(conn_id, ?peer, "connection closed"),
        Err(err) => warn!(conn_id, ?peer, %err, "connection ended with error"),
    }
    result
}

async fn read_loop(
    read_half: &mut tokio::net::tcp::OwnedReadHalf,
    buffer: &mut BytesMut,
    max_buffer: usize,
    state: &Arc<ServerState>,
    conn: &mut ConnectionState,
    reply_tx: &mpsc::UnboundedSender<String>,
) -> std::io::Result<()> {
    loop {
        if buffer.len() >= max_buffer {
            warn!(conn_id = conn.id, "command line exceeds buffer limit, closing connection");
            return Ok(());
        }

        let bytes_read = read_half.read_buf(buffer).await?;
        if bytes_read == 0 {
            return Ok(());
        }

        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let mut line = buffer.split_to(pos + 1);
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            let text = String::from_utf8_lossy(&line).into_owned();
            dispatch_line(state, conn, &text, reply_tx);
        }
    }
}

fn dispatch_line(state: &Arc<ServerState>, conn: &mut ConnectionState, line: &str, reply_tx: &mpsc::UnboundedSender<String>) {
    if line.trim().is_empty() {
        return;
    }

    let Some(cmd) = parse_line(line) else {
        let _ = reply_tx.send(executor::INVALID_COMMAND_REPLY.to_string());
        return;
    };

    if cmd.name == "sub" {
        // `executor::execute` validates the command shape and ACL the same
        // way it does for every other command; the actual subscription is
        // wired up here only once that succeeds, since the executor has no
        // access to this connection's own reply sender.
        let reply = executor::execute(state, conn, &cmd);
        if reply == "Ok" {
            if let Some(channel) = cmd.arg(0).and_then(|a| a.as_str()) {
                executor::subscribe(state, conn, channel, reply_tx.clone());
            }
        }
        let _ = reply_tx.send(reply);
        return;
    }

    if cmd.name == "insp" || cmd.name == "load" {
        // Neither has a reply in the source: `insp` dumps to the server's
        // own log, `load` is a fire-and-forget background restore. Still
        // run them through `execute` so shape/ACL checks apply, just drop
        // what comes back instead of queuing it to the client.
        let _ = executor::execute(state, conn, &cmd);
        return;
    }

    let reply = executor::execute(state, conn, &cmd);
    let _ = reply_tx.send(reply);
}

/// Owns the write half and is the only task that ever writes to the
/// socket, draining both command replies and pub/sub pushes from the
/// same queue.
async fn run_writer(mut write_half: OwnedWriteHalf, mut reply_rx: mpsc::UnboundedReceiver<String>) {
    while let Some(message) = reply_rx.recv().await {
        let mut line = message.into_bytes();
        line.push(b'\n');
        if write_half.write_all(&line).await.is_err() {
            break;
        }
    }
    let _ = write_half.shutdown().await;
}
