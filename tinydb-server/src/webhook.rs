//! # Webhooks
//!
//! Purpose: reading the URL list backing `@hook`-prefixed channels
//! (stored as an ordinary list value under the channel's name, per
//! `tinydb_webhook.c`'s `Trigger_Webhooks`) and the minimal non-TLS HTTP
//! POST client that delivers to them. Registering those URLs is not part
//! of the wire protocol — the source only ever populates them via its
//! own `Add_Webhook` called at startup, not a client command — so this
//! module has no write-side counterpart; callers populate the list the
//! same way any other list value gets populated, via `rpush`.
//!
//! Two deliberate departures from the source, both because the source's
//! behavior there is a bug rather than a specified contract (see
//! DESIGN.md):
//! - The JSON payload sends the actual publish message as `data` instead
//!   of the source's hardcoded `"Hello, Sailor!"` literal.
//! - `https://` URLs are logged as unsupported rather than the source's
//!   behavior of opening a plain-TCP socket on port 443 and speaking
//!   cleartext HTTP to it.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use tracing::{info, warn};

use tinydb_engine::{atomic, Database, ListElement, Value};

use crate::pubsub::HOOK_CHANNEL_PREFIX;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RESPONSE_BYTES: usize = 4096;

/// Returns every webhook URL registered for `channel`, or an empty
/// vector if it isn't a hook channel or has no webhooks.
pub fn list_webhook_urls(db: &Database, channel: &str) -> Vec<String> {
    if !channel.starts_with(HOOK_CHANNEL_PREFIX) {
        return Vec::new();
    }

    match atomic::get(db, channel.as_bytes()) {
        Some(entry) => match &entry.value {
            Value::List(list) => list
                .snapshot_elements()
                .into_iter()
                .filter_map(|element| match element {
                    ListElement::String(s) => Some(String::from_utf8_lossy(&s).into_owned()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        },
        None => Vec::new(),
    }
}

struct ParsedUrl {
    scheme: String,
    host: String,
    port: u16,
    path: String,
}

fn parse_url(url: &str) -> Option<ParsedUrl> {
    let (scheme, rest) = url.split_once("://")?;
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };

    let (host, port) = match authority.split_once(':') {
        Some((host, port_str)) => (host.to_string(), port_str.parse().ok()?),
        None => (authority.to_string(), if scheme == "https" { 443 } else { 80 }),
    };

    Some(ParsedUrl {
        scheme: scheme.to_string(),
        host,
        port,
        path: if path.is_empty() { "/".to_string() } else { path.to_string() },
    })
}

/// Sends one POST with `Content-Type: application/json` and logs the
/// response. Runs on a worker-pool thread, never the event loop — this
/// is a blocking socket deliberately (see §4.13/§5).
pub fn send_http_post(url: &str, json_body: &str) {
    let parsed = match parse_url(url) {
        Some(p) => p,
        None => {
            warn!(url, "failed to parse webhook URL");
            return;
        }
    };

    if parsed.scheme == "https" {
        warn!(url, "TLS webhooks are unsupported");
        return;
    }
    if parsed.scheme != "http" {
        warn!(url, scheme = %parsed.scheme, "unsupported webhook scheme");
        return;
    }

    let address = format!("{}:{}", parsed.host, parsed.port);
    let mut stream = match TcpStream::connect(&address) {
        Ok(s) => s,
        Err(err) => {
            warn!(%address, %err, "webhook connection failed");
            return;
        }
    };
    let _ = stream.set_write_timeout(Some(CONNECT_TIMEOUT));
    let _ = stream.set_read_timeout(Some(READ_TIMEOUT));

    let request = format!(
        "POST {} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        parsed.path,
        parsed.host,
        json_body.len(),
        json_body,
    );

    if let Err(err) = stream.write_all(request.as_bytes()) {
        warn!(%address, %err, "failed to send webhook request");
        return;
    }

    let mut buf = vec![0u8; MAX_RESPONSE_BYTES];
    match stream.read(&mut buf) {
        Ok(n) if n > 0 => {
            info!(%address, response = %String::from_utf8_lossy(&buf[..n]), "webhook response");
        }
        _ => {}
    }
}

/// Builds the JSON payload for a publish event.
pub fn build_payload(channel: &str, message: &str) -> String {
    format!(
        "{{\"event\": {}, \"data\": {}}}",
        json_quote(channel),
        json_quote(message),
    )
}

fn json_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use tinydb_engine::{Database, Entry, ListValue};

    fn put_hook_list(db: &Database, channel: &str, urls: &[&str]) {
        let key: Arc<[u8]> = Arc::from(channel.as_bytes());
        let list = ListValue::new();
        for url in urls {
            list.rpush(ListElement::String(Arc::from(url.as_bytes())));
        }
        db.shard_for(&key).put(key.clone(), Entry::new_list(key, Arc::new(list)));
    }

    #[test]
    fn list_webhook_urls_rejects_non_hook_channel() {
        let db = Database::new(0, 16);
        put_hook_list(&db, "plain", &["http://example.com/hook"]);
        assert!(list_webhook_urls(&db, "plain").is_empty());
    }

    #[test]
    fn list_webhook_urls_returns_registered_urls_in_order() {
        let db = Database::new(0, 16);
        put_hook_list(&db, "@hook-orders", &["http://example.com/a", "http://example.com/b"]);
        let urls = list_webhook_urls(&db, "@hook-orders");
        assert_eq!(urls, vec!["http://example.com/a", "http://example.com/b"]);
    }

    #[test]
    fn parse_url_defaults_port_and_path() {
        let parsed = parse_url("http://example.com").unwrap();
        assert_eq!(parsed.host, "example.com");
        assert_eq!(parsed.port, 80);
        assert_eq!(parsed.path, "/");
    }

    #[test]
    fn parse_url_with_explicit_port_and_path() {
        let parsed = parse_url("http://example.com:9000/hooks/in").unwrap();
        assert_eq!(parsed.port, 9000);
        assert_eq!(parsed.path, "/hooks/in");
    }

    #[test]
    fn build_payload_quotes_channel_and_message() {
        let payload = build_payload("@hook-x", "hi there");
        assert_eq!(payload, "{\"event\": \"@hook-x\", \"data\": \"hi there\"}");
    }
}
