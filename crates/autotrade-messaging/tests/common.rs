//! In-process RESP2 server that understands the stream commands the bus
//! sends. Like Redis, it answers one connection's commands strictly in
//! order while state is shared between connections.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::time::Instant;

const NIL: &str = "*-1\r\n";
const OK: &str = "+OK\r\n";

type Entry = (u64, Vec<(String, String)>);

#[derive(Default)]
struct Store {
    streams: HashMap<String, Vec<Entry>>,
    /// Last delivered sequence per (stream, group).
    groups: HashMap<(String, String), u64>,
    pending: HashMap<(String, String), HashSet<u64>>,
    next_seq: u64,
    commands: Vec<Vec<String>>,
}

impl Store {
    fn last_seq(&self, key: &str) -> u64 {
        self.streams
            .get(key)
            .and_then(|entries| entries.last())
            .map_or(0, |(seq, _)| *seq)
    }
}

enum Cursor {
    After(u64),
    Undelivered,
}

#[derive(Clone)]
pub struct FakeRedis {
    addr: SocketAddr,
    store: Arc<Mutex<Store>>,
    appended: Arc<Notify>,
}

impl FakeRedis {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = Self {
            addr: listener.local_addr().unwrap(),
            store: Arc::default(),
            appended: Arc::new(Notify::new()),
        };

        let acceptor = server.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(acceptor.clone().serve(socket));
            }
        });
        server
    }

    pub fn url(&self) -> String {
        format!("redis://{}", self.addr)
    }

    /// Stream commands received so far with the given name, in arrival order.
    pub fn commands(&self, name: &str) -> Vec<Vec<String>> {
        self.store
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter(|args| args[0] == name)
            .cloned()
            .collect()
    }

    async fn serve(self, socket: TcpStream) {
        let (read, mut write) = socket.into_split();
        let mut reader = BufReader::new(read);
        while let Some(args) = read_command(&mut reader).await {
            let reply = self.execute(args).await;
            if write.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        }
    }

    async fn execute(&self, mut args: Vec<String>) -> String {
        let Some(first) = args.first_mut() else {
            return error("ERR empty command");
        };
        first.make_ascii_uppercase();
        let name = first.clone();

        if name.starts_with('X') {
            self.store.lock().unwrap().commands.push(args.clone());
        }
        match name.as_str() {
            "XADD" => self.xadd(&args),
            "XGROUP" => self.xgroup(&args),
            "XACK" => self.xack(&args),
            "XREAD" | "XREADGROUP" => self.xread(&args).await,
            _ => OK.to_string(),
        }
    }

    fn xadd(&self, args: &[String]) -> String {
        let [_, key, _id, fields @ ..] = args else {
            return error("ERR wrong number of arguments for 'xadd' command");
        };
        let seq = {
            let mut store = self.store.lock().unwrap();
            store.next_seq += 1;
            let seq = store.next_seq;
            let pairs = fields
                .chunks(2)
                .map(|pair| (pair[0].clone(), pair.get(1).cloned().unwrap_or_default()))
                .collect();
            store
                .streams
                .entry(key.clone())
                .or_default()
                .push((seq, pairs));
            seq
        };
        self.appended.notify_waiters();
        bulk(&format!("{seq}-0"))
    }

    fn xgroup(&self, args: &[String]) -> String {
        let [_, _create, key, group, id, rest @ ..] = args else {
            return error("ERR wrong number of arguments for 'xgroup' command");
        };
        let mkstream = rest.iter().any(|a| a.eq_ignore_ascii_case("MKSTREAM"));

        let mut store = self.store.lock().unwrap();
        if !store.streams.contains_key(key) {
            if !mkstream {
                return error(
                    "ERR The XGROUP subcommand requires the key to exist. \
                     Note that for CREATE you may want to use the MKSTREAM option \
                     to create an empty stream automatically.",
                );
            }
            store.streams.insert(key.clone(), Vec::new());
        }

        let group_key = (key.clone(), group.clone());
        if store.groups.contains_key(&group_key) {
            return error("BUSYGROUP Consumer Group name already exists");
        }
        let start = if id == "$" {
            store.last_seq(key)
        } else {
            parse_seq(id)
        };
        store.groups.insert(group_key, start);
        OK.to_string()
    }

    fn xack(&self, args: &[String]) -> String {
        let [_, key, group, ids @ ..] = args else {
            return error("ERR wrong number of arguments for 'xack' command");
        };
        let mut store = self.store.lock().unwrap();
        let pending = store
            .pending
            .entry((key.clone(), group.clone()))
            .or_default();
        let acked = ids.iter().filter(|id| pending.remove(&parse_seq(id))).count();
        format!(":{acked}\r\n")
    }

    async fn xread(&self, args: &[String]) -> String {
        let mut count = usize::MAX;
        let mut block = None;
        let mut group = None;
        let mut i = 1;
        while i < args.len() {
            match args[i].to_ascii_uppercase().as_str() {
                "COUNT" => {
                    count = args.get(i + 1).and_then(|v| v.parse().ok()).unwrap_or(count);
                    i += 2;
                }
                "BLOCK" => {
                    block = args.get(i + 1).and_then(|v| v.parse::<u64>().ok());
                    i += 2;
                }
                "GROUP" => {
                    group = args.get(i + 1).cloned();
                    i += 3;
                }
                "STREAMS" => {
                    i += 1;
                    break;
                }
                _ => i += 1,
            }
        }

        let rest = &args[i.min(args.len())..];
        let (keys, ids) = rest.split_at(rest.len() / 2);

        let mut cursors = Vec::with_capacity(keys.len());
        {
            let store = self.store.lock().unwrap();
            for (key, id) in keys.iter().zip(ids) {
                let cursor = match (&group, id.as_str()) {
                    (Some(g), ">") => {
                        if !store.groups.contains_key(&(key.clone(), g.clone())) {
                            return error(&format!(
                                "NOGROUP No such key '{key}' or consumer group '{g}'"
                            ));
                        }
                        Cursor::Undelivered
                    }
                    (_, "$") => Cursor::After(store.last_seq(key)),
                    (_, other) => Cursor::After(parse_seq(other)),
                };
                cursors.push(cursor);
            }
        }

        let deadline = block
            .filter(|ms| *ms > 0)
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        loop {
            let notified = self.appended.notified();
            if let Some(reply) = self.collect(keys, &cursors, count, group.as_deref()) {
                return reply;
            }
            match (block, deadline) {
                (None, _) => return NIL.to_string(),
                (Some(_), None) => notified.await,
                (Some(_), Some(deadline)) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return NIL.to_string();
                    }
                }
            }
        }
    }

    fn collect(
        &self,
        keys: &[String],
        cursors: &[Cursor],
        count: usize,
        group: Option<&str>,
    ) -> Option<String> {
        let mut store = self.store.lock().unwrap();
        let mut sections = Vec::new();

        for (key, cursor) in keys.iter().zip(cursors) {
            let after = match (cursor, group) {
                (Cursor::After(seq), _) => *seq,
                (Cursor::Undelivered, Some(g)) => store
                    .groups
                    .get(&(key.clone(), g.to_string()))
                    .copied()
                    .unwrap_or(0),
                (Cursor::Undelivered, None) => continue,
            };
            let entries: Vec<Entry> = store
                .streams
                .get(key)
                .map(|all| {
                    all.iter()
                        .filter(|(seq, _)| *seq > after)
                        .take(count)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            let Some((last, _)) = entries.last() else {
                continue;
            };

            if let (Cursor::Undelivered, Some(g)) = (cursor, group) {
                let group_key = (key.clone(), g.to_string());
                store.groups.insert(group_key.clone(), *last);
                store
                    .pending
                    .entry(group_key)
                    .or_default()
                    .extend(entries.iter().map(|(seq, _)| *seq));
            }
            sections.push(encode_section(key, &entries));
        }

        if sections.is_empty() {
            None
        } else {
            Some(format!("*{}\r\n{}", sections.len(), sections.concat()))
        }
    }
}

async fn read_command(reader: &mut BufReader<OwnedReadHalf>) -> Option<Vec<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let count: usize = line.trim_end().strip_prefix('*')?.parse().ok()?;

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line).await.ok()?;
        let len: usize = line.trim_end().strip_prefix('$')?.parse().ok()?;
        let mut buf = vec![0; len + 2];
        reader.read_exact(&mut buf).await.ok()?;
        buf.truncate(len);
        args.push(String::from_utf8(buf).ok()?);
    }
    Some(args)
}

fn encode_section(key: &str, entries: &[Entry]) -> String {
    let mut out = format!("*2\r\n{}*{}\r\n", bulk(key), entries.len());
    for (seq, fields) in entries {
        out.push_str(&format!("*2\r\n{}*{}\r\n", bulk(&format!("{seq}-0")), fields.len() * 2));
        for (field, value) in fields {
            out.push_str(&bulk(field));
            out.push_str(&bulk(value));
        }
    }
    out
}

fn parse_seq(id: &str) -> u64 {
    id.split('-').next().and_then(|ms| ms.parse().ok()).unwrap_or(0)
}

fn bulk(value: &str) -> String {
    format!("${}\r\n{value}\r\n", value.len())
}

fn error(message: &str) -> String {
    format!("-{message}\r\n")
}
