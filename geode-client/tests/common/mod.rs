//! Common test utilities: an in-process Geode server and locator.
//!
//! The mock server speaks enough of the client/server protocol for the
//! region, transaction, subscription and single-hop metadata paths. Keys
//! and values are stored as serialized parts; tests use `String` keys and
//! values.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use geode_client::{CacheConfig, ClientCache, PoolConfig};
use geode_core::protocol::constants::*;
use geode_core::protocol::{
    ChunkedResponseEncoder, CommunicationMode, EventId, HandshakeRequestDecoder,
    HandshakeResponse, LocatorRequest, LocatorResponse, Message, MessageCodec, Part, QueueStatus,
    ServerException,
};
use geode_core::serialization::ds_code::CACHEABLE_ARRAY_LIST;
use geode_core::serialization::ObjectDataOutput;
use geode_core::{
    BucketServerLocation, CacheableKey, DataInput, DataOutput, Deserializable, ServerLocation,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Decoder;

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

pub fn unique_name(prefix: &str) -> String {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}-{}", prefix, std::process::id(), id)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `condition` until it holds or five seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// A local port nothing listens on.
pub async fn unused_location() -> ServerLocation {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    ServerLocation::new("127.0.0.1", port)
}

/// A pool configuration talking to `servers` directly.
pub fn pool_config(name: &str, servers: &[ServerLocation]) -> PoolConfig {
    let mut builder = PoolConfig::builder(name)
        .min_connections(0)
        .pr_single_hop_enabled(false)
        .read_timeout(Duration::from_secs(2))
        .connect_timeout(Duration::from_secs(2))
        .free_connection_timeout(Duration::from_secs(2));
    for server in servers {
        builder = builder.add_server(server.clone());
    }
    builder.build().unwrap()
}

/// A cache with one default pool on `server`.
pub async fn cache_for(server: &MockServer) -> ClientCache {
    let cache = ClientCache::new(CacheConfig::default()).unwrap();
    cache
        .create_pool(pool_config("default", &[server.location()]))
        .await
        .unwrap();
    cache
}

pub fn string_part(value: &str) -> Part {
    Part::object(&value.to_string()).unwrap()
}

type Key = Vec<u8>;

#[derive(Debug, Clone)]
struct Stored {
    value: Part,
    version: u64,
}

#[derive(Debug, Default)]
struct TxWrites {
    base: HashMap<(String, Key), u64>,
    writes: Vec<(String, Key, Option<Part>)>,
}

impl TxWrites {
    fn lookup(&self, region: &str, key: &[u8]) -> Option<Option<Part>> {
        self.writes
            .iter()
            .rev()
            .find(|(r, k, _)| r == region && k == key)
            .map(|(_, _, v)| v.clone())
    }
}

/// Data and knobs of a mock server. Several servers may share one state to
/// act as a replicated cluster.
#[derive(Debug, Default)]
pub struct ServerState {
    regions: Mutex<HashMap<String, HashMap<Key, Stored>>>,
    txs: Mutex<HashMap<i32, TxWrites>>,
    pushers: Mutex<Vec<mpsc::UnboundedSender<Message>>>,
    requests: Mutex<Vec<i32>>,
    served: Mutex<Vec<(ServerLocation, i32)>>,
    partitions: Mutex<HashMap<String, (i32, Vec<BucketServerLocation>)>>,
    refuse_with: Mutex<Option<u8>>,
    delay_ms: AtomicU64,
    next_version: AtomicU64,
    handshakes: AtomicUsize,
}

impl ServerState {
    /// Makes every later handshake fail with `code`.
    pub fn refuse_handshakes(&self, code: u8) {
        *self.refuse_with.lock().unwrap() = Some(code);
    }

    /// Delays every reply except pings.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of handshakes received.
    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    /// Number of requests of `message_type` received.
    pub fn count(&self, message_type: i32) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|t| **t == message_type)
            .count()
    }

    /// Number of requests of `message_type` received by the server at
    /// `location`.
    pub fn count_at(&self, location: &ServerLocation, message_type: i32) -> usize {
        self.served
            .lock()
            .unwrap()
            .iter()
            .filter(|(at, t)| at == location && *t == message_type)
            .count()
    }

    /// Declares `region` partitioned into `total_buckets` buckets owned as
    /// listed in `owners`.
    pub fn partition(&self, region: &str, total_buckets: i32, owners: Vec<BucketServerLocation>) {
        self.partitions
            .lock()
            .unwrap()
            .insert(region.to_string(), (total_buckets, owners));
    }

    /// Stored value of `key`, deserialized as a string.
    pub fn value(&self, region: &str, key: &str) -> Option<String> {
        let key = string_part(key).data().to_vec();
        self.regions
            .lock()
            .unwrap()
            .get(region)
            .and_then(|r| r.get(&key))
            .and_then(|s| s.value.deserialize_opt::<String>().ok().flatten())
    }

    /// Number of entries of `region`.
    pub fn size(&self, region: &str) -> usize {
        self.regions
            .lock()
            .unwrap()
            .get(region)
            .map_or(0, HashMap::len)
    }

    /// Stores an entry as if another client had written it.
    pub fn insert(&self, region: &str, key: &str, value: &str) {
        let version = self.bump();
        self.regions
            .lock()
            .unwrap()
            .entry(region.to_string())
            .or_default()
            .insert(
                string_part(key).data().to_vec(),
                Stored {
                    value: string_part(value),
                    version,
                },
            );
    }

    /// Sends `message` on every open subscription channel. Returns the
    /// number of channels reached.
    pub fn push(&self, message: Message) -> usize {
        let mut pushers = self.pushers.lock().unwrap();
        pushers.retain(|tx| tx.send(message.clone()).is_ok());
        pushers.len()
    }

    /// Number of open subscription channels.
    pub fn subscription_channels(&self) -> usize {
        let mut pushers = self.pushers.lock().unwrap();
        pushers.retain(|tx| !tx.is_closed());
        pushers.len()
    }

    fn bump(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn version(&self, region: &str, key: &[u8]) -> u64 {
        self.regions
            .lock()
            .unwrap()
            .get(region)
            .and_then(|r| r.get(key))
            .map_or(0, |s| s.version)
    }

    fn get(&self, region: &str, key: &[u8]) -> Option<Part> {
        self.regions
            .lock()
            .unwrap()
            .get(region)
            .and_then(|r| r.get(key))
            .map(|s| s.value.clone())
    }

    fn put(&self, region: &str, key: Key, value: Part) -> bool {
        let version = self.bump();
        self.regions
            .lock()
            .unwrap()
            .entry(region.to_string())
            .or_default()
            .insert(key, Stored { value, version })
            .is_some()
    }

    fn remove(&self, region: &str, key: &[u8]) {
        if let Some(r) = self.regions.lock().unwrap().get_mut(region) {
            r.remove(key);
        }
    }

    fn keys(&self, region: &str) -> Vec<Key> {
        self.regions
            .lock()
            .unwrap()
            .get(region)
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn values(&self, region: &str) -> Vec<Part> {
        self.regions
            .lock()
            .unwrap()
            .get(region)
            .map(|r| r.values().map(|s| s.value.clone()).collect())
            .unwrap_or_default()
    }

    fn clear(&self, region: &str) {
        self.regions.lock().unwrap().remove(region);
    }

    fn tx_put(&self, tx: i32, region: &str, key: Key, value: Option<Part>) -> bool {
        let current = self.version(region, &key);
        let exists = self.get(region, &key).is_some();
        let mut txs = self.txs.lock().unwrap();
        let writes = txs.entry(tx).or_default();
        let existed = writes.lookup(region, &key).map_or(exists, |v| v.is_some());
        writes
            .base
            .entry((region.to_string(), key.clone()))
            .or_insert(current);
        writes.writes.push((region.to_string(), key, value));
        existed
    }

    fn tx_get(&self, tx: i32, region: &str, key: &[u8]) -> Option<Part> {
        let pending = self
            .txs
            .lock()
            .unwrap()
            .get(&tx)
            .and_then(|w| w.lookup(region, key));
        match pending {
            Some(value) => value,
            None => self.get(region, key),
        }
    }

    fn commit(&self, tx: i32) -> Result<(), String> {
        let Some(writes) = self.txs.lock().unwrap().remove(&tx) else {
            return Ok(());
        };
        let mut regions = self.regions.lock().unwrap();
        for ((region, key), base) in &writes.base {
            let current = regions
                .get(region)
                .and_then(|r| r.get(key))
                .map_or(0, |s| s.version);
            if current != *base {
                return Err(format!("conflicting write in region {}", region));
            }
        }
        for (region, key, value) in writes.writes {
            let entries = regions.entry(region).or_default();
            match value {
                Some(value) => {
                    let version = self.bump();
                    entries.insert(key, Stored { value, version });
                }
                None => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn rollback(&self, tx: i32) {
        self.txs.lock().unwrap().remove(&tx);
    }

    /// True if `region` is partitioned and `me` is not the primary owner of
    /// the bucket of `key`.
    fn misrouted(&self, me: &ServerLocation, region: &str, key: &Part) -> bool {
        let partitions = self.partitions.lock().unwrap();
        let Some((total, owners)) = partitions.get(region) else {
            return false;
        };
        let Ok(Some(key)) = key.deserialize_opt::<String>() else {
            return false;
        };
        let bucket = (key.hashcode() % total).abs();
        !owners
            .iter()
            .any(|o| o.bucket_id == bucket && o.is_primary && &o.location == me)
    }

    fn partition_attributes(&self, region: &str) -> i32 {
        self.partitions
            .lock()
            .unwrap()
            .get(region)
            .map_or(-1, |(total, _)| *total)
    }

    fn bucket_owners(&self, region: &str) -> Part {
        let owners = self
            .partitions
            .lock()
            .unwrap()
            .get(region)
            .map(|(_, owners)| owners.clone())
            .unwrap_or_default();
        let mut object = ObjectDataOutput::new();
        object.write_byte(CACHEABLE_ARRAY_LIST).unwrap();
        object.write_int(owners.len() as i32).unwrap();
        for owner in &owners {
            owner.write_to(&mut object).unwrap();
        }
        Part::object_bytes(object.into_bytes())
    }
}

/// A mock Geode server on a local port.
pub struct MockServer {
    location: ServerLocation,
    state: Arc<ServerState>,
    accept: JoinHandle<()>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::with_state(Arc::new(ServerState::default())).await
    }

    pub async fn with_state(state: Arc<ServerState>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(Mutex::new(Vec::new()));
        let accept = {
            let state = state.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                let me = ServerLocation::new("127.0.0.1", port);
                while let Ok((stream, _)) = listener.accept().await {
                    let handle = tokio::spawn(serve(stream, state.clone(), me.clone()));
                    connections.lock().unwrap().push(handle);
                }
            })
        };
        Self {
            location: ServerLocation::new("127.0.0.1", port),
            state,
            accept,
            connections,
        }
    }

    pub fn location(&self) -> ServerLocation {
        self.location.clone()
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Stops listening and drops every open connection.
    pub fn stop(&self) {
        self.accept.abort();
        for handle in self.connections.lock().unwrap().drain(..) {
            handle.abort();
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn read_decoded<D: Decoder>(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    decoder: &mut D,
) -> Option<D::Item> {
    loop {
        match decoder.decode(buffer) {
            Ok(Some(item)) => return Some(item),
            Ok(None) => {}
            Err(_) => return None,
        }
        match stream.read_buf(buffer).await {
            Ok(0) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

async fn serve(mut stream: TcpStream, state: Arc<ServerState>, me: ServerLocation) {
    let mut buffer = BytesMut::new();
    let Some(request) = read_decoded(&mut stream, &mut buffer, &mut HandshakeRequestDecoder).await
    else {
        return;
    };
    state.handshakes.fetch_add(1, Ordering::SeqCst);
    let mode = request.mode;
    let refusal = *state.refuse_with.lock().unwrap();
    if let Some(code) = refusal {
        let response = HandshakeResponse::refused(code, "refused by test server");
        let _ = stream.write_all(&response.encode(mode).unwrap()).await;
        return;
    }

    if mode.is_notification() {
        let (tx, rx) = mpsc::unbounded_channel();
        state.pushers.lock().unwrap().push(tx);
        let status = if mode == CommunicationMode::PrimaryServerToClient {
            QueueStatus::Primary
        } else {
            QueueStatus::Redundant
        };
        let response = HandshakeResponse::accepted(mode, status);
        if stream.write_all(&response.encode(mode).unwrap()).await.is_ok() {
            push_loop(stream, rx).await;
        }
        return;
    }

    let mut response = HandshakeResponse::accepted(mode, QueueStatus::NonRedundant);
    response.server_member_id = vec![1, 2, 3];
    if stream.write_all(&response.encode(mode).unwrap()).await.is_err() {
        return;
    }

    let mut codec = MessageCodec::new();
    while let Some(message) = read_decoded(&mut stream, &mut buffer, &mut codec).await {
        let message_type = message.message_type();
        state.requests.lock().unwrap().push(message_type);
        state.served.lock().unwrap().push((me.clone(), message_type));
        if message_type == CLOSE_CONNECTION {
            return;
        }
        let delay = state.delay_ms.load(Ordering::SeqCst);
        if delay > 0 && message_type != PING {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let Some(reply) = handle(&state, &me, &message).await else {
            continue;
        };
        if stream.write_all(&reply).await.is_err() {
            return;
        }
    }
}

async fn push_loop(stream: TcpStream, mut rx: mpsc::UnboundedReceiver<Message>) {
    let (mut read, mut write) = stream.into_split();
    let mut scratch = [0u8; 512];
    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(message) => {
                    if write.write_all(&message.to_bytes()).await.is_err() {
                        return;
                    }
                }
                None => return,
            },
            read = read.read(&mut scratch) => match read {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            },
        }
    }
}

fn reply(message_type: i32, tx: i32, parts: Vec<Part>) -> Vec<u8> {
    flagged_reply(message_type, tx, 0, parts)
}

fn flagged_reply(message_type: i32, tx: i32, flags: u8, parts: Vec<Part>) -> Vec<u8> {
    Message::from_parts(message_type, tx, flags, parts)
        .to_bytes()
        .to_vec()
}

fn chunked(message_type: i32, tx: i32, chunks: Vec<Vec<Part>>) -> Vec<u8> {
    let mut buf = BytesMut::new();
    let count = chunks.len().max(1);
    let mut chunks = chunks.into_iter();
    for index in 0..count {
        let parts = chunks.next().unwrap_or_default();
        ChunkedResponseEncoder::write_chunk(
            &mut buf,
            index == 0,
            message_type,
            tx,
            &parts,
            index + 1 == count,
        );
    }
    buf.to_vec()
}

fn exception(tx: i32, class_name: &str, message: &str) -> Vec<u8> {
    let exception = ServerException {
        class_name: class_name.to_string(),
        message: message.to_string(),
    };
    reply(EXCEPTION, tx, exception.to_parts().to_vec())
}

fn region_of(message: &Message) -> String {
    message.part(0).unwrap().as_string().unwrap()
}

fn key_of(message: &Message, index: usize) -> Key {
    message.part(index).unwrap().data().to_vec()
}

fn decode_key_array(part: &Part) -> Vec<Key> {
    let mut input = part.input();
    let _code = input.read_byte().unwrap();
    let len = input.read_array_len().unwrap();
    (0..len)
        .map(|_| {
            let key = String::deserialize(&mut input).unwrap();
            string_part(&key).data().to_vec()
        })
        .collect()
}

async fn handle(state: &ServerState, me: &ServerLocation, message: &Message) -> Option<Vec<u8>> {
    let tx = message.transaction_id();
    let in_tx = tx != NO_TRANSACTION;
    let bytes = match message.message_type() {
        PING => reply(REPLY, tx, vec![]),
        PUT => {
            let region = region_of(message);
            let misrouted = state.misrouted(me, &region, message.part(1).unwrap());
            let key = key_of(message, 1);
            let value = message.part(2).unwrap().clone();
            let existed = if in_tx {
                state.tx_put(tx, &region, key, Some(value))
            } else {
                state.put(&region, key, value)
            };
            let flags = if misrouted { REFRESH_METADATA_FLAG } else { 0 };
            flagged_reply(REPLY, tx, flags, vec![Part::byte(existed as u8)])
        }
        REQUEST => {
            let region = region_of(message);
            let key = key_of(message, 1);
            let value = if in_tx {
                state.tx_get(tx, &region, &key)
            } else {
                state.get(&region, &key)
            };
            reply(RESPONSE, tx, vec![value.unwrap_or_else(Part::null_object)])
        }
        DESTROY | INVALIDATE => {
            let region = region_of(message);
            let key = key_of(message, 1);
            if message.message_type() == DESTROY {
                if in_tx {
                    state.tx_put(tx, &region, key, None);
                } else {
                    state.remove(&region, &key);
                }
            } else if in_tx {
                state.tx_put(tx, &region, key, Some(Part::null_object()));
            } else if state.get(&region, &key).is_some() {
                state.put(&region, key, Part::null_object());
            }
            reply(REPLY, tx, vec![])
        }
        CONTAINS_KEY => {
            let region = region_of(message);
            let key = key_of(message, 1);
            let found = if in_tx {
                state.tx_get(tx, &region, &key)
            } else {
                state.get(&region, &key)
            }
            .is_some();
            reply(RESPONSE, tx, vec![Part::object(&found).unwrap()])
        }
        SIZE => {
            let size = state.size(&region_of(message));
            reply(RESPONSE, tx, vec![Part::int(size as i32)])
        }
        KEY_SET => {
            let keys = state
                .keys(&region_of(message))
                .into_iter()
                .map(Part::object_bytes)
                .collect();
            chunked(RESPONSE, tx, vec![keys])
        }
        QUERY => {
            let query = message.part(0).unwrap().as_string().unwrap();
            let region = query.rsplit('/').next().unwrap_or_default().trim().to_string();
            let values = state.values(&region);
            let half = values.len() / 2;
            let (first, second) = values.split_at(half);
            chunked(RESPONSE, tx, vec![first.to_vec(), second.to_vec()])
        }
        PUTALL => {
            let region = region_of(message);
            let count = message.part(2).unwrap().as_int().unwrap() as usize;
            for i in 0..count {
                let key = key_of(message, 3 + 2 * i);
                let value = message.part(4 + 2 * i).unwrap().clone();
                state.put(&region, key, value);
            }
            reply(REPLY, tx, vec![])
        }
        GET_ALL_70 => {
            let region = region_of(message);
            let mut parts = Vec::new();
            for key in decode_key_array(message.part(1).unwrap()) {
                let value = state.get(&region, &key);
                parts.push(Part::object_bytes(key));
                parts.push(value.unwrap_or_else(Part::null_object));
            }
            chunked(RESPONSE, tx, vec![parts])
        }
        CLEAR_REGION => {
            state.clear(&region_of(message));
            reply(REPLY, tx, vec![])
        }
        EXECUTE_REGION_FUNCTION => {
            let function = message.part(0).unwrap().as_string().unwrap();
            let args = message.part(2).unwrap().clone();
            let filter = message.part(3).unwrap().as_int().unwrap().max(1) as usize;
            match function.as_str() {
                "fail" => {
                    let failure = ServerException {
                        class_name: "org.apache.geode.cache.execute.FunctionException".to_string(),
                        message: "function failed on purpose".to_string(),
                    };
                    chunked(
                        EXECUTE_REGION_FUNCTION_RESULT,
                        tx,
                        vec![failure.to_parts().to_vec()],
                    )
                }
                "slow" => {
                    tokio::time::sleep(Duration::from_millis(800)).await;
                    chunked(EXECUTE_REGION_FUNCTION_RESULT, tx, vec![vec![args]])
                }
                _ => chunked(
                    EXECUTE_REGION_FUNCTION_RESULT,
                    tx,
                    (0..filter).map(|_| vec![args.clone()]).collect(),
                ),
            }
        }
        COMMIT => match state.commit(tx) {
            Ok(()) => reply(REPLY, tx, vec![]),
            Err(reason) => reply(COMMIT_ERROR, tx, vec![Part::string(&reason)]),
        },
        ROLLBACK => {
            state.rollback(tx);
            reply(REPLY, tx, vec![])
        }
        GET_CLIENT_PARTITION_ATTRIBUTES => {
            let total = state.partition_attributes(&region_of(message));
            reply(RESPONSE, tx, vec![Part::int(total)])
        }
        GET_CLIENT_PR_METADATA => {
            let owners = state.bucket_owners(&region_of(message));
            chunked(RESPONSE, tx, vec![vec![owners]])
        }
        TX_FAILOVER | REGISTER_INTEREST | MAKE_PRIMARY => reply(REPLY, tx, vec![]),
        PERIODIC_ACK | CLIENT_READY => return None,
        _ => exception(
            tx,
            "java.lang.UnsupportedOperationException",
            "not supported by test server",
        ),
    };
    Some(bytes)
}

/// Builds a create or update event pushed on a subscription channel.
pub fn entry_event(kind: i32, region: &str, key: &str, value: &str, sequence: i64) -> Message {
    Message::new(kind)
        .with_part(Part::string(region))
        .with_part(string_part(key))
        .with_part(string_part(value))
        .with_part(EventId::new(vec![42], 1, sequence).to_part().unwrap())
}

/// Builds an invalidate or destroy event.
pub fn key_event(kind: i32, region: &str, key: &str, sequence: i64) -> Message {
    Message::new(kind)
        .with_part(Part::string(region))
        .with_part(string_part(key))
        .with_part(EventId::new(vec![42], 1, sequence).to_part().unwrap())
}

/// A mock locator answering every query from a fixed server list.
pub struct MockLocator {
    location: ServerLocation,
    servers: Arc<Mutex<Vec<ServerLocation>>>,
    queries: Arc<AtomicUsize>,
    accept: JoinHandle<()>,
}

impl MockLocator {
    pub async fn start(servers: Vec<ServerLocation>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let location = ServerLocation::new("127.0.0.1", port);
        let servers = Arc::new(Mutex::new(servers));
        let queries = Arc::new(AtomicUsize::new(0));
        let accept = {
            let servers = servers.clone();
            let queries = queries.clone();
            let me = location.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    queries.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(answer(stream, servers.clone(), me.clone()));
                }
            })
        };
        Self {
            location,
            servers,
            queries,
            accept,
        }
    }

    pub fn location(&self) -> ServerLocation {
        self.location.clone()
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn set_servers(&self, servers: Vec<ServerLocation>) {
        *self.servers.lock().unwrap() = servers;
    }
}

impl Drop for MockLocator {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn answer(
    mut stream: TcpStream,
    servers: Arc<Mutex<Vec<ServerLocation>>>,
    me: ServerLocation,
) {
    let mut buffer = Vec::new();
    let mut scratch = [0u8; 1024];
    let request = loop {
        match stream.read(&mut scratch).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buffer.extend_from_slice(&scratch[..n]),
        }
        if let Ok(request) = LocatorRequest::decode(&buffer) {
            break request;
        }
    };
    let servers = servers.lock().unwrap().clone();
    let response = match request {
        LocatorRequest::LocatorList { .. } => LocatorResponse::LocatorList {
            locators: vec![me],
            is_balanced: true,
        },
        LocatorRequest::GetAllServers { .. } => LocatorResponse::GetAllServers { servers },
        LocatorRequest::ClientConnection { excluded, .. } => LocatorResponse::ClientConnection {
            server: servers.into_iter().find(|s| !excluded.contains(s)),
        },
        LocatorRequest::QueueConnection { excluded, .. } => LocatorResponse::QueueConnection {
            durable_queue_found: false,
            servers: servers.into_iter().filter(|s| !excluded.contains(s)).collect(),
        },
    };
    let _ = stream.write_all(&response.encode().unwrap()).await;
    let _ = stream.shutdown().await;
}
