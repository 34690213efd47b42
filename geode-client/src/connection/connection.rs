//! A single connection to a cache server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use geode_core::protocol::constants::{
    is_error_type, message_type_name, CLOSE_CONNECTION, EXCEPTION, PING,
};
use geode_core::protocol::{
    Chunk, ChunkedResponseDecoder, CommunicationMode, HandshakeRequest, HandshakeResponseDecoder,
    Message, MessageCodec, Part, QueueStatus,
};
use geode_core::{GeodeError, Result, ServerLocation};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::timeout;
use tokio_util::codec::Decoder;

use crate::chunk_handler::{ChunkHandler, ChunkedContext, ChunkedResult};

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generates a new unique connection ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(26739);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Settings used to open and handshake a connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Purpose of the connection.
    pub mode: CommunicationMode,
    /// Bound on TCP connect plus handshake.
    pub connect_timeout: Duration,
    /// Read timeout announced to the server.
    pub read_timeout: Duration,
    /// Serialized client member id.
    pub member_id: Arc<Vec<u8>>,
    /// Socket send and receive buffer size.
    pub socket_buffer_size: usize,
}

/// Outcome of a chunked exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkedReply {
    /// Message type of the response.
    pub message_type: i32,
    /// True if any chunk asked for a metadata refresh.
    pub refresh_metadata: bool,
}

/// Scales `duration` by `(100 + variance) / 100`.
pub fn jittered(duration: Duration, variance: i32) -> Duration {
    duration.mul_f64(f64::from(100 + variance) / 100.0)
}

/// A connection to one server, used for one exchange at a time.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    endpoint: ServerLocation,
    stream: TcpStream,
    read_buffer: BytesMut,
    codec: MessageCodec,
    chunk_decoder: ChunkedResponseDecoder,
    mode: CommunicationMode,
    queue_status: QueueStatus,
    server_member_id: Vec<u8>,
    created_at: Instant,
    last_used: Instant,
    expiry_variance: i32,
    broken: bool,
}

impl Connection {
    /// Opens a connection to `endpoint` and performs the handshake.
    ///
    /// `expiry_variance` is the jitter, in percent, applied to the idle and
    /// lifetime checks of this connection.
    pub async fn connect(
        endpoint: &ServerLocation,
        options: &ConnectOptions,
        expiry_variance: i32,
    ) -> Result<Self> {
        let handshake = async {
            let mut stream = open_stream(endpoint, options.socket_buffer_size).await?;
            let read_timeout_ms =
                i32::try_from(options.read_timeout.as_millis()).unwrap_or(i32::MAX);
            let request =
                HandshakeRequest::new(options.mode, read_timeout_ms, options.member_id.to_vec());
            stream.write_all(&request.encode()?).await?;

            let mut read_buffer = BytesMut::with_capacity(8192);
            let mut decoder = HandshakeResponseDecoder::new(options.mode);
            let response =
                read_frame(&mut stream, &mut read_buffer, &mut decoder, endpoint).await?;
            Ok::<_, GeodeError>((stream, read_buffer, response.into_result()?))
        };

        let (stream, read_buffer, response) = timeout(options.connect_timeout, handshake)
            .await
            .map_err(|_| {
                GeodeError::NotConnected(format!(
                    "connection to {} timed out after {:?}",
                    endpoint, options.connect_timeout
                ))
            })??;

        let now = Instant::now();
        let connection = Self {
            id: ConnectionId::new(),
            endpoint: endpoint.clone(),
            stream,
            read_buffer,
            codec: MessageCodec::new(),
            chunk_decoder: ChunkedResponseDecoder::new(),
            mode: options.mode,
            queue_status: response.queue_status,
            server_member_id: response.server_member_id,
            created_at: now,
            last_used: now,
            expiry_variance,
            broken: false,
        };
        tracing::debug!(
            id = %connection.id,
            endpoint = %endpoint,
            mode = ?options.mode,
            variance = expiry_variance,
            "established connection"
        );
        Ok(connection)
    }

    /// Returns the connection's unique identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the server this connection is bound to.
    pub fn endpoint(&self) -> &ServerLocation {
        &self.endpoint
    }

    /// Returns the communication mode negotiated at handshake.
    pub fn mode(&self) -> CommunicationMode {
        self.mode
    }

    /// Returns the queue status reported by the server.
    pub fn queue_status(&self) -> QueueStatus {
        self.queue_status
    }

    /// Returns the server's serialized member id.
    pub fn server_member_id(&self) -> &[u8] {
        &self.server_member_id
    }

    /// Returns when the connection was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Returns when the connection was last used.
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Returns the jitter, in percent, applied to expiry checks.
    pub fn expiry_variance(&self) -> i32 {
        self.expiry_variance
    }

    /// Records a use of the connection.
    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Returns true if the connection has been unused for longer than the
    /// jittered `idle_timeout`. A zero timeout disables the check.
    pub fn is_idle(&self, idle_timeout: Duration) -> bool {
        !idle_timeout.is_zero()
            && self.last_used.elapsed() >= jittered(idle_timeout, self.expiry_variance)
    }

    /// Returns true if the connection has lived longer than the jittered
    /// `lifetime`. A zero lifetime disables the check.
    pub fn has_expired(&self, lifetime: Duration) -> bool {
        !lifetime.is_zero()
            && self.created_at.elapsed() >= jittered(lifetime, self.expiry_variance)
    }

    /// Returns true if an I/O or framing failure made the connection unusable.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Marks the connection unusable; the pool closes it on release.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Sends `request` and waits up to `read_timeout` for the reply.
    ///
    /// Error replies are returned as messages; callers map them with
    /// [`Message::into_result`].
    pub async fn send(&mut self, request: &Message, read_timeout: Duration) -> Result<Message> {
        let result = async {
            self.write_message(request).await?;
            self.read_message(Some(read_timeout)).await
        }
        .await;
        self.track(result)
    }

    /// Sends a message that has no reply.
    pub async fn send_oneway(&mut self, request: &Message) -> Result<()> {
        let result = self.write_message(request).await;
        self.track(result)
    }

    /// Sends `request` and feeds every chunk of the response to `result`
    /// through `handler`.
    ///
    /// The whole response is always read, so an error chunk or a failing
    /// result leaves the connection usable. Framing errors do not.
    pub async fn send_chunked(
        &mut self,
        request: &Message,
        read_timeout: Duration,
        handler: &ChunkHandler,
        result: Arc<dyn ChunkedResult>,
    ) -> Result<ChunkedReply> {
        let outcome = self
            .exchange_chunked(request, read_timeout, handler, result)
            .await;
        self.track(outcome)
    }

    async fn exchange_chunked(
        &mut self,
        request: &Message,
        read_timeout: Duration,
        handler: &ChunkHandler,
        result: Arc<dyn ChunkedResult>,
    ) -> Result<ChunkedReply> {
        self.write_message(request).await?;

        let mut failure: Option<GeodeError> = None;
        let mut refresh_metadata = false;
        let mut message_type;
        loop {
            let chunk = self.read_chunk(read_timeout).await?;
            message_type = chunk.message_type;
            refresh_metadata |= chunk.refresh_metadata_requested();
            if failure.is_none() {
                let processed = if chunk.message_type == EXCEPTION
                    || is_error_type(chunk.message_type)
                {
                    error_chunk(&chunk)
                } else {
                    handler
                        .process(
                            result.clone(),
                            ChunkedContext::chunk(chunk.message_type, chunk.payload.clone()),
                        )
                        .await
                };
                if let Err(e) = processed {
                    if matches!(e, GeodeError::Protocol(_)) {
                        return Err(e);
                    }
                    failure = Some(e);
                }
            }
            if chunk.last {
                break;
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        handler
            .process(result, ChunkedContext::end(message_type))
            .await?;
        tracing::trace!(
            id = %self.id,
            response = message_type_name(message_type),
            "chunked response complete"
        );
        Ok(ChunkedReply {
            message_type,
            refresh_metadata,
        })
    }

    /// Reads the next complete message, waiting at most `read_timeout` if
    /// given. Used directly by subscription channels.
    pub async fn read_message(&mut self, read_timeout: Option<Duration>) -> Result<Message> {
        let read = read_frame(
            &mut self.stream,
            &mut self.read_buffer,
            &mut self.codec,
            &self.endpoint,
        );
        let message = match read_timeout {
            Some(limit) => timeout(limit, read)
                .await
                .map_err(|_| timeout_error(&self.endpoint, limit))?,
            None => read.await,
        };
        let message = self.track(message)?;
        self.touch();
        Ok(message)
    }

    async fn read_chunk(&mut self, read_timeout: Duration) -> Result<Chunk> {
        let read = read_frame(
            &mut self.stream,
            &mut self.read_buffer,
            &mut self.chunk_decoder,
            &self.endpoint,
        );
        let chunk = timeout(read_timeout, read)
            .await
            .map_err(|_| timeout_error(&self.endpoint, read_timeout))??;
        self.touch();
        Ok(chunk)
    }

    async fn write_message(&mut self, message: &Message) -> Result<()> {
        let mut buf = BytesMut::with_capacity(message.wire_size());
        message.write_to(&mut buf);
        tracing::trace!(
            id = %self.id,
            request = message_type_name(message.message_type()),
            bytes = buf.len(),
            "write"
        );
        self.stream.write_all(&buf).await.map_err(|e| {
            GeodeError::NotConnected(format!("failed to write to {}: {}", self.endpoint, e))
        })?;
        self.touch();
        Ok(())
    }

    /// Pings the server.
    pub async fn ping(&mut self, read_timeout: Duration) -> Result<()> {
        self.send(&Message::new(PING), read_timeout)
            .await?
            .into_result()
            .map(|_| ())
    }

    /// Closes the connection, telling the server whether to keep a durable
    /// queue alive. Failures are ignored.
    pub async fn close(mut self, keepalive: bool) {
        if !self.broken {
            let request = Message::new(CLOSE_CONNECTION).with_part(Part::byte(keepalive as u8));
            if let Err(e) = self.write_message(&request).await {
                tracing::debug!(id = %self.id, error = %e, "close message not delivered");
            }
        }
        if let Err(e) = self.stream.shutdown().await {
            tracing::trace!(id = %self.id, error = %e, "socket shutdown failed");
        }
        tracing::debug!(id = %self.id, endpoint = %self.endpoint, keepalive, "closed connection");
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal_for_connection() {
                tracing::debug!(id = %self.id, endpoint = %self.endpoint, error = %e, "connection broken");
                self.broken = true;
            }
        }
        result
    }
}

fn error_chunk(chunk: &Chunk) -> Result<()> {
    let parts = chunk.parts()?;
    Message::from_parts(chunk.message_type, chunk.transaction_id, chunk.flags, parts)
        .into_result()
        .map(|_| ())
}

fn timeout_error(endpoint: &ServerLocation, limit: Duration) -> GeodeError {
    GeodeError::Timeout(format!("no reply from {} within {:?}", endpoint, limit))
}

async fn open_stream(endpoint: &ServerLocation, buffer_size: usize) -> Result<TcpStream> {
    let addresses: Vec<SocketAddr> = tokio::net::lookup_host(endpoint.address())
        .await
        .map_err(|e| GeodeError::NotConnected(format!("failed to resolve {}: {}", endpoint, e)))?
        .collect();

    let mut last_error = None;
    for address in addresses {
        let socket = if address.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        let size = u32::try_from(buffer_size).unwrap_or(u32::MAX);
        socket.set_send_buffer_size(size)?;
        socket.set_recv_buffer_size(size)?;
        match socket.connect(address).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => last_error = Some(e),
        }
    }
    Err(GeodeError::NotConnected(match last_error {
        Some(e) => format!("failed to connect to {}: {}", endpoint, e),
        None => format!("no address found for {}", endpoint),
    }))
}

async fn read_frame<D>(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    decoder: &mut D,
    endpoint: &ServerLocation,
) -> Result<D::Item>
where
    D: Decoder<Error = GeodeError>,
{
    loop {
        if let Some(frame) = decoder.decode(buffer)? {
            return Ok(frame);
        }
        let read = stream.read_buf(buffer).await.map_err(|e| {
            GeodeError::NotConnected(format!("failed to read from {}: {}", endpoint, e))
        })?;
        if read == 0 {
            return Err(GeodeError::NotConnected(format!(
                "connection closed by {}",
                endpoint
            )));
        }
    }
}
