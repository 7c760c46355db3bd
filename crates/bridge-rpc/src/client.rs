use std::{
    io,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{oneshot, Mutex},
};
use tokio_util::sync::CancellationToken;

use crate::{
    api::RpcMethod,
    error::{Result, RpcError},
    params::normalize_params,
};

#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// Bound on establishing (and re-establishing) the connection.
    pub connect_timeout: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Receives the reply of a command sent with [`RpcClient::send_async`].
pub type Completion = oneshot::Sender<Result<Value>>;

#[derive(Debug)]
struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

#[derive(Debug)]
struct Deferred {
    id: u64,
    completion: Completion,
}

#[derive(Debug)]
struct State {
    addr: Option<String>,
    conn: Option<Connection>,
    next_id: u64,
    deferred: Option<Deferred>,
}

impl State {
    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    reconnects: AtomicU64,
    shutdown: CancellationToken,
    config: RpcClientConfig,
}

/// Newline-delimited JSON-RPC client for a headless debugger backend.
///
/// Every request holds the connection lock for its full write-then-read
/// round trip, so at most one request is ever in flight. A request that hits a
/// closed stream reconnects once and is retried once.
#[derive(Debug, Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new(RpcClientConfig::default())
    }
}

impl RpcClient {
    pub fn new(config: RpcClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    addr: None,
                    conn: None,
                    next_id: 1,
                    deferred: None,
                }),
                reconnects: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
                config,
            }),
        }
    }

    pub async fn connect(&self, addr: &str) -> Result<()> {
        if self.is_closed() {
            return Err(RpcError::Closed);
        }

        let conn = dial(addr, self.inner.config.connect_timeout).await?;
        let mut state = self.inner.state.lock().await;
        state.addr = Some(addr.to_owned());
        state.conn = Some(conn);
        tracing::debug!(target: "bridge.rpc", addr, "connected");
        Ok(())
    }

    /// Closes the connection. Pending and future requests fail with
    /// [`RpcError::Closed`].
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        let mut state = self.inner.state.lock().await;
        if let Some(mut conn) = state.conn.take() {
            let _ = conn.writer.shutdown().await;
        }
        if let Some(deferred) = state.deferred.take() {
            let _ = deferred.completion.send(Err(RpcError::Closed));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub async fn is_connected(&self) -> bool {
        !self.is_closed() && self.inner.state.lock().await.conn.is_some()
    }

    /// Number of reconnects performed over the lifetime of this client.
    pub fn reconnect_count(&self) -> u64 {
        self.inner.reconnects.load(Ordering::Relaxed)
    }

    /// Sends a typed request and decodes its result. Typed payloads are sent
    /// verbatim.
    pub async fn call<P, R>(&self, method: RpcMethod, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.round_trip(method.as_str(), params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Sends a loosely-typed request. Nested breakpoint records are normalised
    /// into the backend's expected shape first.
    pub async fn send_request(&self, method: &str, params: Value) -> Result<Value> {
        let params = normalize_params(params)?;
        self.round_trip(method, params).await
    }

    /// Sends a request whose result is delivered through `completion`.
    ///
    /// `RPCServer.Command` returns as soon as the request is written; its reply
    /// is consumed before the next request goes out, or by
    /// [`RpcClient::complete_deferred`]. Any other method is performed
    /// synchronously.
    pub async fn send_async<P>(
        &self,
        method: RpcMethod,
        params: &P,
        completion: Completion,
    ) -> Result<()>
    where
        P: Serialize + ?Sized,
    {
        let params = serde_json::to_value(params)?;
        if method != RpcMethod::Command {
            let _ = completion.send(self.round_trip(method.as_str(), params).await);
            return Ok(());
        }

        let mut state = self.lock_open().await?;
        self.drain_deferred(&mut state).await;
        let (id, _) = self
            .transmit(&mut state, method.as_str(), &params, false)
            .await?;
        tracing::debug!(target: "bridge.rpc", id, method = %method, "command sent without waiting for reply");
        state.deferred = Some(Deferred { id, completion });
        Ok(())
    }

    /// Reads the reply of a command sent with [`RpcClient::send_async`], if
    /// one is outstanding.
    pub async fn complete_deferred(&self) -> Result<()> {
        let mut state = self.lock_open().await?;
        self.drain_deferred(&mut state).await;
        Ok(())
    }

    async fn lock_open(&self) -> Result<tokio::sync::MutexGuard<'_, State>> {
        if self.is_closed() {
            return Err(RpcError::Closed);
        }
        let state = self.inner.state.lock().await;
        if state.addr.is_none() {
            return Err(RpcError::NotConnected);
        }
        Ok(state)
    }

    async fn round_trip(&self, method: &str, params: Value) -> Result<Value> {
        let mut state = self.lock_open().await?;
        self.drain_deferred(&mut state).await;

        let (id, reply) = self.transmit(&mut state, method, &params, true).await?;
        let reply = reply.ok_or_else(|| RpcError::Protocol("missing reply".to_owned()))?;
        decode_reply(&reply, id)
    }

    /// Writes one request and, when `await_reply` is set, reads one reply
    /// line. A closed stream triggers exactly one reconnect and one retry.
    async fn transmit(
        &self,
        state: &mut State,
        method: &str,
        params: &Value,
        await_reply: bool,
    ) -> Result<(u64, Option<String>)> {
        let mut reconnected = false;
        loop {
            let id = state.take_id();
            let line = encode_request(method, params, id)?;
            tracing::trace!(target: "bridge.rpc", id, method, "sending request");

            match self.exchange(state, &line, await_reply).await {
                Ok(reply) => return Ok((id, reply)),
                Err(_) if self.is_closed() => return Err(RpcError::Closed),
                Err(err) if is_stream_closed(&err) && !reconnected => {
                    reconnected = true;
                    tracing::warn!(
                        target: "bridge.rpc",
                        id,
                        method,
                        error = %err,
                        "connection closed; reconnecting once"
                    );
                    self.inner.reconnects.fetch_add(1, Ordering::Relaxed);
                    self.reconnect(state).await?;
                }
                Err(err) if is_stream_closed(&err) => {
                    state.conn = None;
                    return Err(RpcError::ConnectionLost(err));
                }
                Err(err) => return Err(RpcError::Io(err)),
            }
        }
    }

    async fn exchange(
        &self,
        state: &mut State,
        line: &[u8],
        await_reply: bool,
    ) -> io::Result<Option<String>> {
        let Some(conn) = state.conn.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "no connection"));
        };

        conn.writer.write_all(line).await?;
        conn.writer.flush().await?;
        if !await_reply {
            return Ok(None);
        }

        read_reply_line(&mut conn.reader, &self.inner.shutdown)
            .await
            .map(Some)
    }

    async fn reconnect(&self, state: &mut State) -> Result<()> {
        let addr = state.addr.clone().ok_or(RpcError::NotConnected)?;
        state.conn = None;
        state.conn = Some(dial(&addr, self.inner.config.connect_timeout).await?);
        tracing::info!(target: "bridge.rpc", addr = %addr, "reconnected");
        Ok(())
    }

    /// Consumes the reply of an outstanding asynchronous command.
    async fn drain_deferred(&self, state: &mut State) {
        let Some(deferred) = state.deferred.take() else {
            return;
        };

        let outcome = match state.conn.as_mut() {
            Some(conn) => match read_reply_line(&mut conn.reader, &self.inner.shutdown).await {
                Ok(line) => decode_reply(&line, deferred.id),
                Err(err) => {
                    // The stream is unusable; the next transmit reconnects.
                    state.conn = None;
                    Err(RpcError::Io(err))
                }
            },
            None => Err(RpcError::NotConnected),
        };

        if let Err(err) = &outcome {
            tracing::warn!(target: "bridge.rpc", id = deferred.id, error = %err, "deferred command failed");
        }
        let _ = deferred.completion.send(outcome);
    }
}

async fn dial(addr: &str, timeout: Duration) -> Result<Connection> {
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            return Err(RpcError::Connect {
                addr: addr.to_owned(),
                source,
            })
        }
        Err(_elapsed) => {
            return Err(RpcError::ConnectTimeout {
                addr: addr.to_owned(),
            })
        }
    };
    let _ = stream.set_nodelay(true);

    let (reader, writer) = stream.into_split();
    Ok(Connection {
        reader: BufReader::new(reader),
        writer,
    })
}

async fn read_reply_line(
    reader: &mut BufReader<OwnedReadHalf>,
    shutdown: &CancellationToken,
) -> io::Result<String> {
    let mut line = String::new();
    let read = tokio::select! {
        _ = shutdown.cancelled() => {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "client closed"));
        }
        res = reader.read_line(&mut line) => res?,
    };
    if read == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "backend closed the connection",
        ));
    }
    Ok(line)
}

fn is_stream_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

fn encode_request(method: &str, params: &Value, id: u64) -> Result<Vec<u8>> {
    let envelope = json!({
        "method": method,
        "params": [params],
        "id": id,
    });
    let mut bytes = serde_json::to_vec(&envelope)?;
    bytes.push(b'\n');
    Ok(bytes)
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ReplyError>,
}

/// The backend reports errors as a bare string; other JSON-RPC servers use an
/// object with a message.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReplyError {
    Message(String),
    Object {
        #[serde(default)]
        message: String,
    },
}

fn decode_reply(line: &str, expected: u64) -> Result<Value> {
    let reply: Reply = serde_json::from_str(line.trim_end())?;

    let actual = reply
        .id
        .ok_or_else(|| RpcError::Protocol("reply without id".to_owned()))?;
    if actual != expected {
        return Err(RpcError::IdMismatch { expected, actual });
    }

    match reply.error {
        Some(ReplyError::Message(message)) | Some(ReplyError::Object { message }) => {
            Err(RpcError::Backend(message))
        }
        None => Ok(reply.result.unwrap_or(Value::Null)),
    }
}
