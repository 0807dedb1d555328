use std::{net::SocketAddr, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_inline_default::serde_inline_default;
use tokio::net::TcpStream;

use crate::{
    CallOutcome, Callback, Codec, CodecRegistry, Discard, Dispatcher, Invocation, PendingCall,
    PendingCalls, Reply, ReplySlot, Request, TaskSupervisor, Transport,
    error::{Error, ErrorKind, Result},
    tcp::{self, TcpSocket},
};

#[serde_inline_default]
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct ClientConfig {
    /// Name of the codec in the [`CodecRegistry`].
    #[serde_inline_default("json".to_string())]
    pub protocol: String,
    /// Used by calls that do not pass their own timeout.
    #[serde_inline_default(Duration::from_secs(3))]
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde_inline_default("2.0.2".to_string())]
    pub version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        serde_json::from_value(serde_json::Value::Object(serde_json::Map::default())).unwrap()
    }
}

/// How a request is completed.
pub enum CallMode {
    /// Fire and forget. Nothing is registered.
    OneWay,
    /// Wait for the response to be decoded into the slot.
    Sync(Box<dyn ReplySlot>),
    /// Return after the send; the callback runs once the call is resolved.
    Async(Box<dyn ReplySlot>, Callback),
}

impl std::fmt::Debug for CallMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallMode::OneWay => write!(f, "OneWay"),
            CallMode::Sync(_) => write!(f, "Sync"),
            CallMode::Async(..) => write!(f, "Async"),
        }
    }
}

/// Client side of one connection.
///
/// Every outstanding call of the client is tracked in its own
/// [`PendingCalls`], which the connection's [`Dispatcher`] resolves.
pub struct Client<T = TcpSocket> {
    config: ClientConfig,
    codec: Arc<dyn Codec>,
    pending: Arc<PendingCalls>,
    transport: T,
    _task_supervisor: Option<TaskSupervisor>,
}

impl Client<TcpSocket> {
    /// Connects to `addr` and starts the connection's read and write loops.
    ///
    /// # Errors
    ///
    /// Returns `CodecNotFound` for an unknown protocol and
    /// `TcpConnectFailed` if the peer is unreachable.
    pub async fn connect(
        addr: SocketAddr,
        config: ClientConfig,
        codecs: &CodecRegistry,
    ) -> Result<Self> {
        let codec = codecs.get(&config.protocol)?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::new(ErrorKind::TcpConnectFailed, e.to_string()))?;

        let pending = Arc::new(PendingCalls::default());
        let task_supervisor = TaskSupervisor::create();
        let dispatcher = Dispatcher::new(codec.clone(), pending.clone());
        let socket = tcp::start(stream, addr, &task_supervisor, dispatcher);
        tracing::debug!("connected to {addr} with protocol {}", config.protocol);

        Ok(Self {
            config,
            codec,
            pending,
            transport: socket,
            _task_supervisor: Some(task_supervisor),
        })
    }
}

impl<T: Transport> Client<T> {
    /// Creates a client over a caller-managed transport.
    ///
    /// The returned dispatcher must be fed with the bytes the connection
    /// receives.
    ///
    /// # Errors
    ///
    /// Returns `CodecNotFound` for an unknown protocol.
    pub fn create(
        config: ClientConfig,
        codecs: &CodecRegistry,
        transport: T,
    ) -> Result<(Self, Dispatcher)> {
        let codec = codecs.get(&config.protocol)?;
        let pending = Arc::new(PendingCalls::default());
        let dispatcher = Dispatcher::new(codec.clone(), pending.clone());
        let client = Self {
            config,
            codec,
            pending,
            transport,
            _task_supervisor: None,
        };
        Ok((client, dispatcher))
    }

    /// The configuration the client was created with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Number of calls waiting for a response.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Sends `request` and completes it according to `mode`.
    ///
    /// - `OneWay`: returns once the bytes are handed to the transport.
    /// - `Sync`: returns once the response has been decoded into the slot,
    ///   or with `Timeout`.
    /// - `Async`: returns once the bytes are handed to the transport; the
    ///   callback later receives the response, `Timeout` or a decode error,
    ///   exactly once and never before this method has returned.
    ///
    /// # Errors
    ///
    /// `EncodeFailed` and `SendFailed` leave nothing registered, and the
    /// callback of an Async call is then never invoked. A Sync call also
    /// fails with the error the response resolved it with.
    pub async fn call(&self, request: Request, timeout: Duration, mode: CallMode) -> Result<()> {
        let id = request.id();
        match (&mode, request.is_two_way()) {
            (CallMode::OneWay, false) | (CallMode::Sync(_) | CallMode::Async(..), true) => {}
            (mode, two_way) => {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    format!("request {id} with two_way={two_way} cannot use {mode:?} mode"),
                ));
            }
        }
        if timeout.is_zero() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("request {id} with zero timeout"),
            ));
        }

        let bytes = self.codec.encode_request(&request)?;
        match mode {
            CallMode::OneWay => self.transport.send(bytes).await,
            CallMode::Sync(slot) => {
                let deadline = tokio::time::Instant::now() + timeout;
                let (call, mut rx) = PendingCall::sync(slot);
                let registration = self.pending.register_guarded(id, call)?;
                self.transport.send(bytes).await?;

                let waited = tokio::time::timeout_at(deadline, &mut rx).await;
                let result = match waited {
                    Ok(resolved) => resolved,
                    Err(_) if self.pending.remove_if_present(id) => {
                        tracing::debug!("request {id} timed out after {timeout:?}");
                        Ok(Err(Error::new(
                            ErrorKind::Timeout,
                            format!("request {id} timed out after {timeout:?}"),
                        )))
                    }
                    // the response claimed the call first; its result is on the way.
                    Err(_) => rx.await,
                };
                registration.disarm();
                result.map_err(|e| Error::new(ErrorKind::ConnectionClosed, e.to_string()))?
            }
            CallMode::Async(slot, callback) => {
                let deadline = tokio::time::Instant::now() + timeout;
                let (call, release) = PendingCall::with_callback(slot, callback);
                let registration = self.pending.register_guarded(id, call)?;
                // dropping `release` withdraws a callback that close may
                // already have scheduled.
                self.transport.send(bytes).await?;

                let timer = tokio::spawn({
                    let pending = self.pending.clone();
                    async move {
                        tokio::time::sleep_until(deadline).await;
                        if let Ok(call) = pending.lookup_and_remove(id) {
                            tracing::debug!("request {id} timed out after {timeout:?}");
                            call.resolve(
                                id,
                                Err(Error::new(
                                    ErrorKind::Timeout,
                                    format!("request {id} timed out after {timeout:?}"),
                                )),
                            );
                        }
                    }
                });
                if !self.pending.attach_timer(id, timer.abort_handle()) {
                    timer.abort();
                }
                registration.disarm();
                let _ = release.send(true);
                Ok(())
            }
        }
    }

    /// Calls `invocation` and waits for its typed result, using the
    /// configured timeout.
    ///
    /// # Errors
    ///
    /// Fails with send, timeout, decode or remote errors.
    pub async fn invoke<R>(&self, invocation: Invocation) -> Result<R>
    where
        R: DeserializeOwned + Send + 'static,
    {
        let reply = Reply::<R>::new();
        let request = Request::new(self.config.version.clone(), invocation);
        self.call(
            request,
            self.config.timeout,
            CallMode::Sync(Box::new(reply.clone())),
        )
        .await?;
        reply.take().ok_or_else(empty_reply)
    }

    /// Sends `invocation` without waiting for, or expecting, a response.
    ///
    /// # Errors
    ///
    /// Fails if the request cannot be encoded or sent.
    pub async fn invoke_oneway(&self, invocation: Invocation) -> Result<()> {
        let request = Request::oneway(self.config.version.clone(), invocation);
        self.call(request, self.config.timeout, CallMode::OneWay)
            .await
    }

    /// Sends `invocation` and hands its typed result to `callback` later.
    ///
    /// # Errors
    ///
    /// Fails if the request cannot be encoded or sent, in which case the
    /// callback is never invoked.
    pub async fn invoke_async<R, F>(&self, invocation: Invocation, callback: F) -> Result<()>
    where
        R: DeserializeOwned + Send + 'static,
        F: FnOnce(Result<R>) + Send + Sync + 'static,
    {
        let reply = Reply::<R>::new();
        let slot = Box::new(reply.clone());
        let callback: Callback = Box::new(move |outcome: CallOutcome| {
            callback(
                outcome
                    .result
                    .and_then(|()| reply.take().ok_or_else(empty_reply)),
            );
        });
        let request = Request::new(self.config.version.clone(), invocation);
        self.call(
            request,
            self.config.timeout,
            CallMode::Async(slot, callback),
        )
        .await
    }

    /// Sends a heartbeat event and waits for the peer to answer it.
    ///
    /// # Errors
    ///
    /// Fails with send or timeout errors.
    pub async fn heartbeat(&self) -> Result<()> {
        let request = Request::heartbeat(self.config.version.clone());
        self.call(
            request,
            self.config.timeout,
            CallMode::Sync(Box::new(Discard)),
        )
        .await
    }
}

fn empty_reply() -> Error {
    Error::new(
        ErrorKind::PayloadDecodeFailed,
        "response carried no value".to_string(),
    )
}

impl<T> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("pending", &self.pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.protocol, "json");
        assert_eq!(config.version, "2.0.2");

        let config: ClientConfig =
            serde_json::from_str(r#"{"protocol":"msgpack","timeout":"200ms"}"#).unwrap();
        assert_eq!(config.timeout, Duration::from_millis(200));
        assert_eq!(config.protocol, "msgpack");
    }

    #[test]
    fn test_unknown_protocol() {
        let config = ClientConfig {
            protocol: "hessian".into(),
            ..Default::default()
        };
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel::<bytes::Bytes>();
        let err = Client::create(config, &CodecRegistry::with_defaults(), tx).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CodecNotFound);
    }
}
