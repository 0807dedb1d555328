use std::{net::SocketAddr, sync::Arc};

use bytes::{Bytes, BytesMut};
use tokio_util::sync::DropGuard;

use crate::{
    Codec, Header, RequestData, Response, ServiceMap, TaskSupervisor, Transport,
    codec::drain_units,
    error::{Error, ErrorKind, Result},
    tcp::{self, FrameHandler, TcpSocket},
};

struct ServerState {
    services: Arc<ServiceMap>,
    codec: Arc<dyn Codec>,
    task_supervisor: TaskSupervisor,
}

/// Serving peer: answers requests with the handlers of a [`ServiceMap`].
///
/// Two-way requests and heartbeats get a response, one-way requests never
/// do.
///
/// ```rust,no_run
/// # use rucall::{CodecRegistry, Invocation, Server, ServiceMap};
/// # use std::{net::SocketAddr, str::FromStr};
/// # #[tokio::main]
/// # async fn main() {
/// let mut services = ServiceMap::default();
/// services.add_method("demo.Echo", "Echo", |invocation: Invocation| async move {
///     invocation.argument::<String>(0)
/// });
///
/// let codec = CodecRegistry::with_defaults().get("json").unwrap();
/// let server = Server::create(services, codec);
/// let addr = SocketAddr::from_str("127.0.0.1:8000").unwrap();
/// server.listen(addr).await.unwrap();
/// server.join().await;
/// # }
/// ```
pub struct Server {
    state: Arc<ServerState>,
    _drop_guard: DropGuard,
}

impl Server {
    #[must_use]
    pub fn create(services: ServiceMap, codec: Arc<dyn Codec>) -> Self {
        let state = Arc::new(ServerState {
            services: Arc::new(services),
            codec,
            task_supervisor: TaskSupervisor::create(),
        });
        let drop_guard = state.task_supervisor.drop_guard();
        Self {
            state,
            _drop_guard: drop_guard,
        }
    }

    /// Starts accepting connections on `addr`.
    ///
    /// Returns the bound address, which differs from `addr` when port 0 was
    /// requested.
    ///
    /// # Errors
    ///
    /// Returns `TcpBindFailed` if the address cannot be bound.
    pub async fn listen(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::new(ErrorKind::TcpBindFailed, e.to_string()))?;
        let listener_addr = listener
            .local_addr()
            .map_err(|e| Error::new(ErrorKind::TcpBindFailed, e.to_string()))?;

        let state = self.state.clone();
        self.state.task_supervisor.spawn(async move {
            tracing::info!("start listening: {listener_addr}");
            while let Ok((stream, addr)) = listener.accept().await {
                tracing::debug!("accepted connection from {addr}");
                let handler = Connection {
                    state: state.clone(),
                };
                tcp::start(stream, addr, &state.task_supervisor, handler);
            }
        });

        Ok(listener_addr)
    }

    /// Stops accepting, closes every open connection and cancels running
    /// handlers.
    pub fn stop(&self) {
        self.state.task_supervisor.stop();
    }

    /// Waits until the accept loop, every connection and every handler have
    /// exited.
    pub async fn join(&self) {
        self.state.task_supervisor.all_stopped().await;
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("services", &self.state.services)
            .finish()
    }
}

/// Read side of one accepted connection.
struct Connection {
    state: Arc<ServerState>,
}

impl Connection {
    fn handle(&self, socket: &TcpSocket, header: &Header, unit: &Bytes) {
        let meta = &header.meta;
        if !meta.is_req() {
            tracing::warn!("discard response {} received by server", meta.id);
            return;
        }

        let invocation = match self.state.codec.decode_request(header, unit) {
            Ok(RequestData::Invocation(invocation)) => invocation,
            Ok(RequestData::Event) => {
                tracing::trace!("heartbeat {} received", meta.id);
                if meta.is_two_way() {
                    self.reply(socket, Response::new(meta, Ok(serde_json::Value::Null)));
                }
                return;
            }
            Err(err) => {
                tracing::error!("decode request {} failed: {err}", meta.id);
                if meta.is_two_way() {
                    self.reply(socket, Response::new(meta, Err(err)));
                }
                return;
            }
        };

        let state = self.state.clone();
        let socket = socket.clone();
        let meta = meta.clone();
        self.state.task_supervisor.spawn(async move {
            let result = state.services.invoke(invocation).await;
            if meta.is_two_way() {
                let response = Response::new(&meta, result);
                send_response(state.codec.as_ref(), &socket, &response).await;
            }
        });
    }

    fn reply(&self, socket: &TcpSocket, response: Response) {
        let state = self.state.clone();
        let socket = socket.clone();
        self.state.task_supervisor.spawn(async move {
            send_response(state.codec.as_ref(), &socket, &response).await;
        });
    }
}

async fn send_response(codec: &dyn Codec, socket: &TcpSocket, response: &Response) {
    let bytes = match codec.encode_response(response) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::error!("encode response {} failed: {err}", response.id());
            let fallback = Response::new(&response.meta, Err(err));
            match codec.encode_response(&fallback) {
                Ok(bytes) => bytes,
                Err(_) => return,
            }
        }
    };
    if let Err(err) = socket.send(bytes).await {
        tracing::error!("send response {} failed: {err}", response.id());
    }
}

impl FrameHandler for Connection {
    fn on_recv(&mut self, socket: &TcpSocket, buffer: &mut BytesMut) -> Result<()> {
        let codec = self.state.codec.clone();
        drain_units(codec.as_ref(), buffer, |header, unit| {
            self.handle(socket, &header, &unit);
        })
        .map(drop)
    }

    fn on_close(self, err: Error) {
        tracing::debug!("connection closed: {err}");
    }
}
