use std::{io::IoSlice, net::SocketAddr};

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
};

use crate::{
    Dispatcher, TaskSupervisor, Transport,
    error::{Error, ErrorKind, Result},
};

/// Outbound queue of one TCP connection.
#[derive(Debug, Clone)]
pub struct TcpSocket {
    stream: mpsc::Sender<Bytes>,
}

impl Transport for TcpSocket {
    async fn send(&self, bytes: Bytes) -> Result<()> {
        self.stream
            .send(bytes)
            .await
            .map_err(|e| Error::new(ErrorKind::SendFailed, e.to_string()))
    }
}

/// Consumer of the inbound byte stream of one connection.
pub(crate) trait FrameHandler: Send + 'static {
    /// Consumes whatever complete units `buffer` holds.
    fn on_recv(&mut self, socket: &TcpSocket, buffer: &mut BytesMut) -> Result<()>;

    /// Called once when the read side ends with `err`.
    fn on_close(self, err: Error);
}

impl FrameHandler for Dispatcher {
    fn on_recv(&mut self, _: &TcpSocket, buffer: &mut BytesMut) -> Result<()> {
        self.feed(buffer).map(drop)
    }

    fn on_close(self, err: Error) {
        self.close(&err);
    }
}

/// Splits `stream` into supervised send and receive loops.
pub(crate) fn start<H: FrameHandler>(
    stream: TcpStream,
    addr: SocketAddr,
    supervisor: &TaskSupervisor,
    mut handler: H,
) -> TcpSocket {
    let (recv_stream, send_stream) = stream.into_split();
    let (sender, receiver) = mpsc::channel(1024);
    supervisor.spawn(async move {
        if let Err(e) = start_send_loop(send_stream, receiver).await {
            tracing::error!("send loop for {addr} failed: {e}");
        }
    });

    let socket = TcpSocket { stream: sender };
    supervisor.spawn({
        let socket = socket.clone();
        async move {
            let err = match start_recv_loop(recv_stream, &socket, &mut handler).await {
                Ok(never) => match never {},
                Err(err) => err,
            };
            if err.kind == ErrorKind::ConnectionClosed {
                tracing::info!("connection {addr} closed: {err}");
            } else {
                tracing::error!("recv loop for {addr} failed: {err}");
            }
            handler.on_close(err);
        }
    });
    socket
}

async fn start_recv_loop<H: FrameHandler>(
    mut recv_stream: OwnedReadHalf,
    socket: &TcpSocket,
    handler: &mut H,
) -> Result<std::convert::Infallible> {
    let mut buffer = BytesMut::with_capacity(1 << 20);
    loop {
        handler.on_recv(socket, &mut buffer)?;
        let n = recv_stream
            .read_buf(&mut buffer)
            .await
            .map_err(|e| Error::new(ErrorKind::TcpRecvMsgFailed, e.to_string()))?;
        if n == 0 {
            return Err(Error::new(
                ErrorKind::ConnectionClosed,
                "socket eof".to_string(),
            ));
        }
    }
}

async fn start_send_loop(
    mut send_stream: OwnedWriteHalf,
    mut receiver: mpsc::Receiver<Bytes>,
) -> Result<()> {
    const LIMIT: usize = 64;
    let mut msgs = Vec::with_capacity(LIMIT);
    loop {
        let mut bufs = [IoSlice::new(&[]); LIMIT];

        let n = receiver.recv_many(&mut msgs, LIMIT).await;
        if n == 0 {
            return Ok(());
        }

        for (msg, io_slice) in msgs.iter().zip(&mut bufs) {
            *io_slice = IoSlice::new(msg);
        }

        let mut slices = &mut bufs[..msgs.len()];
        while !slices.is_empty() {
            let n = send_stream
                .write_vectored(slices)
                .await
                .map_err(|e| Error::new(ErrorKind::SendFailed, e.to_string()))?;
            IoSlice::advance_slices(&mut slices, n);
        }
        msgs.clear();
    }
}
