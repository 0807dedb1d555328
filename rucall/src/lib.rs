#![forbid(unsafe_code)]

mod error;
pub use error::{Error, ErrorKind, Result};

mod invocation;
pub use invocation::{INTERFACE_KEY, Invocation};

mod msg;
pub use msg::{MsgFlags, MsgMeta, Request, RequestData, Response, next_id};

mod reply;
pub use reply::{Body, Discard, Reply, ReplySlot};

pub mod codec;
pub use codec::{Codec, CodecRegistry, Decoded, FrameCodec, Header, PayloadFormat};

mod pending;
pub use pending::{CallOutcome, Callback, PendingCall, PendingCalls, ReleaseHandle, SyncReceiver};

mod dispatcher;
pub use dispatcher::Dispatcher;

mod transport;
pub use transport::Transport;

mod task_supervisor;
pub use task_supervisor::TaskSupervisor;

mod tcp;
pub use tcp::TcpSocket;

mod client;
pub use client::{CallMode, Client, ClientConfig};

mod invoker;
pub use invoker::{Invoker, InvokerSet, Router};

mod service;
pub use service::{Method, ServiceMap};

mod server;
pub use server::Server;
