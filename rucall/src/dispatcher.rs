use std::sync::Arc;

use bytes::BytesMut;

use crate::{
    Codec, Header, PendingCalls,
    codec::drain_units,
    error::{Error, ErrorKind, Result},
};

/// Read side of a client connection: turns inbound bytes into resolved
/// pending calls.
///
/// One dispatcher per connection; it shares the connection's registry with
/// the [`Client`](crate::Client) that registers calls.
pub struct Dispatcher {
    codec: Arc<dyn Codec>,
    pending: Arc<PendingCalls>,
}

impl Dispatcher {
    /// Creates a dispatcher resolving the calls registered in `pending`.
    #[must_use]
    pub fn new(codec: Arc<dyn Codec>, pending: Arc<PendingCalls>) -> Self {
        Self { codec, pending }
    }

    /// Dispatches every complete response at the front of `buffer`.
    ///
    /// Returns the number of units consumed. Responses nobody waits for are
    /// logged and dropped. May be called from any thread: callbacks of
    /// asynchronous calls run on the runtime they were registered from.
    ///
    /// # Examples
    ///
    /// ```
    /// # use rucall::*;
    /// # use std::sync::Arc;
    /// # #[tokio::main]
    /// # async fn main() {
    /// let codec = Arc::new(FrameCodec::new(PayloadFormat::Json));
    /// let dispatcher = Dispatcher::new(codec.clone(), Arc::new(PendingCalls::default()));
    ///
    /// let request = Request::new("2.0.2", Invocation::new("GetUser", vec![]));
    /// let reply = Reply::<String>::new();
    /// let (call, rx) = PendingCall::sync(Box::new(reply.clone()));
    /// dispatcher.pending().register(request.id(), call).unwrap();
    ///
    /// let response = Response::new(&request.meta, Ok("username".into()));
    /// let mut buffer = bytes::BytesMut::from(&codec.encode_response(&response).unwrap()[..]);
    /// assert_eq!(dispatcher.feed(&mut buffer).unwrap(), 1);
    /// rx.await.unwrap().unwrap();
    /// assert_eq!(reply.take().as_deref(), Some("username"));
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `HeaderDecodeFailed` if the stream is unrecoverable. No
    /// pending call is touched in that case.
    pub fn feed(&self, buffer: &mut BytesMut) -> Result<usize> {
        drain_units(self.codec.as_ref(), buffer, |header, unit| {
            self.dispatch(&header, &unit);
        })
    }

    fn dispatch(&self, header: &Header, unit: &[u8]) {
        let id = header.meta.id;
        if !header.meta.is_rsp() {
            tracing::warn!("discard request {id} received on a client connection");
            return;
        }

        let mut call = match self.pending.lookup_and_remove(id) {
            Ok(call) => call,
            Err(err) => {
                tracing::warn!("discard response: {err}");
                return;
            }
        };
        let result = self.codec.decode_payload(header, unit, call.slot());
        call.resolve(id, result);
    }

    /// Fails everything still pending once the connection is gone. Calls
    /// started afterwards fail with `ConnectionClosed` right away.
    pub fn close(&self, reason: &Error) {
        let err = Error::new(ErrorKind::ConnectionClosed, reason.to_string());
        self.pending.close(&err);
    }

    /// The registry this dispatcher resolves.
    #[must_use]
    pub fn pending(&self) -> &Arc<PendingCalls> {
        &self.pending
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending", &self.pending)
            .finish()
    }
}
