use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use crate::error::{Error, ErrorKind, Result};

/// A response payload as handed from a codec to a [`ReplySlot`].
#[derive(Debug, Clone, Copy)]
pub enum Body<'a> {
    Json(&'a [u8]),
    MessagePack(&'a [u8]),
}

impl Body<'_> {
    /// Deserializes the payload into a typed value.
    ///
    /// An empty payload is treated as null.
    ///
    /// # Errors
    ///
    /// Returns `PayloadDecodeFailed` if the bytes do not match `P`.
    pub fn deserialize<P: DeserializeOwned>(&self) -> Result<P> {
        let decode_failed = |msg: String| Error::new(ErrorKind::PayloadDecodeFailed, msg);
        match *self {
            Body::Json(bytes) | Body::MessagePack(bytes) if bytes.is_empty() => {
                serde_json::from_value(serde_json::Value::Null)
                    .map_err(|e| decode_failed(e.to_string()))
            }
            Body::Json(bytes) => {
                serde_json::from_slice(bytes).map_err(|e| decode_failed(e.to_string()))
            }
            Body::MessagePack(bytes) => Ok(rmp_serde::from_slice(bytes)?),
        }
    }
}

/// Destination a codec decodes a response payload into.
///
/// The slot is registered together with its pending call and filled by the
/// dispatcher before the call is resolved.
pub trait ReplySlot: Send + Sync {
    /// # Errors
    ///
    /// Returns the error the call should resolve with: `PayloadDecodeFailed`
    /// for undecodable bytes or the error result sent by the peer.
    fn fill(&mut self, body: Body<'_>) -> Result<()>;
}

/// Caller-side typed holder for the result of a two-way call.
///
/// Clones share the same storage: keep one clone and register the other.
#[derive(Debug)]
pub struct Reply<T>(Arc<Mutex<Option<T>>>);

impl<T> Default for Reply<T> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }
}

impl<T> Clone for Reply<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Reply<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the decoded value out of the holder.
    #[must_use]
    pub fn take(&self) -> Option<T> {
        self.0.lock().take()
    }

    /// Whether a decoded value is waiting to be taken.
    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.0.lock().is_some()
    }
}

impl<T: Clone> Reply<T> {
    /// Clones the decoded value, leaving it in place.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.0.lock().clone()
    }
}

impl<T> ReplySlot for Reply<T>
where
    T: DeserializeOwned + Send,
{
    fn fill(&mut self, body: Body<'_>) -> Result<()> {
        let value = body.deserialize::<std::result::Result<T, Error>>()??;
        *self.0.lock() = Some(value);
        Ok(())
    }
}

/// Slot that accepts any payload and keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl ReplySlot for Discard {
    fn fill(&mut self, _: Body<'_>) -> Result<()> {
        Ok(())
    }
}
