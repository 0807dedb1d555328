use std::{collections::HashMap, ops::Range, sync::Arc};

use bytes::{Buf, Bytes, BytesMut};
use foldhash::fast::RandomState;

use crate::{
    MsgMeta, ReplySlot, Request, RequestData, Response,
    error::{Error, ErrorKind, Result},
};

mod frame_codec;
pub use frame_codec::{FrameCodec, PayloadFormat};

/// Decoded header of one inbound unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub meta: MsgMeta,
    /// Total length of the unit, header included.
    pub len: usize,
    /// Payload position within the unit.
    pub payload: Range<usize>,
}

/// Outcome of a header decode attempt on a partially filled buffer.
#[derive(Debug)]
pub enum Decoded {
    /// At least this many more bytes are needed.
    Incomplete(usize),
    Complete(Header),
    /// The unit boundary is known but its header is unreadable. The unit
    /// should be skipped.
    Corrupt { len: usize, error: Error },
}

/// Pluggable wire codec.
///
/// A header decode error (as opposed to [`Decoded::Corrupt`]) means the
/// stream cannot be resynchronised.
pub trait Codec: Send + Sync {
    /// # Errors
    ///
    /// Returns `EncodeFailed` if the request cannot be serialized.
    fn encode_request(&self, request: &Request) -> Result<Bytes>;

    /// # Errors
    ///
    /// Returns `EncodeFailed` if the response cannot be serialized.
    fn encode_response(&self, response: &Response) -> Result<Bytes>;

    /// # Errors
    ///
    /// Returns `HeaderDecodeFailed` if the stream is unrecoverable.
    fn decode_header(&self, buf: &[u8]) -> Result<Decoded>;

    /// Decodes a request body. Used by serving peers.
    ///
    /// # Errors
    ///
    /// Returns `PayloadDecodeFailed` if the body is malformed.
    fn decode_request(&self, header: &Header, unit: &[u8]) -> Result<RequestData>;

    /// Decodes a response body into the caller-supplied slot.
    ///
    /// # Errors
    ///
    /// Returns `PayloadDecodeFailed` if the body is malformed, or the error
    /// result carried by the response.
    fn decode_payload(&self, header: &Header, unit: &[u8], slot: &mut dyn ReplySlot)
    -> Result<()>;
}

/// Splits every complete unit off the front of `buffer` and hands it to
/// `handle`. Corrupt units are logged and skipped.
///
/// Returns the number of units consumed; a partial unit stays in `buffer`.
///
/// # Errors
///
/// Returns the codec's header error if the stream cannot be resynchronised.
pub fn drain_units(
    codec: &dyn Codec,
    buffer: &mut BytesMut,
    mut handle: impl FnMut(Header, Bytes),
) -> Result<usize> {
    let mut units = 0;
    loop {
        match codec.decode_header(buffer)? {
            Decoded::Incomplete(_) => return Ok(units),
            Decoded::Corrupt { len, error } => {
                tracing::error!("skip corrupt unit of {len} bytes: {error}");
                buffer.advance(len);
            }
            Decoded::Complete(header) => {
                let unit = buffer.split_to(header.len).freeze();
                handle(header, unit);
            }
        }
        units += 1;
    }
}

/// Codecs by protocol name.
///
/// Built once at startup, then shared read-only (usually behind an `Arc`)
/// with every client that needs a codec lookup.
#[derive(Default)]
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn Codec>, RandomState>,
}

impl CodecRegistry {
    /// A registry holding the built-in `json` and `msgpack` codecs.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut codecs = HashMap::default();
        for format in [PayloadFormat::Json, PayloadFormat::MessagePack] {
            let codec: Arc<dyn Codec> = Arc::new(FrameCodec::new(format));
            codecs.insert(format.name().to_string(), codec);
        }
        Self { codecs }
    }

    /// Registers a codec under `name`.
    ///
    /// # Errors
    ///
    /// Returns `CodecAlreadyRegistered` if the name is taken; the existing
    /// codec is kept.
    pub fn register(&mut self, name: impl Into<String>, codec: Arc<dyn Codec>) -> Result<()> {
        let name = name.into();
        if self.codecs.contains_key(&name) {
            return Err(Error::new(ErrorKind::CodecAlreadyRegistered, name));
        }
        self.codecs.insert(name, codec);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `CodecNotFound` if nothing is registered under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Codec>> {
        self.codecs
            .get(name)
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::CodecNotFound, name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.codecs.keys()
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("codecs", &self.codecs.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_registry() {
        let mut registry = CodecRegistry::with_defaults();
        let mut names: Vec<_> = registry.names().cloned().collect();
        names.sort();
        assert_eq!(names, ["json", "msgpack"]);

        let err = registry
            .register("json", Arc::new(FrameCodec::new(PayloadFormat::MessagePack)))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::CodecAlreadyRegistered);

        registry
            .register("dubbo", Arc::new(FrameCodec::new(PayloadFormat::Json)))
            .unwrap();
        assert!(registry.get("dubbo").is_ok());
        assert_eq!(
            registry.get("hessian").err().map(|e| e.kind),
            Some(ErrorKind::CodecNotFound)
        );
    }
}
