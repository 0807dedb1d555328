use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;

use super::{Codec, Decoded, Header};
use crate::{
    Body, MsgFlags, MsgMeta, ReplySlot, Request, RequestData, Response,
    error::{Error, ErrorKind, Result},
};

const MAGIC_NUM: u32 = u32::from_be_bytes(*b"RUA!");
const MAX_MSG_SIZE: usize = 64 << 20;
const U32_SIZE: usize = std::mem::size_of::<u32>();
/// magic + body length.
const PREFIX_SIZE: usize = 2 * U32_SIZE;
/// prefix + meta length.
const HEADER_SIZE: usize = 3 * U32_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Json,
    MessagePack,
}

impl PayloadFormat {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            PayloadFormat::Json => "json",
            PayloadFormat::MessagePack => "msgpack",
        }
    }
}

/// Length-prefixed frame codec.
///
/// ```text
/// | 4 bytes | 4 bytes  | 4 bytes  | N bytes | M bytes |
/// | "RUA!"  | body_len | meta_len | meta    | payload |
/// ```
///
/// `body_len` counts everything after the first 8 bytes. The meta is JSON
/// or MessagePack (detected on decode by a leading `{`); the payload format
/// follows the `UseMessagePack` flag of the meta.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    format: PayloadFormat,
}

impl FrameCodec {
    #[must_use]
    pub fn new(format: PayloadFormat) -> Self {
        Self { format }
    }

    fn write<P: Serialize>(&self, buf: &mut BytesMut, value: &P) -> Result<()> {
        let mut writer = (&mut *buf).writer();
        match self.format {
            PayloadFormat::Json => serde_json::to_writer(&mut writer, value)?,
            PayloadFormat::MessagePack => rmp_serde::encode::write_named(&mut writer, value)?,
        }
        Ok(())
    }

    fn encode<P: Serialize>(&self, meta: &MsgMeta, payload: Option<&P>) -> Result<Bytes> {
        let mut meta = meta.clone();
        meta.flags.set(
            MsgFlags::UseMessagePack,
            self.format == PayloadFormat::MessagePack,
        );

        let mut buf = BytesMut::with_capacity(512);
        buf.put_u32(MAGIC_NUM);
        // reserve for body len and meta len.
        buf.put_u32(0);
        buf.put_u32(0);
        self.write(&mut buf, &meta)?;
        let payload_offset = buf.len();
        if let Some(payload) = payload {
            self.write(&mut buf, payload)?;
        }

        if buf.len() >= MAX_MSG_SIZE {
            return Err(Error::new(
                ErrorKind::EncodeFailed,
                format!("msg is too long: {}", buf.len()),
            ));
        }
        let body_len = u32::try_from(buf.len() - PREFIX_SIZE)?;
        let meta_len = u32::try_from(payload_offset - HEADER_SIZE)?;
        buf[U32_SIZE..PREFIX_SIZE].copy_from_slice(&body_len.to_be_bytes());
        buf[PREFIX_SIZE..HEADER_SIZE].copy_from_slice(&meta_len.to_be_bytes());
        Ok(buf.freeze())
    }

    fn body<'a>(header: &Header, unit: &'a [u8]) -> Result<Body<'a>> {
        let Some(payload) = unit.get(header.payload.clone()) else {
            return Err(Error::new(
                ErrorKind::PayloadDecodeFailed,
                format!(
                    "payload {:?} out of unit length {}",
                    header.payload,
                    unit.len()
                ),
            ));
        };
        if header.meta.flags.contains(MsgFlags::UseMessagePack) {
            Ok(Body::MessagePack(payload))
        } else {
            Ok(Body::Json(payload))
        }
    }

    fn parse_meta(bytes: &[u8]) -> Result<MsgMeta> {
        let result = if bytes.first() == Some(&b'{') {
            serde_json::from_slice(bytes).map_err(|e| e.to_string())
        } else {
            rmp_serde::from_slice(bytes).map_err(|e| e.to_string())
        };
        result.map_err(|msg| Error::new(ErrorKind::HeaderDecodeFailed, msg))
    }
}

impl Codec for FrameCodec {
    fn encode_request(&self, request: &Request) -> Result<Bytes> {
        match &request.data {
            RequestData::Invocation(invocation) => self.encode(&request.meta, Some(invocation)),
            RequestData::Event => self.encode::<()>(&request.meta, None),
        }
    }

    fn encode_response(&self, response: &Response) -> Result<Bytes> {
        self.encode(&response.meta, Some(&response.result))
    }

    fn decode_header(&self, buf: &[u8]) -> Result<Decoded> {
        if buf.len() < PREFIX_SIZE {
            return Ok(Decoded::Incomplete(PREFIX_SIZE - buf.len()));
        }

        let mut cursor = buf;
        let magic_num = cursor.get_u32();
        if magic_num != MAGIC_NUM {
            return Err(Error::new(
                ErrorKind::HeaderDecodeFailed,
                format!("invalid magic num: {magic_num:08X}"),
            ));
        }

        let len = PREFIX_SIZE + usize::try_from(cursor.get_u32())?;
        if len >= MAX_MSG_SIZE {
            return Err(Error::new(
                ErrorKind::HeaderDecodeFailed,
                format!("msg is too long: {len}"),
            ));
        }
        if buf.len() < len {
            return Ok(Decoded::Incomplete(len - buf.len()));
        }

        let corrupt = |msg: String| Decoded::Corrupt {
            len,
            error: Error::new(ErrorKind::HeaderDecodeFailed, msg),
        };
        if len < HEADER_SIZE {
            return Ok(corrupt(format!("msg is too short: {len}")));
        }
        let meta_len = usize::try_from(cursor.get_u32())?;
        let meta_end = HEADER_SIZE + meta_len;
        if meta_len == 0 || meta_end > len {
            return Ok(corrupt(format!(
                "invalid meta length: {meta_len}, msg length: {len}"
            )));
        }

        match Self::parse_meta(&buf[HEADER_SIZE..meta_end]) {
            Ok(meta) => Ok(Decoded::Complete(Header {
                meta,
                len,
                payload: meta_end..len,
            })),
            Err(error) => Ok(Decoded::Corrupt { len, error }),
        }
    }

    fn decode_request(&self, header: &Header, unit: &[u8]) -> Result<RequestData> {
        if header.meta.is_event() {
            return Ok(RequestData::Event);
        }
        Self::body(header, unit)?
            .deserialize()
            .map(RequestData::Invocation)
    }

    fn decode_payload(
        &self,
        header: &Header,
        unit: &[u8],
        slot: &mut dyn ReplySlot,
    ) -> Result<()> {
        slot.fill(Self::body(header, unit)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{INTERFACE_KEY, Invocation, Reply};

    fn complete(codec: &FrameCodec, bytes: &[u8]) -> Header {
        match codec.decode_header(bytes).unwrap() {
            Decoded::Complete(header) => header,
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn test_attachments_survive_codec() {
        for format in [PayloadFormat::Json, PayloadFormat::MessagePack] {
            let codec = FrameCodec::new(format);
            let invocation = Invocation::new("GetUser", vec!["1".into(), "username".into()])
                .with_attachment(INTERFACE_KEY, "X");
            let request = Request::new("2.0.2", invocation.clone());

            let bytes = codec.encode_request(&request).unwrap();
            let header = complete(&codec, &bytes);
            assert_eq!(header.meta.id, request.id());
            assert_eq!(header.len, bytes.len());

            let RequestData::Invocation(decoded) = codec.decode_request(&header, &bytes).unwrap()
            else {
                panic!("expected invocation");
            };
            assert_eq!(decoded, invocation);
            assert_eq!(decoded.interface(), Some("X"));
        }
    }

    #[test]
    fn test_decode_header_incomplete() {
        let codec = FrameCodec::new(PayloadFormat::Json);
        let bytes = codec.encode_request(&Request::heartbeat("2.0.2")).unwrap();

        assert!(matches!(
            codec.decode_header(&bytes[..3]).unwrap(),
            Decoded::Incomplete(5)
        ));
        let cut = bytes.len() - 1;
        assert!(matches!(
            codec.decode_header(&bytes[..cut]).unwrap(),
            Decoded::Incomplete(1)
        ));

        let header = complete(&codec, &bytes);
        assert!(header.meta.is_event());
        assert!(header.payload.is_empty());
    }

    #[test]
    fn test_decode_header_invalid() {
        let codec = FrameCodec::new(PayloadFormat::Json);
        let err = codec.decode_header(b"HTTP/1.1 200 OK").unwrap_err();
        assert_eq!(err.kind, ErrorKind::HeaderDecodeFailed);

        // valid framing, garbage meta.
        let mut bytes = BytesMut::new();
        bytes.put_u32(MAGIC_NUM);
        bytes.put_u32(7);
        bytes.put_u32(3);
        bytes.put_slice(b"{x}");
        match codec.decode_header(&bytes).unwrap() {
            Decoded::Corrupt { len, error } => {
                assert_eq!(len, bytes.len());
                assert_eq!(error.kind, ErrorKind::HeaderDecodeFailed);
            }
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn test_decode_response_payload() {
        let codec = FrameCodec::new(PayloadFormat::MessagePack);
        let request = Request::new("2.0.2", Invocation::new("GetUser6", vec![1.into()]));
        let response = Response::new(&request.meta, Ok(serde_json::json!(["1", "username"])));

        let bytes = codec.encode_response(&response).unwrap();
        let header = complete(&codec, &bytes);
        assert!(header.meta.is_rsp());
        assert!(header.meta.flags.contains(MsgFlags::UseMessagePack));

        let reply = Reply::<(String, String)>::new();
        codec
            .decode_payload(&header, &bytes, &mut reply.clone())
            .unwrap();
        assert_eq!(reply.take(), Some(("1".into(), "username".into())));
    }
}
