use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{Error, Invocation};

/// Envelope flags.
///
/// - `IsReq` / `IsRsp`: direction of the envelope
/// - `TwoWay`: the sender expects a response
/// - `Event`: protocol-internal control message such as a heartbeat
/// - `UseMessagePack`: payload is MessagePack instead of JSON
#[derive(Deserialize, Serialize, Debug, Default, PartialEq, Eq, Clone, Copy)]
#[repr(transparent)]
#[serde(transparent)]
pub struct MsgFlags(u8);

bitflags! {
    impl MsgFlags: u8 {
        /// Envelope is a request.
        const IsReq = 1;
        /// Envelope is a response.
        const IsRsp = 2;
        /// Caller waits for a response.
        const TwoWay = 4;
        /// Protocol-internal control message.
        const Event = 8;
        /// Use MessagePack serialization format.
        const UseMessagePack = 16;
    }
}

/// Envelope header carried in front of every payload.
#[derive(Deserialize, Serialize, Debug, Default, PartialEq, Eq, Clone)]
pub struct MsgMeta {
    /// Correlation identifier. A response carries the id of its request.
    pub id: u64,
    /// Protocol version string.
    pub version: String,
    pub flags: MsgFlags,
}

impl MsgMeta {
    #[must_use]
    pub fn is_req(&self) -> bool {
        self.flags.contains(MsgFlags::IsReq)
    }

    #[must_use]
    pub fn is_rsp(&self) -> bool {
        self.flags.contains(MsgFlags::IsRsp)
    }

    #[must_use]
    pub fn is_two_way(&self) -> bool {
        self.flags.contains(MsgFlags::TwoWay)
    }

    #[must_use]
    pub fn is_event(&self) -> bool {
        self.flags.contains(MsgFlags::Event)
    }

    /// Builds the header of the response answering this request.
    #[must_use]
    pub fn response_meta(&self) -> MsgMeta {
        let mut flags = self.flags & (MsgFlags::Event | MsgFlags::UseMessagePack);
        flags |= MsgFlags::IsRsp;
        MsgMeta {
            id: self.id,
            version: self.version.clone(),
            flags,
        }
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-unique, monotonically increasing request id.
pub fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Body of a request envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestData {
    Invocation(Invocation),
    /// Heartbeat; carries no payload.
    Event,
}

/// Request envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub meta: MsgMeta,
    pub data: RequestData,
}

impl Request {
    /// Creates a two-way request for `invocation` with a fresh id.
    #[must_use]
    pub fn new(version: impl Into<String>, invocation: Invocation) -> Self {
        Self {
            meta: MsgMeta {
                id: next_id(),
                version: version.into(),
                flags: MsgFlags::IsReq | MsgFlags::TwoWay,
            },
            data: RequestData::Invocation(invocation),
        }
    }

    /// Creates a fire-and-forget request.
    #[must_use]
    pub fn oneway(version: impl Into<String>, invocation: Invocation) -> Self {
        let mut request = Self::new(version, invocation);
        request.meta.flags.remove(MsgFlags::TwoWay);
        request
    }

    /// Creates a two-way heartbeat event. The peer answers it like any
    /// two-way request.
    #[must_use]
    pub fn heartbeat(version: impl Into<String>) -> Self {
        Self {
            meta: MsgMeta {
                id: next_id(),
                version: version.into(),
                flags: MsgFlags::IsReq | MsgFlags::TwoWay | MsgFlags::Event,
            },
            data: RequestData::Event,
        }
    }

    /// Replaces the generated id, e.g. to replay a known exchange.
    ///
    /// # Examples
    ///
    /// ```
    /// # use rucall::{Invocation, Request};
    /// let request = Request::new("2.0.2", Invocation::new("GetUser", vec![])).with_id(7);
    /// assert_eq!(request.id(), 7);
    /// assert!(request.is_two_way());
    /// ```
    #[must_use]
    pub fn with_id(mut self, id: u64) -> Self {
        self.meta.id = id;
        self
    }

    /// Correlation id of the request.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.meta.id
    }

    /// Whether the caller expects a response.
    #[must_use]
    pub fn is_two_way(&self) -> bool {
        self.meta.is_two_way()
    }

    /// The invocation carried, or `None` for an event.
    #[must_use]
    pub fn invocation(&self) -> Option<&Invocation> {
        match &self.data {
            RequestData::Invocation(invocation) => Some(invocation),
            RequestData::Event => None,
        }
    }
}

/// Response envelope as produced by a serving peer.
///
/// Clients never materialise this type: the dispatcher decodes the result
/// straight into the caller's reply holder.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub meta: MsgMeta,
    pub result: std::result::Result<serde_json::Value, Error>,
}

impl Response {
    #[must_use]
    pub fn new(request: &MsgMeta, result: std::result::Result<serde_json::Value, Error>) -> Self {
        Self {
            meta: request.response_meta(),
            result,
        }
    }

    /// Correlation id of the request.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.meta.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_flags() {
        let invocation = Invocation::new("GetUser", vec![]);
        let request = Request::new("2.0.2", invocation.clone());
        assert!(request.meta.is_req());
        assert!(request.is_two_way());
        assert!(!request.meta.is_event());

        let oneway = Request::oneway("2.0.2", invocation);
        assert!(!oneway.is_two_way());
        assert!(oneway.id() > request.id());

        let heartbeat = Request::heartbeat("2.0.2");
        assert!(heartbeat.meta.is_event());
        assert!(heartbeat.invocation().is_none());
    }

    #[test]
    fn test_response_meta() {
        let mut request = Request::heartbeat("2.0.2").with_id(42).meta;
        request.flags |= MsgFlags::UseMessagePack;

        let meta = request.response_meta();
        assert_eq!(meta.id, 42);
        assert!(meta.is_rsp());
        assert!(meta.is_event());
        assert!(!meta.is_req());
        assert!(!meta.is_two_way());
        assert!(meta.flags.contains(MsgFlags::UseMessagePack));
    }
}
