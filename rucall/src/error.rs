use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    InvalidArgument,
    EncodeFailed,
    SendFailed,
    HeaderDecodeFailed,
    PayloadDecodeFailed,
    NotFound,
    DuplicateIdentifier,
    CodecNotFound,
    CodecAlreadyRegistered,
    MethodNotFound,
    ConnectionClosed,
    TcpConnectFailed,
    TcpBindFailed,
    TcpRecvMsgFailed,
    #[serde(untagged)]
    Unknown(String),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub msg: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, msg: String) -> Self {
        Self { kind, msg }
    }

    #[must_use]
    pub fn kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            msg: String::default(),
        }
    }

    /// Returns true if the call never reached a terminal response in time.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::kind(kind)
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(value: std::num::TryFromIntError) -> Self {
        Self {
            kind: ErrorKind::InvalidArgument,
            msg: value.to_string(),
        }
    }
}

// serde_json errors are taken as encode failures; decode paths map theirs
// explicitly because the kind depends on which part failed.
impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self {
            kind: ErrorKind::EncodeFailed,
            msg: value.to_string(),
        }
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(value: rmp_serde::encode::Error) -> Self {
        Self {
            kind: ErrorKind::EncodeFailed,
            msg: value.to_string(),
        }
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(value: rmp_serde::decode::Error) -> Self {
        Self {
            kind: ErrorKind::PayloadDecodeFailed,
            msg: value.to_string(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.msg.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            write!(f, "{:?}: {}", self.kind, self.msg)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        let kind = ErrorKind::Timeout;
        let error: Error = kind.into();
        assert_eq!(error.to_string(), "Timeout");
        assert!(error.is_timeout());

        let error = Error::new(ErrorKind::SendFailed, "channel closed".into());
        assert_eq!(error.to_string(), "SendFailed: channel closed");

        // json objects need string keys.
        let map = std::collections::BTreeMap::from([(vec![1u8], 1)]);
        let error: Error = serde_json::to_vec(&map).unwrap_err().into();
        assert_eq!(error.kind, ErrorKind::EncodeFailed);
    }

    #[test]
    fn test_unknown_kind_from_peer() {
        let error: Error =
            serde_json::from_str(r#"{"kind":"SomethingNew","msg":"from a newer peer"}"#).unwrap();
        assert_eq!(error.kind, ErrorKind::Unknown("SomethingNew".into()));

        let error: Error = serde_json::from_str(r#"{"kind":"MethodNotFound","msg":""}"#).unwrap();
        assert_eq!(error.kind, ErrorKind::MethodNotFound);
    }
}
