use std::collections::HashMap;

use foldhash::fast::RandomState;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{Error, ErrorKind, Result};

/// Attachment key naming the target service interface.
pub const INTERFACE_KEY: &str = "interface";

/// A logical remote call: method name, positional arguments and string
/// metadata attachments.
///
/// Arguments are kept as opaque serde values so any codec can carry them.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct Invocation {
    method_name: String,
    arguments: Vec<serde_json::Value>,
    #[serde(default)]
    attachments: HashMap<String, String, RandomState>,
}

impl Invocation {
    #[must_use]
    pub fn new(method_name: impl Into<String>, arguments: Vec<serde_json::Value>) -> Self {
        Self {
            method_name: method_name.into(),
            arguments,
            attachments: HashMap::default(),
        }
    }

    /// Appends one argument, serializing it into an opaque value.
    ///
    /// # Errors
    ///
    /// Returns `EncodeFailed` if the argument cannot be represented.
    pub fn with_argument<A: Serialize>(mut self, argument: &A) -> Result<Self> {
        self.arguments.push(serde_json::to_value(argument)?);
        Ok(self)
    }

    #[must_use]
    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attachment(key, value);
        self
    }

    /// Sets an attachment. A later set of the same key wins.
    pub fn set_attachment(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attachments.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    #[must_use]
    pub fn arguments(&self) -> &[serde_json::Value] {
        &self.arguments
    }

    /// Decodes the argument at `index`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the argument is missing or has another
    /// shape than `A`.
    pub fn argument<A: DeserializeOwned>(&self, index: usize) -> Result<A> {
        let value = self.arguments.get(index).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidArgument,
                format!("{} has no argument {index}", self.method_name),
            )
        })?;
        A::deserialize(value).map_err(|e| {
            Error::new(
                ErrorKind::InvalidArgument,
                format!("argument {index} of {}: {e}", self.method_name),
            )
        })
    }

    #[must_use]
    pub fn attachments(&self) -> &HashMap<String, String, RandomState> {
        &self.attachments
    }

    #[must_use]
    pub fn attachment(&self, key: &str) -> Option<&str> {
        self.attachments.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn attachment_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.attachment(key).unwrap_or(default)
    }

    /// The `interface` attachment, if the caller set one.
    #[must_use]
    pub fn interface(&self) -> Option<&str> {
        self.attachment(INTERFACE_KEY)
    }
}
