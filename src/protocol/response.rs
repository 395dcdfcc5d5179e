//! Response definitions
//!
//! Represents responses from backends and to proxy clients.

use bytes::Bytes;

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    NotFound = 0x01,
    Error = 0x02,
}

/// A response frame
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Status code
    pub status: Status,

    /// Optional payload (value for GET, item list for GETM, message for ERROR)
    pub payload: Option<Bytes>,
}

impl Response {
    /// Create an OK response with optional payload
    pub fn ok(payload: Option<Bytes>) -> Self {
        Self {
            status: Status::Ok,
            payload,
        }
    }

    /// Create a NOT_FOUND response
    pub fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            payload: None,
        }
    }

    /// Create an ERROR response
    pub fn error(message: &str) -> Self {
        Self {
            status: Status::Error,
            payload: Some(Bytes::copy_from_slice(message.as_bytes())),
        }
    }

    /// Create an OK response carrying a GETM item list
    pub fn items<'a, I>(items: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        Self::ok(Some(super::encode_items(items)))
    }

    /// The payload interpreted as an error message
    pub fn message(&self) -> String {
        self.payload
            .as_ref()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .unwrap_or_default()
    }
}
