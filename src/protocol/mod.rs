//! Protocol Module
//!
//! Defines the wire protocol spoken both to backend nodes and by the proxy
//! front end.
//!
//! ## Protocol Format (Simple Binary)
//!
//! ### Request Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Cmd (1)  │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Commands
//! - 0x01: GET   - Payload: key
//! - 0x02: SET   - Payload: key_len (4) + key + value
//! - 0x03: DEL   - Payload: key
//! - 0x04: PING  - Payload: empty
//! - 0x05: GETM  - Payload: count (4) + (key_len (4) + key)*
//!
//! The high bit of the command byte (0x80) marks a no-reply request.
//!
//! ### Response Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │Status(1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Status Codes
//! - 0x00: OK
//! - 0x01: NOT_FOUND
//! - 0x02: ERROR

mod command;
mod response;
mod codec;

pub use command::{Command, CommandType};
pub use response::{Response, Status};
pub use codec::{
    decode_command, decode_items, decode_response, encode_command, encode_items,
    encode_response, read_command, read_response, validate, write_command, write_response,
    HEADER_SIZE, MAX_PAYLOAD_SIZE, NO_REPLY_FLAG,
};
