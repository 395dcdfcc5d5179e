//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Payload by Command Type
//! - GET:    key_len (4 bytes) + key
//! - SET:    key_len (4 bytes) + key + value
//! - DELETE: key_len (4 bytes) + key
//! - PING:   empty
//! - GETM:   count (4 bytes) + (key_len (4 bytes) + key)*
//!
//! ## GETM Response Payload
//! ```text
//! count (4) + (key_len (4) + key + val_len (4) + val)*
//! ```

use std::io::{Read, Write};

use bytes::Bytes;

use crate::error::{ProxyError, Result};
use super::{Command, CommandType, Response, Status};

/// Header size: 1 byte command/status + 4 bytes length
pub const HEADER_SIZE: usize = 5;

/// Maximum payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Set on the command byte when the sender expects no response
pub const NO_REPLY_FLAG: u8 = 0x80;

// =============================================================================
// Field helpers
// =============================================================================

fn put_bytes(buf: &mut Vec<u8>, field: &[u8]) {
    buf.extend_from_slice(&(field.len() as u32).to_be_bytes());
    buf.extend_from_slice(field);
}

fn read_u32(payload: &[u8], offset: usize, what: &str) -> Result<(u32, usize)> {
    if payload.len() < offset + 4 {
        return Err(ProxyError::Protocol(format!("{}: missing length", what)));
    }
    let value = u32::from_be_bytes([
        payload[offset],
        payload[offset + 1],
        payload[offset + 2],
        payload[offset + 3],
    ]);
    Ok((value, offset + 4))
}

/// Read a length-prefixed field, returning it and the offset after it
fn read_field<'a>(payload: &'a [u8], offset: usize, what: &str) -> Result<(&'a [u8], usize)> {
    let (len, start) = read_u32(payload, offset, what)?;
    let end = start + len as usize;
    if payload.len() < end {
        return Err(ProxyError::Protocol(format!(
            "{}: incomplete field (expected {}, got {})",
            what,
            len,
            payload.len() - start
        )));
    }
    Ok((&payload[start..end], end))
}

fn read_key(payload: &[u8], offset: usize, what: &str) -> Result<(String, usize)> {
    let (raw, next) = read_field(payload, offset, what)?;
    let key = std::str::from_utf8(raw)
        .map_err(|_| ProxyError::Protocol(format!("{}: key is not valid UTF-8", what)))?;
    Ok((key.to_string(), next))
}

// =============================================================================
// Command Encoding/Decoding
// =============================================================================

/// Encode a command to bytes
///
/// Format: cmd_type (1) + payload_len (4) + payload
pub fn encode_command(command: &Command) -> Vec<u8> {
    let mut cmd_type = command.command_type() as u8;
    if command.no_reply() {
        cmd_type |= NO_REPLY_FLAG;
    }

    let payload = match command {
        Command::Get { key } | Command::Delete { key } => {
            let mut payload = Vec::with_capacity(4 + key.len());
            put_bytes(&mut payload, key.as_bytes());
            payload
        }
        Command::Set { key, value, .. } => {
            let mut payload = Vec::with_capacity(4 + key.len() + value.len());
            put_bytes(&mut payload, key.as_bytes());
            payload.extend_from_slice(value);
            payload
        }
        Command::GetMulti { keys } => {
            let size = 4 + keys.iter().map(|k| 4 + k.len()).sum::<usize>();
            let mut payload = Vec::with_capacity(size);
            payload.extend_from_slice(&(keys.len() as u32).to_be_bytes());
            for key in keys {
                put_bytes(&mut payload, key.as_bytes());
            }
            payload
        }
        Command::Ping => Vec::new(),
    };

    let mut message = Vec::with_capacity(HEADER_SIZE + payload.len());
    message.push(cmd_type);
    message.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    message.extend_from_slice(&payload);

    message
}

/// Decode a command from bytes
pub fn decode_command(bytes: &[u8]) -> Result<Command> {
    let (first, payload) = split_frame(bytes, "command")?;

    let no_reply = first & NO_REPLY_FLAG != 0;
    let cmd_type = first & !NO_REPLY_FLAG;

    match cmd_type {
        0x01 => {
            let (key, _) = read_key(payload, 0, "GET command")?;
            Ok(Command::Get { key })
        }
        0x02 => {
            let (key, next) = read_key(payload, 0, "SET command")?;
            let value = Bytes::copy_from_slice(&payload[next..]);
            Ok(Command::Set {
                key,
                value,
                no_reply,
            })
        }
        0x03 => {
            let (key, _) = read_key(payload, 0, "DELETE command")?;
            Ok(Command::Delete { key })
        }
        0x04 => {
            if !payload.is_empty() {
                return Err(ProxyError::Protocol(format!(
                    "PING command: unexpected payload of {} bytes",
                    payload.len()
                )));
            }
            Ok(Command::Ping)
        }
        0x05 => {
            let (count, mut offset) = read_u32(payload, 0, "GETM command")?;
            let mut keys = Vec::new();
            for _ in 0..count {
                let (key, next) = read_key(payload, offset, "GETM command")?;
                keys.push(key);
                offset = next;
            }
            Ok(Command::GetMulti { keys })
        }
        _ => Err(ProxyError::Protocol(format!(
            "Unknown command type: 0x{:02x}",
            first
        ))),
    }
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

/// Encode a response to bytes
///
/// Format: status (1) + payload_len (4) + payload
pub fn encode_response(response: &Response) -> Vec<u8> {
    let payload: &[u8] = response.payload.as_deref().unwrap_or(&[]);

    let mut message = Vec::with_capacity(HEADER_SIZE + payload.len());
    message.push(response.status as u8);
    message.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    message.extend_from_slice(payload);

    message
}

/// Decode a response from bytes
pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    let (status_byte, payload) = split_frame(bytes, "response")?;

    let status = match status_byte {
        0x00 => Status::Ok,
        0x01 => Status::NotFound,
        0x02 => Status::Error,
        _ => {
            return Err(ProxyError::Protocol(format!(
                "Unknown response status: 0x{:02x}",
                status_byte
            )))
        }
    };

    let payload = if payload.is_empty() {
        None
    } else {
        Some(Bytes::copy_from_slice(payload))
    };

    Ok(Response { status, payload })
}

/// Split a complete frame into its leading byte and payload
fn split_frame<'a>(bytes: &'a [u8], what: &str) -> Result<(u8, &'a [u8])> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProxyError::Protocol(format!(
            "Incomplete {} header: expected {} bytes, got {}",
            what,
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let payload_len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;

    if payload_len > MAX_PAYLOAD_SIZE as usize {
        return Err(ProxyError::Protocol(format!(
            "{} payload too large: {} bytes (max {})",
            what, payload_len, MAX_PAYLOAD_SIZE
        )));
    }

    let total_len = HEADER_SIZE + payload_len;
    if bytes.len() < total_len {
        return Err(ProxyError::Protocol(format!(
            "Incomplete {} payload: expected {} bytes, got {}",
            what,
            total_len,
            bytes.len()
        )));
    }

    Ok((bytes[0], &bytes[HEADER_SIZE..total_len]))
}

// =============================================================================
// GETM item lists
// =============================================================================

/// Encode a GETM item list
pub fn encode_items<'a, I>(items: I) -> Bytes
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut body = Vec::new();
    let mut count: u32 = 0;
    for (key, value) in items {
        put_bytes(&mut body, key.as_bytes());
        put_bytes(&mut body, value);
        count += 1;
    }

    let mut payload = Vec::with_capacity(4 + body.len());
    payload.extend_from_slice(&count.to_be_bytes());
    payload.extend_from_slice(&body);
    Bytes::from(payload)
}

/// Decode a GETM item list
pub fn decode_items(payload: &[u8]) -> Result<Vec<(String, Bytes)>> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }

    let (count, mut offset) = read_u32(payload, 0, "GETM items")?;
    // Each item carries two length prefixes, so the payload bounds the count
    let mut items = Vec::with_capacity((count as usize).min(payload.len() / 8));
    for _ in 0..count {
        let (key, next) = read_key(payload, offset, "GETM items")?;
        let (value, next) = read_field(payload, next, "GETM items")?;
        items.push((key, Bytes::copy_from_slice(value)));
        offset = next;
    }

    if offset != payload.len() {
        return Err(ProxyError::Protocol(format!(
            "GETM items: {} trailing bytes",
            payload.len() - offset
        )));
    }
    Ok(items)
}

// =============================================================================
// Response validation
// =============================================================================

/// Check a backend response against what the request allows
///
/// An ERROR status is always rejected. Returns the response unchanged when
/// it is acceptable.
pub fn validate(command: &Command, response: Response) -> Result<Response> {
    let allowed = match (command.command_type(), response.status) {
        (_, Status::Error) => false,
        (CommandType::Get, _) => true,
        (CommandType::GetMulti, Status::Ok) => {
            decode_items(response.payload.as_deref().unwrap_or(&[]))?;
            true
        }
        (CommandType::GetMulti, _) => false,
        (CommandType::Set, _) | (CommandType::Delete, _) => true,
        (CommandType::Ping, status) => status == Status::Ok,
    };

    if allowed {
        Ok(response)
    } else {
        Err(ProxyError::UnexpectedResponse(format!(
            "{:?} answered {:?} {}",
            command.command_type(),
            response.status,
            response.message()
        )))
    }
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read one frame (header + payload) from a stream
fn read_frame<R: Read>(reader: &mut R, what: &str) -> Result<Vec<u8>> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let payload_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;

    if payload_len > MAX_PAYLOAD_SIZE as usize {
        return Err(ProxyError::Protocol(format!(
            "{} payload too large: {} bytes (max {})",
            what, payload_len, MAX_PAYLOAD_SIZE
        )));
    }

    let mut frame = vec![0u8; HEADER_SIZE + payload_len];
    frame[..HEADER_SIZE].copy_from_slice(&header);
    if payload_len > 0 {
        reader.read_exact(&mut frame[HEADER_SIZE..])?;
    }
    Ok(frame)
}

/// Read a complete command from a stream
///
/// Blocks until a complete command is received or an error occurs
pub fn read_command<R: Read>(reader: &mut R) -> Result<Command> {
    let frame = read_frame(reader, "command")?;
    decode_command(&frame)
}

/// Write a command to a stream
pub fn write_command<W: Write>(writer: &mut W, command: &Command) -> Result<()> {
    let bytes = encode_command(command);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read a complete response from a stream
pub fn read_response<R: Read>(reader: &mut R) -> Result<Response> {
    let frame = read_frame(reader, "response")?;
    decode_response(&frame)
}

/// Write a response to a stream
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    let bytes = encode_response(response);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}
