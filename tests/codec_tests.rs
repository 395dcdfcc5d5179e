//! Codec Tests
//!
//! Wire format, GETM item lists and backend response validation.

use std::io::Cursor;

use bytes::Bytes;
use quorumkv::protocol::{
    decode_command, decode_items, decode_response, encode_command, encode_items,
    encode_response, read_command, read_response, validate, write_command, write_response,
    Command, Response, Status, NO_REPLY_FLAG,
};
use quorumkv::ProxyError;

// =============================================================================
// Wire Format Tests
// =============================================================================

#[test]
fn test_wire_format_get() {
    let cmd = Command::Get {
        key: "test".to_string(),
    };
    let encoded = encode_command(&cmd);

    // [0x01][payload_len = 8][key_len = 4][t e s t]
    assert_eq!(encoded[0], 0x01);
    assert_eq!(&encoded[1..5], &[0x00, 0x00, 0x00, 0x08]);
    assert_eq!(&encoded[5..9], &[0x00, 0x00, 0x00, 0x04]);
    assert_eq!(&encoded[9..13], b"test");
}

#[test]
fn test_wire_format_getm() {
    let cmd = Command::GetMulti {
        keys: vec!["a".to_string(), "bc".to_string()],
    };
    let encoded = encode_command(&cmd);

    assert_eq!(encoded[0], 0x05);
    // count(4) + (4 + 1) + (4 + 2)
    assert_eq!(&encoded[1..5], &[0x00, 0x00, 0x00, 15]);
    assert_eq!(&encoded[5..9], &[0x00, 0x00, 0x00, 0x02]);
    assert_eq!(decode_command(&encoded).unwrap(), cmd);
}

#[test]
fn test_wire_format_response_ok() {
    let resp = Response::ok(Some(Bytes::from_static(b"hi")));
    let encoded = encode_response(&resp);

    assert_eq!(encoded[0], 0x00);
    assert_eq!(&encoded[1..5], &[0x00, 0x00, 0x00, 0x02]);
    assert_eq!(&encoded[5..7], b"hi");
}

#[test]
fn test_no_reply_flag_only_on_set() {
    let quiet = Command::Set {
        key: "k".to_string(),
        value: Bytes::from_static(b"v"),
        no_reply: true,
    };
    let encoded = encode_command(&quiet);
    assert_eq!(encoded[0], 0x02 | NO_REPLY_FLAG);
    assert!(decode_command(&encoded).unwrap().no_reply());

    let loud = Command::Set {
        key: "k".to_string(),
        value: Bytes::from_static(b"v"),
        no_reply: false,
    };
    assert_eq!(encode_command(&loud)[0], 0x02);
    assert!(!Command::Ping.no_reply());
}

#[test]
fn test_set_value_may_contain_anything() {
    let value: Vec<u8> = (0..=255).collect();
    let cmd = Command::Set {
        key: "binary".to_string(),
        value: Bytes::from(value.clone()),
        no_reply: false,
    };

    match decode_command(&encode_command(&cmd)).unwrap() {
        Command::Set { key, value: decoded, .. } => {
            assert_eq!(key, "binary");
            assert_eq!(&decoded[..], &value[..]);
        }
        other => panic!("Expected SET command, got {:?}", other),
    }
}

#[test]
fn test_empty_response_payload_decodes_as_none() {
    let decoded = decode_response(&encode_response(&Response::ok(None))).unwrap();
    assert_eq!(decoded.status, Status::Ok);
    assert_eq!(decoded.payload, None);
}

// =============================================================================
// GETM Item Lists
// =============================================================================

#[test]
fn test_items_layout() {
    let payload = encode_items(vec![("k", &b"vv"[..])]);
    assert_eq!(
        &payload[..],
        &[0, 0, 0, 1, 0, 0, 0, 1, b'k', 0, 0, 0, 2, b'v', b'v']
    );

    let items = decode_items(&payload).unwrap();
    assert_eq!(items, vec![("k".to_string(), Bytes::from_static(b"vv"))]);
}

#[test]
fn test_empty_items_payload_means_no_items() {
    assert!(decode_items(&[]).unwrap().is_empty());
    assert!(decode_items(&encode_items(Vec::<(&str, &[u8])>::new())).unwrap().is_empty());
}

#[test]
fn test_items_trailing_bytes_rejected() {
    let mut payload = encode_items(vec![("k", &b"v"[..])]).to_vec();
    payload.push(0xAA);
    assert!(decode_items(&payload).is_err());
}

#[test]
fn test_items_count_larger_than_payload_rejected() {
    assert!(matches!(
        decode_items(&[0xFF, 0xFF, 0xFF, 0xFF]),
        Err(ProxyError::Protocol(_))
    ));

    let mut payload = encode_items(vec![("k", &b"v"[..])]).to_vec();
    payload[..4].copy_from_slice(&u32::MAX.to_be_bytes());
    assert!(decode_items(&payload).is_err());

    let forged = Response::ok(Some(Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF])));
    let getm = Command::GetMulti { keys: vec!["k".to_string()] };
    assert!(validate(&getm, forged).is_err());
}

#[test]
fn test_items_truncated_rejected() {
    let payload = encode_items(vec![("key", &b"value"[..])]);
    assert!(decode_items(&payload[..payload.len() - 2]).is_err());
}

// =============================================================================
// Validation
// =============================================================================

fn get() -> Command {
    Command::Get {
        key: "k".to_string(),
    }
}

fn set() -> Command {
    Command::Set {
        key: "k".to_string(),
        value: Bytes::from_static(b"v"),
        no_reply: false,
    }
}

#[test]
fn test_error_status_is_always_rejected() {
    for cmd in [get(), set(), Command::Ping, Command::Delete { key: "k".to_string() }] {
        let result = validate(&cmd, Response::error("boom"));
        assert!(matches!(result, Err(ProxyError::UnexpectedResponse(_))));
    }
}

#[test]
fn test_get_accepts_found_and_not_found() {
    assert!(validate(&get(), Response::ok(Some(Bytes::from_static(b"v")))).is_ok());
    assert!(validate(&get(), Response::not_found()).is_ok());
}

#[test]
fn test_set_and_delete_accept_not_found() {
    assert!(validate(&set(), Response::not_found()).is_ok());
    assert!(validate(&Command::Delete { key: "k".to_string() }, Response::not_found()).is_ok());
}

#[test]
fn test_ping_requires_ok() {
    assert!(validate(&Command::Ping, Response::ok(None)).is_ok());
    assert!(validate(&Command::Ping, Response::not_found()).is_err());
}

#[test]
fn test_getm_requires_decodable_ok() {
    let getm = Command::GetMulti {
        keys: vec!["a".to_string()],
    };
    assert!(validate(&getm, Response::items(vec![("a", &b"1"[..])])).is_ok());
    assert!(validate(&getm, Response::not_found()).is_err());
    assert!(validate(&getm, Response::ok(Some(Bytes::from_static(b"\x00\x00\x00\x05")))).is_err());
}

// =============================================================================
// Error Handling Tests
// =============================================================================

#[test]
fn test_incomplete_header() {
    let result = decode_command(&[0x01, 0x00, 0x00]);
    assert!(result.unwrap_err().to_string().contains("Incomplete command header"));
}

#[test]
fn test_unknown_command_type() {
    let result = decode_command(&[0x7F, 0x00, 0x00, 0x00, 0x00]);
    assert!(result.unwrap_err().to_string().contains("Unknown command type"));
}

#[test]
fn test_unknown_response_status() {
    let result = decode_response(&[0xFF, 0x00, 0x00, 0x00, 0x00]);
    assert!(result.unwrap_err().to_string().contains("Unknown response status"));
}

#[test]
fn test_ping_with_unexpected_payload() {
    let bytes = [0x04, 0x00, 0x00, 0x00, 0x02, 0x68, 0x69];
    let result = decode_command(&bytes);
    assert!(result.unwrap_err().to_string().contains("unexpected payload"));
}

#[test]
fn test_non_utf8_key_rejected() {
    let bytes = [0x01, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00, 0x01, 0xFF];
    assert!(decode_command(&bytes).is_err());
}

#[test]
fn test_oversized_frame_rejected_before_reading_payload() {
    let bytes = [0x00, 0xFF, 0xFF, 0xFF, 0xFF];
    let mut cursor = Cursor::new(bytes.to_vec());
    assert!(read_response(&mut cursor).unwrap_err().to_string().contains("too large"));
}

// =============================================================================
// Stream I/O Tests
// =============================================================================

#[test]
fn test_stream_multiple_commands() {
    let commands = vec![
        Command::Ping,
        set(),
        get(),
        Command::GetMulti {
            keys: vec!["a".to_string(), "b".to_string()],
        },
        Command::Delete { key: "k".to_string() },
    ];

    let mut buffer = Vec::new();
    for cmd in &commands {
        write_command(&mut buffer, cmd).unwrap();
    }

    let mut cursor = Cursor::new(buffer);
    for expected in &commands {
        assert_eq!(&read_command(&mut cursor).unwrap(), expected);
    }
}

#[test]
fn test_stream_multiple_responses() {
    let responses = vec![
        Response::ok(Some(Bytes::from_static(b"data"))),
        Response::not_found(),
        Response::error("oops"),
        Response::ok(None),
    ];

    let mut buffer = Vec::new();
    for resp in &responses {
        write_response(&mut buffer, resp).unwrap();
    }

    let mut cursor = Cursor::new(buffer);
    for expected in &responses {
        assert_eq!(&read_response(&mut cursor).unwrap(), expected);
    }
}

#[test]
fn test_command_key() {
    assert_eq!(get().key(), Some("k"));
    assert_eq!(
        Command::GetMulti {
            keys: vec!["first".to_string(), "second".to_string()]
        }
        .key(),
        Some("first")
    );
    assert_eq!(Command::GetMulti { keys: Vec::new() }.key(), None);
    assert_eq!(Command::Ping.key(), None);
}
