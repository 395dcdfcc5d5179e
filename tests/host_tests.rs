//! HostConnection Tests

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::{dead_addr, test_config, MockBackend, Mode};
use quorumkv::protocol::Command;
use quorumkv::{HostConnection, ProxyError};

const TIMEOUT: Duration = Duration::from_millis(500);

#[test]
fn test_keyed_operations() {
    let backend = MockBackend::start();
    let host = HostConnection::new(backend.addr(), &test_config());

    assert_eq!(host.get("k", TIMEOUT).unwrap(), None);
    assert!(host.set("k", Bytes::from_static(b"v"), false, TIMEOUT).unwrap());
    assert_eq!(host.get("k", TIMEOUT).unwrap(), Some(Bytes::from_static(b"v")));

    let items = host
        .get_multi(&["k".to_string(), "missing".to_string()], TIMEOUT)
        .unwrap();
    assert_eq!(items, vec![("k".to_string(), Bytes::from_static(b"v"))]);

    assert!(host.delete("k", TIMEOUT).unwrap());
    assert!(!host.delete("k", TIMEOUT).unwrap());
}

#[test]
fn test_connections_are_reused() {
    let backend = MockBackend::start();
    let host = HostConnection::new(backend.addr(), &test_config());

    assert_eq!(host.idle_count(), 0);
    for _ in 0..5 {
        host.get("k", TIMEOUT).unwrap();
    }
    assert_eq!(host.idle_count(), 1);
    assert_eq!(backend.gets(), 5);
}

#[test]
fn test_not_stored_is_reported_as_false() {
    let backend = MockBackend::start();
    backend.set_mode(Mode::RejectWrites);
    let host = HostConnection::new(backend.addr(), &test_config());

    assert!(!host.set("k", Bytes::from_static(b"v"), false, TIMEOUT).unwrap());
}

#[test]
fn test_error_status_is_a_hard_error() {
    let backend = MockBackend::start();
    backend.set_mode(Mode::Error);
    let host = HostConnection::new(backend.addr(), &test_config());

    let err = host.get("k", TIMEOUT).unwrap_err();
    assert!(matches!(err, ProxyError::UnexpectedResponse(_)));
    assert!(!err.is_retryable());
    assert!(!host.check_liveness());
}

#[test]
fn test_timed_out_connection_is_not_reused() {
    let backend = MockBackend::start();
    let host = HostConnection::new(backend.addr(), &test_config());
    backend.set_mode(Mode::Delay(Duration::from_millis(300)));

    let err = host.get("k", Duration::from_millis(50)).unwrap_err();
    assert!(matches!(err, ProxyError::Timeout { .. }));
    assert_eq!(host.idle_count(), 0);

    // A fresh connection is dialed; the late answer on the old one is never read
    backend.set_mode(Mode::Normal);
    backend.insert("k", b"fresh");
    assert_eq!(host.get("k", TIMEOUT).unwrap(), Some(Bytes::from_static(b"fresh")));
}

#[test]
fn test_failed_dial_opens_silence_window() {
    let host = HostConnection::new(dead_addr(), &test_config());

    let first = host.get("k", TIMEOUT).unwrap_err();
    assert!(matches!(first, ProxyError::Io(_)));
    assert!(host.silenced_for().is_some());

    let second = host.get("k", TIMEOUT).unwrap_err();
    assert!(matches!(second, ProxyError::SilenceWindow { .. }));
    assert!(second.is_retryable());
}

#[test]
fn test_silence_window_expires() {
    let config = quorumkv::Config::builder().dial_fail_silence_ms(50).build();
    let host = HostConnection::new(dead_addr(), &config);

    assert!(host.get("k", TIMEOUT).is_err());
    std::thread::sleep(Duration::from_millis(80));
    assert!(host.silenced_for().is_none());
    // Dialing again (and failing again) rather than failing fast
    assert!(matches!(host.get("k", TIMEOUT), Err(ProxyError::Io(_))));
}

#[test]
fn test_liveness_uses_ping() {
    let backend = MockBackend::start();
    let host = HostConnection::new(backend.addr(), &test_config());

    assert!(host.check_liveness());
    assert_eq!(backend.pings(), 1);
}

#[test]
fn test_no_reply_set_returns_without_reading() {
    let backend = MockBackend::start();
    let host = HostConnection::new(backend.addr(), &test_config());

    assert!(host.set("quiet", Bytes::from_static(b"v"), true, TIMEOUT).unwrap());
    // The connection stays in sync for the next exchange
    assert_eq!(host.get("quiet", TIMEOUT).unwrap(), Some(Bytes::from_static(b"v")));
}

#[test]
fn test_closed_host_refuses_work() {
    let backend = MockBackend::start();
    let host = HostConnection::new(backend.addr(), &test_config());
    host.get("k", TIMEOUT).unwrap();

    host.close();
    assert!(host.is_closed());
    assert_eq!(host.idle_count(), 0);
    assert!(matches!(
        host.send(&Command::Ping, TIMEOUT),
        Err(ProxyError::HostClosed(_))
    ));
}
