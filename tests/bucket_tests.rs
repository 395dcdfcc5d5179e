//! BucketGroup Tests
//!
//! Scoring, dead-host detection and revival inside one shard. No traffic is
//! sent; hosts are never dialed.

use std::sync::Arc;
use std::time::SystemTime;

use quorumkv::route::{BucketGroup, ErrorClass};
use quorumkv::{Config, HostConnection};

fn config() -> Config {
    Config::builder().max_connect_errors(3).build()
}

fn group(addrs: &[&str]) -> BucketGroup {
    let config = config();
    let hosts = addrs
        .iter()
        .map(|addr| Arc::new(HostConnection::new(*addr, &config)))
        .collect();
    BucketGroup::new(0, hosts, &config).unwrap()
}

fn addrs_of(hosts: &[Arc<HostConnection>]) -> Vec<&str> {
    hosts.iter().map(|h| h.addr()).collect()
}

#[test]
fn test_hosts_sorted_by_address() {
    let g = group(&["10.0.0.3:11211", "10.0.0.1:11211", "10.0.0.2:11211"]);
    assert_eq!(
        addrs_of(&g.hosts()),
        vec!["10.0.0.1:11211", "10.0.0.2:11211", "10.0.0.3:11211"]
    );
    assert_eq!(g.partition().replicas(), 3);
}

#[test]
fn test_empty_group_rejected() {
    assert!(BucketGroup::new(0, Vec::new(), &config()).is_err());
}

#[test]
fn test_route_puts_owner_first() {
    let g = group(&["a:1", "b:1", "c:1"]);
    let hosts = g.hosts();
    for key in ["user:1", "user:2", "session:9", "x"] {
        let route = g.route(key);
        assert_eq!(route.len(), 3);
        let owner = g.partition().owner_of(key);
        assert_eq!(route[0].addr(), hosts[owner].addr());
        // The remaining hosts follow in fixed order
        assert_eq!(route[1].addr(), hosts[(owner + 1) % 3].addr());
        assert_eq!(route[2].addr(), hosts[(owner + 2) % 3].addr());
    }
}

#[test]
fn test_host_dies_after_threshold() {
    let g = group(&["a:1", "b:1", "c:1"]);
    let now = SystemTime::now();

    for _ in 0..3 {
        assert!(!g.record_failure("b:1", now, ErrorClass::Hard));
    }
    assert_eq!(g.is_alive("b:1"), Some(true));

    assert!(g.record_failure("b:1", now, ErrorClass::Hard));
    assert_eq!(g.is_alive("b:1"), Some(false));
    assert_eq!(g.partition().width_of(1), 0);

    // Already dead
    assert!(!g.record_failure("b:1", now, ErrorClass::Hard));

    for key in ["k1", "k2", "k3", "k4", "k5", "k6"] {
        assert_ne!(g.route(key)[0].addr(), "b:1");
    }
}

#[test]
fn test_retryable_errors_never_kill() {
    let g = group(&["a:1", "b:1"]);
    let now = SystemTime::now();
    for _ in 0..50 {
        assert!(!g.record_failure("a:1", now, ErrorClass::Retryable));
    }
    assert_eq!(g.is_alive("a:1"), Some(true));
}

#[test]
fn test_mark_alive_discards_history() {
    let g = group(&["a:1", "b:1", "c:1"]);
    let now = SystemTime::now();
    for _ in 0..4 {
        g.record_failure("c:1", now, ErrorClass::HardWrite);
    }
    assert_eq!(g.is_alive("c:1"), Some(false));

    assert!(g.mark_alive("c:1"));
    assert!(!g.mark_alive("c:1"));
    assert_eq!(g.is_alive("c:1"), Some(true));

    // Old errors are gone, a single new one does not re-kill it
    assert!(!g.record_failure("c:1", now, ErrorClass::Hard));
    assert_eq!(g.is_alive("c:1"), Some(true));
}

#[test]
fn test_revived_host_regrows_only_through_rebalance() {
    let g = group(&["a:1", "b:1", "c:1"]);
    let now = SystemTime::now();
    for _ in 0..4 {
        g.record_failure("c:1", now, ErrorClass::Hard);
    }
    assert_eq!(g.partition().width_of(2), 0);

    // Revival alone hands back no keys, and equal scores keep it that way
    assert!(g.mark_alive("c:1"));
    g.recompute_scores_at(now);
    assert!(!g.rebalance_if_needed());
    assert_eq!(g.partition().width_of(2), 0);

    // Once the survivors are clearly slower it wins space back step by step
    g.record_success("a:1", now, 20_000.0);
    g.record_success("b:1", now, 20_000.0);
    g.recompute_scores_at(now);
    assert!(g.rebalance_if_needed());
    assert!(g.partition().width_of(2) > 0);
    assert_eq!(g.partition().widths().iter().sum::<u32>(), 100);
}

#[test]
fn test_unknown_host_is_ignored() {
    let g = group(&["a:1"]);
    let now = SystemTime::now();
    assert!(!g.record_success("z:9", now, 10.0));
    assert!(!g.record_failure("z:9", now, ErrorClass::Hard));
    assert!(!g.mark_alive("z:9"));
    assert_eq!(g.is_alive("z:9"), None);
    assert!(g.latency_window("z:9").is_none());
}

#[test]
fn test_scores_use_floor_and_penalties() {
    let g = group(&["a:1", "b:1", "c:1"]);
    let now = SystemTime::now();
    g.record_success("a:1", now, 20_000.0);
    g.record_success("a:1", now, 30_000.0);
    g.record_success("b:1", now, 500.0);
    g.record_failure("c:1", now, ErrorClass::Hard);

    g.recompute_scores_at(now);
    assert_eq!(g.state("a:1").unwrap().score, 25_000.0);
    assert_eq!(g.state("b:1").unwrap().score, 4_000.0);
    assert_eq!(g.state("c:1").unwrap().score, 14_000.0);
}

#[test]
fn test_rebalance_moves_space_to_fastest() {
    let g = group(&["a:1", "b:1", "c:1"]);
    let now = SystemTime::now();
    g.record_success("a:1", now, 20_000.0);

    g.recompute_scores_at(now);
    assert!(g.rebalance_if_needed());
    // One step from the slowest (a) to the first fastest (b)
    assert_eq!(g.partition().widths(), vec![32, 34, 34]);
}

#[test]
fn test_small_gap_does_not_rebalance() {
    let g = group(&["a:1", "b:1", "c:1"]);
    let now = SystemTime::now();
    g.record_success("a:1", now, 12_000.0);

    g.recompute_scores_at(now);
    assert!(!g.rebalance_if_needed());
    assert_eq!(g.partition().widths(), vec![33, 33, 34]);
}

#[test]
fn test_dead_host_scores_zero_and_is_skipped() {
    let g = group(&["a:1", "b:1", "c:1"]);
    let now = SystemTime::now();
    g.record_success("a:1", now, 50_000.0);
    for _ in 0..4 {
        g.record_failure("a:1", now, ErrorClass::Hard);
    }

    g.recompute_scores_at(now);
    assert_eq!(g.state("a:1").unwrap().score, 0.0);
    // b and c tie at the floor and a is not a candidate
    assert!(!g.rebalance_if_needed());
}

#[test]
fn test_stats_snapshot() {
    let g = group(&["b:1", "a:1"]);
    g.record_success("a:1", SystemTime::now(), 100.0);

    let stats = g.stats();
    assert_eq!(stats.shard, 0);
    assert_eq!(stats.hosts.len(), 2);
    assert_eq!(stats.hosts[0].addr, "a:1");
    assert_eq!(stats.hosts[0].arc_width + stats.hosts[1].arc_width, 100);
    assert!(stats.hosts.iter().all(|h| h.alive));

    let window = g.latency_window("a:1").unwrap();
    assert_eq!(window.iter().map(|s| s.count).sum::<u64>(), 1);
}
