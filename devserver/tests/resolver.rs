//! Devserver selection tests

mod common;

use std::collections::HashSet;
use std::net::Ipv4Addr;

use common::{harness, options, Reply};
use devserver::health::devserver_healthy;
use devserver::servers::{resolver, ServerKind};
use devserver::{DevServerError, ImageServer};
use tokio_test::{assert_err, assert_ok};

const LOCAL: &str = "http://100.115.2.10:8082";
const REMOTE: &str = "http://100.115.1.1:8082";

fn dut() -> (&'static str, Ipv4Addr) {
    ("chromeos2-row1-host1", Ipv4Addr::new(100, 115, 2, 5))
}

#[tokio::test]
async fn test_restricted_subnet_never_leaves_subnet() {
    let mut opts = options(&[LOCAL, REMOTE]);
    opts.restricted_subnets = vec!["100.115.2.0/24".parse().unwrap()];
    let h = harness(opts, &[dut()]);
    h.transport
        .default_reply("100.115.2.10/check_health", Reply::Http("<h1>down</h1>".into()));

    let result = ImageServer::resolve(&h.ctx, "lumpy-release/R60-9500.0.0", Some(dut().0), &[]).await;
    let err = assert_err!(result);
    assert!(matches!(err, DevServerError::Devserver(_)));
    assert!(err
        .to_string()
        .starts_with("All devservers in subnet: 100.115.2.0/24 are currently down"));
    assert!(err.to_string().contains("(dut hostname: chromeos2-row1-host1)"));

    // The devserver outside the subnet is never considered.
    assert!(h
        .transport
        .calls_to("check_health")
        .iter()
        .all(|c| c.hostname() == "100.115.2.10"));

    let events = h
        .metrics
        .named("chromeos/autotest/devserver/subnet_without_devservers");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].get_field("subnet"), Some("100.115.2.0/24"));
}

#[tokio::test]
async fn test_restricted_subnet_picks_local_devserver() {
    let mut opts = options(&[LOCAL, REMOTE]);
    opts.restricted_subnets = vec!["100.115.2.0/24".parse().unwrap()];
    let h = harness(opts, &[dut()]);

    let server = assert_ok!(
        ImageServer::resolve(&h.ctx, "lumpy-release/R60-9500.0.0", Some(dut().0), &[]).await
    );
    assert_eq!(server.url(), LOCAL);
}

#[tokio::test]
async fn test_preferred_local_devserver_falls_back_to_unrestricted_pool() {
    let near = "http://100.116.0.20:8082";
    let mut opts = options(&[near, REMOTE]);
    opts.prefer_local_devserver = true;
    let h = harness(opts, &[("dut", Ipv4Addr::new(100, 116, 0, 5))]);
    h.transport
        .default_reply("100.116.0.20/check_health", Reply::Http("busy".into()));

    let server = assert_ok!(
        ImageServer::resolve(&h.ctx, "lumpy-release/R60-9500.0.0", Some("dut"), &[]).await
    );
    assert_eq!(server.url(), REMOTE);
}

#[tokio::test]
async fn test_resolution_is_stable_and_spread() {
    let servers = [
        "http://100.115.1.1:8082",
        "http://100.115.1.2:8082",
        "http://100.115.1.3:8082",
    ];
    let h = harness(options(&servers), &[]);
    let resolver = resolver(&h.ctx, ServerKind::Image);

    let build = "x86-mario-release/R18-1586.0.0-a1-b1514";
    let first = resolver.resolve(build, None, &[]).await.unwrap();
    let second = resolver.resolve(build, None, &[]).await.unwrap();
    assert_eq!(first.url(), second.url());

    let mut picked = HashSet::new();
    for i in 0..30 {
        let build = format!("lumpy-release/R{}-1000.0.0", 40 + i);
        picked.insert(resolver.resolve(&build, None, &[]).await.unwrap().url().to_string());
    }
    assert!(picked.len() > 1);
}

#[tokio::test]
async fn test_banned_devserver_is_skipped_without_health_check() {
    let h = harness(options(&[REMOTE, LOCAL]), &[]);

    let server = resolver(&h.ctx, ServerKind::Image)
        .resolve("lumpy-release/R60-9500.0.0", None, &[REMOTE.to_string()])
        .await
        .unwrap();
    assert_eq!(server.url(), LOCAL);
    assert!(h
        .transport
        .calls_to("check_health")
        .iter()
        .all(|c| c.hostname() != "100.115.1.1"));
}

#[tokio::test]
async fn test_missing_load_is_unhealthy_even_when_checks_are_skipped() {
    let mut opts = options(&[REMOTE]);
    opts.skip_health_check = true;
    let h = harness(opts, &[]);
    h.transport
        .default_reply("check_health", Reply::Http("Internal Server Error".into()));

    assert!(!devserver_healthy(&h.ctx, REMOTE).await);
    let events = h.metrics.named("chromeos/autotest/devserver/devserver_healthy");
    assert_eq!(events[0].get_field("reason"), Some("(1) Failed to get load."));
}

#[tokio::test]
async fn test_skipped_checks_accept_a_loaded_devserver() {
    let load = r#"{"free_disk": 1.0, "apache_client_count": 500, "au_process_count": 3}"#;

    let h = harness(options(&[REMOTE]), &[]);
    h.transport.default_reply("check_health", Reply::text(load));
    assert!(!devserver_healthy(&h.ctx, REMOTE).await);
    let events = h.metrics.named("chromeos/autotest/devserver/devserver_healthy");
    assert_eq!(events[0].get_field("reason"), Some("(2) Apache client count too high."));
    assert_eq!(events[0].get_field("healthy"), Some("false"));

    let mut opts = options(&[REMOTE]);
    opts.skip_health_check = true;
    let h = harness(opts, &[]);
    h.transport.default_reply("check_health", Reply::text(load));
    assert!(devserver_healthy(&h.ctx, REMOTE).await);

    let au_count = h.metrics.named("chromeos/autotest/devserver/devserver_au_count");
    assert_eq!(au_count.len(), 1);
    assert_eq!(au_count[0].get_field("dev_server"), Some("100.115.1.1"));
}

#[tokio::test]
async fn test_low_disk_is_unhealthy() {
    let h = harness(options(&[REMOTE]), &[]);
    h.transport.default_reply(
        "check_health",
        Reply::text(r#"{"free_disk": 5.0, "apache_client_count": 2}"#),
    );

    assert!(!devserver_healthy(&h.ctx, REMOTE).await);
    let events = h.metrics.named("chromeos/autotest/devserver/devserver_healthy");
    assert_eq!(events[0].get_field("reason"), Some("(3) Disk space too low."));
}

#[tokio::test]
async fn test_least_loaded_devserver() {
    let busy = "http://100.115.1.2:8082";
    let hot = "http://100.115.1.3:8082";
    let h = harness(options(&[REMOTE, busy, hot]), &[]);
    h.transport.default_reply(
        "100.115.1.2/check_health",
        Reply::text(r#"{"free_disk": 100.0, "cpu_percent": 10.0, "disk_total_bytes_per_second": 9000.0}"#),
    );
    h.transport.default_reply(
        "100.115.1.3/check_health",
        Reply::text(r#"{"free_disk": 100.0, "cpu_percent": 95.0, "disk_total_bytes_per_second": 1.0}"#),
    );

    let picked = resolver(&h.ctx, ServerKind::Image)
        .get_least_loaded_devserver(None)
        .await
        .unwrap();
    assert_eq!(picked.as_deref(), Some(REMOTE));
}
