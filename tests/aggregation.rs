//! End-to-end aggregation runs against mock supplier feeds.
//!
//! Each test starts its own mock server and scratch output directory, builds
//! a feed list pointing at the server and drives a full run: fetch, merge,
//! change detection and sharded output.

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use wiremock::matchers::path;
use wiremock::{Mock, MockServer, ResponseTemplate};

use ymlmerge::catalog::NEW_MARKER;
use ymlmerge::feed::{build_client, parse_feed_list, FeedDescriptor, FetchOptions, DEFAULT_USER_AGENT};
use ymlmerge::output::{ShardStatus, ShardWriter, ShopInfo};
use ymlmerge::pipeline::{load_previous, run, RunOptions, RunReport};

const STEM: &str = "catalog";

fn yml(offers: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<yml_catalog date="2024-01-01 00:00"><shop>
<categories><category id="1">Tools</category></categories>
<offers>
{offers}
</offers></shop></yml_catalog>"#
    )
}

fn widget(vendor_code: &str, price: &str) -> String {
    format!(
        "<offer id=\"local\" available=\"true\"><name>Widget</name><vendorCode>{vendor_code}</vendorCode>\
         <price>{price}</price><categoryId>1</categoryId></offer>"
    )
}

async fn serve(server: &MockServer, route: &str, body: String) {
    Mock::given(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

fn feed_list(server: &MockServer, lines: &[&str]) -> Vec<FeedDescriptor> {
    let content: Vec<String> = lines
        .iter()
        .map(|line| format!("{}{}", server.uri(), line))
        .collect();
    parse_feed_list(&content.join("\n"), true)
}

fn options(hour: u32) -> RunOptions {
    RunOptions {
        fetch: FetchOptions {
            timeout: Duration::from_secs(5),
            ..FetchOptions::default()
        },
        max_shard_bytes: 4096,
        generated_at: NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap(),
    }
}

async fn run_once(dir: &Path, feeds: &[FeedDescriptor], opts: &RunOptions) -> RunReport {
    let client = build_client(DEFAULT_USER_AGENT).unwrap();
    let previous = load_previous(&[], dir, STEM).unwrap();
    let writer = ShardWriter::new(dir, STEM, ShopInfo::default());
    run(&client, feeds, &previous, &writer, opts).await.unwrap()
}

fn shard(dir: &Path, n: usize) -> String {
    std::fs::read_to_string(dir.join(format!("{STEM}_{n}.yml"))).unwrap()
}

#[tokio::test]
async fn test_same_vendor_code_in_two_feeds_stays_distinct() {
    let server = MockServer::start().await;
    serve(&server, "/a.yml", yml(&widget("X1", "10"))).await;
    serve(&server, "/b.yml", yml(&widget("X1", "12"))).await;
    let dir = tempfile::tempdir().unwrap();

    let feeds = feed_list(&server, &["/a.yml", "/b.yml"]);
    let report = run_once(dir.path(), &feeds, &options(10)).await;

    assert_eq!(report.summary.feeds_succeeded, 2);
    assert_eq!(report.summary.offers_retained, 2);
    let content = shard(dir.path(), 1);
    assert!(content.contains(r#"<offer id="f1_x1" available="true">"#));
    assert!(content.contains(r#"<offer id="f2_x1" available="true">"#));
    assert!(content.contains("<price>12</price>"));
    assert!(content.contains(r#"<category id="1">Tools</category>"#));
}

#[tokio::test]
async fn test_duplicate_within_one_feed_is_dropped() {
    let server = MockServer::start().await;
    let offers = format!("{}\n{}", widget("X1", "10"), widget("X1", "99"));
    serve(&server, "/a.yml", yml(&offers)).await;
    let dir = tempfile::tempdir().unwrap();

    let feeds = feed_list(&server, &["/a.yml"]);
    let report = run_once(dir.path(), &feeds, &options(10)).await;

    assert_eq!(report.summary.offers_considered, 1);
    assert_eq!(report.summary.offers_retained, 1);
    let content = shard(dir.path(), 1);
    assert!(content.contains("<price>10</price>"));
    assert!(!content.contains("<price>99</price>"));
}

#[tokio::test]
async fn test_timed_out_feed_does_not_fail_the_run() {
    let server = MockServer::start().await;
    Mock::given(path("/slow.yml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(yml(&widget("S1", "1")))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    serve(&server, "/fast.yml", yml(&widget("F1", "2"))).await;
    let dir = tempfile::tempdir().unwrap();

    let feeds = feed_list(&server, &["/slow.yml", "/fast.yml"]);
    let mut opts = options(10);
    opts.fetch.timeout = Duration::from_millis(300);
    let report = run_once(dir.path(), &feeds, &opts).await;

    assert_eq!(report.summary.feeds_total, 2);
    assert_eq!(report.summary.feeds_succeeded, 1);
    assert_eq!(report.summary.feeds_failed, 1);
    assert!(!report.summary.feeds[0].succeeded);
    assert!(shard(dir.path(), 1).contains(r#"id="f2_f1""#));
}

#[tokio::test]
async fn test_later_feed_with_shared_label_wins() {
    let server = MockServer::start().await;
    // The earlier feed finishes last; list order must still decide
    Mock::given(path("/old.yml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(yml(&widget("X1", "10")))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;
    serve(&server, "/new.yml", yml(&widget("X1", "15"))).await;
    let dir = tempfile::tempdir().unwrap();

    let feeds = feed_list(&server, &["/old.yml acme", "/new.yml acme"]);
    let report = run_once(dir.path(), &feeds, &options(10)).await;

    assert_eq!(report.summary.offers_considered, 2);
    assert_eq!(report.summary.offers_retained, 1);
    let content = shard(dir.path(), 1);
    assert!(content.contains(r#"id="acme_x1""#));
    assert!(content.contains("<price>15</price>"));
    assert!(!content.contains("<price>10</price>"));
}

#[tokio::test]
async fn test_second_run_reports_price_change() {
    let dir = tempfile::tempdir().unwrap();

    let first = MockServer::start().await;
    serve(&first, "/a.yml", yml(&widget("X1", "10"))).await;
    let report = run_once(dir.path(), &feed_list(&first, &["/a.yml"]), &options(10)).await;
    assert_eq!(report.changes.len(), 1);
    assert_eq!(report.changes[0].old_price, NEW_MARKER);

    let second = MockServer::start().await;
    serve(&second, "/a.yml", yml(&widget("X1", "12"))).await;
    let report = run_once(dir.path(), &feed_list(&second, &["/a.yml"]), &options(11)).await;

    assert_eq!(report.changes.len(), 1);
    let change = &report.changes[0];
    assert_eq!(change.id, "f1_x1");
    assert_eq!(change.name, "Widget");
    assert_eq!(change.old_price, "10");
    assert_eq!(change.new_price, "12");
    assert_eq!(report.summary.shards_written, 1);
}

#[tokio::test]
async fn test_unchanged_rerun_writes_nothing() {
    let server = MockServer::start().await;
    let offers: Vec<String> = (0..40).map(|i| widget(&format!("V{i}"), "5")).collect();
    serve(&server, "/a.yml", yml(&offers.join("\n"))).await;
    let dir = tempfile::tempdir().unwrap();
    let feeds = feed_list(&server, &["/a.yml"]);

    let first = run_once(dir.path(), &feeds, &options(10)).await;
    assert!(first.shards.len() > 1);
    assert_eq!(first.summary.shards_written, first.shards.len());
    let before: Vec<String> = (1..=first.shards.len()).map(|n| shard(dir.path(), n)).collect();

    let second = run_once(dir.path(), &feeds, &options(12)).await;
    assert_eq!(second.summary.shards_written, 0);
    assert_eq!(second.summary.shards_unchanged, first.shards.len());
    assert!(second.changes.is_empty());
    assert!(second.shards.iter().all(|s| s.status == ShardStatus::Unchanged));
    let after: Vec<String> = (1..=first.shards.len()).map(|n| shard(dir.path(), n)).collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_stale_shards_do_not_feed_change_detection() {
    let dir = tempfile::tempdir().unwrap();
    let mut opts = options(10);
    // One offer per shard
    opts.max_shard_bytes = 10;

    let first = MockServer::start().await;
    let offers = format!("{}\n{}", widget("A", "1"), widget("B", "10"));
    serve(&first, "/a.yml", yml(&offers)).await;
    let report = run_once(dir.path(), &feed_list(&first, &["/a.yml"]), &opts).await;
    assert_eq!(report.shards.len(), 2);

    let second = MockServer::start().await;
    serve(&second, "/a.yml", yml(&widget("B", "12"))).await;
    let feeds = feed_list(&second, &["/a.yml"]);
    let report = run_once(dir.path(), &feeds, &opts).await;
    assert_eq!(report.shards.len(), 1);
    assert_eq!(report.changes.len(), 1);
    assert_eq!(report.changes[0].old_price, "10");
    assert_eq!(report.changes[0].new_price, "12");
    // The second shard from the first run is still on disk
    assert!(shard(dir.path(), 2).contains("<price>10</price>"));

    let report = run_once(dir.path(), &feeds, &opts).await;
    assert!(report.changes.is_empty(), "unexpected changes: {:?}", report.changes);
    assert_eq!(report.summary.shards_unchanged, 1);
}

#[tokio::test]
async fn test_explicit_snapshot_file() {
    let dir = tempfile::tempdir().unwrap();
    let previous = dir.path().join("previous.yml");
    std::fs::write(
        &previous,
        yml(r#"<offer id="f1_x1"><name>Widget</name><price>8</price><quantity>2</quantity></offer>"#),
    )
    .unwrap();

    let snapshot = load_previous(&[previous], dir.path(), STEM).unwrap();
    assert_eq!(snapshot.len(), 1);
    let entry = snapshot.get("f1_x1").unwrap();
    assert_eq!(entry.price, "8");
    assert_eq!(entry.quantity, "2");
}
