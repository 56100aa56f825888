// Full test cycles through Session with scripted transfers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{assert_close, Behavior, RecordingSink, ScriptedTransfer, MIB};
use speedprobe::config::{DirectionSelection, EndpointConfig, SpeedprobeConfig};
use speedprobe::probes::UNAVAILABLE;
use speedprobe::session::Session;
use speedprobe::throughput::probe::ProbeStatus;
use speedprobe::throughput::{Direction, Mode, ThroughputError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn config(paths: &[&str]) -> SpeedprobeConfig {
    let mut cfg = SpeedprobeConfig::default();
    cfg.test.duration_secs = 1;
    cfg.test.cache_bust = false;
    cfg.endpoints = paths
        .iter()
        .map(|p| EndpointConfig {
            url: format!("http://scripted.test{}", p),
            size_bytes: None,
        })
        .collect();
    cfg.upload.urls = vec!["http://scripted.test/up".to_string()];
    cfg.upload.chunk_size_bytes = MIB as usize;
    cfg.latency.enabled = false;
    cfg.lookup.enabled = false;
    cfg
}

fn session(cfg: SpeedprobeConfig, transfer: ScriptedTransfer) -> Session {
    Session::with_transport(cfg, Arc::new(transfer)).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_download_cycle_reports_median() {
    let mut session = session(
        config(&["/a", "/b", "/c"]),
        ScriptedTransfer::new()
            .with("/a", Behavior::steady_mib_per_tick(100))
            .with("/b", Behavior::Refuse)
            .with("/c", Behavior::steady_mib_per_tick(200)),
    );
    let mut sink = RecordingSink::default();

    let report = session
        .run_cycle(&CancellationToken::new(), &mut sink)
        .await
        .unwrap();

    let download = report.download.as_ref().unwrap();
    assert_eq!(download.direction, Direction::Download);
    assert_eq!(download.sample_count, 3);
    assert_close(download.median_mbps, 40.0);
    assert_eq!(download.endpoints[1].status, ProbeStatus::Failed);
    assert!(download.endpoints[1].error.is_some());
    assert!(report.upload.is_none());
    assert_eq!(report.mode, Mode::Parallel);
    assert_eq!(report.latency_ms, None);
    assert_eq!(report.public_ip, UNAVAILABLE);

    assert!(sink.errors.is_empty());
    assert_eq!(sink.finals.len(), 1);
    assert_eq!(sink.finals[0].run_id, report.run_id);
    assert!(!sink.live.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_both_directions_run_back_to_back() {
    let mut cfg = config(&["/a"]);
    cfg.test.direction = DirectionSelection::Both;
    cfg.test.mode = Mode::Sequential;
    let mut session = session(
        cfg,
        ScriptedTransfer::new()
            .with("/a", Behavior::steady_mib_per_tick(100))
            .with(
                "/up",
                Behavior::Steady {
                    chunk: 256 * 1024,
                    every: Duration::from_millis(100),
                    total: None,
                },
            ),
    );
    let mut sink = RecordingSink::default();
    let started = Instant::now();

    let report = session
        .run_cycle(&CancellationToken::new(), &mut sink)
        .await
        .unwrap();

    assert_eq!(started.elapsed(), Duration::from_secs(2));
    assert_close(report.download.as_ref().unwrap().median_mbps, 80.0);
    let upload = report.upload.as_ref().unwrap();
    assert_eq!(upload.direction, Direction::Upload);
    assert_close(upload.median_mbps, 20.0);
    assert!(sink.live.iter().any(|u| u.direction == Direction::Upload));
    assert!(sink
        .live
        .iter()
        .all(|u| u.position == Some((1, 1))));
}

#[tokio::test(start_paused = true)]
async fn test_all_unreachable_reports_error_and_zero() {
    let mut session = session(config(&["/x", "/y"]), ScriptedTransfer::new());
    let mut sink = RecordingSink::default();

    let report = session
        .run_cycle(&CancellationToken::new(), &mut sink)
        .await
        .unwrap();

    assert_eq!(report.download.as_ref().unwrap().median_mbps, 0.0);
    assert_eq!(sink.errors.len(), 1);
    assert!(sink.errors[0].contains("all 2 download endpoints were unreachable"));
    assert_eq!(sink.finals.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_endpoint_list_is_fatal() {
    let mut session = session(config(&[]), ScriptedTransfer::new());
    let mut sink = RecordingSink::default();

    let err = session
        .run_cycle(&CancellationToken::new(), &mut sink)
        .await
        .unwrap_err();

    assert!(matches!(err, ThroughputError::NoEndpoints { .. }));
    assert!(err.to_string().contains("no endpoints configured"));
    assert!(sink.finals.is_empty());
    assert!(session.last_report().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cycles_replace_last_report() {
    let mut session = session(
        config(&["/a"]),
        ScriptedTransfer::new().with("/a", Behavior::steady_mib_per_tick(100)),
    );
    let mut sink = RecordingSink::default();
    let cancel = CancellationToken::new();

    let first = session.run_cycle(&cancel, &mut sink).await.unwrap();
    let second = session.run_cycle(&cancel, &mut sink).await.unwrap();

    assert_eq!(session.cycles(), 2);
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(session.last_report().unwrap().run_id, second.run_id);
    assert_eq!(sink.finals.len(), 2);

    session.reset();
    assert!(session.last_report().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_disabled_auxiliaries_are_unavailable() {
    let session = session(config(&["/a"]), ScriptedTransfer::new());
    assert_eq!(session.measure_latency().await, None);
    assert_eq!(session.lookup_public_ip().await, UNAVAILABLE);
}

#[tokio::test]
async fn test_cancel_cuts_short_hanging_lookups() {
    // Accepts connections through the backlog but never answers.
    let silent = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let silent_url = format!("http://{}/", silent.local_addr().unwrap());

    let mut cfg = config(&["/a"]);
    cfg.test.duration_secs = 60;
    cfg.latency.enabled = true;
    cfg.latency.url = silent_url.clone();
    cfg.latency.timeout_ms = 30_000;
    cfg.lookup.enabled = true;
    cfg.lookup.public_ip_url = silent_url;
    cfg.lookup.timeout_ms = 30_000;
    let mut session = session(
        cfg,
        ScriptedTransfer::new().with("/a", Behavior::steady_mib_per_tick(50)),
    );
    let mut sink = RecordingSink::default();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let report = tokio::time::timeout(
        Duration::from_secs(10),
        session.run_cycle(&cancel, &mut sink),
    )
    .await
    .expect("cycle should end once cancelled")
    .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.latency_ms, None);
    assert_eq!(report.public_ip, UNAVAILABLE);
    let download = report.download.as_ref().unwrap();
    assert_eq!(download.endpoints[0].status, ProbeStatus::Aborted);
    assert!(download.median_mbps > 0.0);
    drop(silent);
}
