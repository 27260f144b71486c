// tests/stroke_player.rs - Stroke queue playback and the random feeder
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tcode_host::config::Config;
use tcode_host::output::{LoopbackConnector, LoopbackDevice};
use tcode_host::player::StrokeJob;
use tcode_host::stroke::StrokeGenerator;
use tcode_host::{Axis, AxisMap, Session};

fn job(name: &str, step_ms: u64, values: &[f64]) -> StrokeJob {
    let actions = values
        .iter()
        .map(|v| [(Axis::L0, *v)].into_iter().collect::<AxisMap<f64>>())
        .collect();
    StrokeJob::new(name, step_ms, 100, actions)
}

async fn session(connect: bool) -> (Session, LoopbackDevice) {
    let connector = LoopbackConnector::new();
    let device = connector.device();
    let session = Session::start(Config::default(), Arc::new(connector)).unwrap();
    if connect {
        session.connect().await.unwrap();
    }
    (session, device)
}

#[tokio::test(start_paused = true)]
async fn test_manual_job_is_played_in_order() {
    let (mut session, device) = session(true).await;
    let player = session.stroke_player(None);
    player.set_running(true).await;
    player.enqueue(job("manual", 100, &[0.0, 500.0, 1000.0])).await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    let lines = device.lines();
    let prefixes: Vec<&str> = lines.iter().map(|l| &l[..5]).collect();
    assert_eq!(prefixes, vec!["L0000", "L0500", "L0999"]);
    // the start is smoothed
    assert!(lines.iter().all(|l| l[6..].parse::<u32>().unwrap() > 100));

    let status = player.status().await.unwrap();
    assert!(status.running);
    assert_eq!(status.jobs, 0);
    assert_eq!(status.current, None);

    session.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_progress_stream_reports_refill() {
    let (mut session, _device) = session(true).await;
    let player = session.stroke_player(None);
    let updates = player.progress_stream();
    let mut updates = std::pin::pin!(updates);

    player.set_running(true).await;
    player.enqueue(job("manual", 100, &[0.0, 500.0, 1000.0])).await;

    let first = updates.next().await.unwrap();
    assert_eq!(first.name, "manual");
    assert_eq!(first.remaining_ms, 200);
    assert!(first.refill_requested);

    // once drained the idle player keeps asking for more
    let idle = updates.next().await.unwrap();
    assert_eq!(idle.remaining_ms, 0);
    assert!(idle.refill_requested);

    session.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_and_clear() {
    let (mut session, device) = session(true).await;
    let player = session.stroke_player(None);
    player.set_running(true).await;
    player.enqueue(job("long", 50, &[100.0; 40])).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    player.set_running(false).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let frames = device.lines().len();
    assert!(frames > 0);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(device.lines().len(), frames);
    let status = player.status().await.unwrap();
    assert!(!status.running);
    assert_eq!(status.current.as_deref(), Some("long"));

    player.clear().await;
    assert_eq!(player.status().await.unwrap().jobs, 0);

    session.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_feeder_keeps_queue_filled() {
    let (mut session, device) = session(true).await;
    let generator = StrokeGenerator::with_seed(&session.config().stroke, 11);
    let player = session.stroke_player(Some(generator));
    player.set_running(true).await;

    tokio::time::sleep(Duration::from_millis(5000)).await;
    let lines = device.lines();
    assert!(lines.len() > 80, "only {} frames", lines.len());
    assert_eq!(device.state().frames, lines.len() as u64);

    let status = player.status().await.unwrap();
    assert!(status.jobs >= 1);
    assert!(status.current.is_some());

    session.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_feeder_waits_for_connection() {
    let (mut session, device) = session(false).await;
    let generator = StrokeGenerator::with_seed(&session.config().stroke, 5);
    let player = session.stroke_player(Some(generator));
    player.set_running(true).await;

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(player.status().await.unwrap().jobs, 0);
    assert!(device.lines().is_empty());

    session.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(!device.lines().is_empty());

    session.shutdown().await.unwrap();
}
