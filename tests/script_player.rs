// tests/script_player.rs - Script playback end to end over the loopback device
use std::sync::Arc;
use std::time::Duration;
use tcode_host::config::Config;
use tcode_host::output::LoopbackConnector;
use tcode_host::player::ParameterUpdate;
use tcode_host::scheduler::ManualTime;
use tcode_host::script::{Keyframe, MotionScript, ScriptSet};
use tcode_host::{Axis, Session};

fn ramp(duration_ms: i64) -> MotionScript {
    MotionScript::new(vec![Keyframe::new(0, 0.0), Keyframe::new(duration_ms, 100.0)], false)
}

async fn playing_session(scripts: ScriptSet) -> (Session, tcode_host::output::LoopbackDevice) {
    let connector = LoopbackConnector::new();
    let device = connector.device();
    let mut session = Session::start(Config::default(), Arc::new(connector)).unwrap();
    session.connect().await.unwrap();
    let player = session.script_player();
    assert!(
        player
            .set_parameters(ParameterUpdate::default().scripts(scripts).running(true))
            .await
    );
    session.spawn_media_clock(0.0);
    (session, device)
}

#[tokio::test(start_paused = true)]
async fn test_playback_follows_media_clock() {
    let mut scripts = ScriptSet::new();
    scripts.insert(Axis::L0, ramp(10_000));
    let (session, device) = playing_session(scripts).await;

    tokio::time::sleep(Duration::from_millis(2000)).await;
    let early = device.state().positions.get(Axis::L0).copied().unwrap();
    tokio::time::sleep(Duration::from_millis(4000)).await;
    let late = device.state().positions.get(Axis::L0).copied().unwrap();

    // a 10 s ramp, looked ahead by one window
    assert!((150..=300).contains(&early), "early = {}", early);
    assert!((550..=700).contains(&late), "late = {}", late);

    // roughly one frame per window
    let frames = device.lines().len();
    assert!((30..=45).contains(&frames), "frames = {}", frames);
    assert!(device.lines().iter().all(|l| l.starts_with("L0") && l.contains('I')));

    session.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stopped_player_sends_nothing() {
    let mut scripts = ScriptSet::new();
    scripts.insert(Axis::L0, ramp(10_000));
    let (mut session, device) = playing_session(scripts).await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    let player = session.script_player();
    player.set_parameters(ParameterUpdate::default().running(false)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let frames = device.lines().len();

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(device.lines().len(), frames);
    let status = player.status().await.unwrap();
    assert!(!status.parameters.running);
    assert!(status.last_media_ms.is_some());

    session.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_secondary_axis_frames() {
    let mut scripts = ScriptSet::new();
    scripts.insert(Axis::L0, ramp(10_000));
    scripts.insert(
        Axis::R0,
        MotionScript::new(
            vec![
                Keyframe::new(0, 50.0),
                Keyframe::new(700, 90.0),
                Keyframe::new(1400, 10.0),
                Keyframe::new(2100, 90.0),
            ],
            false,
        ),
    );
    let (session, device) = playing_session(scripts).await;

    tokio::time::sleep(Duration::from_millis(1000)).await;
    let lines = device.lines();
    assert!(lines.iter().any(|l| l.contains("R0900")), "{:?}", lines);

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(device.lines().iter().any(|l| l.contains("R0100")));

    session.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_parks_after_playback() {
    let mut scripts = ScriptSet::new();
    scripts.insert(Axis::L0, ramp(2_000));
    let (session, device) = playing_session(scripts).await;

    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert_eq!(device.state().positions.get(Axis::L0), Some(&999));

    session.shutdown().await.unwrap();
    assert!(!device.is_open());
    assert_eq!(device.state().positions.get(Axis::L0), Some(&500));
}

#[tokio::test(start_paused = true)]
async fn test_companion_scripts_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("clip.funscript"),
        r#"{"actions":[{"at":0,"pos":0},{"at":4000,"pos":100}]}"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("clip.twist.funscript"),
        r#"{"inverted":true,"actions":[{"at":0,"pos":0},{"at":4000,"pos":0}]}"#,
    )
    .unwrap();

    let scripts = ScriptSet::load_for(&dir.path().join("clip.mp4")).unwrap();
    assert_eq!(scripts.axes().collect::<Vec<_>>(), vec![Axis::L0, Axis::R0]);

    let (session, device) = playing_session(scripts).await;
    tokio::time::sleep(Duration::from_millis(1000)).await;
    // inverted 0 is the top of the range
    assert_eq!(device.state().positions.get(Axis::R0), Some(&999));
    session.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_player_reads_the_session_clock() {
    let connector = LoopbackConnector::new();
    let device = connector.device();
    let time = ManualTime::new(2000);
    let mut session =
        Session::with_time(Config::default(), Arc::new(connector), Arc::new(time.clone())).unwrap();
    session.connect().await.unwrap();

    let mut scripts = ScriptSet::new();
    scripts.insert(Axis::L0, ramp(10_000));
    let player = session.script_player();
    player
        .set_parameters(ParameterUpdate::default().scripts(scripts).running(true))
        .await;
    player.report_clock_position(1000.0);

    let status = player.status().await.unwrap();
    assert_eq!(status.skew_ms, 1000);
    assert_eq!(status.last_media_ms, Some(1000));

    // first tick plans media 1000 one window ahead: the window ends at 1300
    tokio::time::sleep(Duration::from_millis(20)).await;
    let first = device.state().positions.get(Axis::L0).copied().unwrap();
    assert!((129..=130).contains(&first), "first = {}", first);

    // the local clock jumps a second while almost no wall time passes
    time.advance(1000);
    tokio::time::sleep(Duration::from_millis(150)).await;
    let second = device.state().positions.get(Axis::L0).copied().unwrap();
    assert!((229..=230).contains(&second), "second = {}", second);

    session.shutdown().await.unwrap();
}
