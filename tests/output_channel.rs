// tests/output_channel.rs - Output channel against the loopback device
use std::sync::Arc;
use std::time::Duration;
use tcode_host::output::{
    ChannelState, LoopbackConnector, LoopbackDevice, OutputChannel, OutputError, OutputHandle, OutputSettings,
    TransportError,
};
use tcode_host::tcode::{Interval, OutputRange};
use tcode_host::{Axis, AxisMap, MotionCommand};
use tokio_test::{assert_err, assert_ok};

fn command(values: &[(Axis, f64)], interval_ms: Option<u64>) -> MotionCommand {
    let interval = interval_ms
        .map(|ms| Interval::Uniform(Duration::from_millis(ms)))
        .unwrap_or_default();
    MotionCommand::new(values.iter().copied().collect::<AxisMap<f64>>(), interval)
}

fn start(settings: OutputSettings) -> (OutputHandle, LoopbackDevice, tokio::task::JoinHandle<()>) {
    let connector = LoopbackConnector::new();
    let device = connector.device();
    let (handle, task) = OutputChannel::spawn(Arc::new(connector), OutputRange::default(), settings);
    (handle, device, task)
}

fn no_park() -> OutputSettings {
    OutputSettings {
        park_on_disconnect: false,
        ..OutputSettings::default()
    }
}

/// Let the channel and its writer catch up.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_and_dispatch() {
    let (handle, device, _task) = start(no_park());
    assert_eq!(handle.state(), ChannelState::Disconnected);

    assert_ok!(handle.connect().await);
    assert_eq!(handle.state(), ChannelState::Connected);
    assert!(device.is_open());

    handle.dispatch(command(&[(Axis::L0, 500.0)], Some(150)));
    handle.dispatch(command(&[(Axis::L0, 1000.0), (Axis::R0, 0.0)], None));
    settle().await;

    assert_eq!(device.lines(), vec!["L0500I0150", "L0999 R0000"]);
    assert_eq!(device.state().positions.get(Axis::L0), Some(&999));

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.frames_sent, 2);
    assert_eq!(stats.frames_dropped, 0);
    assert_eq!(stats.bytes_sent, ("L0500I0150\n".len() + "L0999 R0000\n".len()) as u64);
}

#[tokio::test(start_paused = true)]
async fn test_connect_twice_keeps_one_port() {
    let (handle, device, _task) = start(no_park());
    handle.connect().await.unwrap();
    handle.connect().await.unwrap();
    assert_eq!(device.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_while_disconnected_is_dropped() {
    let (handle, device, _task) = start(no_park());
    handle.dispatch(command(&[(Axis::L0, 200.0)], Some(100)));
    settle().await;

    assert!(device.lines().is_empty());
    assert_eq!(handle.stats().await.unwrap().frames_dropped, 1);
    // the destination is still tracked
    assert_eq!(handle.target().get(Axis::L0), Some(&200.0));
}

#[tokio::test(start_paused = true)]
async fn test_target_merges_across_commands() {
    let (handle, _device, _task) = start(no_park());
    let mut target = handle.subscribe_target();
    handle.connect().await.unwrap();

    handle.dispatch(command(&[(Axis::L0, 100.0)], None));
    handle.dispatch(command(&[(Axis::R0, 700.0)], None));
    settle().await;

    assert!(target.has_changed().unwrap());
    let merged = target.borrow_and_update().clone();
    assert_eq!(merged.get(Axis::L0), Some(&100.0));
    assert_eq!(merged.get(Axis::R0), Some(&700.0));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_parks_device() {
    let (handle, device, _task) = start(OutputSettings::default());
    handle.connect().await.unwrap();
    handle.dispatch(command(&[(Axis::L0, 900.0)], Some(100)));
    settle().await;

    handle.disconnect().await.unwrap();
    assert_eq!(handle.state(), ChannelState::Disconnected);
    assert!(!device.is_open());
    assert_eq!(device.closes(), 1);

    let lines = device.lines();
    assert_eq!(
        lines.last().map(String::as_str),
        Some("L0500I1000 L1500I1000 L2500I1000 R0500I1000 R1500I1000 R2500I1000")
    );
    assert_eq!(device.state().positions.get(Axis::L0), Some(&500));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_without_park() {
    let (handle, device, _task) = start(no_park());
    handle.connect().await.unwrap();
    handle.disconnect().await.unwrap();
    assert!(device.lines().is_empty());
    // a second disconnect is a no-op
    handle.disconnect().await.unwrap();
    assert_eq!(device.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_open_leaves_channel_disconnected() {
    let (handle, device, _task) = start(no_park());
    device.set_fail_open(true);

    let result = handle.connect().await;
    assert!(matches!(
        result,
        Err(OutputError::Transport(TransportError::Open { .. }))
    ));
    assert_eq!(handle.state(), ChannelState::Disconnected);
    assert_eq!(handle.stats().await.unwrap().transport_errors, 1);

    device.set_fail_open(false);
    assert_ok!(handle.connect().await);
    assert_eq!(handle.state(), ChannelState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_disconnects() {
    let (handle, device, _task) = start(no_park());
    let mut state = handle.subscribe_state();
    handle.connect().await.unwrap();
    state.borrow_and_update();

    device.set_fail_writes(true);
    handle.dispatch(command(&[(Axis::L0, 300.0)], None));
    state.changed().await.unwrap();
    assert_eq!(*state.borrow(), ChannelState::Disconnected);
    assert!(!device.is_open());

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.transport_errors, 1);
    assert_eq!(stats.frames_sent, 0);

    // the port can be reopened afterwards
    device.set_fail_writes(false);
    handle.connect().await.unwrap();
    handle.dispatch(command(&[(Axis::L0, 300.0)], None));
    settle().await;
    assert_eq!(device.lines(), vec!["L0300"]);
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_disconnects_with_a_full_request_queue() {
    let (handle, device, _task) = start(no_park());
    let mut state = handle.subscribe_state();
    handle.connect().await.unwrap();
    state.borrow_and_update();

    device.set_fail_writes(true);
    // more than the request queue holds, queued before the channel runs
    for value in 0..200 {
        handle.dispatch(command(&[(Axis::L0, value as f64)], None));
    }
    state.changed().await.unwrap();
    assert_eq!(*state.borrow(), ChannelState::Disconnected);
    assert!(!device.is_open());

    settle().await;
    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.transport_errors, 1);
    assert_eq!(stats.frames_sent, 0);
    assert_eq!(handle.state(), ChannelState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_inbound_bytes_are_counted() {
    let (handle, device, _task) = start(no_park());
    handle.connect().await.unwrap();
    assert!(device.push_inbound(b"TCode v0.3\n"));
    settle().await;
    assert_eq!(handle.stats().await.unwrap().bytes_received, 11);
}

#[tokio::test(start_paused = true)]
async fn test_temporary_smoothing_floors_intervals() {
    let (handle, device, _task) = start(OutputSettings {
        park_on_disconnect: false,
        smoothing: Duration::from_millis(1000),
    });
    handle.connect().await.unwrap();
    handle.enable_temp_smoothing().await.unwrap();

    handle.dispatch(command(&[(Axis::L0, 100.0)], Some(50)));
    settle().await;
    handle.dispatch(command(&[(Axis::L0, 200.0)], None));
    settle().await;

    tokio::time::sleep(Duration::from_millis(1100)).await;
    handle.dispatch(command(&[(Axis::L0, 300.0)], Some(50)));
    settle().await;

    let lines = device.lines();
    assert_eq!(lines.len(), 3);
    // both smoothed frames carry an interval close to the remaining window
    for line in &lines[..2] {
        let interval: u32 = line[6..].parse().unwrap();
        assert!((980..=1000).contains(&interval), "{}", line);
    }
    assert_eq!(lines[2], "L0300I0050");
}

#[tokio::test(start_paused = true)]
async fn test_output_range_applies_to_later_frames() {
    let (handle, device, _task) = start(no_park());
    handle.connect().await.unwrap();

    let mut range = OutputRange::default();
    range.intensity = 50.0;
    handle.set_output_range(range).await.unwrap();
    handle.dispatch(command(&[(Axis::L0, 1000.0)], None));
    settle().await;

    assert_eq!(device.lines(), vec!["L0750"]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_the_task() {
    let (handle, device, task) = start(OutputSettings::default());
    handle.connect().await.unwrap();
    handle.shutdown().await.unwrap();
    task.await.unwrap();

    assert!(!device.is_open());
    assert_eq!(device.lines().len(), 1);
    let err = assert_err!(handle.stats().await);
    assert!(matches!(err, OutputError::ActorGone));
}
