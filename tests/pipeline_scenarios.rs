//! End-to-end pipeline tests against the simulated converter.
//!
//! Each test runs a [`Supervisor`] on its own thread, waits until the
//! simulated source has served every conversion, requests shutdown and then
//! inspects what reached the sink.

use ads1258_daq::acquisition::{ConsumerSettings, GapFill, ProducerSettings};
use ads1258_daq::filter::{FilterKind, FilterSettings};
use ads1258_daq::hal::sim::{CounterSource, SimBus, SimPins, SimulatedAdc};
use ads1258_daq::rotation::RotationPolicy;
use ads1258_daq::sink::RecordingSink;
use ads1258_daq::{
    Ads1258, DaqError, DeviceSettings, DeviceState, PipelineSettings, PipelineStats, Supervisor,
};
use serial_test::serial;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type SimSupervisor = Supervisor<SimBus, SimPins, RecordingSink>;

fn settings(channels: usize) -> PipelineSettings {
    PipelineSettings {
        device: DeviceSettings {
            settle: Duration::ZERO,
            ..DeviceSettings::for_channels(channels)
        },
        producer: ProducerSettings {
            poll_interval: Duration::ZERO,
            ..ProducerSettings::default()
        },
        consumer: ConsumerSettings {
            rotation: RotationPolicy::Never,
            wait_timeout: Duration::from_millis(5),
            ..ConsumerSettings::default()
        },
        filter: FilterSettings {
            kind: FilterKind::None,
            ..FilterSettings::default()
        },
        event_poll: Duration::from_millis(5),
        ..PipelineSettings::default()
    }
}

/// Run a supervisor in the background; the handle returns the supervisor
/// together with the outcome of `run`.
fn spawn(
    adc: &SimulatedAdc,
    sink: RecordingSink,
    settings: PipelineSettings,
) -> (
    ads1258_daq::ShutdownHandle,
    JoinHandle<(SimSupervisor, ads1258_daq::Result<PipelineStats>)>,
) {
    let device = Ads1258::new(adc.bus(), adc.pins());
    let mut supervisor = Supervisor::new(device, sink, settings);
    let shutdown = supervisor.shutdown_handle();
    let handle = thread::spawn(move || {
        let result = supervisor.run();
        (supervisor, result)
    });
    (shutdown, handle)
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(20);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

fn record(
    adc: &SimulatedAdc,
    settings: PipelineSettings,
) -> (RecordingSink, SimSupervisor, PipelineStats) {
    let recording = RecordingSink::new();
    let (shutdown, handle) = spawn(adc, recording.clone(), settings);
    wait_until("source exhaustion", || adc.is_exhausted());
    shutdown.request();
    let (supervisor, result) = handle.join().unwrap();
    (recording, supervisor, result.unwrap())
}

#[test]
#[serial]
fn test_counter_stream_is_lossless() {
    let adc = SimulatedAdc::new(CounterSource::new().limit(1000));
    let (recording, _supervisor, stats) = record(&adc, settings(1));

    let expected: Vec<Vec<i32>> = (1..=1000).map(|v| vec![v]).collect();
    assert_eq!(recording.frames(), expected);
    assert_eq!(stats.producer.accepted, 1000);
    assert_eq!(stats.producer.faults(), 0);
    assert_eq!(stats.consumer.frames, 1000);
    assert_eq!(stats.restarts, 0);
}

#[test]
#[serial]
fn test_unrefreshed_reads_are_dropped() {
    let adc = SimulatedAdc::new(CounterSource::new().limit(1000).repeat_every(2));
    let (recording, _supervisor, stats) = record(&adc, settings(1));

    let values: Vec<i32> = recording.frames().concat();
    assert_eq!(values, (1..=1000).collect::<Vec<_>>());
    assert!(stats.producer.duplicates >= 999);
    assert_eq!(stats.producer.faults(), 0);
}

#[test]
#[serial]
fn test_stuck_channel_is_gap_filled() {
    // Position 2 reports 0 except on every eighth pass. 1001 passes end on a
    // live pass, so every frame has a later value to borrow.
    let adc = SimulatedAdc::new(CounterSource::new().limit(4 * 1001).stuck_channel(2, 8));
    let (recording, _supervisor, stats) = record(&adc, settings(4));

    let frames = recording.frames();
    assert_eq!(frames.len(), 1001);
    assert!(frames.iter().all(|frame| frame.len() == 4));
    assert!(frames.iter().all(|frame| frame[2] != 0), "sentinel reached the sink");
    for window in frames.windows(2) {
        assert!(window[1][0] > window[0][0], "frames out of order");
    }
    // Pass 7 borrows from pass 8, whose position 2 is conversion 8 * 4 + 3.
    assert_eq!(frames[7][2], 35);
    assert!(stats.consumer.substitutions >= 875);
    assert_eq!(recording.format().map(|f| f.channels), Some(4));
}

#[test]
#[serial]
fn test_dead_channel_keeps_every_frame() {
    // 1000 passes is five times the reassembly window, so the buffer fills
    // and drains repeatedly with nothing to borrow for position 2.
    let adc = SimulatedAdc::new(CounterSource::new().limit(4 * 1000).dead_channel(2));
    let (recording, _supervisor, stats) = record(&adc, settings(4));

    let frames = recording.frames();
    assert_eq!(frames.len(), 1000);
    for (pass, frame) in frames.iter().enumerate() {
        let base = 4 * pass as i32;
        assert_eq!(frame, &vec![base + 1, base + 2, 0, base + 4], "pass {pass}");
    }
    assert_eq!(stats.producer.accepted, 4000);
    assert_eq!(stats.consumer.frames, 1000);
    assert_eq!(stats.consumer.substitutions, 0);
    assert_eq!(stats.restarts, 0);
}

#[test]
#[serial]
fn test_zeros_reach_sink_only_without_later_value() {
    // Position 2 is live on passes 0 and 999 only.
    let adc = SimulatedAdc::new(CounterSource::new().limit(4 * 1000).stuck_channel(2, 999));
    let (recording, _supervisor, stats) = record(&adc, settings(4));

    let frames = recording.frames();
    assert_eq!(frames.len(), 1000);
    assert!(frames.iter().all(|frame| frame.len() == 4));
    assert_eq!(frames[0][2], 3);
    assert_eq!(frames[999][2], 3999);

    // The window always holds the ten newest frames, so those borrow the
    // final value. Older frames borrow it only if they were still buffered.
    assert!(frames[989..].iter().all(|frame| frame[2] == 3999));
    let tail: Vec<i32> = frames[1..999].iter().map(|frame| frame[2]).collect();
    assert!(tail.iter().all(|v| *v == 0 || *v == 3999));
    let first_filled = tail.iter().position(|v| *v == 3999).unwrap();
    assert!(tail[first_filled..].iter().all(|v| *v == 3999));
    assert_eq!(stats.consumer.substitutions, (998 - first_filled) as u64);
}

#[test]
#[serial]
fn test_interpolated_gap_fill_stays_between_neighbours() {
    let adc = SimulatedAdc::new(CounterSource::new().limit(4 * 1001).stuck_channel(2, 8));
    let mut settings = settings(4);
    settings.consumer.gap_fill = GapFill::Interpolate;
    let (recording, _supervisor, _stats) = record(&adc, settings);

    let frames = recording.frames();
    assert_eq!(frames.len(), 1001);
    // Live values at passes 0 and 8 are 3 and 35.
    for frame in &frames[1..8] {
        assert!(frame[2] > 3 && frame[2] < 35, "{}", frame[2]);
    }
    for window in frames[..9].windows(2) {
        assert!(window[1][2] >= window[0][2]);
    }
}

#[test]
#[serial]
fn test_desync_triggers_restart() {
    let adc = SimulatedAdc::new(CounterSource::new().limit(2000));
    adc.inject_desync(150);
    let (recording, supervisor, stats) = record(&adc, settings(1));

    assert_eq!(stats.restarts, 1);
    assert!(stats.producer.desyncs >= 101);
    assert_eq!(recording.sessions().len(), 2);
    assert!(recording.sessions().iter().all(|s| s.closed));
    assert_eq!(supervisor.device().map(|d| d.state()), Some(DeviceState::Active));

    let values: Vec<i32> = recording.frames().concat();
    assert!(!values.is_empty());
    assert!(values.windows(2).all(|w| w[1] > w[0]));
    assert_eq!(values.last(), Some(&2000));
}

#[test]
#[serial]
fn test_transport_faults_are_absorbed() {
    let adc = SimulatedAdc::new(CounterSource::new().limit(500));
    adc.inject_transfer_faults(50);
    let (recording, _supervisor, stats) = record(&adc, settings(2));

    assert_eq!(stats.restarts, 0);
    assert_eq!(stats.producer.transport_faults, 50);
    assert_eq!(recording.frame_count(), 250);
}

#[test]
#[serial]
fn test_sink_failure_stops_pipeline() {
    let adc = SimulatedAdc::new(CounterSource::new());
    let recording = RecordingSink::new().failing_after(20);
    let (_shutdown, handle) = spawn(&adc, recording.clone(), settings(1));

    let (supervisor, result) = handle.join().unwrap();
    let err = result.unwrap_err();
    assert!(err.is_storage(), "{err}");
    assert!(!supervisor.is_running());
    assert_eq!(recording.frame_count(), 20);
}

#[test]
#[serial]
fn test_rotation_splits_sessions_between_frames() {
    let adc = SimulatedAdc::new(CounterSource::new().limit(2 * 250));
    let mut settings = settings(2);
    settings.consumer.rotation = RotationPolicy::Frames(100);
    let (recording, _supervisor, stats) = record(&adc, settings);

    let sizes: Vec<usize> = recording.sessions().iter().map(|s| s.frames.len()).collect();
    assert_eq!(sizes, vec![100, 100, 50]);
    assert_eq!(stats.consumer.sessions, 3);
    assert_eq!(recording.frames().concat(), (1..=500).collect::<Vec<_>>());
}

#[test]
#[serial]
fn test_unverifiable_device_is_fatal() {
    let adc = SimulatedAdc::new(CounterSource::new());
    adc.corrupt_readbacks(usize::MAX);
    let mut settings = settings(1);
    settings.device.retries = 3;
    let (_shutdown, handle) = spawn(&adc, RecordingSink::new(), settings);

    let (_supervisor, result) = handle.join().unwrap();
    assert!(matches!(
        result,
        Err(DaqError::ConfigurationFailed { attempts: 3 })
    ));
}
