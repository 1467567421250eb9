//! Record from the simulator into real WAV files and read them back.

use ads1258_daq::acquisition::{ConsumerSettings, ProducerSettings};
use ads1258_daq::filter::{FilterKind, FilterSettings};
use ads1258_daq::hal::sim::{CounterSource, SimulatedAdc};
use ads1258_daq::rotation::RotationPolicy;
use ads1258_daq::sink::WavSink;
use ads1258_daq::{Ads1258, DeviceSettings, PipelineSettings, Supervisor};
use serial_test::serial;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

struct Parsed {
    channels: u16,
    sample_rate: u32,
    bits: u16,
    values: Vec<i32>,
    comment: String,
}

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn parse(path: &Path) -> Parsed {
    let bytes = fs::read(path).unwrap();
    assert_eq!(&bytes[0..4], b"RIFF");
    assert_eq!(u32_at(&bytes, 4) as usize, bytes.len() - 8);
    assert_eq!(&bytes[8..12], b"WAVE");
    assert_eq!(&bytes[36..40], b"data");

    let data_len = u32_at(&bytes, 40) as usize;
    let data = &bytes[44..44 + data_len];
    let values = data
        .chunks_exact(3)
        .map(|b| i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8)
        .collect();

    let list = 44 + data_len + data_len % 2;
    assert_eq!(&bytes[list..list + 4], b"LIST");
    let info = &bytes[list + 8..];
    let icmt = info
        .windows(4)
        .position(|w| w == b"ICMT")
        .expect("ICMT chunk");
    let len = u32_at(info, icmt + 4) as usize;
    let comment = String::from_utf8_lossy(&info[icmt + 8..icmt + 8 + len])
        .trim_end_matches('\0')
        .to_string();

    Parsed {
        channels: u16_at(&bytes, 22),
        sample_rate: u32_at(&bytes, 24),
        bits: u16_at(&bytes, 34),
        values,
        comment,
    }
}

#[test]
#[serial]
fn test_rotating_wav_recording() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("drongo_data");

    let settings = PipelineSettings {
        device: DeviceSettings {
            settle: Duration::ZERO,
            ..DeviceSettings::for_channels(2)
        },
        producer: ProducerSettings {
            poll_interval: Duration::ZERO,
            ..ProducerSettings::default()
        },
        consumer: ConsumerSettings {
            rotation: RotationPolicy::Frames(100),
            wait_timeout: Duration::from_millis(5),
            ..ConsumerSettings::default()
        },
        filter: FilterSettings {
            kind: FilterKind::None,
            ..FilterSettings::default()
        },
        event_poll: Duration::from_millis(5),
        ..PipelineSettings::default()
    };

    let adc = SimulatedAdc::new(CounterSource::new().limit(2 * 300));
    let sink = WavSink::new(&out).with_comment("bench run");
    let mut supervisor = Supervisor::new(Ads1258::new(adc.bus(), adc.pins()), sink, settings);
    let shutdown = supervisor.shutdown_handle();
    let handle = thread::spawn(move || supervisor.run());

    let deadline = Instant::now() + Duration::from_secs(20);
    while !adc.is_exhausted() {
        assert!(Instant::now() < deadline, "source never ran dry");
        thread::sleep(Duration::from_millis(2));
    }
    shutdown.request();
    let stats = handle.join().unwrap().unwrap();
    assert_eq!(stats.consumer.frames, 300);
    assert_eq!(stats.consumer.sessions, 3);

    let mut files: Vec<_> = fs::read_dir(&out)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    files.sort();
    assert_eq!(files.len(), 3);

    let mut values = Vec::new();
    for path in &files {
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("wav"));
        let parsed = parse(path);
        assert_eq!(parsed.channels, 2);
        assert_eq!(parsed.bits, 24);
        assert!(parsed.sample_rate > 0);
        assert_eq!(parsed.values.len(), 200, "{}", path.display());
        assert_eq!(parsed.comment, "bench run");
        // Frames never straddle a file boundary.
        assert!(parsed.values.chunks(2).all(|f| f[1] == f[0] + 1));
        values.extend(parsed.values);
    }
    values.sort_unstable();
    assert_eq!(values, (1..=600).collect::<Vec<_>>());
}
