//! Real-time acquisition loop.
//!
//! The producer polls the device, rejects unrefreshed and inconsistent reads
//! and pushes what is left into the shared [`SampleQueue`]. Faults are
//! counted by a [`FaultTracker`]; once it trips the producer marks the device
//! faulted, reports [`PipelineEvent::FaultLimit`] and returns, handing the
//! device back to whoever joins it. If START cannot be raised at all it
//! reports [`PipelineEvent::StartFailed`] instead.

use super::queue::SampleQueue;
use super::PipelineEvent;
use crate::device::{Ads1258, Readout};
use crate::hal::{PinControl, SpiBus};
use crate::protocol::{ChannelId, ChannelSample, ChannelSet};
use crate::sched;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Producer tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerSettings {
    /// Sleep between polls when DRDY is not used.
    pub poll_interval: Duration,
    /// Block on the DRDY edge instead of sleeping.
    pub use_data_ready: bool,
    /// Longest wait for a DRDY edge.
    pub data_ready_timeout: Duration,
    /// Faults tolerated before a restart is requested.
    pub fault_threshold: u64,
    /// Count faults per this many reads; `None` counts since start.
    pub fault_window: Option<u64>,
    /// Request `SCHED_FIFO` at maximum priority.
    pub realtime: bool,
    /// Pin the producer to this core.
    pub core: Option<usize>,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_micros(20),
            use_data_ready: false,
            data_ready_timeout: Duration::from_millis(10),
            fault_threshold: 100,
            fault_window: None,
            realtime: false,
            core: None,
        }
    }
}

/// Outcome of classifying one readout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// This many samples were appended to the output.
    Accepted(usize),
    /// Nothing new since the previous accepted sample.
    Duplicate,
    /// The two halves of a dual read disagree in exactly one field.
    Desync,
    /// A channel outside the activation set was reported.
    UnknownChannel(ChannelId),
}

impl Verdict {
    /// Whether the verdict counts against the fault threshold.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Desync | Self::UnknownChannel(_))
    }
}

/// Duplicate, desync and channel checks applied to every readout.
#[derive(Debug, Clone)]
pub struct ReadoutFilter {
    active: ChannelSet,
    last: Option<ChannelSample>,
}

impl ReadoutFilter {
    /// Filter for the given activation set.
    pub fn new(active: ChannelSet) -> Self {
        Self { active, last: None }
    }

    /// Last sample accepted.
    pub fn last(&self) -> Option<ChannelSample> {
        self.last
    }

    /// Classify `readout`, appending accepted samples to `out`.
    ///
    /// A dual read whose halves are identical yields one sample. Halves that
    /// differ in both channel and value straddled a conversion and yield two.
    /// Halves that differ in only one field are a desync. A sample equal to
    /// the last accepted one (channel and value) is an unrefreshed repeat.
    pub fn classify(&mut self, readout: Readout, out: &mut Vec<ChannelSample>) -> Verdict {
        let (first, second) = match readout {
            Readout::Single(a) => (a, None),
            Readout::Dual(a, b) if a == b => (a, None),
            Readout::Dual(a, b) if a.channel != b.channel && a.value != b.value => (a, Some(b)),
            Readout::Dual(..) => return Verdict::Desync,
        };

        for sample in std::iter::once(first).chain(second) {
            if !self.active.contains(sample.channel) {
                return Verdict::UnknownChannel(sample.channel);
            }
        }

        let before = out.len();
        for sample in std::iter::once(first).chain(second) {
            if self.last == Some(sample) {
                continue;
            }
            out.push(sample);
            self.last = Some(sample);
        }
        match out.len() - before {
            0 => Verdict::Duplicate,
            n => Verdict::Accepted(n),
        }
    }
}

/// Counts faults against a threshold, either since start or per window of
/// reads.
#[derive(Debug, Clone)]
pub struct FaultTracker {
    threshold: u64,
    window: Option<u64>,
    faults: u64,
    reads: u64,
}

impl FaultTracker {
    /// Tracker tripping when more than `threshold` faults are counted.
    pub fn new(threshold: u64, window: Option<u64>) -> Self {
        Self {
            threshold,
            window: window.filter(|w| *w > 0),
            faults: 0,
            reads: 0,
        }
    }

    /// Note one read attempt. Starts a new window when the current one is
    /// full.
    pub fn record_read(&mut self) {
        self.reads += 1;
        if let Some(window) = self.window {
            if self.reads > window {
                self.reads = 1;
                self.faults = 0;
            }
        }
    }

    /// Note one fault. Returns `true` once the threshold is exceeded.
    pub fn record_fault(&mut self) -> bool {
        self.faults += 1;
        self.faults > self.threshold
    }

    /// Faults in the current window.
    pub fn faults(&self) -> u64 {
        self.faults
    }
}

/// Live producer counters.
#[derive(Debug, Default)]
pub struct ProducerStats {
    reads: AtomicU64,
    accepted: AtomicU64,
    duplicates: AtomicU64,
    desyncs: AtomicU64,
    unknown_channels: AtomicU64,
    transport_faults: AtomicU64,
    overruns: AtomicU64,
}

/// Point-in-time copy of [`ProducerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerSnapshot {
    /// Read attempts.
    pub reads: u64,
    /// Samples pushed to the queue.
    pub accepted: u64,
    /// Reads rejected as unrefreshed.
    pub duplicates: u64,
    /// Dual reads whose halves disagreed.
    pub desyncs: u64,
    /// Reads reporting an inactive channel.
    pub unknown_channels: u64,
    /// Reads that failed on the bus.
    pub transport_faults: u64,
    /// Accepted samples dropped by a full queue.
    pub overruns: u64,
}

impl ProducerStats {
    /// Copy the counters.
    pub fn snapshot(&self) -> ProducerSnapshot {
        ProducerSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            desyncs: self.desyncs.load(Ordering::Relaxed),
            unknown_channels: self.unknown_channels.load(Ordering::Relaxed),
            transport_faults: self.transport_faults.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
        }
    }
}

impl ProducerSnapshot {
    /// Faults of every kind.
    pub fn faults(&self) -> u64 {
        self.desyncs + self.unknown_channels + self.transport_faults
    }
}

/// The acquisition worker. Owns the device while it runs.
pub struct Producer<B, P> {
    device: Ads1258<B, P>,
    queue: Arc<SampleQueue>,
    running: Arc<AtomicBool>,
    events: Sender<PipelineEvent>,
    settings: ProducerSettings,
    stats: Arc<ProducerStats>,
}

impl<B: SpiBus, P: PinControl> Producer<B, P> {
    /// Producer feeding `queue` until `running` clears.
    pub fn new(
        device: Ads1258<B, P>,
        queue: Arc<SampleQueue>,
        running: Arc<AtomicBool>,
        events: Sender<PipelineEvent>,
        settings: ProducerSettings,
        stats: Arc<ProducerStats>,
    ) -> Self {
        Self {
            device,
            queue,
            running,
            events,
            settings,
            stats,
        }
    }

    fn apply_scheduling(&self) {
        if self.settings.realtime {
            match sched::set_realtime_priority() {
                Ok(priority) => debug!(priority, "producer running SCHED_FIFO"),
                Err(err) => warn!(error = %err, "could not raise producer priority"),
            }
        }
        if let Some(core) = self.settings.core {
            match sched::set_thread_affinity(core) {
                Ok(()) => debug!(core, "producer pinned"),
                Err(err) => warn!(core, error = %err, "could not pin producer"),
            }
        }
    }

    fn pace(&mut self) {
        if self.settings.use_data_ready {
            if let Err(err) = self.device.await_data_ready(self.settings.data_ready_timeout) {
                trace!(error = %err, "DRDY wait failed");
            }
        } else if !self.settings.poll_interval.is_zero() {
            std::thread::sleep(self.settings.poll_interval);
        }
    }

    fn escalate(&mut self, event: PipelineEvent) {
        self.device.mark_fault();
        if self.events.send(event).is_err() {
            debug!(?event, "supervisor gone, fault report dropped");
        }
    }

    fn fault_limit(&mut self, faults: u64) {
        warn!(faults, "too many read faults, requesting restart");
        self.escalate(PipelineEvent::FaultLimit { faults });
    }

    /// Hand the device back without running.
    pub fn into_device(self) -> Ads1258<B, P> {
        self.device
    }

    /// Sample until stopped or the fault threshold trips, then return the
    /// device.
    pub fn run(mut self) -> Ads1258<B, P> {
        self.apply_scheduling();

        let mut tracker = FaultTracker::new(self.settings.fault_threshold, self.settings.fault_window);
        let mut filter = ReadoutFilter::new(self.device.active_channels());
        let mut accepted = Vec::with_capacity(2);

        info!(
            channels = self.device.active_channels().len(),
            frame_rate = self.device.frame_rate(),
            "starting sampling"
        );
        if let Err(err) = self.device.start(true) {
            warn!(error = %err, "could not start conversions, requesting restart");
            self.escalate(PipelineEvent::StartFailed);
            return self.device;
        }

        while self.running.load(Ordering::Acquire) {
            self.pace();
            tracker.record_read();
            self.stats.reads.fetch_add(1, Ordering::Relaxed);

            let readout = match self.device.read_data() {
                Ok(readout) => readout,
                Err(err) => {
                    self.stats.transport_faults.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %err, faults = tracker.faults() + 1, "read failed");
                    if tracker.record_fault() {
                        self.fault_limit(tracker.faults());
                        break;
                    }
                    continue;
                }
            };

            accepted.clear();
            let verdict = filter.classify(readout, &mut accepted);
            match verdict {
                Verdict::Accepted(n) => {
                    let dropped = self.queue.push(&accepted);
                    self.stats.accepted.fetch_add((n - dropped) as u64, Ordering::Relaxed);
                    if dropped > 0 {
                        self.stats.overruns.fetch_add(dropped as u64, Ordering::Relaxed);
                        trace!(dropped, "queue full");
                    }
                }
                Verdict::Duplicate => {
                    self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                }
                Verdict::Desync => {
                    self.stats.desyncs.fetch_add(1, Ordering::Relaxed);
                    warn!(?readout, faults = tracker.faults() + 1, "dual read disagrees");
                }
                Verdict::UnknownChannel(channel) => {
                    self.stats.unknown_channels.fetch_add(1, Ordering::Relaxed);
                    warn!(%channel, faults = tracker.faults() + 1, "misread of adc data");
                }
            }
            if verdict.is_fault() && tracker.record_fault() {
                self.fault_limit(tracker.faults());
                break;
            }
        }

        if let Err(err) = self.device.start(false) {
            warn!(error = %err, "could not stop conversions");
        }
        let stats = self.stats.snapshot();
        info!(
            reads = stats.reads,
            accepted = stats.accepted,
            duplicates = stats.duplicates,
            faults = stats.faults(),
            "producer stopped"
        );
        self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceSettings;
    use crate::hal::sim::{CounterSource, ScriptedSource, SimBus, SimPins, SimRead, SimulatedAdc};
    use crate::hal::Pin;
    use std::sync::mpsc;

    type SimDevice = Ads1258<SimBus, SimPins>;

    fn s(ch: u8, value: i32) -> ChannelSample {
        ChannelSample::new(ChannelId::single_ended(ch), value)
    }

    fn active() -> ChannelSet {
        [0u8, 1, 2].into_iter().map(ChannelId::single_ended).collect()
    }

    #[test]
    fn test_identical_halves_yield_one_sample() {
        let mut filter = ReadoutFilter::new(active());
        let mut out = Vec::new();
        assert_eq!(filter.classify(Readout::Dual(s(0, 5), s(0, 5)), &mut out), Verdict::Accepted(1));
        assert_eq!(out, vec![s(0, 5)]);
    }

    #[test]
    fn test_straddled_halves_yield_two_samples() {
        let mut filter = ReadoutFilter::new(active());
        let mut out = Vec::new();
        assert_eq!(filter.classify(Readout::Dual(s(0, 5), s(1, 6)), &mut out), Verdict::Accepted(2));
        assert_eq!(out, vec![s(0, 5), s(1, 6)]);
    }

    #[test]
    fn test_single_field_mismatch_is_desync() {
        let mut filter = ReadoutFilter::new(active());
        let mut out = Vec::new();
        assert_eq!(filter.classify(Readout::Dual(s(0, 5), s(0, 6)), &mut out), Verdict::Desync);
        assert_eq!(filter.classify(Readout::Dual(s(0, 5), s(1, 5)), &mut out), Verdict::Desync);
        assert!(out.is_empty());
    }

    #[test]
    fn test_repeat_of_last_sample_is_duplicate() {
        let mut filter = ReadoutFilter::new(active());
        let mut out = Vec::new();
        filter.classify(Readout::Single(s(0, 5)), &mut out);
        assert_eq!(filter.classify(Readout::Single(s(0, 5)), &mut out), Verdict::Duplicate);
        // Same value on another channel is new data.
        assert_eq!(filter.classify(Readout::Single(s(1, 5)), &mut out), Verdict::Accepted(1));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_straddle_after_repeat_keeps_new_half() {
        let mut filter = ReadoutFilter::new(active());
        let mut out = Vec::new();
        filter.classify(Readout::Single(s(0, 5)), &mut out);
        out.clear();
        assert_eq!(filter.classify(Readout::Dual(s(0, 5), s(1, 6)), &mut out), Verdict::Accepted(1));
        assert_eq!(out, vec![s(1, 6)]);
    }

    #[test]
    fn test_inactive_channel_rejected() {
        let mut filter = ReadoutFilter::new(active());
        let mut out = Vec::new();
        let verdict = filter.classify(Readout::Single(s(9, 1)), &mut out);
        assert_eq!(verdict, Verdict::UnknownChannel(ChannelId::single_ended(9)));
        assert!(verdict.is_fault());
        assert!(out.is_empty());
        assert_eq!(filter.last(), None);
    }

    #[test]
    fn test_fault_tracker_cumulative() {
        let mut tracker = FaultTracker::new(2, None);
        assert!(!tracker.record_fault());
        assert!(!tracker.record_fault());
        for _ in 0..1000 {
            tracker.record_read();
        }
        assert!(tracker.record_fault());
    }

    #[test]
    fn test_fault_tracker_window_resets() {
        let mut tracker = FaultTracker::new(2, Some(10));
        for _ in 0..10 {
            tracker.record_read();
            assert!(!tracker.record_fault() || tracker.faults() > 2);
            if tracker.faults() == 2 {
                break;
            }
        }
        for _ in 0..10 {
            tracker.record_read();
        }
        assert_eq!(tracker.faults(), 0);
        assert!(!tracker.record_fault());
    }

    fn spawn_producer(
        adc: &SimulatedAdc,
        channels: usize,
        settings: ProducerSettings,
    ) -> (
        Arc<SampleQueue>,
        Arc<AtomicBool>,
        mpsc::Receiver<PipelineEvent>,
        std::thread::JoinHandle<SimDevice>,
    ) {
        spawn_configured(configured(adc, channels), settings)
    }

    fn configured(adc: &SimulatedAdc, channels: usize) -> SimDevice {
        let mut device = Ads1258::new(adc.bus(), adc.pins());
        let device_settings = DeviceSettings {
            settle: Duration::ZERO,
            ..DeviceSettings::for_channels(channels)
        };
        device.configure(&device_settings).unwrap();
        device
    }

    fn spawn_configured(
        device: SimDevice,
        settings: ProducerSettings,
    ) -> (
        Arc<SampleQueue>,
        Arc<AtomicBool>,
        mpsc::Receiver<PipelineEvent>,
        std::thread::JoinHandle<SimDevice>,
    ) {
        let queue = Arc::new(SampleQueue::new(10_000, 100));
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel();
        let producer = Producer::new(
            device,
            Arc::clone(&queue),
            Arc::clone(&running),
            tx,
            settings,
            Arc::new(ProducerStats::default()),
        );
        let handle = std::thread::spawn(move || producer.run());
        (queue, running, rx, handle)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while !condition() {
            assert!(std::time::Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_producer_enqueues_unique_samples() {
        let adc = SimulatedAdc::new(CounterSource::new().limit(50).repeat_every(2));
        let (queue, running, _rx, handle) = spawn_producer(&adc, 2, ProducerSettings::default());
        wait_for(|| adc.is_exhausted());
        running.store(false, Ordering::Release);
        let device = handle.join().unwrap();

        let mut out = Vec::new();
        queue.drain_into(&mut out);
        let values: Vec<i32> = out.iter().map(|s| s.value).collect();
        assert_eq!(values, (1..=50).collect::<Vec<_>>());
        assert_eq!(device.state(), crate::device::DeviceState::Active);
    }

    #[test]
    fn test_producer_survives_transport_faults() {
        let adc = SimulatedAdc::new(CounterSource::new().limit(20));
        adc.inject_transfer_faults(5);
        let (queue, running, rx, handle) = spawn_producer(&adc, 1, ProducerSettings::default());
        wait_for(|| adc.is_exhausted());
        running.store(false, Ordering::Release);
        handle.join().unwrap();

        assert_eq!(queue.len(), 20);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_producer_escalates_past_threshold() {
        let bad = ChannelSample::new(ChannelId::differential(0), 1);
        let reads = (0..20).map(|i| SimRead::Fresh(ChannelSample::new(bad.channel, i + 1)));
        let adc = SimulatedAdc::new(ScriptedSource::new(reads));
        let settings = ProducerSettings {
            fault_threshold: 5,
            ..ProducerSettings::default()
        };
        let (_queue, _running, rx, handle) = spawn_producer(&adc, 1, settings);

        let event = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(event, PipelineEvent::FaultLimit { faults: 6 });
        let device = handle.join().unwrap();
        assert_eq!(device.state(), crate::device::DeviceState::Fault);
    }

    #[test]
    fn test_start_pin_failure_reported_as_start_failed() {
        let adc = SimulatedAdc::new(CounterSource::new().limit(20));
        let device = configured(&adc, 1);
        adc.fail_pin(Pin::Start);
        let (queue, _running, rx, handle) = spawn_configured(device, ProducerSettings::default());

        let device = handle.join().unwrap();
        assert_eq!(rx.try_recv(), Ok(PipelineEvent::StartFailed));
        assert!(rx.try_recv().is_err());
        assert_eq!(device.state(), crate::device::DeviceState::Fault);
        assert!(queue.is_empty());
        assert_eq!(adc.data_reads(), 0);
    }
}
