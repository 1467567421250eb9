//! Supervisor for the acquisition pipeline.
//!
//! The [`Supervisor`] owns the device, the sink and both worker threads. It
//! configures the device before any worker runs, reacts to
//! [`PipelineEvent`]s, and performs every stop, reconfigure and start itself,
//! so no worker ever joins another.
//!
//! # Example
//!
//! ```rust,ignore
//! let adc = SimulatedAdc::new(CounterSource::new());
//! let device = Ads1258::new(adc.bus(), adc.pins());
//! let mut supervisor = Supervisor::new(device, WavSink::new("data"), PipelineSettings::default());
//! let shutdown = supervisor.shutdown_handle();
//! // ... from a signal handler:
//! shutdown.request();
//! let stats = supervisor.run()?;
//! ```

use crate::acquisition::{
    Consumer, ConsumerSettings, ConsumerSnapshot, ConsumerStats, PipelineEvent, Producer,
    ProducerSettings, ProducerSnapshot, ProducerStats, QueueStats, SampleQueue,
};
use crate::device::{Ads1258, DeviceSettings};
use crate::error::{DaqError, Result};
use crate::filter::{FilterBank, FilterSettings};
use crate::hal::{PinControl, SpiBus};
use crate::sink::FrameSink;
use std::sync::atomic::{AtomicBool, Ordering};
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SendError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

/// Everything the supervisor needs to (re)build the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Register configuration applied on every start.
    pub device: DeviceSettings,
    /// Producer tuning.
    pub producer: ProducerSettings,
    /// Consumer tuning.
    pub consumer: ConsumerSettings,
    /// Filter bank design.
    pub filter: FilterSettings,
    /// Samples the queue can hold.
    pub queue_capacity: usize,
    /// Queue length that wakes the consumer.
    pub high_water_mark: usize,
    /// Restarts allowed before giving up; `None` for no limit.
    pub max_restarts: Option<u32>,
    /// How often the supervisor checks for shutdown.
    pub event_poll: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            device: DeviceSettings::default(),
            producer: ProducerSettings::default(),
            consumer: ConsumerSettings::default(),
            filter: FilterSettings::default(),
            queue_capacity: 65_536,
            high_water_mark: 100,
            max_restarts: None,
            event_poll: Duration::from_millis(50),
        }
    }
}

/// Cloneable request to stop a running [`Supervisor`].
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    /// Fresh, unrequested handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the supervisor to stop.
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested.
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Pipeline-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Producer counters, cumulative across restarts.
    pub producer: ProducerSnapshot,
    /// Consumer counters, cumulative across restarts.
    pub consumer: ConsumerSnapshot,
    /// Queue traffic.
    pub queue: QueueStats,
    /// Restarts performed.
    pub restarts: u32,
}

/// Owns the device, the sink and both workers.
pub struct Supervisor<B, P, S>
where
    B: SpiBus + 'static,
    P: PinControl + 'static,
    S: FrameSink + 'static,
{
    settings: PipelineSettings,
    device: Option<Ads1258<B, P>>,
    sink: Option<S>,
    queue: Arc<SampleQueue>,
    producer_running: Arc<AtomicBool>,
    consumer_running: Arc<AtomicBool>,
    producer: Option<JoinHandle<Option<Ads1258<B, P>>>>,
    consumer: Option<JoinHandle<Option<(S, Result<()>)>>>,
    producer_stats: Arc<ProducerStats>,
    consumer_stats: Arc<ConsumerStats>,
    events_tx: Sender<PipelineEvent>,
    events_rx: Receiver<PipelineEvent>,
    shutdown: ShutdownHandle,
    restarts: u32,
}

impl<B, P, S> Supervisor<B, P, S>
where
    B: SpiBus + 'static,
    P: PinControl + 'static,
    S: FrameSink + 'static,
{
    /// Supervisor over an unconfigured device.
    pub fn new(device: Ads1258<B, P>, sink: S, settings: PipelineSettings) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            queue: Arc::new(SampleQueue::new(
                settings.queue_capacity,
                settings.high_water_mark,
            )),
            settings,
            device: Some(device),
            sink: Some(sink),
            producer_running: Arc::new(AtomicBool::new(false)),
            consumer_running: Arc::new(AtomicBool::new(false)),
            producer: None,
            consumer: None,
            producer_stats: Arc::new(ProducerStats::default()),
            consumer_stats: Arc::new(ConsumerStats::default()),
            events_tx,
            events_rx,
            shutdown: ShutdownHandle::new(),
            restarts: 0,
        }
    }

    /// Use an existing shutdown handle, e.g. one already wired to a signal.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Handle that stops [`run`](Self::run) from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Whether any worker is alive.
    pub fn is_running(&self) -> bool {
        self.producer.is_some() || self.consumer.is_some()
    }

    /// The device, while no producer holds it.
    pub fn device(&self) -> Option<&Ads1258<B, P>> {
        self.device.as_ref()
    }

    /// Settings in use.
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Current counters.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            producer: self.producer_stats.snapshot(),
            consumer: self.consumer_stats.snapshot(),
            queue: self.queue.stats(),
            restarts: self.restarts,
        }
    }

    /// Configure the device and launch both workers.
    ///
    /// A configuration that does not verify within the retry budget is
    /// returned as an error and nothing is started.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(DaqError::InvalidState {
                state: "running",
                operation: "start",
            });
        }
        if self.sink.is_none() {
            return Err(DaqError::InvalidState {
                state: "sink detached",
                operation: "start",
            });
        }
        let device = self.device.as_mut().ok_or(DaqError::InvalidState {
            state: "device detached",
            operation: "start",
        })?;

        device.configure(&self.settings.device)?;
        let active = device.active_channels();
        let frame_rate = device.frame_rate();
        let filters = FilterBank::from_settings(&self.settings.filter, active.len(), frame_rate)?;

        let (Some(device), Some(sink)) = (self.device.take(), self.sink.take()) else {
            return Err(DaqError::InvalidState {
                state: "detached",
                operation: "start",
            });
        };

        self.consumer_running.store(true, Ordering::Release);
        let consumer = Consumer::new(
            active,
            frame_rate,
            filters,
            sink,
            self.settings.consumer.clone(),
            Arc::clone(&self.queue),
            Arc::clone(&self.consumer_running),
            self.events_tx.clone(),
            Arc::clone(&self.consumer_stats),
        );
        let builder = thread::Builder::new().name("consumer".to_string());
        match spawn_worker(builder, consumer, Consumer::run) {
            Ok(handle) => self.consumer = Some(handle),
            Err((consumer, err)) => {
                error!(error = %err, "could not spawn consumer");
                self.consumer_running.store(false, Ordering::Release);
                self.sink = Some(consumer.into_sink());
                self.device = Some(device);
                return Err(err.into());
            }
        }

        self.producer_running.store(true, Ordering::Release);
        let producer = Producer::new(
            device,
            Arc::clone(&self.queue),
            Arc::clone(&self.producer_running),
            self.events_tx.clone(),
            self.settings.producer.clone(),
            Arc::clone(&self.producer_stats),
        );
        let builder = thread::Builder::new().name("producer".to_string());
        match spawn_worker(builder, producer, Producer::run) {
            Ok(handle) => self.producer = Some(handle),
            Err((producer, err)) => {
                error!(error = %err, "could not spawn producer");
                self.producer_running.store(false, Ordering::Release);
                self.device = Some(producer.into_device());
                if let Err(consumer_err) = self.join_consumer() {
                    warn!(error = %consumer_err, "consumer failed while abandoning start");
                }
                return Err(err.into());
            }
        }

        info!(
            channels = active.len(),
            frame_rate,
            restarts = self.restarts,
            "acquisition started"
        );
        Ok(())
    }

    /// Start if needed and supervise until shutdown is requested or a fatal
    /// error occurs. Workers are always stopped before this returns.
    pub fn run(&mut self) -> Result<PipelineStats> {
        if !self.is_running() {
            self.start()?;
        }
        let supervised = self.supervise();
        let stopped = self.stop();
        supervised.and(stopped)?;

        let stats = self.stats();
        info!(
            frames = stats.consumer.frames,
            accepted = stats.producer.accepted,
            faults = stats.producer.faults(),
            restarts = stats.restarts,
            "acquisition finished"
        );
        Ok(stats)
    }

    fn supervise(&mut self) -> Result<()> {
        while !self.shutdown.is_requested() {
            match self.events_rx.recv_timeout(self.settings.event_poll) {
                Ok(PipelineEvent::FaultLimit { faults }) => self.restart(faults)?,
                Ok(PipelineEvent::StartFailed) => {
                    warn!("producer never started converting");
                    self.restart(0)?;
                }
                Ok(PipelineEvent::ConsumerExited) => {
                    // The consumer's own error comes back through the join.
                    self.stop()?;
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(())
    }

    /// Stop both workers, reconfigure the device and start again.
    pub fn restart(&mut self, faults: u64) -> Result<()> {
        self.restarts += 1;
        if let Some(limit) = self.settings.max_restarts {
            if self.restarts > limit {
                error!(restarts = limit, "restart limit reached");
                return Err(DaqError::RestartLimit { restarts: limit });
            }
        }
        warn!(faults, restart = self.restarts, "restarting acquisition");
        self.stop()?;
        self.start()?;
        info!(restart = self.restarts, "acquisition restarted");
        Ok(())
    }

    /// Stop the producer, then let the consumer flush and close its session.
    pub fn stop(&mut self) -> Result<()> {
        let producer = self.join_producer();
        let consumer = self.join_consumer();
        producer.and(consumer)
    }

    fn join_producer(&mut self) -> Result<()> {
        self.producer_running.store(false, Ordering::Release);
        let Some(handle) = self.producer.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(Some(device)) => {
                self.device = Some(device);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(_) => {
                error!("producer thread panicked");
                Err(DaqError::WorkerPanicked("producer"))
            }
        }
    }

    fn join_consumer(&mut self) -> Result<()> {
        self.consumer_running.store(false, Ordering::Release);
        self.queue.wake();
        let Some(handle) = self.consumer.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(Some((sink, result))) => {
                self.sink = Some(sink);
                result
            }
            Ok(None) => Ok(()),
            Err(_) => {
                error!("consumer thread panicked");
                Err(DaqError::WorkerPanicked("consumer"))
            }
        }
    }

    /// Take back the device and sink. Stops the workers first.
    pub fn into_parts(mut self) -> (Option<Ads1258<B, P>>, Option<S>) {
        if let Err(err) = self.stop() {
            warn!(error = %err, "error while stopping pipeline");
        }
        (self.device.take(), self.sink.take())
    }
}

/// Spawn a thread that waits for `worker` before calling `run` on it.
///
/// The worker only crosses into the thread after the spawn succeeded, so on
/// failure it comes back to the caller together with the error. The handle
/// yields `None` if the worker never arrived.
fn spawn_worker<W, T, F>(
    builder: thread::Builder,
    worker: W,
    run: F,
) -> std::result::Result<JoinHandle<Option<T>>, (W, io::Error)>
where
    W: Send + 'static,
    T: Send + 'static,
    F: FnOnce(W) -> T + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel::<W>(1);
    let handle = match builder.spawn(move || rx.recv().ok().map(run)) {
        Ok(handle) => handle,
        Err(err) => return Err((worker, err)),
    };
    match tx.send(worker) {
        Ok(()) => Ok(handle),
        Err(SendError(worker)) => {
            if handle.join().is_err() {
                error!("worker thread panicked before start");
            }
            Err((worker, io::Error::other("worker thread exited before start")))
        }
    }
}

impl<B, P, S> Drop for Supervisor<B, P, S>
where
    B: SpiBus + 'static,
    P: PinControl + 'static,
    S: FrameSink + 'static,
{
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(err) = self.stop() {
                error!(error = %err, "error stopping pipeline on drop");
            }
        }
    }
}
