//! Frame reassembly worker.
//!
//! Drains the sample queue whenever the producer signals the high-water mark,
//! aligns samples into frames, gap-fills and filters them, and writes one
//! frame per sink call. Session rollover happens here, strictly between two
//! frame writes.

use super::queue::SampleQueue;
use super::reassembly::{FrameAssembler, FrameBuffer, GapFill};
use super::PipelineEvent;
use crate::error::Result;
use crate::filter::FilterBank;
use crate::protocol::{ChannelSample, ChannelSet};
use crate::rotation::{RotationController, RotationPolicy, SessionNamer};
use crate::sink::{FrameSink, SinkFormat};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace};

/// Consumer tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerSettings {
    /// Longest sleep between queue checks when no wake arrives.
    pub wait_timeout: Duration,
    /// Frames held for gap filling.
    pub buffer_depth: usize,
    /// Frames kept back once draining starts.
    pub drain_threshold: usize,
    /// Substitution policy for missing positions.
    pub gap_fill: GapFill,
    /// Session rollover.
    pub rotation: RotationPolicy,
    /// File extension for session names.
    pub extension: String,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_millis(50),
            buffer_depth: 200,
            drain_threshold: 10,
            gap_fill: GapFill::LookAhead,
            rotation: RotationPolicy::default(),
            extension: "wav".to_string(),
        }
    }
}

/// Live consumer counters.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    samples: AtomicU64,
    frames: AtomicU64,
    substitutions: AtomicU64,
    resyncs: AtomicU64,
    discarded: AtomicU64,
    sessions: AtomicU64,
}

/// Point-in-time copy of [`ConsumerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerSnapshot {
    /// Samples taken off the queue.
    pub samples: u64,
    /// Frames written to the sink.
    pub frames: u64,
    /// Positions filled from neighbouring frames.
    pub substitutions: u64,
    /// Cursor realignments.
    pub resyncs: u64,
    /// Samples from inactive channels.
    pub discarded: u64,
    /// Sink sessions opened.
    pub sessions: u64,
}

impl ConsumerStats {
    /// Copy the counters.
    pub fn snapshot(&self) -> ConsumerSnapshot {
        ConsumerSnapshot {
            samples: self.samples.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            substitutions: self.substitutions.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            sessions: self.sessions.load(Ordering::Relaxed),
        }
    }
}

/// The reassembly worker. Owns the sink while it runs.
pub struct Consumer<S> {
    queue: Arc<SampleQueue>,
    running: Arc<AtomicBool>,
    events: Sender<PipelineEvent>,
    sink: S,
    format: SinkFormat,
    settings: ConsumerSettings,
    assembler: FrameAssembler,
    buffer: FrameBuffer,
    filters: FilterBank,
    rotation: RotationController,
    namer: SessionNamer,
    session_open: bool,
    batch: Vec<ChannelSample>,
    stats: Arc<ConsumerStats>,
    // Totals from earlier runs sharing `stats`.
    base: ConsumerSnapshot,
}

impl<S: FrameSink> Consumer<S> {
    /// Consumer for `active` channels at `frame_rate` frames per second.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        active: ChannelSet,
        frame_rate: f64,
        filters: FilterBank,
        sink: S,
        settings: ConsumerSettings,
        queue: Arc<SampleQueue>,
        running: Arc<AtomicBool>,
        events: Sender<PipelineEvent>,
        stats: Arc<ConsumerStats>,
    ) -> Self {
        let width = active.len();
        let format = SinkFormat::pcm24(width as u16, frame_rate.round().max(1.0) as u32);
        let base = stats.snapshot();
        Self {
            queue,
            running,
            events,
            sink,
            format,
            assembler: FrameAssembler::new(active),
            buffer: FrameBuffer::new(
                width,
                settings.buffer_depth,
                settings.drain_threshold,
                settings.gap_fill,
            ),
            filters,
            rotation: RotationController::new(settings.rotation, frame_rate),
            namer: SessionNamer::new(settings.extension.clone()),
            session_open: false,
            batch: Vec::with_capacity(settings.buffer_depth * width.max(1)),
            settings,
            stats,
            base,
        }
    }

    /// Sink format this consumer writes.
    pub fn format(&self) -> SinkFormat {
        self.format
    }

    /// Hand the sink back without running.
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Run until stopped, then flush and close. Returns the sink together
    /// with the outcome so the supervisor can reuse it.
    pub fn run(mut self) -> (S, Result<()>) {
        let mut result = self.session();
        if self.session_open {
            if let Err(err) = self.sink.close() {
                result = result.and(Err(err));
            }
            self.session_open = false;
        }
        self.publish();

        let stats = self.stats.snapshot();
        match &result {
            Ok(()) => info!(
                frames = stats.frames,
                substitutions = stats.substitutions,
                sessions = stats.sessions,
                "consumer stopped"
            ),
            Err(err) => {
                error!(error = %err, "consumer failed");
                if self.events.send(PipelineEvent::ConsumerExited).is_err() {
                    debug!("supervisor gone, consumer exit dropped");
                }
            }
        }
        (self.sink, result)
    }

    fn session(&mut self) -> Result<()> {
        self.sink.configure(self.format)?;
        self.open_next()?;

        while self.running.load(Ordering::Acquire) {
            self.queue.wait_ready(&self.running, self.settings.wait_timeout);
            self.process_queue()?;
        }

        // The producer has stopped by now; take whatever it left behind.
        self.process_queue()?;
        for frame in self.buffer.flush() {
            self.emit(frame)?;
        }
        Ok(())
    }

    fn process_queue(&mut self) -> Result<()> {
        let mut batch = std::mem::take(&mut self.batch);
        batch.clear();
        let taken = self.queue.drain_into(&mut batch);
        if taken > 0 {
            trace!(taken, "drained queue");
        }

        let mut outcome = Ok(());
        for sample in batch.drain(..) {
            if let Some(frame) = self.assembler.push(sample) {
                self.buffer.push(frame);
                if self.buffer.is_full() {
                    if let Err(err) = self.drain_buffer() {
                        outcome = Err(err);
                        break;
                    }
                }
            }
        }
        self.batch = batch;
        self.stats.samples.fetch_add(taken as u64, Ordering::Relaxed);
        outcome?;

        self.drain_buffer()?;
        self.publish();
        Ok(())
    }

    fn drain_buffer(&mut self) -> Result<()> {
        while self.buffer.should_drain() {
            let Some(frame) = self.buffer.pop_filled() else {
                break;
            };
            self.emit(frame)?;
        }
        Ok(())
    }

    fn emit(&mut self, mut frame: Vec<i32>) -> Result<()> {
        if !self.session_open {
            self.open_next()?;
        }
        self.filters.process_frame(&mut frame);
        self.sink.write_frame(&frame)?;
        self.stats.frames.fetch_add(1, Ordering::Relaxed);

        if self.rotation.record_frame() {
            self.sink.close()?;
            self.session_open = false;
            debug!(
                frames = self.rotation.session_frames(),
                total = self.rotation.total_frames(),
                age = ?self.rotation.session_age(),
                rotation = self.rotation.rotations() + 1,
                "session complete"
            );
            self.rotation.rotated();
        }
        Ok(())
    }

    fn open_next(&mut self) -> Result<()> {
        let name = self.namer.next_name();
        self.sink.open(&name)?;
        self.session_open = true;
        self.stats.sessions.fetch_add(1, Ordering::Relaxed);
        info!(
            session = %name,
            channels = self.format.channels,
            rate = self.format.sample_rate,
            "opened session"
        );
        Ok(())
    }

    fn publish(&self) {
        let assembly = self.assembler.stats();
        self.stats.substitutions.store(
            self.base.substitutions + self.buffer.substitutions(),
            Ordering::Relaxed,
        );
        self.stats
            .resyncs
            .store(self.base.resyncs + assembly.resyncs, Ordering::Relaxed);
        self.stats
            .discarded
            .store(self.base.discarded + assembly.discarded, Ordering::Relaxed);
    }
}
