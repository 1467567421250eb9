//! Frame reassembly and gap filling.
//!
//! [`FrameAssembler`] turns the interleaved sample stream into frames indexed
//! by ascending active-channel position. [`FrameBuffer`] holds a window of
//! recent frames so that positions left at [`SENTINEL`] can be filled from
//! newer frames before the oldest frame is released.
//!
//! ```text
//! samples ──▶ FrameAssembler ──frame per n dequeues──▶ FrameBuffer
//!                                                        │ len > drain_threshold
//!                                                        ▼
//!                                               gap fill oldest ──▶ emit
//! ```

use crate::protocol::{ChannelSample, ChannelSet};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Value of a frame position that received no sample.
pub const SENTINEL: i32 = 0;

/// Frames kept for interpolation look-back.
const HISTORY_LIMIT: u64 = 100;

/// Substitution policy for sentinel positions. One policy per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapFill {
    /// Copy the first later non-sentinel value at the same position.
    #[default]
    LookAhead,
    /// Linear interpolation between the last known and next available value,
    /// falling back to look-ahead when nothing earlier is known.
    Interpolate,
}

/// Reassembly counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    /// Frames attempted.
    pub frames: u64,
    /// Samples whose channel was not the one the cursor expected.
    pub resyncs: u64,
    /// Samples whose channel is not active.
    pub discarded: u64,
    /// Positions still at the sentinel when their frame was attempted.
    pub missing: u64,
}

/// Aligns samples into per-channel frames.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    active: ChannelSet,
    cursor: usize,
    current: Vec<i32>,
    dequeued: usize,
    stats: AssemblyStats,
}

impl FrameAssembler {
    /// Assembler over the given activation set.
    pub fn new(active: ChannelSet) -> Self {
        Self {
            active,
            cursor: 0,
            current: vec![SENTINEL; active.len()],
            dequeued: 0,
            stats: AssemblyStats::default(),
        }
    }

    /// Frame length.
    pub fn width(&self) -> usize {
        self.current.len()
    }

    /// Counters so far.
    pub fn stats(&self) -> AssemblyStats {
        self.stats
    }

    /// Consume one sample. Returns a frame once as many samples as there are
    /// active channels have been consumed since the last frame.
    pub fn push(&mut self, sample: ChannelSample) -> Option<Vec<i32>> {
        let width = self.width();
        if width == 0 {
            return None;
        }
        self.dequeued += 1;

        match self.active.position(sample.channel) {
            Some(position) => {
                if position != self.cursor {
                    self.stats.resyncs += 1;
                }
                self.current[position] = sample.value;
                self.cursor = (position + 1) % width;
            }
            None => self.stats.discarded += 1,
        }

        if self.dequeued < width {
            return None;
        }
        self.dequeued = 0;
        self.stats.frames += 1;
        let frame = std::mem::replace(&mut self.current, vec![SENTINEL; width]);
        self.stats.missing += frame.iter().filter(|v| **v == SENTINEL).count() as u64;
        Some(frame)
    }
}

/// Ordered window of attempted frames awaiting gap filling.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    frames: VecDeque<Vec<i32>>,
    depth: usize,
    drain_threshold: usize,
    policy: GapFill,
    last_known: Vec<Option<(i32, u64)>>,
    emitted: u64,
    substitutions: u64,
}

impl FrameBuffer {
    /// Buffer for frames of `width` positions. Frames are held until more
    /// than `drain_threshold` are buffered; `depth` caps the window.
    pub fn new(width: usize, depth: usize, drain_threshold: usize, policy: GapFill) -> Self {
        let depth = depth.max(1);
        Self {
            frames: VecDeque::with_capacity(depth),
            depth,
            drain_threshold: drain_threshold.min(depth - 1),
            policy,
            last_known: vec![None; width],
            emitted: 0,
            substitutions: 0,
        }
    }

    /// Frames buffered.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Whether the window has reached its depth.
    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.depth
    }

    /// Whether the oldest frame may be released.
    pub fn should_drain(&self) -> bool {
        self.frames.len() > self.drain_threshold
    }

    /// Sentinel positions replaced so far.
    pub fn substitutions(&self) -> u64 {
        self.substitutions
    }

    /// Append the newest frame.
    pub fn push(&mut self, frame: Vec<i32>) {
        self.frames.push_back(frame);
    }

    /// Release the oldest frame with its gaps filled from the window.
    pub fn pop_filled(&mut self) -> Option<Vec<i32>> {
        let mut frame = self.frames.pop_front()?;
        let index = self.emitted;
        self.emitted += 1;

        for (position, value) in frame.iter_mut().enumerate() {
            if *value != SENTINEL {
                if let Some(slot) = self.last_known.get_mut(position) {
                    *slot = Some((*value, index));
                }
                continue;
            }
            let Some((ahead, next)) = self.look_ahead(position) else {
                continue;
            };
            *value = match (self.policy, self.last_known.get(position).copied().flatten()) {
                (GapFill::Interpolate, Some((prev, seen_at))) if index - seen_at <= HISTORY_LIMIT => {
                    interpolate(prev, next, index - seen_at, ahead)
                }
                _ => next,
            };
            self.substitutions += 1;
        }
        Some(frame)
    }

    /// Release every frame, filling from whatever remains in the window.
    pub fn flush(&mut self) -> Vec<Vec<i32>> {
        let mut out = Vec::with_capacity(self.frames.len());
        while let Some(frame) = self.pop_filled() {
            out.push(frame);
        }
        out
    }

    /// Distance (in frames, from the popped frame) and value of the first
    /// later non-sentinel value at `position`.
    fn look_ahead(&self, position: usize) -> Option<(u64, i32)> {
        self.frames
            .iter()
            .enumerate()
            .find_map(|(offset, frame)| match frame.get(position) {
                Some(&v) if v != SENTINEL => Some((offset as u64 + 1, v)),
                _ => None,
            })
    }
}

fn interpolate(prev: i32, next: i32, behind: u64, ahead: u64) -> i32 {
    let span = (behind + ahead) as f64;
    let ratio = behind as f64 / span;
    let value = f64::from(prev) + ratio * (f64::from(next) - f64::from(prev));
    value.round() as i32
}
