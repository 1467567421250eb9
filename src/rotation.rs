//! File rollover.
//!
//! The consumer reports every emitted frame to a [`RotationController`]. When
//! the configured frame count or wall-clock duration is reached the consumer
//! closes the sink session and opens one named by [`SessionNamer`]. The check
//! runs after a frame has been fully written, so frames never straddle files.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// `strftime` pattern for session names.
pub const NAME_PATTERN: &str = "date-%Y-%m-%d-time-%H-%M-%S";

/// When to start a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPolicy {
    /// After this many frames.
    Frames(u64),
    /// After this much wall-clock time.
    Duration(#[serde(with = "humantime_serde")] Duration),
    /// Never; one session per run.
    Never,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::Duration(Duration::from_secs(30))
    }
}

impl RotationPolicy {
    /// Express the policy as a frame count at `frame_rate` frames per second.
    /// Time-based rotation stays tied to emitted frames so a file always
    /// holds the nominal duration of data.
    pub fn frame_target(&self, frame_rate: f64) -> Option<u64> {
        match *self {
            Self::Frames(n) => Some(n.max(1)),
            Self::Duration(d) => Some(((d.as_secs_f64() * frame_rate).round() as u64).max(1)),
            Self::Never => None,
        }
    }
}

/// Counts emitted frames against the rotation target.
#[derive(Debug, Clone)]
pub struct RotationController {
    target: Option<u64>,
    emitted: u64,
    total: u64,
    rotations: u64,
    session_started: Instant,
}

impl RotationController {
    /// Controller for `policy` at the session's frame rate.
    pub fn new(policy: RotationPolicy, frame_rate: f64) -> Self {
        Self {
            target: policy.frame_target(frame_rate),
            emitted: 0,
            total: 0,
            rotations: 0,
            session_started: Instant::now(),
        }
    }

    /// Record one emitted frame. Returns `true` when the current session is
    /// complete and the caller should roll over before the next frame.
    pub fn record_frame(&mut self) -> bool {
        self.emitted += 1;
        self.total += 1;
        self.target.is_some_and(|target| self.emitted >= target)
    }

    /// Note that the caller rolled over.
    pub fn rotated(&mut self) {
        self.emitted = 0;
        self.rotations += 1;
        self.session_started = Instant::now();
    }

    /// Frames in the current session.
    pub fn session_frames(&self) -> u64 {
        self.emitted
    }

    /// Frames across all sessions.
    pub fn total_frames(&self) -> u64 {
        self.total
    }

    /// Rollovers so far.
    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    /// Wall-clock age of the current session.
    pub fn session_age(&self) -> Duration {
        self.session_started.elapsed()
    }
}

/// Produces timestamped session names, unique within one process.
#[derive(Debug, Clone, Default)]
pub struct SessionNamer {
    extension: String,
    last_stem: String,
    repeats: u32,
}

impl SessionNamer {
    /// Names ending in `.{extension}`.
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            ..Self::default()
        }
    }

    /// Name for a session starting now.
    pub fn next_name(&mut self) -> String {
        self.name_at(Local::now())
    }

    /// Name for a session starting at `when`. A second session in the same
    /// second gets a numeric suffix.
    pub fn name_at(&mut self, when: DateTime<Local>) -> String {
        let stem = when.format(NAME_PATTERN).to_string();
        if stem == self.last_stem {
            self.repeats += 1;
        } else {
            self.last_stem = stem;
            self.repeats = 0;
        }
        let mut name = self.last_stem.clone();
        if self.repeats > 0 {
            name.push_str(&format!("-{}", self.repeats));
        }
        if !self.extension.is_empty() {
            name.push('.');
            name.push_str(&self.extension);
        }
        name
    }
}
