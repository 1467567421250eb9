use super::{FrameSink, SinkFormat};
use crate::error::{DaqError, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// One recorded session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedSession {
    /// Name passed to `open`.
    pub name: String,
    /// Frames in write order.
    pub frames: Vec<Vec<i32>>,
    /// Whether `close` was called.
    pub closed: bool,
}

#[derive(Debug, Default)]
struct Recording {
    format: Option<SinkFormat>,
    sessions: Vec<RecordedSession>,
    fail_after: Option<usize>,
    fail_open: bool,
    closes: usize,
}

/// Sink that keeps every frame in memory.
///
/// Clones share the same recording, so a test can keep one handle while the
/// consumer owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    inner: Arc<Mutex<Recording>>,
}

impl RecordingSink {
    /// Empty recording.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every write once `frames` frames have been accepted in total.
    #[must_use]
    pub fn failing_after(self, frames: usize) -> Self {
        self.inner.lock().fail_after = Some(frames);
        self
    }

    /// Reject every `open`.
    #[must_use]
    pub fn failing_open(self) -> Self {
        self.inner.lock().fail_open = true;
        self
    }

    /// Number of `close` calls received.
    pub fn closes(&self) -> usize {
        self.inner.lock().closes
    }

    /// Format passed to `configure`.
    pub fn format(&self) -> Option<SinkFormat> {
        self.inner.lock().format
    }

    /// Copy of every session so far.
    pub fn sessions(&self) -> Vec<RecordedSession> {
        self.inner.lock().sessions.clone()
    }

    /// Every frame across all sessions, in order.
    pub fn frames(&self) -> Vec<Vec<i32>> {
        self.inner
            .lock()
            .sessions
            .iter()
            .flat_map(|s| s.frames.iter().cloned())
            .collect()
    }

    /// Total frames written.
    pub fn frame_count(&self) -> usize {
        self.inner.lock().sessions.iter().map(|s| s.frames.len()).sum()
    }
}

impl FrameSink for RecordingSink {
    fn configure(&mut self, format: SinkFormat) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.sessions.last().is_some_and(|s| !s.closed) {
            return Err(DaqError::sink("memory", "cannot change format while open"));
        }
        inner.format = Some(format);
        Ok(())
    }

    fn open(&mut self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.format.is_none() {
            return Err(DaqError::sink(name, "format not configured"));
        }
        if inner.fail_open {
            return Err(DaqError::sink(name, "injected open failure"));
        }
        if let Some(last) = inner.sessions.last_mut() {
            last.closed = true;
        }
        inner.sessions.push(RecordedSession {
            name: name.to_string(),
            ..RecordedSession::default()
        });
        Ok(())
    }

    fn write_frame(&mut self, values: &[i32]) -> Result<()> {
        let mut inner = self.inner.lock();
        let channels = inner.format.map(|f| usize::from(f.channels));
        let written: usize = inner.sessions.iter().map(|s| s.frames.len()).sum();
        if inner.fail_after.is_some_and(|limit| written >= limit) {
            return Err(DaqError::sink("memory", "injected write failure"));
        }
        let Some(session) = inner.sessions.last_mut().filter(|s| !s.closed) else {
            return Err(DaqError::sink("memory", "no session open"));
        };
        if channels != Some(values.len()) {
            return Err(DaqError::sink(
                &session.name,
                format!("frame has {} values, expected {channels:?}", values.len()),
            ));
        }
        session.frames.push(values.to_vec());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.closes += 1;
        if let Some(last) = inner.sessions.last_mut() {
            last.closed = true;
        }
        Ok(())
    }
}
