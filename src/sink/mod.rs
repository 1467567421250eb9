//! Frame sinks.
//!
//! The consumer hands every emitted frame to a [`FrameSink`]. A sink session
//! runs from [`FrameSink::open`] to [`FrameSink::close`]; rotation closes one
//! session and opens the next between two frames, so sessions never
//! interleave.
//!
//! - [`WavSink`] writes 24-bit PCM WAV files.
//! - [`RecordingSink`] keeps frames in memory for tests and dry runs.

mod memory;
mod wav;

pub use memory::{RecordedSession, RecordingSink};
pub use wav::WavSink;

use crate::error::Result;

/// Stream format fixed before the first session is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkFormat {
    /// Values per frame.
    pub channels: u16,
    /// Frames per second.
    pub sample_rate: u32,
    /// Bits stored per value.
    pub bits_per_sample: u16,
}

impl SinkFormat {
    /// 24-bit format for `channels` values per frame.
    pub fn pcm24(channels: u16, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
            bits_per_sample: 24,
        }
    }

    /// Bytes per stored value.
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample / 8)
    }

    /// Bytes per frame.
    pub fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    /// Bytes per second.
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * u32::from(self.block_align())
    }
}

/// Destination for emitted frames.
pub trait FrameSink: Send {
    /// Fix the stream format. Must precede the first `open` and may not be
    /// called while a session is open.
    fn configure(&mut self, format: SinkFormat) -> Result<()>;

    /// Start a session called `name`.
    fn open(&mut self, name: &str) -> Result<()>;

    /// Append one frame. `values.len()` must equal the configured channel
    /// count.
    fn write_frame(&mut self, values: &[i32]) -> Result<()>;

    /// Finish the current session. Closing with no open session is a no-op.
    fn close(&mut self) -> Result<()>;
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn configure(&mut self, format: SinkFormat) -> Result<()> {
        (**self).configure(format)
    }

    fn open(&mut self, name: &str) -> Result<()> {
        (**self).open(name)
    }

    fn write_frame(&mut self, values: &[i32]) -> Result<()> {
        (**self).write_frame(values)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
