//! # ADS1258 acquisition library
//!
//! Continuous multi-channel recording from a TI ADS1258 delta-sigma ADC on a
//! Linux host. Samples are read over SPI by a real-time producer thread,
//! realigned into per-channel frames, gap-filled, low-pass filtered and
//! written to rotating WAV files by a consumer thread. A supervisor owns both
//! threads and reconfigures the device when reads stop making sense.
//!
//! ## Crate Structure
//!
//! - **`protocol`**: Command and status bytes, the register map, channel
//!   identifiers and sample encoding.
//! - **`hal`**: The [`hal::SpiBus`] and [`hal::PinControl`] traits, an
//!   in-process simulated converter, and the Linux backend (feature
//!   `hardware`).
//! - **`device`**: [`device::Ads1258`], the register mirror, configuration
//!   sequence, setters and data reads.
//! - **`acquisition`**: Producer, sample queue, frame reassembly and consumer.
//! - **`filter`**: Per-channel biquad cascades and the Chebyshev Type II
//!   designer.
//! - **`sink`**: The [`sink::FrameSink`] trait, the WAV writer and an
//!   in-memory recorder.
//! - **`rotation`**: Session rollover and file naming.
//! - **`pipeline`**: [`pipeline::Supervisor`], start, restart and shutdown.
//! - **`config`**: Figment-based configuration loading and validation.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`sched`**: Real-time priority and core affinity for the producer.
//! - **`error`**: [`DaqError`] and the crate [`Result`] alias.

pub mod acquisition;
pub mod config;
pub mod device;
pub mod error;
pub mod filter;
pub mod hal;
pub mod logging;
pub mod pipeline;
pub mod protocol;
pub mod rotation;
pub mod sched;
pub mod sink;

pub use config::DaqConfig;
pub use device::{Ads1258, DeviceSettings, DeviceState, Readout};
pub use error::{DaqError, Result};
pub use pipeline::{PipelineSettings, PipelineStats, ShutdownHandle, Supervisor};
pub use protocol::{ChannelId, ChannelSample, ChannelSet};
