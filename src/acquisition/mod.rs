//! The two acquisition workers and the hand-off between them.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐  read_data   ┌──────────┐ push ┌─────────────┐ drain ┌──────────┐
//!  │ Ads1258      │─────────────▶│ Producer │─────▶│ SampleQueue │──────▶│ Consumer │──▶ sink
//!  └──────────────┘  (bus only   └──────────┘      └─────────────┘       └──────────┘
//!                     here)           │ FaultLimit, StartFailed               │ ConsumerExited
//!                                     └──────────────▶ Supervisor ◀───────────┘
//! ```
//!
//! The producer is the only thread that talks to the device once sampling
//! has started. The consumer never touches the bus. Neither worker restarts
//! the other; they report through [`PipelineEvent`] and the supervisor owns
//! every thread handle.

pub mod consumer;
pub mod producer;
pub mod queue;
pub mod reassembly;

pub use consumer::{Consumer, ConsumerSettings, ConsumerSnapshot, ConsumerStats};
pub use producer::{
    FaultTracker, Producer, ProducerSettings, ProducerSnapshot, ProducerStats, ReadoutFilter,
    Verdict,
};
pub use queue::{QueueStats, SampleQueue};
pub use reassembly::{FrameAssembler, FrameBuffer, GapFill, SENTINEL};

/// Notifications sent from a worker to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    /// The producer crossed its fault threshold and stopped sampling.
    FaultLimit {
        /// Faults counted when the limit was hit.
        faults: u64,
    },
    /// The producer could not raise START and never sampled.
    StartFailed,
    /// The consumer stopped on an unrecoverable error.
    ConsumerExited,
}
