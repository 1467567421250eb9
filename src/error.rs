//! Error types for acquisition, configuration and storage.
//!
//! Local recovery (dropped samples, gap-filled frames, pipeline restarts) never
//! surfaces here. A [`DaqError`] means something could not be resolved where
//! it happened and must reach the caller.

use crate::hal::BusError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for acquisition operations.
pub type Result<T> = std::result::Result<T, DaqError>;

/// Errors that can occur while configuring or running the pipeline.
#[derive(Error, Debug)]
pub enum DaqError {
    /// A bus or pin transaction failed.
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// Register read-back never matched the local mirror.
    #[error("Device configuration failed verification after {attempts} attempts")]
    ConfigurationFailed { attempts: u32 },

    /// A control pin did not read back the level just driven.
    #[error("Pin {pin} did not read back as {expected}")]
    PinReadback { pin: String, expected: String },

    /// The device state machine was asked for an illegal transition.
    #[error("Device is {state}, cannot {operation}")]
    InvalidState {
        state: &'static str,
        operation: &'static str,
    },

    /// A configuration value is out of range or inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    /// Filter coefficients could not be designed.
    #[error("Filter design failed: {0}")]
    FilterDesign(String),

    /// The storage sink could not be created or written.
    #[error("Sink error on '{path}': {message}")]
    Sink { path: PathBuf, message: String },

    /// Filesystem failure outside a sink session.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A worker thread panicked.
    #[error("Worker '{0}' panicked")]
    WorkerPanicked(&'static str),

    /// The supervisor gave up restarting the pipeline.
    #[error("Pipeline restarted {restarts} times without recovering")]
    RestartLimit { restarts: u32 },
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl DaqError {
    /// Build a sink error from a path and any displayable cause.
    pub fn sink(path: impl Into<PathBuf>, cause: impl std::fmt::Display) -> Self {
        Self::Sink {
            path: path.into(),
            message: cause.to_string(),
        }
    }

    /// Returns true if acquisition cannot continue after this error.
    ///
    /// Steady-state bus faults are absorbed by the producer's fault counter,
    /// so a bare [`DaqError::Bus`] is not fatal on its own.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Bus(_))
    }

    /// Returns true if this error came from the storage side.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Sink { .. } | Self::Io(_))
    }

    /// Returns true if this error came from device bring-up.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationFailed { .. } | Self::PinReadback { .. } | Self::InvalidState { .. }
        )
    }
}
