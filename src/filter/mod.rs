//! Per-channel IIR filter bank.
//!
//! Each active channel owns an independent [`Cascade`] of second-order
//! sections from the `biquad` crate. Sections are Direct Form I with
//! coefficients already divided by `a0`, chained output to input.

pub mod design;

use crate::error::Result;
use crate::protocol::{SAMPLE_MAX, SAMPLE_MIN};
use biquad::{Biquad, Coefficients, DirectForm1};
use serde::{Deserialize, Serialize};

pub use design::chebyshev2_lowpass;

/// Which response the bank realises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Values pass through unchanged.
    None,
    /// Chebyshev Type II low-pass.
    #[default]
    Chebyshev2,
}

/// Filter bank parameters, shared by every channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// Response type.
    pub kind: FilterKind,
    /// Filter order.
    pub order: usize,
    /// Stopband edge in Hz.
    pub stopband_hz: f64,
    /// Minimum stopband attenuation in dB.
    pub attenuation_db: f64,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            kind: FilterKind::Chebyshev2,
            order: 20,
            stopband_hz: 550.0,
            attenuation_db: 40.0,
        }
    }
}

/// A chain of second-order sections.
#[derive(Debug, Clone)]
pub struct Cascade {
    coefficients: Vec<Coefficients<f64>>,
    stages: Vec<DirectForm1<f64>>,
}

impl Cascade {
    /// Build a cascade with zeroed history.
    pub fn new(coefficients: Vec<Coefficients<f64>>) -> Self {
        let stages = coefficients.iter().copied().map(DirectForm1::<f64>::new).collect();
        Self {
            coefficients,
            stages,
        }
    }

    /// Number of sections.
    pub fn sections(&self) -> usize {
        self.stages.len()
    }

    /// Filter one value through every section.
    pub fn run(&mut self, input: f64) -> f64 {
        self.stages.iter_mut().fold(input, |x, stage| stage.run(x))
    }

    /// Zero all history.
    pub fn reset(&mut self) {
        for (stage, coefficients) in self.stages.iter_mut().zip(&self.coefficients) {
            *stage = DirectForm1::<f64>::new(*coefficients);
        }
    }
}

/// One cascade per active channel.
#[derive(Debug, Clone)]
pub struct FilterBank {
    channels: Vec<Cascade>,
}

impl FilterBank {
    /// Bank with `width` copies of the same section list.
    pub fn new(width: usize, coefficients: &[Coefficients<f64>]) -> Self {
        Self {
            channels: (0..width).map(|_| Cascade::new(coefficients.to_vec())).collect(),
        }
    }

    /// Bank that leaves values untouched.
    pub fn passthrough(width: usize) -> Self {
        Self::new(width, &[])
    }

    /// Bank for `kind` at the given per-channel sample rate.
    pub fn design(
        kind: FilterKind,
        width: usize,
        sample_rate: f64,
        order: usize,
        stopband_hz: f64,
        attenuation_db: f64,
    ) -> Result<Self> {
        match kind {
            FilterKind::None => Ok(Self::passthrough(width)),
            FilterKind::Chebyshev2 => {
                let sections = chebyshev2_lowpass(order, sample_rate, stopband_hz, attenuation_db)?;
                Ok(Self::new(width, &sections))
            }
        }
    }

    /// Bank described by `settings`.
    pub fn from_settings(settings: &FilterSettings, width: usize, sample_rate: f64) -> Result<Self> {
        Self::design(
            settings.kind,
            width,
            sample_rate,
            settings.order,
            settings.stopband_hz,
            settings.attenuation_db,
        )
    }

    /// Number of channels.
    pub fn width(&self) -> usize {
        self.channels.len()
    }

    /// Filter one frame in place. Results are rounded and clamped to the
    /// 24-bit range.
    pub fn process_frame(&mut self, frame: &mut [i32]) {
        for (value, cascade) in frame.iter_mut().zip(self.channels.iter_mut()) {
            if cascade.sections() == 0 {
                continue;
            }
            let out = cascade.run(f64::from(*value)).round();
            *value = out.clamp(f64::from(SAMPLE_MIN), f64::from(SAMPLE_MAX)) as i32;
        }
    }

    /// Zero every channel's history.
    pub fn reset(&mut self) {
        self.channels.iter_mut().for_each(Cascade::reset);
    }
}
