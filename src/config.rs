//! Configuration loading with Figment.
//!
//! Sources, later ones winning:
//! 1. built-in defaults
//! 2. a TOML file (`config/ads1258_daq.toml` unless another path is given)
//! 3. environment variables prefixed `ADS1258_DAQ_`, with `__` between
//!    section and key, e.g. `ADS1258_DAQ_ACQUISITION__CHANNELS=2`
//!
//! # Example
//! ```no_run
//! use ads1258_daq::config::DaqConfig;
//!
//! # fn main() -> ads1258_daq::Result<()> {
//! let config = DaqConfig::load_from("config/ads1258_daq.toml")?;
//! config.validate()?;
//! println!("{} channels into {}", config.acquisition.channels, config.storage.output_dir.display());
//! # Ok(())
//! # }
//! ```

use crate::acquisition::{ConsumerSettings, GapFill, ProducerSettings};
use crate::device::{single_ended_mask, DeviceSettings};
use crate::error::{DaqError, Result};
use crate::filter::{FilterKind, FilterSettings};
use crate::logging::{parse_log_level, OutputFormat};
use crate::pipeline::PipelineSettings;
use crate::protocol::{channel_frame_rate, DataRate, Delay, Scbcs, SystemChannels};
use crate::rotation::RotationPolicy;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/ads1258_daq.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "ADS1258_DAQ_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaqConfig {
    /// Logging.
    pub application: ApplicationConfig,
    /// Bus, pins and register settings.
    pub device: DeviceConfig,
    /// Producer and queue.
    pub acquisition: AcquisitionConfig,
    /// Frame buffer and gap filling.
    pub reassembly: ReassemblyConfig,
    /// Per-channel filter.
    pub filter: FilterSettings,
    /// Output files.
    pub storage: StorageConfig,
}

/// Application-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// trace, debug, info, warn or error.
    pub log_level: String,
    /// Log line format.
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: OutputFormat::Compact,
        }
    }
}

/// Device settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// spidev node.
    pub spi_device: PathBuf,
    /// GPIO character device.
    pub gpio_chip: PathBuf,
    /// SPI clock.
    pub spi_speed_hz: u32,
    /// Configuration attempts before giving up.
    pub config_retries: u32,
    /// Wait after each power-down or reset edge.
    #[serde(with = "humantime_serde")]
    pub pulse_settle: Duration,
    /// DRATE index, 0 (slowest) to 3.
    pub data_rate: u8,
    /// Switch-time delay index, 0 to 7.
    pub delay: u8,
    /// Bias current source index, 0 to 3.
    pub bias_current: u8,
    /// Chopper stabilisation.
    pub chop: bool,
    /// Status byte ahead of data.
    pub status_byte: bool,
    /// Auto-scan; `false` selects fixed-channel mode.
    pub auto_scan: bool,
    /// Explicit single-ended mask, replacing the one derived from the
    /// channel count.
    pub single_ended_mask: Option<u16>,
    /// Differential enable mask.
    pub differential_mask: Option<u8>,
    /// System monitor enable mask (SYSRED).
    pub system_mask: Option<u8>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            spi_device: PathBuf::from("/dev/spidev0.0"),
            gpio_chip: PathBuf::from("/dev/gpiochip0"),
            spi_speed_hz: 12_000_000,
            config_retries: 10,
            pulse_settle: Duration::from_millis(200),
            data_rate: 1,
            delay: 0,
            bias_current: 0,
            chop: false,
            status_byte: true,
            auto_scan: true,
            single_ended_mask: None,
            differential_mask: None,
            system_mask: None,
        }
    }
}

/// Producer and queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Active single-ended channels, counted down from AIN15.
    pub channels: usize,
    /// Samples the queue can hold.
    pub queue_capacity: usize,
    /// Queue length that wakes the consumer.
    pub high_water_mark: usize,
    /// Faults tolerated before restarting.
    pub fault_threshold: u64,
    /// Count faults per this many reads instead of since start.
    pub fault_window: Option<u64>,
    /// Sleep between polls.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Block on DRDY instead of sleeping.
    pub use_data_ready: bool,
    /// Request realtime scheduling for the producer.
    pub realtime: bool,
    /// Core the producer is pinned to.
    pub producer_core: Option<usize>,
    /// Restarts allowed before giving up.
    pub max_restarts: Option<u32>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            channels: 4,
            queue_capacity: 65_536,
            high_water_mark: 100,
            fault_threshold: 100,
            fault_window: None,
            poll_interval: Duration::from_micros(20),
            use_data_ready: false,
            realtime: true,
            producer_core: Some(0),
            max_restarts: None,
        }
    }
}

/// Frame buffer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReassemblyConfig {
    /// Frames held for gap filling.
    pub buffer_depth: usize,
    /// Frames kept back once draining starts.
    pub drain_threshold: usize,
    /// Substitution policy.
    pub gap_fill: GapFill,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            buffer_depth: 200,
            drain_threshold: 10,
            gap_fill: GapFill::LookAhead,
        }
    }
}

/// Output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for session files, created if missing.
    pub output_dir: PathBuf,
    /// When to start a new file.
    pub rotation: RotationPolicy,
    /// Text stored in each file's ICMT chunk. Defaults to the active
    /// channel names.
    pub comment: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("drongo_data"),
            rotation: RotationPolicy::default(),
            comment: None,
        }
    }
}

impl DaqConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` and the environment. A missing file leaves the
    /// defaults in place.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::figment(path).extract()?)
    }

    /// The provider stack used by [`load_from`](Self::load_from).
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check ranges and cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        parse_log_level(&self.application.log_level)?;

        let device = &self.device;
        if device.spi_speed_hz == 0 {
            return Err(invalid("device.spi_speed_hz must be positive"));
        }
        if device.config_retries == 0 {
            return Err(invalid("device.config_retries must be at least 1"));
        }
        if DataRate::from_index(device.data_rate).is_none() {
            return Err(invalid(format!(
                "device.data_rate {} out of range 0-3",
                device.data_rate
            )));
        }
        if Delay::from_index(device.delay).is_none() {
            return Err(invalid(format!("device.delay {} out of range 0-7", device.delay)));
        }
        if device.bias_current > 3 {
            return Err(invalid(format!(
                "device.bias_current {} out of range 0-3",
                device.bias_current
            )));
        }

        let acquisition = &self.acquisition;
        if device.single_ended_mask.is_none() && !(1..=16).contains(&acquisition.channels) {
            return Err(invalid(format!(
                "acquisition.channels {} out of range 1-16",
                acquisition.channels
            )));
        }
        if self.device_settings().channel_set().is_empty() {
            return Err(invalid("no channels enabled"));
        }
        if acquisition.high_water_mark == 0 || acquisition.high_water_mark > acquisition.queue_capacity {
            return Err(invalid(format!(
                "acquisition.high_water_mark {} must be within 1-{}",
                acquisition.high_water_mark, acquisition.queue_capacity
            )));
        }

        let reassembly = &self.reassembly;
        if reassembly.buffer_depth == 0 || reassembly.drain_threshold >= reassembly.buffer_depth {
            return Err(invalid(format!(
                "reassembly.drain_threshold {} must be below buffer_depth {}",
                reassembly.drain_threshold, reassembly.buffer_depth
            )));
        }

        if self.filter.kind == FilterKind::Chebyshev2 {
            let nyquist = self.frame_rate() / 2.0;
            if self.filter.order == 0 {
                return Err(invalid("filter.order must be at least 1"));
            }
            if self.filter.attenuation_db <= 0.0 {
                return Err(invalid("filter.attenuation_db must be positive"));
            }
            if self.filter.stopband_hz <= 0.0 || self.filter.stopband_hz >= nyquist {
                return Err(invalid(format!(
                    "filter.stopband_hz {} must be within 0-{nyquist:.1} Hz at this frame rate",
                    self.filter.stopband_hz
                )));
            }
        }

        if self.storage.rotation == RotationPolicy::Frames(0)
            || self.storage.rotation == RotationPolicy::Duration(Duration::ZERO)
        {
            return Err(invalid("storage.rotation must be non-zero"));
        }
        Ok(())
    }

    /// Register settings for the device section and channel count.
    pub fn device_settings(&self) -> DeviceSettings {
        let device = &self.device;
        let mut settings = DeviceSettings::for_channels(self.acquisition.channels);
        settings.auto_scan = device.auto_scan;
        settings.chop = device.chop;
        settings.status_byte = device.status_byte;
        settings.data_rate = DataRate::from_index(device.data_rate).unwrap_or_default();
        settings.delay = Delay::from_index(device.delay).unwrap_or_default();
        settings.bias_current = Scbcs::from_bits(device.bias_current);
        settings.single_ended = device
            .single_ended_mask
            .unwrap_or_else(|| single_ended_mask(self.acquisition.channels));
        settings.differential = device.differential_mask.unwrap_or(0);
        settings.system = device
            .system_mask
            .map(SystemChannels::from_bits_truncate)
            .unwrap_or_else(SystemChannels::empty);
        settings.settle = device.pulse_settle;
        settings.retries = device.config_retries;
        settings
    }

    /// ICMT text for recorded files: the configured comment, or the active
    /// channel names in frame order, comma separated.
    pub fn recording_comment(&self) -> String {
        if let Some(comment) = &self.storage.comment {
            return comment.clone();
        }
        self.device_settings()
            .channel_set()
            .iter()
            .map(|channel| channel.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Nominal per-channel frame rate of these settings.
    pub fn frame_rate(&self) -> f64 {
        let settings = self.device_settings();
        channel_frame_rate(
            settings.channel_set().len(),
            settings.data_rate.samples_per_second(settings.auto_scan),
            f64::from(settings.delay.micros()),
        )
    }

    /// Everything the supervisor needs.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        let acquisition = &self.acquisition;
        PipelineSettings {
            device: self.device_settings(),
            producer: ProducerSettings {
                poll_interval: acquisition.poll_interval,
                use_data_ready: acquisition.use_data_ready,
                fault_threshold: acquisition.fault_threshold,
                fault_window: acquisition.fault_window,
                realtime: acquisition.realtime,
                core: acquisition.producer_core,
                ..ProducerSettings::default()
            },
            consumer: ConsumerSettings {
                buffer_depth: self.reassembly.buffer_depth,
                drain_threshold: self.reassembly.drain_threshold,
                gap_fill: self.reassembly.gap_fill,
                rotation: self.storage.rotation,
                ..ConsumerSettings::default()
            },
            filter: self.filter,
            queue_capacity: acquisition.queue_capacity,
            high_water_mark: acquisition.high_water_mark,
            max_restarts: acquisition.max_restarts,
            ..PipelineSettings::default()
        }
    }
}

fn invalid(message: impl Into<String>) -> DaqError {
    DaqError::InvalidConfig(message.into())
}
