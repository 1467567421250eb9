//! CLI entry point for ads1258-daq.
//!
//! Configures the converter, records until Ctrl-C, then flushes and closes
//! the current file.
//!
//! # Usage
//!
//! ```bash
//! ads1258-daq --output drongo_data --number-channels 4
//! ads1258-daq --simulate --config config/ads1258_daq.toml --log-level debug
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use ads1258_daq::config::DaqConfig;
use ads1258_daq::hal::sim::{CounterSource, SimulatedAdc};
use ads1258_daq::hal::{PinControl, SpiBus};
use ads1258_daq::logging;
use ads1258_daq::sink::WavSink;
use ads1258_daq::{Ads1258, PipelineStats, ShutdownHandle, Supervisor};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ads1258-daq")]
#[command(version, about = "Record ADS1258 channels to WAV files", long_about = None)]
struct Cli {
    /// Output directory for recorded sessions
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of connected channels
    #[arg(short = 'n', long)]
    number_channels: Option<usize>,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use the simulated converter instead of the SPI hardware
    #[arg(long)]
    simulate: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut DaqConfig) {
        if let Some(output) = &self.output {
            config.storage.output_dir = output.clone();
        }
        if let Some(n) = self.number_channels {
            config.acquisition.channels = n;
        }
        if let Some(level) = &self.log_level {
            config.application.log_level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => DaqConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DaqConfig::load()?,
    };
    cli.apply(&mut config);
    config.validate()?;
    logging::init_from_config(&config)?;

    info!(
        channels = config.acquisition.channels,
        output = %config.storage.output_dir.display(),
        frame_rate = config.frame_rate(),
        simulate = cli.simulate,
        "starting acquisition"
    );

    let shutdown = ShutdownHandle::new();
    let mut worker = {
        let shutdown = shutdown.clone();
        let simulate = cli.simulate;
        tokio::task::spawn_blocking(move || acquire(&config, simulate, shutdown))
    };

    let stats = tokio::select! {
        joined = &mut worker => joined??,
        interrupted = signal::ctrl_c() => {
            interrupted?;
            info!("shutdown signal received, flushing");
            shutdown.request();
            worker.await??
        }
    };

    info!(
        frames = stats.consumer.frames,
        sessions = stats.consumer.sessions,
        faults = stats.producer.faults(),
        restarts = stats.restarts,
        "done"
    );
    Ok(())
}

fn acquire(
    config: &DaqConfig,
    simulate: bool,
    shutdown: ShutdownHandle,
) -> ads1258_daq::Result<PipelineStats> {
    let sink = WavSink::new(&config.storage.output_dir).with_comment(config.recording_comment());

    if simulate {
        let adc = SimulatedAdc::new(CounterSource::new());
        return supervise(Ads1258::new(adc.bus(), adc.pins()), sink, config, shutdown);
    }
    run_hardware(sink, config, shutdown)
}

fn supervise<B, P>(
    device: Ads1258<B, P>,
    sink: WavSink,
    config: &DaqConfig,
    shutdown: ShutdownHandle,
) -> ads1258_daq::Result<PipelineStats>
where
    B: SpiBus + 'static,
    P: PinControl + 'static,
{
    Supervisor::new(device, sink, config.pipeline_settings())
        .with_shutdown(shutdown)
        .run()
}

#[cfg(feature = "hardware")]
fn run_hardware(
    sink: WavSink,
    config: &DaqConfig,
    shutdown: ShutdownHandle,
) -> ads1258_daq::Result<PipelineStats> {
    use ads1258_daq::hal::linux::{CdevPins, SpidevBus};

    let bus = SpidevBus::open(&config.device.spi_device, config.device.spi_speed_hz)?;
    let pins = CdevPins::open(&config.device.gpio_chip)?;
    supervise(Ads1258::new(bus, pins), sink, config, shutdown)
}

#[cfg(not(feature = "hardware"))]
fn run_hardware(
    _sink: WavSink,
    _config: &DaqConfig,
    _shutdown: ShutdownHandle,
) -> ads1258_daq::Result<PipelineStats> {
    Err(ads1258_daq::DaqError::InvalidConfig(
        "built without the `hardware` feature; rebuild with it or pass --simulate".to_string(),
    ))
}
