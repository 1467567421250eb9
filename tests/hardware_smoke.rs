#![cfg(feature = "hardware_tests")]

use ads1258_daq::config::DaqConfig;
use ads1258_daq::hal::linux::{CdevPins, SpidevBus};
use ads1258_daq::{Ads1258, DeviceState, Readout};
use anyhow::{Context, Result};
use std::time::Duration;

/// ADS1258 hardware smoke test.
///
/// Run with:
/// `ADS1258_SMOKE_TEST=1 cargo test --test hardware_smoke --features hardware_tests -- --nocapture`
///
/// Bus and pin paths come from `config/ads1258_daq.toml` and the usual
/// `ADS1258_DAQ_` overrides.
#[test]
fn ads1258_hardware_smoke() -> Result<()> {
    if std::env::var("ADS1258_SMOKE_TEST").unwrap_or_default() != "1" {
        eprintln!("Skipping ads1258_hardware_smoke (set ADS1258_SMOKE_TEST=1 to enable)");
        return Ok(());
    }

    let config = DaqConfig::load().context("load config")?;
    let bus = SpidevBus::open(&config.device.spi_device, config.device.spi_speed_hz)
        .with_context(|| format!("open {}", config.device.spi_device.display()))?;
    let pins = CdevPins::open(&config.device.gpio_chip)
        .with_context(|| format!("open {}", config.device.gpio_chip.display()))?;

    let mut device = Ads1258::new(bus, pins);
    let settings = config.device_settings();
    device.configure(&settings).context("configure")?;
    assert_eq!(device.state(), DeviceState::Active);

    device.start(true)?;
    let mut seen = 0;
    for _ in 0..1000 {
        if !device.await_data_ready(Duration::from_millis(100))? {
            continue;
        }
        match device.read_data()? {
            Readout::Dual(a, b) => {
                assert!(settings.channel_set().position(a.channel).is_some());
                assert!(settings.channel_set().position(b.channel).is_some());
            }
            Readout::Single(sample) => {
                assert!(settings.channel_set().position(sample.channel).is_some());
            }
        }
        seen += 1;
    }
    device.start(false)?;

    assert!(seen > 0, "DRDY never fired");
    Ok(())
}
