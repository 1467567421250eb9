//! In-process model of the converter.
//!
//! [`SimulatedAdc`] holds a register file and a conversion source behind a
//! shared lock. [`SimulatedAdc::bus`] and [`SimulatedAdc::pins`] hand out the
//! two halves of the hardware interface, so the simulator can be driven by the
//! device controller exactly like the real chip while the test keeps a handle
//! for inspection and fault injection.
//!
//! Conversions advance once per data transaction while `START` is high. Both
//! halves of a dual read see the same conversion unless the source supplies a
//! [`SimRead::Straddle`] or a desync has been injected.

use super::{BusError, Level, Pin, PinControl, SpiBus};
use crate::protocol::{
    encode_sample, ChannelId, ChannelSample, ChannelSet, CommandByte, CommandKind, Config0,
    RegisterAddress, RegisterImage, StatusByte,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// ID register value reported by a simulated ADS1258.
pub const SIM_DEVICE_ID: u8 = 0x8B;

/// What the converter holds when a data transaction is clocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimRead {
    /// A new conversion landed.
    Fresh(ChannelSample),
    /// Nothing new since the last transaction.
    Repeat,
    /// A new conversion landed between the two halves of a dual read.
    Straddle(ChannelSample, ChannelSample),
}

/// Supplies conversions to the simulator.
pub trait ConversionSource: Send {
    /// Next conversion event, `None` once the source is exhausted.
    fn next_read(&mut self, active: ChannelSet) -> Option<SimRead>;
}

impl<F> ConversionSource for F
where
    F: FnMut(ChannelSet) -> Option<SimRead> + Send,
{
    fn next_read(&mut self, active: ChannelSet) -> Option<SimRead> {
        self(active)
    }
}

/// A fixed list of reads played back in order.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    reads: VecDeque<SimRead>,
}

impl ScriptedSource {
    /// Script from any sequence of reads.
    pub fn new(reads: impl IntoIterator<Item = SimRead>) -> Self {
        Self {
            reads: reads.into_iter().collect(),
        }
    }
}

impl ConversionSource for ScriptedSource {
    fn next_read(&mut self, _active: ChannelSet) -> Option<SimRead> {
        self.reads.pop_front()
    }
}

/// Round-robin scan over the active channels with a monotonically increasing
/// value, starting at 1.
#[derive(Debug, Clone)]
pub struct CounterSource {
    next_value: i32,
    remaining: Option<usize>,
    cursor: usize,
    repeat_every: Option<usize>,
    stuck: Option<(usize, Option<usize>)>,
    reads: usize,
    passes: usize,
}

impl CounterSource {
    /// Unlimited counter.
    pub fn new() -> Self {
        Self {
            next_value: 1,
            remaining: None,
            cursor: 0,
            repeat_every: None,
            stuck: None,
            reads: 0,
            passes: 0,
        }
    }

    /// Stop after `conversions` fresh conversions.
    #[must_use]
    pub fn limit(mut self, conversions: usize) -> Self {
        self.remaining = Some(conversions);
        self
    }

    /// Report an unrefreshed conversion every `n`-th transaction.
    #[must_use]
    pub fn repeat_every(mut self, n: usize) -> Self {
        self.repeat_every = Some(n.max(2));
        self
    }

    /// Report 0 for the channel at frame `position`, except on every
    /// `live_every`-th scan pass.
    #[must_use]
    pub fn stuck_channel(mut self, position: usize, live_every: usize) -> Self {
        self.stuck = Some((position, Some(live_every.max(1))));
        self
    }

    /// Report 0 for the channel at frame `position` on every pass.
    #[must_use]
    pub fn dead_channel(mut self, position: usize) -> Self {
        self.stuck = Some((position, None));
        self
    }
}

impl Default for CounterSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionSource for CounterSource {
    fn next_read(&mut self, active: ChannelSet) -> Option<SimRead> {
        if self.remaining == Some(0) {
            return None;
        }
        self.reads += 1;
        if let Some(n) = self.repeat_every {
            if self.reads % n == 0 {
                return Some(SimRead::Repeat);
            }
        }

        let positions = active.positions();
        if positions.is_empty() {
            return Some(SimRead::Repeat);
        }
        let position = self.cursor % positions.len();
        let channel = positions[position];
        self.cursor = (position + 1) % positions.len();

        let value = self.next_value;
        self.next_value = self.next_value.wrapping_add(1);
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }

        let reported = match self.stuck {
            Some((stuck, live_every))
                if stuck == position && live_every.map_or(true, |n| self.passes % n != 0) =>
            {
                0
            }
            _ => value,
        };
        if self.cursor == 0 {
            self.passes += 1;
        }
        Some(SimRead::Fresh(ChannelSample::new(channel, reported)))
    }
}

struct SimState {
    registers: RegisterImage,
    pins: [Level; 5],
    source: Box<dyn ConversionSource>,
    current: Option<(ChannelSample, ChannelSample)>,
    exhausted: bool,
    transfer_faults: usize,
    desyncs: usize,
    corrupt_readbacks: usize,
    failed_pins: [bool; 5],
    transactions: u64,
    data_reads: u64,
    writes: u64,
}

impl SimState {
    fn pin_index(pin: Pin) -> usize {
        match pin {
            Pin::ClockSelect => 0,
            Pin::Reset => 1,
            Pin::Start => 2,
            Pin::PowerDown => 3,
            Pin::DataReady => 4,
        }
    }

    fn level(&self, pin: Pin) -> Level {
        self.pins[Self::pin_index(pin)]
    }

    fn held_in_reset(&self) -> bool {
        !self.level(Pin::Reset).is_high() || !self.level(Pin::PowerDown).is_high()
    }

    fn advance(&mut self) -> Result<(ChannelSample, ChannelSample), BusError> {
        self.transactions += 1;
        if self.transfer_faults > 0 {
            self.transfer_faults -= 1;
            return Err(BusError::transfer("injected transfer fault"));
        }
        self.data_reads += 1;

        if self.level(Pin::Start).is_high() && !self.held_in_reset() {
            let active = ChannelSet::from_registers(
                self.registers.config0().contains(Config0::MUXMOD),
                self.registers.get(RegisterAddress::Muxdif),
                self.registers.get(RegisterAddress::Muxsg0),
                self.registers.get(RegisterAddress::Muxsg1),
                self.registers.get(RegisterAddress::Sysred),
            );
            match self.source.next_read(active) {
                Some(SimRead::Fresh(sample)) => self.current = Some((sample, sample)),
                Some(SimRead::Straddle(first, second)) => self.current = Some((first, second)),
                Some(SimRead::Repeat) => {
                    if let Some((_, second)) = self.current {
                        self.current = Some((second, second));
                    }
                }
                None => self.exhausted = true,
            }
        }

        let idle = ChannelSample::new(ChannelId::default(), 0);
        let (mut first, second) = self.current.unwrap_or((idle, idle));
        if self.desyncs > 0 {
            self.desyncs -= 1;
            first.value = first.value.wrapping_add(1);
        }
        Ok((first, second))
    }

    fn encode_conversion(&self, sample: ChannelSample, out: &mut Vec<u8>) {
        if self.registers.config0().contains(Config0::STAT) {
            out.push(StatusByte::new(sample.channel, true, false, false).raw());
        }
        out.extend_from_slice(&encode_sample(sample.value));
    }

    fn conversion_len(&self) -> usize {
        if self.registers.config0().contains(Config0::STAT) {
            4
        } else {
            3
        }
    }

    fn read_registers(&mut self, start: u8, count: usize) -> Vec<u8> {
        let mut values = Vec::with_capacity(count);
        for offset in 0..count {
            let addr = start.wrapping_add(offset as u8);
            let value = match RegisterAddress::from_addr(addr) {
                Some(RegisterAddress::Id) => SIM_DEVICE_ID,
                Some(reg) => self.registers.get(reg),
                None => 0,
            };
            values.push(value);
        }
        if self.corrupt_readbacks > 0 {
            self.corrupt_readbacks -= 1;
            if let Some(first) = values.first_mut() {
                *first ^= 0x01;
            }
        }
        values
    }

    fn write_registers(&mut self, start: u8, data: &[u8]) {
        if self.held_in_reset() {
            return;
        }
        self.writes += 1;
        for (offset, value) in data.iter().enumerate() {
            if let Some(reg) = RegisterAddress::from_addr(start.wrapping_add(offset as u8)) {
                self.registers.set(reg, *value);
            }
        }
    }

    fn handle(&mut self, bytes: &[u8]) -> Result<Vec<u8>, BusError> {
        let Some(&first) = bytes.first() else {
            return Ok(Vec::new());
        };
        let cmd = CommandByte::from_raw(first);
        let mut out = vec![0u8];
        match cmd.kind() {
            Some(CommandKind::ReadCommand) => {
                let (a, b) = self.advance()?;
                let half = 1 + self.conversion_len();
                self.encode_conversion(a, &mut out);
                if bytes.len() >= 2 * half {
                    out.push(0);
                    self.encode_conversion(b, &mut out);
                }
            }
            Some(CommandKind::ReadRegisters) => {
                self.transactions += 1;
                let count = if cmd.multiple() { bytes.len() - 1 } else { 1 };
                out.extend(self.read_registers(cmd.address(), count));
            }
            Some(CommandKind::WriteRegisters) => {
                self.transactions += 1;
                let data = if cmd.multiple() {
                    &bytes[1..]
                } else {
                    &bytes[1..bytes.len().min(2)]
                };
                self.write_registers(cmd.address(), data);
            }
            Some(CommandKind::Reset) => {
                self.transactions += 1;
                self.registers = RegisterImage::default();
            }
            Some(CommandKind::PulseConvert) | Some(CommandKind::ReadDirect) | None => {
                self.transactions += 1;
            }
        }
        out.resize(bytes.len(), 0);
        Ok(out)
    }
}

/// Shared handle to a simulated converter.
#[derive(Clone)]
pub struct SimulatedAdc {
    state: Arc<Mutex<SimState>>,
}

impl std::fmt::Debug for SimulatedAdc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimulatedAdc")
            .field("registers", &state.registers)
            .field("transactions", &state.transactions)
            .field("exhausted", &state.exhausted)
            .finish()
    }
}

impl SimulatedAdc {
    /// Simulator with default registers fed by `source`.
    pub fn new(source: impl ConversionSource + 'static) -> Self {
        let state = SimState {
            registers: RegisterImage::default(),
            pins: [Level::Low, Level::High, Level::Low, Level::High, Level::High],
            source: Box::new(source),
            current: None,
            exhausted: false,
            transfer_faults: 0,
            desyncs: 0,
            corrupt_readbacks: 0,
            failed_pins: [false; 5],
            transactions: 0,
            data_reads: 0,
            writes: 0,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Bus half of the interface.
    pub fn bus(&self) -> SimBus {
        SimBus {
            state: Arc::clone(&self.state),
        }
    }

    /// Pin half of the interface.
    pub fn pins(&self) -> SimPins {
        SimPins {
            state: Arc::clone(&self.state),
        }
    }

    /// Current register file.
    pub fn registers(&self) -> RegisterImage {
        self.state.lock().registers
    }

    /// Overwrite one register behind the controller's back.
    pub fn poke(&self, reg: RegisterAddress, value: u8) {
        self.state.lock().registers.set(reg, value);
    }

    /// Level last driven on (or reported by) `pin`.
    pub fn pin(&self, pin: Pin) -> Level {
        self.state.lock().level(pin)
    }

    /// Fail the next `n` data transactions.
    pub fn inject_transfer_faults(&self, n: usize) {
        self.state.lock().transfer_faults += n;
    }

    /// Make the two halves of the next `n` dual reads disagree on value.
    pub fn inject_desync(&self, n: usize) {
        self.state.lock().desyncs += n;
    }

    /// Flip a bit in the next `n` register read-backs.
    pub fn corrupt_readbacks(&self, n: usize) {
        self.state.lock().corrupt_readbacks += n;
    }

    /// Make every later write to `pin` fail.
    pub fn fail_pin(&self, pin: Pin) {
        self.state.lock().failed_pins[SimState::pin_index(pin)] = true;
    }

    /// Replace the conversion source.
    pub fn set_source(&self, source: impl ConversionSource + 'static) {
        let mut state = self.state.lock();
        state.source = Box::new(source);
        state.exhausted = false;
    }

    /// Whether the source has run dry.
    pub fn is_exhausted(&self) -> bool {
        self.state.lock().exhausted
    }

    /// Total bus transactions served.
    pub fn transactions(&self) -> u64 {
        self.state.lock().transactions
    }

    /// Data transactions that completed without an injected fault.
    pub fn data_reads(&self) -> u64 {
        self.state.lock().data_reads
    }

    /// Register write transactions that reached the register file.
    pub fn register_writes(&self) -> u64 {
        self.state.lock().writes
    }
}

/// Bus handle onto a [`SimulatedAdc`].
pub struct SimBus {
    state: Arc<Mutex<SimState>>,
}

impl SpiBus for SimBus {
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        self.state.lock().handle(bytes).map(|_| ())
    }

    fn transceive(&mut self, bytes: &[u8]) -> Result<Vec<u8>, BusError> {
        self.state.lock().handle(bytes)
    }

    fn receive(&mut self, len: usize) -> Result<Vec<u8>, BusError> {
        let mut state = self.state.lock();
        let (sample, _) = state.advance()?;
        let mut out = Vec::with_capacity(len);
        state.encode_conversion(sample, &mut out);
        out.resize(len, 0);
        Ok(out)
    }
}

/// Pin handle onto a [`SimulatedAdc`].
pub struct SimPins {
    state: Arc<Mutex<SimState>>,
}

impl PinControl for SimPins {
    fn set_output(&mut self, pin: Pin, level: Level) -> Result<(), BusError> {
        if !pin.is_output() {
            return Err(BusError::Gpio {
                pin,
                message: "not an output".to_string(),
            });
        }
        let mut state = self.state.lock();
        let index = SimState::pin_index(pin);
        if state.failed_pins[index] {
            return Err(BusError::Gpio {
                pin,
                message: "injected line fault".to_string(),
            });
        }
        state.pins[index] = level;
        if state.held_in_reset() {
            state.registers = RegisterImage::default();
            state.current = None;
        }
        Ok(())
    }

    fn get_input(&mut self, pin: Pin) -> Result<Level, BusError> {
        Ok(self.state.lock().level(pin))
    }

    fn wait_for_event(&mut self, pin: Pin, timeout: Duration) -> Result<bool, BusError> {
        let ready = {
            let state = self.state.lock();
            pin == Pin::DataReady && state.level(Pin::Start).is_high() && !state.exhausted
        };
        if !ready {
            std::thread::sleep(timeout.min(Duration::from_millis(1)));
        }
        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_sample;

    fn powered(adc: &SimulatedAdc) -> SimPins {
        let mut pins = adc.pins();
        pins.set_output(Pin::PowerDown, Level::High).unwrap();
        pins.set_output(Pin::Reset, Level::High).unwrap();
        pins
    }

    #[test]
    fn test_register_write_echo() {
        let adc = SimulatedAdc::new(ScriptedSource::default());
        let _pins = powered(&adc);
        let mut bus = adc.bus();

        let write = CommandByte::new(CommandKind::WriteRegisters, false, 0x5);
        bus.transmit(&[write.raw(), 0x0F]).unwrap();
        assert_eq!(adc.registers().get(RegisterAddress::Muxsg1), 0x0F);

        let read = CommandByte::new(CommandKind::ReadRegisters, false, 0x5);
        let rx = bus.transceive(&[read.raw(), 0]).unwrap();
        assert_eq!(rx, vec![0, 0x0F]);
    }

    #[test]
    fn test_multi_register_read_includes_id() {
        let adc = SimulatedAdc::new(ScriptedSource::default());
        let mut bus = adc.bus();
        let read = CommandByte::new(CommandKind::ReadRegisters, true, 0);
        let rx = bus.transceive(&[read.raw(); 11]).unwrap();
        assert_eq!(&rx[1..10], RegisterImage::default().bytes());
        assert_eq!(rx[10], SIM_DEVICE_ID);
    }

    #[test]
    fn test_power_down_resets_registers() {
        let adc = SimulatedAdc::new(ScriptedSource::default());
        let mut pins = powered(&adc);
        adc.poke(RegisterAddress::Muxdif, 0x01);
        pins.set_output(Pin::PowerDown, Level::Low).unwrap();
        assert_eq!(adc.registers(), RegisterImage::default());
    }

    #[test]
    fn test_dual_read_sees_same_conversion() {
        let sample = ChannelSample::new(ChannelId::single_ended(15), -42);
        let adc = SimulatedAdc::new(ScriptedSource::new([SimRead::Fresh(sample)]));
        let mut pins = powered(&adc);
        pins.set_output(Pin::Start, Level::High).unwrap();
        let mut bus = adc.bus();

        let cmd = CommandByte::new(CommandKind::ReadCommand, true, 0).raw();
        let rx = bus.transceive(&[cmd, 0, 0, 0, 0, cmd, 0, 0, 0, 0]).unwrap();
        assert_eq!(StatusByte::from_raw(rx[1]).channel(), sample.channel);
        assert_eq!(decode_sample([rx[2], rx[3], rx[4]]), -42);
        assert_eq!(rx[1..5], rx[6..10]);
    }

    #[test]
    fn test_counter_source_cycles_active_channels() {
        let mut source = CounterSource::new().limit(5);
        let active = ChannelSet::from_bits(0b1_0000_0001);
        let mut seen = Vec::new();
        while let Some(SimRead::Fresh(sample)) = source.next_read(active) {
            seen.push((sample.channel.raw(), sample.value));
        }
        assert_eq!(seen, vec![(0, 1), (8, 2), (0, 3), (8, 4), (0, 5)]);
    }

    #[test]
    fn test_injected_transfer_fault() {
        let adc = SimulatedAdc::new(CounterSource::new());
        let mut bus = adc.bus();
        adc.inject_transfer_faults(1);
        assert!(bus.receive(4).is_err());
        assert!(bus.receive(4).is_ok());
        assert_eq!(adc.data_reads(), 1);
    }

    #[test]
    fn test_dead_channel_never_reports() {
        let mut source = CounterSource::new().limit(9).dead_channel(1);
        let active = ChannelSet::from_bits(0b111);
        let mut seen = Vec::new();
        while let Some(SimRead::Fresh(sample)) = source.next_read(active) {
            seen.push(sample.value);
        }
        assert_eq!(seen, vec![1, 0, 3, 4, 0, 6, 7, 0, 9]);
    }

    #[test]
    fn test_injected_pin_fault() {
        let adc = SimulatedAdc::new(CounterSource::new());
        let mut pins = powered(&adc);
        adc.fail_pin(Pin::Start);
        assert!(matches!(
            pins.set_output(Pin::Start, Level::High),
            Err(BusError::Gpio { pin: Pin::Start, .. })
        ));
        assert!(!pins.get_input(Pin::Start).unwrap().is_high());
        pins.set_output(Pin::Reset, Level::High).unwrap();
    }
}
