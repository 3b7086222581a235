//! The logical clock and pin model.
//!
//! The [`Emulator`] is the single authority over simulated time. Firmware
//! running under the harness only interacts with this API surface; every
//! call converts into time advancement and, for writes, pin-event emission.
//! There is no other way to move the clock, which is what makes runs fully
//! deterministic.
//!
//! Each digital pin is a small state machine with fixed board *wiring*
//! (input or output, decided at registration) and a firmware-chosen *mode*
//! (set once, typically in `setup`). Output pins head an observer chain;
//! input pins terminate a producer chain that feeds them scheduled stimuli.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimulationError};
use crate::pipeline::{attach_to_tail, ChainLink, EventConsumer, SharedConsumer};
use crate::types::{BitOrder, LogTime, PinId, HIGH, INPUT, LOW, OUTPUT, UNDEFINED};

/// Default clock cost of a pin read, in microseconds.
pub const DEFAULT_READ_DELAY: LogTime = 20;
/// Default clock cost of a pin write, in microseconds.
pub const DEFAULT_WRITE_DELAY: LogTime = 20;
/// Default clock cost of a mode change, in microseconds.
pub const DEFAULT_SET_MODE_DELAY: LogTime = 100;

/// One observed change of a pin's level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PinState {
    /// Pin identifier.
    pub pin: PinId,
    /// New level (either written by firmware or received as input).
    pub value: i32,
}

impl PinState {
    /// Creates a pin-state record.
    pub fn new(pin: PinId, value: i32) -> Self {
        Self { pin, value }
    }

    /// Builds a sequence of states of one pin from plain level values.
    ///
    /// Handy for assertion needles:
    /// `PinState::sequence(13, &[LOW, HIGH])`.
    pub fn sequence(pin: PinId, values: &[i32]) -> Vec<PinState> {
        values.iter().map(|&v| PinState::new(pin, v)).collect()
    }
}

impl fmt::Display for PinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pin, self.value)
    }
}

/// A single digital pin and its observer chain.
///
/// The pin is itself a pipeline consumer: input pins sit at the end of their
/// producer chain and record whatever level reaches them; output pins head
/// the chain of attached observers.
pub struct Pin {
    chain: ChainLink<PinState>,
    state: PinState,
    /// How the pin is physically wired on the board.
    wiring: i32,
    /// Operating mode chosen by the firmware.
    mode: i32,
}

impl Pin {
    fn new(pin: PinId, wiring: i32) -> Self {
        Self {
            chain: ChainLink::new(),
            state: PinState::new(pin, UNDEFINED),
            wiring,
            mode: UNDEFINED,
        }
    }

    /// The pin's identifier.
    pub fn id(&self) -> PinId {
        self.state.pin
    }

    /// The pin's current level.
    pub fn value(&self) -> i32 {
        self.state.value
    }

    /// The firmware-selected mode (`INPUT`, `OUTPUT`, or `UNDEFINED`).
    pub fn mode(&self) -> i32 {
        self.mode
    }

    /// The board wiring (`INPUT`, `OUTPUT`, or `UNDEFINED`).
    pub fn wiring(&self) -> i32 {
        self.wiring
    }

    /// Clears firmware-visible state; wiring is fixed for the pin's lifetime.
    fn reset(&mut self) {
        self.mode = UNDEFINED;
        self.state.value = UNDEFINED;
    }

    /// Changes the mode of the pin. Allowed once; repeating the same mode is
    /// a no-op.
    fn set_mode(&mut self, mode: i32) -> Result<()> {
        if mode != INPUT && mode != OUTPUT {
            return Err(SimulationError::PinModeInvalid {
                pin: self.state.pin,
                mode,
            });
        }
        if self.mode != UNDEFINED && self.mode != mode {
            return Err(SimulationError::PinModeConflict {
                pin: self.state.pin,
                reason: "I/O mode cannot change at runtime",
            });
        }
        if self.wiring == INPUT && mode == OUTPUT {
            return Err(SimulationError::PinWiringConflict {
                pin: self.state.pin,
                reason: "driving an input-wired pin would short the circuit",
            });
        }
        if self.wiring == OUTPUT && mode == INPUT {
            return Err(SimulationError::PinWiringConflict {
                pin: self.state.pin,
                reason: "an output-wired pin cannot be read as input",
            });
        }

        self.mode = mode;

        // Pull-up: an input pin that was never driven reads high.
        if self.mode == INPUT && self.state.value == UNDEFINED {
            self.state.value = HIGH;
        }
        Ok(())
    }

    /// Reads the level of an input pin.
    fn read(&self) -> Result<i32> {
        if self.mode == UNDEFINED {
            return Err(SimulationError::PinModeConflict {
                pin: self.state.pin,
                reason: "mode must be set before the pin is used",
            });
        }
        if self.mode != INPUT {
            return Err(SimulationError::PinModeConflict {
                pin: self.state.pin,
                reason: "cannot read from an output pin",
            });
        }
        Ok(self.state.value)
    }

    /// Drives an output pin, emitting the change to the observer chain.
    fn write(&mut self, value: i32, time: LogTime) -> Result<()> {
        if self.mode == UNDEFINED {
            return Err(SimulationError::PinModeConflict {
                pin: self.state.pin,
                reason: "mode must be set before the pin is used",
            });
        }
        if self.mode != OUTPUT {
            return Err(SimulationError::PinModeConflict {
                pin: self.state.pin,
                reason: "cannot write to an input pin",
            });
        }

        self.state.value = value;
        let state = self.state;
        self.on_event(time, state)
    }
}

impl EventConsumer<PinState> for Pin {
    fn chain(&self) -> &ChainLink<PinState> {
        &self.chain
    }

    fn chain_mut(&mut self) -> &mut ChainLink<PinState> {
        &mut self.chain
    }

    fn process_event(&mut self, time: LogTime, state: PinState) -> Result<()> {
        if self.state.pin == state.pin {
            self.state.value = state.value;
        }
        self.chain.forward_event(time, state)
    }
}

/// Gateable functions of the API surface.
///
/// Every function of the emulator checks its gate first; a disabled call
/// fails with [`SimulationError::ApiDisabled`]. Gates let a test assert that
/// firmware does not rely on, say, busy-wait delays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiFunction {
    PinMode,
    DigitalWrite,
    DigitalRead,
    AnalogRead,
    AnalogReference,
    AnalogWrite,
    Millis,
    Micros,
    Delay,
    DelayMicroseconds,
    PulseIn,
    PulseInLong,
    ShiftOut,
    ShiftIn,
    Tone,
    NoTone,
    Serial,
}

impl ApiFunction {
    /// All gateable functions.
    pub const ALL: [ApiFunction; 17] = [
        ApiFunction::PinMode,
        ApiFunction::DigitalWrite,
        ApiFunction::DigitalRead,
        ApiFunction::AnalogRead,
        ApiFunction::AnalogReference,
        ApiFunction::AnalogWrite,
        ApiFunction::Millis,
        ApiFunction::Micros,
        ApiFunction::Delay,
        ApiFunction::DelayMicroseconds,
        ApiFunction::PulseIn,
        ApiFunction::PulseInLong,
        ApiFunction::ShiftOut,
        ApiFunction::ShiftIn,
        ApiFunction::Tone,
        ApiFunction::NoTone,
        ApiFunction::Serial,
    ];

    /// The snake_case name used in configurations.
    pub fn name(self) -> &'static str {
        match self {
            ApiFunction::PinMode => "pin_mode",
            ApiFunction::DigitalWrite => "digital_write",
            ApiFunction::DigitalRead => "digital_read",
            ApiFunction::AnalogRead => "analog_read",
            ApiFunction::AnalogReference => "analog_reference",
            ApiFunction::AnalogWrite => "analog_write",
            ApiFunction::Millis => "millis",
            ApiFunction::Micros => "micros",
            ApiFunction::Delay => "delay",
            ApiFunction::DelayMicroseconds => "delay_microseconds",
            ApiFunction::PulseIn => "pulse_in",
            ApiFunction::PulseInLong => "pulse_in_long",
            ApiFunction::ShiftOut => "shift_out",
            ApiFunction::ShiftIn => "shift_in",
            ApiFunction::Tone => "tone",
            ApiFunction::NoTone => "no_tone",
            ApiFunction::Serial => "serial",
        }
    }

    /// Parses a configuration name back into a gate.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }
}

/// Process-wide acquisition flag for [`Emulator::acquire`].
static EMULATOR_ACQUIRED: Mutex<bool> = Mutex::new(false);

/// The emulated board: clock, pins, serial receive buffer, and API gates.
pub struct Emulator {
    clock: LogTime,
    pins: BTreeMap<PinId, Rc<RefCell<Pin>>>,
    /// Producer chains feeding the input pins, by pin id. The emulator
    /// advances them on every clock move so due stimuli reach their pins.
    inputs: BTreeMap<PinId, SharedConsumer<PinState>>,
    serial_rx: VecDeque<u8>,
    gates: BTreeMap<ApiFunction, bool>,
    read_delay: LogTime,
    write_delay: LogTime,
    set_mode_delay: LogTime,
}

impl fmt::Debug for Emulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emulator")
            .field("clock", &self.clock)
            .field("read_delay", &self.read_delay)
            .field("write_delay", &self.write_delay)
            .field("set_mode_delay", &self.set_mode_delay)
            .finish_non_exhaustive()
    }
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Emulator {
    /// Creates a board with no pins, default delays, and every gate open
    /// except `serial`.
    pub fn new() -> Self {
        let mut gates = BTreeMap::new();
        for f in ApiFunction::ALL {
            gates.insert(f, f != ApiFunction::Serial);
        }
        Self {
            clock: 0,
            pins: BTreeMap::new(),
            inputs: BTreeMap::new(),
            serial_rx: VecDeque::new(),
            gates,
            read_delay: DEFAULT_READ_DELAY,
            write_delay: DEFAULT_WRITE_DELAY,
            set_mode_delay: DEFAULT_SET_MODE_DELAY,
        }
    }

    /// Acquires the process-wide emulator instance.
    ///
    /// Firmware addresses the board as an ambient singleton, so a process
    /// hosts at most one acquired instance; a second acquisition fails with
    /// [`SimulationError::AlreadyInitialized`]. [`Emulator::new`] remains
    /// available for embedding and tests.
    pub fn acquire() -> Result<Emulator> {
        let mut acquired = EMULATOR_ACQUIRED.lock();
        if *acquired {
            return Err(SimulationError::AlreadyInitialized);
        }
        *acquired = true;
        Ok(Emulator::new())
    }

    /// Current logical time in microseconds.
    pub fn now(&self) -> LogTime {
        self.clock
    }

    /// Overrides the per-call clock costs.
    pub fn set_delays(&mut self, read: LogTime, write: LogTime, set_mode: LogTime) {
        self.read_delay = read;
        self.write_delay = write;
        self.set_mode_delay = set_mode;
    }

    /// Registers a new pin with the given wiring.
    pub fn register_pin(&mut self, pin: PinId, wiring: i32) -> Result<()> {
        if self.pins.contains_key(&pin) {
            return Err(SimulationError::PinDuplicated(pin));
        }
        self.pins
            .insert(pin, Rc::new(RefCell::new(Pin::new(pin, wiring))));
        Ok(())
    }

    /// Removes every registered pin and input chain.
    pub fn remove_all_pins(&mut self) {
        self.inputs.clear();
        self.pins.clear();
    }

    fn pin(&self, pin: PinId) -> Result<Rc<RefCell<Pin>>> {
        self.pins
            .get(&pin)
            .cloned()
            .ok_or(SimulationError::PinUndefined(pin))
    }

    /// Current level of a pin, regardless of mode.
    pub fn pin_value(&self, pin: PinId) -> Result<i32> {
        Ok(self.pin(pin)?.borrow().value())
    }

    /// Attaches an observer to the end of a pin's consumer chain.
    ///
    /// Output pins emit every written level change to this chain.
    pub fn attach_pin_consumer(
        &mut self,
        pin: PinId,
        consumer: SharedConsumer<PinState>,
    ) -> Result<()> {
        let pin_rc = self.pin(pin)?;
        let head: SharedConsumer<PinState> = pin_rc;
        attach_to_tail(&head, consumer)
    }

    /// Wires a producer chain into an input pin.
    ///
    /// The pin becomes the terminus of the chain; re-attaching replaces a
    /// previously registered chain (the pin is detached from it first).
    pub fn register_pin_input(
        &mut self,
        pin: PinId,
        producer: SharedConsumer<PinState>,
    ) -> Result<()> {
        let pin_rc = self.pin(pin)?;
        if pin_rc.borrow().wiring() != INPUT {
            return Err(SimulationError::PinWiringConflict {
                pin,
                reason: "input producers attach only to input-wired pins",
            });
        }

        let terminus: SharedConsumer<PinState> = pin_rc;
        if let Some(old) = self.inputs.remove(&pin) {
            detach_from_chain(&old, &terminus)?;
        }
        attach_to_tail(&producer, terminus)?;
        self.inputs.insert(pin, producer);
        Ok(())
    }

    /// Clears the recorded state of a pin's consumer chain.
    pub fn clear_pin(&mut self, pin: PinId) -> Result<()> {
        self.pin(pin)?
            .try_borrow_mut()
            .map_err(|_| SimulationError::InvariantViolation("re-entrant pipeline chain"))?
            .on_clear()
    }

    /// Resets the clock and all firmware-visible pin state.
    ///
    /// Pending events in registered input chains are purged; pin modes and
    /// values return to `UNDEFINED`.
    pub fn reset(&mut self) -> Result<()> {
        self.clock = 0;
        self.serial_rx.clear();
        for input in self.inputs.values() {
            input
                .try_borrow_mut()
                .map_err(|_| SimulationError::InvariantViolation("re-entrant pipeline chain"))?
                .on_clear()?;
        }
        for pin in self.pins.values() {
            pin.borrow_mut().reset();
        }
        Ok(())
    }

    /// Advances the logical clock by `dt` microseconds.
    ///
    /// This is the single mutator of the clock. After moving it, every
    /// registered input producer is advanced (releasing due stimuli into its
    /// pin), then every pin (so output-side observers see the tick).
    pub fn advance_clock(&mut self, dt: LogTime) -> Result<()> {
        self.clock = self
            .clock
            .checked_add(dt)
            .ok_or(SimulationError::InvariantViolation("clock overflow"))?;

        for input in self.inputs.values() {
            input
                .try_borrow_mut()
                .map_err(|_| SimulationError::InvariantViolation("re-entrant pipeline chain"))?
                .on_time_advance(self.clock)?;
        }
        for pin in self.pins.values() {
            pin.borrow_mut().on_time_advance(self.clock)?;
        }
        Ok(())
    }

    /// Returns whether an API function is currently enabled.
    pub fn api_enabled(&self, function: ApiFunction) -> bool {
        self.gates.get(&function).copied().unwrap_or(false)
    }

    /// Enables or disables an API function.
    pub fn set_api_enabled(&mut self, function: ApiFunction, enabled: bool) {
        self.gates.insert(function, enabled);
    }

    fn check_enabled(&self, function: ApiFunction) -> Result<()> {
        if !self.api_enabled(function) {
            return Err(SimulationError::ApiDisabled(function.name()));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // API surface available to the tested firmware.
    // ------------------------------------------------------------------

    /// Configures a pin as input or output.
    pub fn pin_mode(&mut self, pin: PinId, mode: i32) -> Result<()> {
        self.check_enabled(ApiFunction::PinMode)?;
        self.pin(pin)?.borrow_mut().set_mode(mode)?;
        self.advance_clock(self.set_mode_delay)
    }

    /// Writes `HIGH` or `LOW` to an output pin.
    pub fn digital_write(&mut self, pin: PinId, value: i32) -> Result<()> {
        self.check_enabled(ApiFunction::DigitalWrite)?;
        let now = self.clock;
        self.pin(pin)?.borrow_mut().write(value, now)?;
        self.advance_clock(self.write_delay)
    }

    /// Reads the level of an input pin.
    pub fn digital_read(&mut self, pin: PinId) -> Result<i32> {
        self.check_enabled(ApiFunction::DigitalRead)?;
        let value = self.pin(pin)?.borrow().read()?;
        self.advance_clock(self.read_delay)?;
        Ok(value)
    }

    /// Reads an analog level; the binary pin level scaled to the ADC range.
    pub fn analog_read(&mut self, pin: PinId) -> Result<i32> {
        self.check_enabled(ApiFunction::AnalogRead)?;
        let value = self.pin(pin)?.borrow().read()?;
        self.advance_clock(self.read_delay)?;
        Ok(value * 1023)
    }

    /// Configures the analog reference voltage.
    pub fn analog_reference(&mut self, _mode: i32) -> Result<()> {
        self.check_enabled(ApiFunction::AnalogReference)?;
        Err(SimulationError::NotImplemented("analog_reference"))
    }

    /// Writes a PWM value to a pin.
    pub fn analog_write(&mut self, _pin: PinId, _value: i32) -> Result<()> {
        self.check_enabled(ApiFunction::AnalogWrite)?;
        Err(SimulationError::NotImplemented("analog_write"))
    }

    /// Milliseconds elapsed since the program started.
    pub fn millis(&self) -> Result<u64> {
        self.check_enabled(ApiFunction::Millis)?;
        Ok(self.clock / 1000)
    }

    /// Microseconds elapsed since the program started.
    pub fn micros(&self) -> Result<u64> {
        self.check_enabled(ApiFunction::Micros)?;
        Ok(self.clock)
    }

    /// Pauses the program for `ms` milliseconds.
    pub fn delay(&mut self, ms: u64) -> Result<()> {
        self.check_enabled(ApiFunction::Delay)?;
        self.advance_clock(ms.saturating_mul(1000))
    }

    /// Pauses the program for `us` microseconds.
    pub fn delay_microseconds(&mut self, us: u64) -> Result<()> {
        self.check_enabled(ApiFunction::DelayMicroseconds)?;
        self.advance_clock(us)
    }

    /// Measures a pulse on a pin.
    pub fn pulse_in(&mut self, _pin: PinId, _state: i32, _timeout: u64) -> Result<u64> {
        self.check_enabled(ApiFunction::PulseIn)?;
        Err(SimulationError::NotImplemented("pulse_in"))
    }

    /// Measures a long pulse on a pin.
    pub fn pulse_in_long(&mut self, _pin: PinId, _state: i32, _timeout: u64) -> Result<u64> {
        self.check_enabled(ApiFunction::PulseInLong)?;
        Err(SimulationError::NotImplemented("pulse_in_long"))
    }

    /// Generates a square wave of the given frequency on a pin.
    pub fn tone(&mut self, _pin: PinId, _frequency: u32, _duration: u64) -> Result<()> {
        self.check_enabled(ApiFunction::Tone)?;
        Err(SimulationError::NotImplemented("tone"))
    }

    /// Stops a square wave started by [`tone`](Emulator::tone).
    pub fn no_tone(&mut self, _pin: PinId) -> Result<()> {
        self.check_enabled(ApiFunction::NoTone)?;
        Err(SimulationError::NotImplemented("no_tone"))
    }

    /// Shifts a byte out one bit at a time over a data/clock pin pair.
    ///
    /// Purely derived from `digital_write`: per bit, the data pin is set and
    /// the clock pin pulsed high then low.
    pub fn shift_out(
        &mut self,
        data_pin: PinId,
        clock_pin: PinId,
        order: BitOrder,
        value: u8,
    ) -> Result<()> {
        self.check_enabled(ApiFunction::ShiftOut)?;

        let mut value = value;
        for _ in 0..8 {
            let bit = match order {
                BitOrder::LsbFirst => {
                    let b = value & 1;
                    value >>= 1;
                    b != 0
                }
                BitOrder::MsbFirst => {
                    let b = value & 0x80;
                    value <<= 1;
                    b != 0
                }
            };
            self.digital_write(data_pin, if bit { HIGH } else { LOW })?;
            self.digital_write(clock_pin, HIGH)?;
            self.digital_write(clock_pin, LOW)?;
        }
        Ok(())
    }

    /// Shifts a byte in one bit at a time; the dual of
    /// [`shift_out`](Emulator::shift_out).
    pub fn shift_in(&mut self, data_pin: PinId, clock_pin: PinId, order: BitOrder) -> Result<u8> {
        self.check_enabled(ApiFunction::ShiftIn)?;

        let mut value = 0u8;
        for i in 0..8 {
            self.digital_write(clock_pin, HIGH)?;
            let bit = self.digital_read(data_pin)? != LOW;
            if bit {
                match order {
                    BitOrder::LsbFirst => value |= 1 << i,
                    BitOrder::MsbFirst => value |= 1 << (7 - i),
                }
            }
            self.digital_write(clock_pin, LOW)?;
        }
        Ok(value)
    }

    /// Number of bytes waiting in the serial receive buffer.
    pub fn serial_available(&self) -> Result<usize> {
        self.check_enabled(ApiFunction::Serial)?;
        Ok(self.serial_rx.len())
    }

    /// Next byte of the serial receive buffer without consuming it.
    pub fn serial_peek(&self) -> Result<Option<u8>> {
        self.check_enabled(ApiFunction::Serial)?;
        Ok(self.serial_rx.front().copied())
    }

    /// Consumes and returns the next byte of the serial receive buffer.
    pub fn serial_read(&mut self) -> Result<Option<u8>> {
        self.check_enabled(ApiFunction::Serial)?;
        Ok(self.serial_rx.pop_front())
    }

    /// Appends bytes to the serial receive buffer (harness side; not gated).
    pub fn feed_serial(&mut self, bytes: &[u8]) {
        self.serial_rx.extend(bytes);
    }
}

/// Detaches `terminus` from the chain starting at `head`, wherever it sits.
fn detach_from_chain(
    head: &SharedConsumer<PinState>,
    terminus: &SharedConsumer<PinState>,
) -> Result<()> {
    let mut current = head.clone();
    loop {
        let next = current.borrow().chain().next();
        match next {
            Some(n) if same_consumer(&n, terminus) => {
                return current.borrow_mut().chain_mut().detach();
            }
            Some(n) => current = n,
            None => return Ok(()),
        }
    }
}

/// Pointer identity of two shared consumers (data pointer, not vtable).
fn same_consumer(a: &SharedConsumer<PinState>, b: &SharedConsumer<PinState>) -> bool {
    std::ptr::eq(Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::shared;
    use crate::series::{FutureStore, TimeSeries};

    fn board_with_pin(pin: PinId, wiring: i32) -> Emulator {
        let mut emu = Emulator::new();
        emu.register_pin(pin, wiring).unwrap();
        emu
    }

    #[test]
    fn test_acquire_is_single_shot() {
        // The only test in the suite that touches the process-wide flag.
        let first = Emulator::acquire();
        assert!(first.is_ok());
        let second = Emulator::acquire();
        assert!(matches!(
            second.unwrap_err(),
            SimulationError::AlreadyInitialized
        ));
    }

    #[test]
    fn test_pin_registration() {
        let mut emu = Emulator::new();
        emu.register_pin(13, OUTPUT).unwrap();
        assert!(matches!(
            emu.register_pin(13, OUTPUT),
            Err(SimulationError::PinDuplicated(13))
        ));
        assert!(matches!(
            emu.pin_value(5),
            Err(SimulationError::PinUndefined(5))
        ));
    }

    #[test]
    fn test_mode_transitions() {
        let mut emu = board_with_pin(7, UNDEFINED);
        emu.pin_mode(7, INPUT).unwrap();
        emu.pin_mode(7, INPUT).unwrap(); // same mode again is fine
        assert!(matches!(
            emu.pin_mode(7, OUTPUT),
            Err(SimulationError::PinModeConflict { .. })
        ));

        let mut emu = board_with_pin(7, UNDEFINED);
        assert!(matches!(
            emu.pin_mode(7, 5),
            Err(SimulationError::PinModeInvalid { pin: 7, mode: 5 })
        ));
    }

    #[test]
    fn test_wiring_conflicts() {
        let mut emu = board_with_pin(2, INPUT);
        assert!(matches!(
            emu.pin_mode(2, OUTPUT),
            Err(SimulationError::PinWiringConflict { .. })
        ));

        let mut emu = board_with_pin(3, OUTPUT);
        assert!(matches!(
            emu.pin_mode(3, INPUT),
            Err(SimulationError::PinWiringConflict { .. })
        ));
    }

    #[test]
    fn test_pull_up_on_input() {
        let mut emu = board_with_pin(2, INPUT);
        emu.pin_mode(2, INPUT).unwrap();
        assert_eq!(emu.digital_read(2).unwrap(), HIGH);
    }

    #[test]
    fn test_read_write_guards() {
        let mut emu = board_with_pin(13, OUTPUT);
        // Mode not set yet.
        assert!(emu.digital_write(13, HIGH).is_err());
        emu.pin_mode(13, OUTPUT).unwrap();
        emu.digital_write(13, HIGH).unwrap();
        assert!(emu.digital_read(13).is_err()); // reads need an input pin
        assert_eq!(emu.pin_value(13).unwrap(), HIGH);
    }

    #[test]
    fn test_clock_advances_per_call() {
        let mut emu = board_with_pin(13, OUTPUT);
        emu.pin_mode(13, OUTPUT).unwrap();
        assert_eq!(emu.now(), DEFAULT_SET_MODE_DELAY);
        emu.digital_write(13, HIGH).unwrap();
        assert_eq!(emu.now(), DEFAULT_SET_MODE_DELAY + DEFAULT_WRITE_DELAY);
        emu.delay(2).unwrap();
        assert_eq!(
            emu.now(),
            DEFAULT_SET_MODE_DELAY + DEFAULT_WRITE_DELAY + 2000
        );
        assert_eq!(emu.millis().unwrap(), 2);
    }

    #[test]
    fn test_api_gate() {
        let mut emu = board_with_pin(13, OUTPUT);
        emu.pin_mode(13, OUTPUT).unwrap();
        emu.set_api_enabled(ApiFunction::DigitalWrite, false);
        assert!(matches!(
            emu.digital_write(13, HIGH),
            Err(SimulationError::ApiDisabled("digital_write"))
        ));
        emu.set_api_enabled(ApiFunction::DigitalWrite, true);
        emu.digital_write(13, HIGH).unwrap();
    }

    #[test]
    fn test_api_function_names() {
        for f in ApiFunction::ALL {
            assert_eq!(ApiFunction::from_name(f.name()), Some(f));
        }
        assert_eq!(ApiFunction::from_name("reboot"), None);
    }

    #[test]
    fn test_output_events_reach_consumers() {
        let mut emu = board_with_pin(13, OUTPUT);
        let sink = shared(TimeSeries::new());
        emu.attach_pin_consumer(13, sink.clone()).unwrap();

        emu.pin_mode(13, OUTPUT).unwrap();
        emu.digital_write(13, HIGH).unwrap();
        emu.digital_write(13, LOW).unwrap();

        let events = sink.borrow();
        assert_eq!(events.len(), 2);
        assert_eq!(events.get(0).unwrap().value, PinState::new(13, HIGH));
        assert_eq!(events.get(1).unwrap().value, PinState::new(13, LOW));
        assert!(events.get(0).unwrap().time < events.get(1).unwrap().time);
    }

    #[test]
    fn test_input_producer_drives_pin() {
        let mut emu = board_with_pin(2, INPUT);
        emu.pin_mode(2, INPUT).unwrap();

        let store = shared(FutureStore::new());
        store
            .borrow_mut()
            .add_future(emu.now() + 500, PinState::new(2, LOW))
            .unwrap();
        emu.register_pin_input(2, store).unwrap();

        assert_eq!(emu.digital_read(2).unwrap(), HIGH); // pull-up until due
        emu.advance_clock(1000).unwrap();
        assert_eq!(emu.digital_read(2).unwrap(), LOW);
    }

    #[test]
    fn test_input_reattach_replaces_chain() {
        let mut emu = board_with_pin(2, INPUT);
        emu.pin_mode(2, INPUT).unwrap();

        let first = shared(FutureStore::new());
        emu.register_pin_input(2, first.clone()).unwrap();
        let second = shared(FutureStore::new());
        emu.register_pin_input(2, second.clone()).unwrap();

        // The first chain lost its terminus; only the second drives the pin.
        assert!(first.borrow().chain().next().is_none());
        second
            .borrow_mut()
            .add_future(emu.now() + 1, PinState::new(2, LOW))
            .unwrap();
        emu.advance_clock(10).unwrap();
        assert_eq!(emu.pin_value(2).unwrap(), LOW);
    }

    #[test]
    fn test_shift_out_event_stream() {
        let mut emu = Emulator::new();
        emu.register_pin(8, OUTPUT).unwrap();
        emu.register_pin(7, OUTPUT).unwrap();
        let data_sink = shared(TimeSeries::new());
        emu.attach_pin_consumer(8, data_sink.clone()).unwrap();

        emu.pin_mode(8, OUTPUT).unwrap();
        emu.pin_mode(7, OUTPUT).unwrap();
        emu.shift_out(8, 7, BitOrder::MsbFirst, 0b1010_0001).unwrap();

        let written: Vec<i32> = data_sink.borrow().values().map(|s| s.value).collect();
        assert_eq!(written, vec![1, 0, 1, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_serial_buffer() {
        let mut emu = Emulator::new();
        assert!(matches!(
            emu.serial_available(),
            Err(SimulationError::ApiDisabled("serial"))
        ));

        emu.set_api_enabled(ApiFunction::Serial, true);
        assert_eq!(emu.serial_available().unwrap(), 0);
        assert_eq!(emu.serial_read().unwrap(), None);

        emu.feed_serial(b"ok");
        assert_eq!(emu.serial_available().unwrap(), 2);
        assert_eq!(emu.serial_peek().unwrap(), Some(b'o'));
        assert_eq!(emu.serial_read().unwrap(), Some(b'o'));
        assert_eq!(emu.serial_read().unwrap(), Some(b'k'));
    }

    #[test]
    fn test_not_implemented_surface() {
        let mut emu = Emulator::new();
        assert!(matches!(
            emu.analog_reference(0),
            Err(SimulationError::NotImplemented("analog_reference"))
        ));
        assert!(matches!(
            emu.pulse_in(2, HIGH, 1_000_000),
            Err(SimulationError::NotImplemented("pulse_in"))
        ));
    }

    #[test]
    fn test_reset_clears_state() {
        let mut emu = board_with_pin(13, OUTPUT);
        emu.pin_mode(13, OUTPUT).unwrap();
        emu.digital_write(13, HIGH).unwrap();

        emu.reset().unwrap();
        assert_eq!(emu.now(), 0);
        assert_eq!(emu.pin_value(13).unwrap(), UNDEFINED);
        assert!(emu.digital_write(13, HIGH).is_err()); // mode gone
    }
}
