//! The simulation controller.
//!
//! The [`Simulator`] drives tested firmware against the [`Emulator`]: it
//! schedules input stimuli into per-pin future-event buffers, injects serial
//! data, invokes the firmware entry points, and advances the clock between
//! loop iterations. It is the external interface the testing harness talks
//! to; the firmware itself only ever sees the emulator's API surface.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use tracing::debug;

use crate::emulator::{ApiFunction, Emulator, PinState};
use crate::error::{Result, SimulationError};
use crate::pipeline::{shared, SharedConsumer};
use crate::series::FutureStore;
use crate::types::{LogTime, PinId};

/// Default clock increment after `setup` and each `loop` call, in µs.
pub const DEFAULT_POST_DELAY: LogTime = 1;

/// The two entry points of tested firmware.
///
/// The harness calls `setup` once and then `loop_once` repeatedly, exactly
/// like the runtime the firmware was written for. Inside, the firmware talks
/// to the [`Emulator`] API surface; failures (disabled calls, pin misuse)
/// abort the current call and surface to the runner's caller.
pub trait Firmware {
    /// One-time initialization, typically pin mode setup.
    fn setup(&mut self, api: &mut Emulator) -> Result<()>;

    /// A single iteration of the main loop.
    fn loop_once(&mut self, api: &mut Emulator) -> Result<()>;
}

/// Controller that owns the emulated board and schedules its stimuli.
pub struct Simulator {
    emulator: Emulator,
    /// Future-event buffers feeding the input pins, created on first use.
    input_buffers: BTreeMap<PinId, Rc<RefCell<FutureStore<PinState>>>>,
    /// Scheduled serial payloads, kept in non-decreasing time order.
    serial_queue: VecDeque<(LogTime, String)>,
}

impl Simulator {
    /// Creates a controller around an emulator instance.
    pub fn new(emulator: Emulator) -> Self {
        Self {
            emulator,
            input_buffers: BTreeMap::new(),
            serial_queue: VecDeque::new(),
        }
    }

    /// The underlying emulator.
    pub fn emulator(&self) -> &Emulator {
        &self.emulator
    }

    /// Mutable access to the underlying emulator.
    pub fn emulator_mut(&mut self) -> &mut Emulator {
        &mut self.emulator
    }

    /// Current logical time.
    pub fn now(&self) -> LogTime {
        self.emulator.now()
    }

    /// Enables an API function. All functions start enabled except `serial`.
    pub fn enable_api(&mut self, function: ApiFunction) {
        self.emulator.set_api_enabled(function, true);
    }

    /// Disables an API function; firmware calls to it will fail.
    pub fn disable_api(&mut self, function: ApiFunction) {
        self.emulator.set_api_enabled(function, false);
    }

    /// Sets an API gate by its configuration name.
    pub fn set_api_enabled_by_name(&mut self, name: &str, enabled: bool) -> Result<()> {
        let function = ApiFunction::from_name(name).ok_or_else(|| SimulationError::BadInput {
            line: 0,
            reason: format!("unknown API function '{name}'"),
        })?;
        self.emulator.set_api_enabled(function, enabled);
        Ok(())
    }

    /// Attaches an observer to the end of an output pin's consumer chain.
    pub fn attach_pin_consumer(
        &mut self,
        pin: PinId,
        consumer: SharedConsumer<PinState>,
    ) -> Result<()> {
        self.emulator.attach_pin_consumer(pin, consumer)
    }

    /// Schedules a level change of an input pin at `now + delay`.
    ///
    /// The pin's future-event buffer is created and wired on first use.
    pub fn enqueue_pin_change(&mut self, pin: PinId, value: i32, delay: LogTime) -> Result<()> {
        let time = self.emulator.now() + delay;
        let state = PinState::new(pin, value);

        if let Some(buffer) = self.input_buffers.get(&pin) {
            return buffer.borrow_mut().add_future(time, state);
        }

        let buffer = shared(FutureStore::new());
        buffer.borrow_mut().add_future(time, state)?;
        self.emulator.register_pin_input(pin, buffer.clone())?;
        self.input_buffers.insert(pin, buffer);
        Ok(())
    }

    /// Schedules a serial payload to arrive at `now + delay`.
    ///
    /// Queue times must be non-decreasing; scheduling before the last queued
    /// entry fails.
    pub fn enqueue_serial(&mut self, input: &str, delay: LogTime) -> Result<()> {
        let time = self.emulator.now() + delay;
        if let Some(&(last, _)) = self.serial_queue.back() {
            if last > time {
                return Err(SimulationError::CausalityViolation {
                    last,
                    attempted: time,
                });
            }
        }
        self.serial_queue.push_back((time, input.to_string()));
        Ok(())
    }

    /// Clears the recorded events of a pin's consumer chain.
    pub fn clear_pin_events(&mut self, pin: PinId) -> Result<()> {
        self.emulator.clear_pin(pin)
    }

    /// Drops all scheduled serial payloads.
    pub fn clear_serial_queue(&mut self) {
        self.serial_queue.clear();
    }

    /// Advances the clock and delivers due serial payloads.
    fn advance_time(&mut self, dt: LogTime) -> Result<()> {
        self.emulator.advance_clock(dt)?;
        let now = self.emulator.now();
        while self.serial_queue.front().map_or(false, |&(time, _)| time <= now) {
            if let Some((_, payload)) = self.serial_queue.pop_front() {
                self.emulator.feed_serial(payload.as_bytes());
            }
        }
        Ok(())
    }

    /// Invokes the firmware's `setup`, then advances the clock.
    pub fn run_setup(&mut self, firmware: &mut dyn Firmware, post_delay: LogTime) -> Result<()> {
        debug!(now = self.now(), "running setup");
        firmware.setup(&mut self.emulator)?;
        self.advance_time(post_delay)
    }

    /// Invokes one `loop` iteration, then advances the clock.
    pub fn run_single_loop(
        &mut self,
        firmware: &mut dyn Firmware,
        post_delay: LogTime,
    ) -> Result<()> {
        firmware.loop_once(&mut self.emulator)?;
        self.advance_time(post_delay)
    }

    /// Runs up to `count` loop iterations.
    ///
    /// The predicate sees the clock after each iteration; returning false
    /// terminates the run immediately.
    pub fn run_multiple_loops(
        &mut self,
        firmware: &mut dyn Firmware,
        count: usize,
        post_delay: LogTime,
        mut predicate: impl FnMut(LogTime) -> bool,
    ) -> Result<()> {
        for _ in 0..count {
            self.run_single_loop(firmware, post_delay)?;
            if !predicate(self.now()) {
                break;
            }
        }
        Ok(())
    }

    /// Runs loop iterations until the clock has advanced by `period`.
    ///
    /// The predicate sees the clock after each iteration; returning false
    /// terminates the run immediately.
    pub fn run_loops_for(
        &mut self,
        firmware: &mut dyn Firmware,
        period: LogTime,
        post_delay: LogTime,
        mut predicate: impl FnMut(LogTime) -> bool,
    ) -> Result<()> {
        let end = self.now() + period;
        debug!(now = self.now(), end, "running loops");
        while self.now() < end {
            self.run_single_loop(firmware, post_delay)?;
            if !predicate(self.now()) {
                break;
            }
        }
        Ok(())
    }
}
