//! Wiring preset for the experiment shield.
//!
//! The shield carries three push buttons (active low, wired as inputs), four
//! independent LEDs, and a four-digit 7-segment display driven through a
//! shift register over a latch/clock/data pin triple. [`Shield`] registers
//! all of it on a [`Simulator`] and exposes button stimulus helpers with
//! optional contact-bounce emulation.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bits::BitArray;
use crate::display::{LedBank, SerialSegDisplay};
use crate::error::{Result, SimulationError};
use crate::pipeline::shared;
use crate::simulator::Simulator;
use crate::types::{LogTime, PinId, HIGH, INPUT, LOW, OUTPUT};

/// Button pins, index 0 = button 1.
pub const BUTTON_PINS: [PinId; 3] = [15, 16, 17];

/// Independent LED pins, index 0 = LED 1.
pub const LED_PINS: [PinId; 4] = [13, 12, 11, 10];

/// Latch pin of the display's shift register.
pub const LATCH_PIN: PinId = 4;
/// Clock pin of the display's shift register.
pub const CLOCK_PIN: PinId = 7;
/// Data pin of the display's shift register.
pub const DATA_PIN: PinId = 8;

/// Level that lights an LED (the shield is active low).
pub const ON: i32 = LOW;
/// Level that darkens an LED.
pub const OFF: i32 = HIGH;

/// Default duration of a button click, in µs.
pub const DEFAULT_CLICK_DURATION: LogTime = 100_000;

/// Bitmap state of the four independent LEDs.
pub type LedState = BitArray<4>;
/// Bitmap state of the four-digit 7-segment display.
pub type SegState = BitArray<32>;

/// The assembled shield: simulator, LED bank, and 7-segment display.
pub struct Shield {
    simulator: Simulator,
    leds: Rc<RefCell<LedBank<4>>>,
    seg_display: Rc<RefCell<SerialSegDisplay<32>>>,
    /// Delay between bounce transitions; zero disables bouncing.
    bounce_delay: LogTime,
}

impl Shield {
    /// Registers the shield's pins and decoders on the simulator.
    pub fn new(mut simulator: Simulator) -> Result<Self> {
        for pin in BUTTON_PINS {
            simulator.emulator_mut().register_pin(pin, INPUT)?;
        }
        for pin in LED_PINS {
            simulator.emulator_mut().register_pin(pin, OUTPUT)?;
        }
        simulator.emulator_mut().register_pin(LATCH_PIN, OUTPUT)?;
        simulator.emulator_mut().register_pin(CLOCK_PIN, OUTPUT)?;
        simulator.emulator_mut().register_pin(DATA_PIN, OUTPUT)?;

        let leds = shared(LedBank::new());
        leds.borrow_mut().wire(&LED_PINS)?;
        for pin in LED_PINS {
            simulator.attach_pin_consumer(pin, leds.clone())?;
        }

        let seg_display = shared(SerialSegDisplay::new());
        seg_display.borrow_mut().wire(DATA_PIN, CLOCK_PIN, LATCH_PIN);
        for pin in [DATA_PIN, CLOCK_PIN, LATCH_PIN] {
            simulator.attach_pin_consumer(pin, seg_display.clone())?;
        }

        Ok(Self {
            simulator,
            leds,
            seg_display,
            bounce_delay: 0,
        })
    }

    /// The underlying simulator.
    pub fn simulator(&self) -> &Simulator {
        &self.simulator
    }

    /// Mutable access to the underlying simulator.
    pub fn simulator_mut(&mut self) -> &mut Simulator {
        &mut self.simulator
    }

    /// The LED bank decoder.
    pub fn leds(&self) -> Rc<RefCell<LedBank<4>>> {
        self.leds.clone()
    }

    /// The 7-segment display decoder.
    pub fn seg_display(&self) -> Rc<RefCell<SerialSegDisplay<32>>> {
        self.seg_display.clone()
    }

    /// Enables contact-bounce emulation with the given transition delay;
    /// zero disables it.
    pub fn set_bounce_delay(&mut self, delay: LogTime) {
        self.bounce_delay = delay;
    }

    fn button_pin(button: usize) -> Result<PinId> {
        BUTTON_PINS
            .get(button)
            .copied()
            .ok_or(SimulationError::IndexOutOfRange {
                index: button,
                length: BUTTON_PINS.len(),
            })
    }

    /// Schedules one button edge, optionally followed by bounce chatter.
    fn button_edge(
        &mut self,
        button: usize,
        level: i32,
        delay: LogTime,
        bouncing: bool,
    ) -> Result<()> {
        let pin = Self::button_pin(button)?;
        self.simulator.enqueue_pin_change(pin, level, delay)?;

        if bouncing && self.bounce_delay > 0 {
            let other = if level == ON { OFF } else { ON };
            let mut at = delay;
            for _ in 0..3 {
                at += self.bounce_delay;
                self.simulator.enqueue_pin_change(pin, other, at)?;
                at += self.bounce_delay;
                self.simulator.enqueue_pin_change(pin, level, at)?;
            }
        }
        Ok(())
    }

    /// Schedules a button press after `delay` microseconds.
    pub fn button_down(&mut self, button: usize, delay: LogTime) -> Result<()> {
        self.button_edge(button, ON, delay, true)
    }

    /// Schedules a button release after `delay` microseconds.
    pub fn button_up(&mut self, button: usize, delay: LogTime) -> Result<()> {
        self.button_edge(button, OFF, delay, true)
    }

    /// Schedules a full click: down after `delay`, up `duration` later.
    ///
    /// Bounce chatter is applied only when the configured bounce delay is an
    /// order of magnitude below the click duration.
    pub fn button_click(&mut self, button: usize, duration: LogTime, delay: LogTime) -> Result<()> {
        let bouncing = self.bounce_delay > 0 && self.bounce_delay * 10 <= duration;
        self.button_edge(button, ON, delay, bouncing)?;
        self.button_edge(button, OFF, delay + duration, bouncing)
    }
}
