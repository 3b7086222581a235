//! LED bank and 7-segment display decoders.
//!
//! These consumers sit on output pins and reassemble semantic display state
//! from raw pin events: [`LedBank`] maps independent LED pins onto a bitmap,
//! [`SerialSegDisplay`] rebuilds a multi-digit 7-segment bitmap from the
//! data/clock/latch serial protocol, and [`SegInterpreter`] decodes such a
//! bitmap back into digits and text.
//!
//! Everything here follows the active-low convention: a bit value of 0 means
//! the segment or LED is lit.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::bits::{BitArray, ShiftRegister};
use crate::emulator::PinState;
use crate::error::{Result, SimulationError};
use crate::pipeline::{ChainLink, EventConsumer, SharedConsumer, Sprout};
use crate::types::{LogTime, PinId, HIGH, LOW};

/// Glyph with every segment off.
pub const EMPTY_GLYPH: u8 = 0b1111_1111;
/// The dash (minus sign) glyph.
pub const DASH_GLYPH: u8 = 0b1011_1111;
/// Mask of the decimal-dot segment (the byte's MSB, active low).
pub const DOT_MASK: u8 = 0b0111_1111;

/// Active-low glyphs of the decimal digits 0–9.
pub const DIGIT_GLYPHS: [u8; 10] = [
    0b1100_0000, // 0
    0b1111_1001, // 1
    0b1010_0100, // 2
    0b1011_0000, // 3
    0b1001_1001, // 4
    0b1001_0010, // 5
    0b1000_0010, // 6
    0b1111_1000, // 7
    0b1000_0000, // 8
    0b1001_0000, // 9
];

/// Active-low glyphs of the letters a–z (lowercase shapes where possible).
pub const LETTER_GLYPHS: [u8; 26] = [
    0b1000_1000, // a
    0b1000_0011, // b
    0b1100_0110, // c
    0b1010_0001, // d
    0b1000_0110, // e
    0b1000_1110, // f
    0b1000_0010, // g
    0b1000_1001, // h
    0b1111_1001, // i
    0b1110_0001, // j
    0b1000_0101, // k
    0b1100_0111, // l
    0b1100_1000, // m
    0b1010_1011, // n
    0b1010_0011, // o
    0b1000_1100, // p
    0b1001_1000, // q
    0b1010_1111, // r
    0b1001_0010, // s
    0b1000_0111, // t
    0b1100_0001, // u
    0b1110_0011, // v
    0b1000_0001, // w
    0b1011_0110, // x
    0b1001_0001, // y
    0b1010_0100, // z
];

fn digit_lookup() -> &'static BTreeMap<u8, char> {
    static LOOKUP: OnceLock<BTreeMap<u8, char>> = OnceLock::new();
    LOOKUP.get_or_init(|| {
        DIGIT_GLYPHS
            .iter()
            .enumerate()
            .map(|(i, &glyph)| (glyph, (b'0' + i as u8) as char))
            .collect()
    })
}

fn other_lookup() -> &'static BTreeMap<u8, char> {
    static LOOKUP: OnceLock<BTreeMap<u8, char>> = OnceLock::new();
    LOOKUP.get_or_init(|| {
        let mut map: BTreeMap<u8, char> = LETTER_GLYPHS
            .iter()
            .enumerate()
            .map(|(i, &glyph)| (glyph, (b'a' + i as u8) as char))
            .collect();
        map.insert(EMPTY_GLYPH, ' ');
        map.insert(DASH_GLYPH, '-');
        map
    })
}

/// A bank of `N` independently wired LEDs, exposed as one bitmap.
///
/// Forked consumer: pin events come in, [`BitArray`] snapshots go out on the
/// sprout whenever the bank's state actually changes. Events of unmapped
/// pins pass through as time advances only.
pub struct LedBank<const N: usize> {
    chain: ChainLink<PinState>,
    sprout: Sprout<BitArray<N>>,
    state: BitArray<N>,
    wiring: BTreeMap<PinId, usize>,
}

impl<const N: usize> Default for LedBank<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> LedBank<N> {
    /// Creates a bank with every LED off (all bits high).
    pub fn new() -> Self {
        Self {
            chain: ChainLink::new(),
            sprout: Sprout::new(),
            state: BitArray::filled(true),
            wiring: BTreeMap::new(),
        }
    }

    /// Maps the bank onto its pins; `pins[i]` drives LED `i`.
    pub fn wire(&mut self, pins: &[PinId]) -> Result<()> {
        if pins.len() != N {
            return Err(SimulationError::InvariantViolation(
                "LED bank wiring must name exactly one pin per LED",
            ));
        }
        for (idx, &pin) in pins.iter().enumerate() {
            if self.wiring.insert(pin, idx).is_some() {
                return Err(SimulationError::PinDuplicated(pin));
            }
        }
        Ok(())
    }

    /// The current bitmap (bit = level; 0 is lit).
    pub fn state(&self) -> &BitArray<N> {
        &self.state
    }

    /// Attaches the consumer receiving bitmap snapshots.
    pub fn attach_sprout(&mut self, consumer: SharedConsumer<BitArray<N>>) -> Result<()> {
        self.sprout.attach(consumer)
    }

    /// Detaches the bitmap consumer.
    pub fn detach_sprout(&mut self) -> Result<()> {
        self.sprout.detach()
    }
}

impl<const N: usize> EventConsumer<PinState> for LedBank<N> {
    fn chain(&self) -> &ChainLink<PinState> {
        &self.chain
    }

    fn chain_mut(&mut self) -> &mut ChainLink<PinState> {
        &mut self.chain
    }

    fn process_event(&mut self, time: LogTime, state: PinState) -> Result<()> {
        let Some(&idx) = self.wiring.get(&state.pin) else {
            // Unknown pins only move time along.
            self.chain.forward_advance(time)?;
            return self.sprout.advance(time);
        };

        let level = state.value != LOW;
        if self.state.bit(idx) != level {
            self.state.set_bit(idx, level);
            self.sprout.emit(time, self.state.clone())?;
        }
        self.chain.forward_event(time, state)
    }

    fn process_advance(&mut self, time: LogTime) -> Result<()> {
        self.chain.forward_advance(time)?;
        self.sprout.advance(time)
    }

    fn process_clear(&mut self) -> Result<()> {
        self.chain.forward_clear()?;
        self.sprout.clear()
    }
}

/// Multi-digit 7-segment display fed over a 3-wire serial line.
///
/// `BITS` is the total bitmap width: 8 bits per digit, so a 4-digit display
/// is `SerialSegDisplay<32>`. The display listens on three pins:
///
/// - a HIGH→LOW edge on *clock* pushes the current *data* level into the
///   16-bit shift register;
/// - a LOW→HIGH edge on *latch* commits the register to the digits: the
///   register's high byte (the glyph) fills the byte of every digit whose
///   bit is set in the low byte (the digit mask), all other digits go dark.
///
/// Committed states that differ from the previous bitmap are emitted on the
/// sprout.
pub struct SerialSegDisplay<const BITS: usize> {
    chain: ChainLink<PinState>,
    sprout: Sprout<BitArray<BITS>>,
    state: BitArray<BITS>,
    register: ShiftRegister,
    data_pin: Option<PinId>,
    clock_pin: Option<PinId>,
    latch_pin: Option<PinId>,
    last_data: bool,
    last_clock: bool,
    last_latch: bool,
}

impl<const BITS: usize> Default for SerialSegDisplay<BITS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const BITS: usize> SerialSegDisplay<BITS> {
    /// Creates an unwired display with all segments off.
    pub fn new() -> Self {
        Self {
            chain: ChainLink::new(),
            sprout: Sprout::new(),
            state: BitArray::filled(true),
            // 8 glyph bits + one mask bit per digit (8 digits at most).
            register: ShiftRegister::new(16),
            data_pin: None,
            clock_pin: None,
            latch_pin: None,
            last_data: false,
            last_clock: false,
            last_latch: false,
        }
    }

    /// Number of digits of the display.
    pub const fn digits(&self) -> usize {
        BITS / 8
    }

    /// Assigns the three input pins the display listens on.
    pub fn wire(&mut self, data_pin: PinId, clock_pin: PinId, latch_pin: PinId) {
        self.data_pin = Some(data_pin);
        self.clock_pin = Some(clock_pin);
        self.latch_pin = Some(latch_pin);
    }

    /// The current display bitmap.
    pub fn state(&self) -> &BitArray<BITS> {
        &self.state
    }

    /// Attaches the consumer receiving bitmap snapshots.
    pub fn attach_sprout(&mut self, consumer: SharedConsumer<BitArray<BITS>>) -> Result<()> {
        self.sprout.attach(consumer)
    }

    /// Detaches the bitmap consumer.
    pub fn detach_sprout(&mut self) -> Result<()> {
        self.sprout.detach()
    }

    /// Rebuilds the digit bytes from the shift register on a latch edge.
    fn commit_register(&mut self, time: LogTime) -> Result<()> {
        let digit_mask = self.register.get_u8(0);
        let glyph = self.register.get_u8(1);

        let mut new_state = BitArray::filled(true);
        for d in 0..self.digits() {
            if digit_mask & (1 << d) != 0 {
                new_state.set_byte(glyph, d * 8);
            }
        }

        if new_state != self.state {
            self.state = new_state;
            self.sprout.emit(time, self.state.clone())?;
        }
        Ok(())
    }
}

impl<const BITS: usize> EventConsumer<PinState> for SerialSegDisplay<BITS> {
    fn chain(&self) -> &ChainLink<PinState> {
        &self.chain
    }

    fn chain_mut(&mut self) -> &mut ChainLink<PinState> {
        &mut self.chain
    }

    fn process_event(&mut self, time: LogTime, state: PinState) -> Result<()> {
        let level = state.value == HIGH;

        if Some(state.pin) == self.clock_pin {
            if self.last_clock && !level {
                // Falling clock edge confirms the data line.
                self.register.push(self.last_data);
            }
            self.last_clock = level;
        } else if Some(state.pin) == self.data_pin {
            self.last_data = level;
        } else if Some(state.pin) == self.latch_pin {
            if !self.last_latch && level {
                self.commit_register(time)?;
            }
            self.last_latch = level;
        } else {
            return Err(SimulationError::PinUndefined(state.pin));
        }

        self.chain.forward_event(time, state)?;
        // New bitmaps are emitted in commit_register; everything else is
        // just time moving on for the sprout chain.
        self.sprout.advance(time)
    }

    fn process_advance(&mut self, time: LogTime) -> Result<()> {
        self.chain.forward_advance(time)?;
        self.sprout.advance(time)
    }

    fn process_clear(&mut self) -> Result<()> {
        self.chain.forward_clear()?;
        self.sprout.clear()
    }
}

/// Read-only interpreter of a 7-segment display bitmap.
///
/// Digit 0 is the leftmost. All lookups ignore the decimal dot unless asked
/// about it explicitly.
pub struct SegInterpreter<const BITS: usize> {
    state: BitArray<BITS>,
}

impl<const BITS: usize> SegInterpreter<BITS> {
    /// Wraps a display bitmap for interpretation.
    pub fn new(state: BitArray<BITS>) -> Self {
        Self { state }
    }

    /// Number of digits of the display.
    pub const fn digits(&self) -> usize {
        BITS / 8
    }

    /// Raw byte of a digit (7 segment bits + decimal dot in the MSB).
    ///
    /// With `mask_dot` the dot segment reads as off.
    pub fn raw_byte(&self, idx: usize, mask_dot: bool) -> u8 {
        let byte = self.state.get_byte(idx * 8);
        if mask_dot {
            byte | !DOT_MASK
        } else {
            byte
        }
    }

    /// Whether the decimal dot of a digit is lit.
    pub fn has_dot(&self, idx: usize) -> bool {
        self.raw_byte(idx, false) & !DOT_MASK == 0
    }

    /// True if more than one decimal dot is lit.
    pub fn ambiguous_dot(&self) -> bool {
        (0..self.digits()).filter(|&d| self.has_dot(d)).count() > 1
    }

    /// Index of the leftmost lit decimal dot.
    ///
    /// The rightmost position is the implicit decimal position when no dot
    /// is lit.
    pub fn dot_position(&self) -> usize {
        (0..self.digits())
            .find(|&d| self.has_dot(d))
            .unwrap_or(self.digits() - 1)
    }

    /// Decodes the character shown at a digit position.
    ///
    /// Letters are reported lowercase, a dark digit as a space. Glyphs that
    /// read as both a digit and a letter (e.g. `5`/`s`) resolve according to
    /// `prefer_digit`. Unrecognized glyphs yield `None`.
    pub fn char_at(&self, idx: usize, prefer_digit: bool) -> Option<char> {
        let glyph = self.raw_byte(idx, true);
        let digit = digit_lookup().get(&glyph).copied();
        let other = other_lookup().get(&glyph).copied();

        match (digit, other) {
            (Some(d), Some(o)) => Some(if prefer_digit { d } else { o }),
            (Some(d), None) => Some(d),
            (None, Some(o)) => Some(o),
            (None, None) => None,
        }
    }

    /// Decodes the numeric digit shown at a position.
    ///
    /// With `treat_blank_as_zero`, a dark digit reads as 0.
    pub fn digit_at(&self, idx: usize, treat_blank_as_zero: bool) -> Option<u8> {
        let ch = self.char_at(idx, true)?;
        if treat_blank_as_zero && ch == ' ' {
            return Some(0);
        }
        ch.to_digit(10).map(|d| d as u8)
    }

    /// Decodes the number shown on the whole display.
    ///
    /// Leading blanks are skipped and a leading dash negates; decimal dots
    /// are ignored. Any non-digit glyph after the first digit position makes
    /// the reading invalid.
    pub fn as_integer(&self) -> Option<i64> {
        let mut idx = 0;
        while idx < self.digits() && self.raw_byte(idx, true) == EMPTY_GLYPH {
            idx += 1;
        }

        let negative = idx < self.digits() && self.raw_byte(idx, true) == DASH_GLYPH;
        if negative {
            idx += 1;
        }
        if idx >= self.digits() {
            return None; // no digits at all
        }

        let mut result: i64 = 0;
        while idx < self.digits() {
            let digit = self.digit_at(idx, false)?;
            result = result * 10 + digit as i64;
            idx += 1;
        }
        Some(if negative { -result } else { result })
    }

    /// Decodes the text shown on the display.
    ///
    /// Unrecognized glyphs are replaced with `fallback` when given;
    /// otherwise they make the whole reading fail.
    pub fn as_text(&self, fallback: Option<char>) -> Option<String> {
        let mut text = String::with_capacity(self.digits());
        for idx in 0..self.digits() {
            match self.char_at(idx, false).or(fallback) {
                Some(ch) => text.push(ch),
                None => return None,
            }
        }
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::shared;
    use crate::series::TimeSeries;

    fn display_state(glyphs: [u8; 4]) -> BitArray<32> {
        let mut ba = BitArray::filled(true);
        for (d, glyph) in glyphs.iter().enumerate() {
            ba.set_byte(*glyph, d * 8);
        }
        ba
    }

    #[test]
    fn test_led_bank_tracks_pins() {
        let mut bank: LedBank<4> = LedBank::new();
        bank.wire(&[13, 12, 11, 10]).unwrap();
        let sink = shared(TimeSeries::new());
        bank.attach_sprout(sink.clone()).unwrap();

        bank.on_event(10, PinState::new(13, LOW)).unwrap(); // LED 1 on
        bank.on_event(20, PinState::new(13, LOW)).unwrap(); // no change
        bank.on_event(30, PinState::new(10, LOW)).unwrap(); // LED 4 on

        assert_eq!(sink.borrow().len(), 2);
        let last = sink.borrow().last().unwrap().value.clone();
        assert!(!last.bit(0));
        assert!(last.bit(1));
        assert!(!last.bit(3));
    }

    #[test]
    fn test_led_bank_wiring_validation() {
        let mut bank: LedBank<4> = LedBank::new();
        assert!(bank.wire(&[1, 2, 3]).is_err());
        let mut bank: LedBank<4> = LedBank::new();
        assert!(matches!(
            bank.wire(&[1, 2, 2, 3]),
            Err(SimulationError::PinDuplicated(2))
        ));
    }

    #[test]
    fn test_led_bank_ignores_unknown_pins() {
        let mut bank: LedBank<2> = LedBank::new();
        bank.wire(&[5, 6]).unwrap();
        let sink = shared(TimeSeries::new());
        bank.attach_sprout(sink.clone()).unwrap();

        bank.on_event(10, PinState::new(9, LOW)).unwrap();
        assert!(sink.borrow().is_empty());
        assert_eq!(sink.borrow().chain().last_time(), 10); // time still flows
    }

    fn push_byte(display: &mut SerialSegDisplay<32>, mut time: LogTime, byte: u8) -> LogTime {
        // MSB-first shift_out as the firmware would do it.
        let (data, clock) = (8, 7);
        for i in (0..8).rev() {
            let level = if byte & (1 << i) != 0 { HIGH } else { LOW };
            display.on_event(time, PinState::new(data, level)).unwrap();
            display.on_event(time + 1, PinState::new(clock, HIGH)).unwrap();
            display.on_event(time + 2, PinState::new(clock, LOW)).unwrap();
            time += 3;
        }
        time
    }

    #[test]
    fn test_serial_display_latches_digits() {
        let mut display: SerialSegDisplay<32> = SerialSegDisplay::new();
        display.wire(8, 7, 4);
        let sink = shared(TimeSeries::new());
        display.attach_sprout(sink.clone()).unwrap();

        // Show digit '2' at position 1: glyph byte first, then the mask.
        let mut t = push_byte(&mut display, 0, DIGIT_GLYPHS[2]);
        t = push_byte(&mut display, t, 0b0000_0010);
        display.on_event(t, PinState::new(4, HIGH)).unwrap();

        assert_eq!(sink.borrow().len(), 1);
        let state = sink.borrow().last().unwrap().value.clone();
        let seg = SegInterpreter::new(state);
        assert_eq!(seg.char_at(1, true), Some('2'));
        assert_eq!(seg.char_at(0, true), Some(' '));

        // Latching the same content again emits nothing new.
        display.on_event(t + 1, PinState::new(4, LOW)).unwrap();
        display.on_event(t + 2, PinState::new(4, HIGH)).unwrap();
        assert_eq!(sink.borrow().len(), 1);
    }

    #[test]
    fn test_serial_display_rejects_unknown_pin() {
        let mut display: SerialSegDisplay<32> = SerialSegDisplay::new();
        display.wire(8, 7, 4);
        assert!(matches!(
            display.on_event(0, PinState::new(99, HIGH)),
            Err(SimulationError::PinUndefined(99))
        ));
    }

    #[test]
    fn test_interpreter_characters() {
        let seg = SegInterpreter::new(display_state([
            LETTER_GLYPHS[0],
            LETTER_GLYPHS[1],
            DIGIT_GLYPHS[3],
            EMPTY_GLYPH,
        ]));
        assert_eq!(seg.as_text(None), Some("ab3 ".to_string()));
        // '5' and 's' share a glyph.
        let seg = SegInterpreter::new(display_state([DIGIT_GLYPHS[5], EMPTY_GLYPH, EMPTY_GLYPH, EMPTY_GLYPH]));
        assert_eq!(seg.char_at(0, true), Some('5'));
        assert_eq!(seg.char_at(0, false), Some('s'));
    }

    #[test]
    fn test_interpreter_numbers() {
        let seg = SegInterpreter::new(display_state([
            EMPTY_GLYPH,
            DASH_GLYPH,
            DIGIT_GLYPHS[4],
            DIGIT_GLYPHS[2],
        ]));
        assert_eq!(seg.as_integer(), Some(-42));

        let seg = SegInterpreter::new(display_state([
            EMPTY_GLYPH,
            EMPTY_GLYPH,
            DIGIT_GLYPHS[0],
            DIGIT_GLYPHS[7],
        ]));
        assert_eq!(seg.as_integer(), Some(7));

        // A blank in the middle of the number is invalid.
        let seg = SegInterpreter::new(display_state([
            DIGIT_GLYPHS[1],
            EMPTY_GLYPH,
            DIGIT_GLYPHS[2],
            DIGIT_GLYPHS[3],
        ]));
        assert_eq!(seg.as_integer(), None);

        let seg = SegInterpreter::new(display_state([EMPTY_GLYPH; 4]));
        assert_eq!(seg.as_integer(), None);
    }

    #[test]
    fn test_interpreter_dots() {
        let mut state = display_state([DIGIT_GLYPHS[1], DIGIT_GLYPHS[2], DIGIT_GLYPHS[3], DIGIT_GLYPHS[4]]);
        assert!(!SegInterpreter::new(state.clone()).ambiguous_dot());
        assert_eq!(SegInterpreter::new(state.clone()).dot_position(), 3);

        // Light the dot of digit 1 (clear the MSB of its byte).
        state.set_byte(DIGIT_GLYPHS[2] & DOT_MASK, 8);
        let seg = SegInterpreter::new(state.clone());
        assert!(seg.has_dot(1));
        assert!(!seg.ambiguous_dot());
        assert_eq!(seg.dot_position(), 1);

        state.set_byte(DIGIT_GLYPHS[4] & DOT_MASK, 24);
        assert!(SegInterpreter::new(state).ambiguous_dot());
    }

    #[test]
    fn test_interpreter_fallback_text() {
        let mut state = display_state([EMPTY_GLYPH; 4]);
        state.set_byte(0b0101_0101, 0); // garbage glyph
        assert_eq!(SegInterpreter::new(state.clone()).as_text(None), None);
        assert_eq!(
            SegInterpreter::new(state).as_text(Some('?')),
            Some("?   ".to_string())
        );
    }
}
