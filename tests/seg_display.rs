//! End-to-end 7-segment display reconstruction.
//!
//! A firmware multiplexes four letters over the serial display; each button
//! selects a different text. The raw waveform is reconstructed through the
//! demultiplexer/aggregator pair and asserted as decoded text.

use mcusim::display::{SegInterpreter, LETTER_GLYPHS};
use mcusim::shield::{
    SegState, Shield, BUTTON_PINS, CLOCK_PIN, DATA_PIN, LATCH_PIN,
};
use mcusim::simulator::DEFAULT_POST_DELAY;
use mcusim::{
    shared, Aggregator, BitOrder, Demultiplexer, Emulator, EventConsumer, Firmware, Result,
    Simulator, TimeSeries, HIGH, INPUT, LOW, OUTPUT,
};

/// Shows one of three texts, selected by the last pressed button; the
/// display idles dark until the first press.
struct TextCycler {
    selected: Option<usize>,
    digit: usize,
}

impl TextCycler {
    const TEXTS: [[usize; 4]; 3] = [
        [0, 1, 2, 3],   // "abcd"
        [4, 5, 6, 7],   // "efgh"
        [8, 9, 10, 11], // "ijkl"
    ];

    fn new() -> Self {
        Self {
            selected: None,
            digit: 0,
        }
    }
}

impl Firmware for TextCycler {
    fn setup(&mut self, api: &mut Emulator) -> Result<()> {
        for pin in BUTTON_PINS {
            api.pin_mode(pin, INPUT)?;
        }
        api.pin_mode(LATCH_PIN, OUTPUT)?;
        api.pin_mode(CLOCK_PIN, OUTPUT)?;
        api.pin_mode(DATA_PIN, OUTPUT)
    }

    fn loop_once(&mut self, api: &mut Emulator) -> Result<()> {
        for (idx, pin) in BUTTON_PINS.into_iter().enumerate() {
            if api.digital_read(pin)? == LOW {
                self.selected = Some(idx);
            }
        }

        let Some(text) = self.selected else {
            return Ok(()); // nothing pressed yet, display stays dark
        };

        let glyph = LETTER_GLYPHS[Self::TEXTS[text][self.digit]];
        api.digital_write(LATCH_PIN, LOW)?;
        api.shift_out(DATA_PIN, CLOCK_PIN, BitOrder::MsbFirst, glyph)?;
        api.shift_out(DATA_PIN, CLOCK_PIN, BitOrder::MsbFirst, 1u8 << self.digit)?;
        api.digital_write(LATCH_PIN, HIGH)?;
        self.digit = (self.digit + 1) % 4;
        Ok(())
    }
}

#[test]
fn button_presses_switch_the_displayed_text() {
    let mut shield = Shield::new(Simulator::new(Emulator::new())).unwrap();

    // Three clicks on three buttons, well apart.
    shield.button_click(0, 100_000, 3_000_000).unwrap();
    shield.button_click(1, 100_000, 5_000_000).unwrap();
    shield.button_click(2, 100_000, 6_000_000).unwrap();

    // Sprout -> demux (10 ms) -> aggregator (50 ms) -> series.
    let demux = shared(Demultiplexer::<32>::with_window(10_000).unwrap());
    let aggregate = shared(Aggregator::<32>::new(50_000).unwrap());
    let events = shared(TimeSeries::<SegState>::new());
    shield
        .seg_display()
        .borrow_mut()
        .attach_sprout(demux.clone())
        .unwrap();
    demux.borrow_mut().chain_mut().attach(aggregate.clone()).unwrap();
    aggregate.borrow_mut().chain_mut().attach(events.clone()).unwrap();

    let mut firmware = TextCycler::new();
    let simulator = shield.simulator_mut();
    simulator.run_setup(&mut firmware, DEFAULT_POST_DELAY).unwrap();
    simulator
        .run_loops_for(&mut firmware, 7_000_000, 100, |_| true)
        .unwrap();

    let events = events.borrow();
    assert_eq!(
        events.len(),
        3,
        "expected one reconstructed state change per button"
    );

    let expected = [(3_000_000u64, "abcd"), (5_000_000, "efgh"), (6_000_000, "ijkl")];
    for (idx, (time, text)) in expected.into_iter().enumerate() {
        let event = events.get(idx).unwrap();
        assert!(
            event.time.abs_diff(time) <= 200_000,
            "event #{idx} at {} too far from {time}",
            event.time
        );
        let decoded = SegInterpreter::new(event.value.clone()).as_text(None);
        assert_eq!(decoded.as_deref(), Some(text), "event #{idx}");
    }
}

#[test]
fn raw_sprout_sees_every_latch_commit() {
    let mut shield = Shield::new(Simulator::new(Emulator::new())).unwrap();
    shield.button_click(0, 100_000, 0).unwrap();

    let raw = shared(TimeSeries::<SegState>::new());
    shield
        .seg_display()
        .borrow_mut()
        .attach_sprout(raw.clone())
        .unwrap();

    let mut firmware = TextCycler::new();
    let simulator = shield.simulator_mut();
    simulator.run_setup(&mut firmware, DEFAULT_POST_DELAY).unwrap();
    simulator
        .run_loops_for(&mut firmware, 50_000, 100, |_| true)
        .unwrap();

    // Every committed digit differs from the previous state (a different
    // digit lights up), so the raw stream carries many events.
    assert!(raw.borrow().len() > 10);

    // Each raw state shows a single lit digit of "abcd".
    let first = SegInterpreter::new(raw.borrow().get(0).unwrap().value.clone());
    assert_eq!(first.char_at(0, false), Some('a'));
    assert_eq!(first.char_at(1, false), Some(' '));
}
