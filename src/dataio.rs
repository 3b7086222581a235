//! Stimulus input and CSV log output.
//!
//! The stimulus format is line-based: `<timestamp> <action> <state>`, with
//! the timestamp in microseconds (non-decreasing), the action one of `1`–`3`
//! (buttons) or `S` (serial payload), and the state `d`/`u` for buttons or
//! the rest of the line for serial. A line carrying only a timestamp marks
//! the end of the simulation.
//!
//! The log output merges any number of typed event channels into one CSV
//! table over the union of their timestamps; a cell is filled only when its
//! channel changed at that row's timestamp.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::rc::Rc;

use crate::bits::BitArray;
use crate::error::{Result, SimulationError};
use crate::series::TimeSeries;
use crate::shield::Shield;
use crate::types::LogTime;

/// Grace period appended after the last stimulus event when the input file
/// carries no explicit end marker, in µs.
const IMPLICIT_TAIL: LogTime = 100_000;

/// Optional recording sinks for loaded stimuli.
#[derive(Default)]
pub struct StimulusLog {
    buttons: Option<[Rc<RefCell<TimeSeries<bool>>>; 3]>,
    serial: Option<Rc<RefCell<TimeSeries<String>>>>,
}

impl StimulusLog {
    /// A log that records nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Records button edges (`true` = down) into the three series.
    pub fn with_buttons(mut self, series: [Rc<RefCell<TimeSeries<bool>>>; 3]) -> Self {
        self.buttons = Some(series);
        self
    }

    /// Records injected serial payloads into the series.
    pub fn with_serial(mut self, series: Rc<RefCell<TimeSeries<String>>>) -> Self {
        self.serial = Some(series);
        self
    }
}

fn bad_input(line: usize, reason: impl Into<String>) -> SimulationError {
    SimulationError::BadInput {
        line,
        reason: reason.into(),
    }
}

/// Loads a stimulus stream into the shield.
///
/// Button events are scheduled through the shield (so bounce emulation
/// applies), serial payloads through the simulator queue. Must be called
/// before the run starts, while the clock is still at zero. Returns the
/// simulation end time: the explicit end marker if present, otherwise the
/// last event time plus a grace period.
pub fn load_stimulus<R: BufRead>(
    reader: R,
    shield: &mut Shield,
    log: &StimulusLog,
) -> Result<LogTime> {
    let mut last_time: LogTime = 0;
    let mut button_states = [false; 3];

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|e| bad_input(line_no, format!("read error: {e}")))?;
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        let (time_token, rest) = match line.split_once(char::is_whitespace) {
            Some((t, r)) => (t, r),
            None => (line, ""),
        };
        let time: LogTime = time_token
            .parse()
            .map_err(|_| bad_input(line_no, format!("invalid timestamp '{time_token}'")))?;
        if time < last_time {
            return Err(bad_input(
                line_no,
                format!("timestamp {time} is lower than the previous {last_time}"),
            ));
        }
        last_time = time;

        let rest_trimmed = rest.trim_start();
        if rest_trimmed.is_empty() {
            // A bare timestamp is the end-of-simulation marker.
            return Ok(time);
        }

        let (action, state) = match rest_trimmed.split_once(char::is_whitespace) {
            Some((a, s)) => (a, s),
            None => (rest_trimmed, ""),
        };

        match action {
            "1" | "2" | "3" => {
                let button = action.as_bytes()[0] as usize - b'1' as usize;
                let down = match state.trim() {
                    "d" => true,
                    "u" => false,
                    other => {
                        return Err(bad_input(
                            line_no,
                            format!("invalid button state '{other}'"),
                        ))
                    }
                };
                if button_states[button] == down {
                    continue; // no change in state
                }
                button_states[button] = down;

                if down {
                    shield.button_down(button, time)?;
                } else {
                    shield.button_up(button, time)?;
                }
                if let Some(buttons) = &log.buttons {
                    buttons[button].borrow_mut().append(time, down)?;
                }
            }
            "S" => {
                shield.simulator_mut().enqueue_serial(state, time)?;
                if let Some(serial) = &log.serial {
                    serial.borrow_mut().append(time, state.to_string())?;
                }
            }
            other => {
                return Err(bad_input(line_no, format!("unknown action '{other}'")));
            }
        }
    }

    Ok(last_time + IMPLICIT_TAIL)
}

/// One named channel of the merged CSV log.
pub trait EventColumn {
    /// Number of events recorded on the channel.
    fn len(&self) -> usize;

    /// Returns true for a channel with no events.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Timestamp of the event at `idx`.
    fn event_time(&self, idx: usize) -> LogTime;

    /// Cell rendering of the event at `idx`.
    fn format_event(&self, idx: usize) -> String;
}

/// [`EventColumn`] over a shared [`TimeSeries`] with a value formatter.
pub struct SeriesColumn<V, F> {
    series: Rc<RefCell<TimeSeries<V>>>,
    format: F,
}

impl<V, F: Fn(&V) -> String> SeriesColumn<V, F> {
    /// Wraps a series and its cell formatter.
    pub fn new(series: Rc<RefCell<TimeSeries<V>>>, format: F) -> Self {
        Self { series, format }
    }
}

impl<V, F: Fn(&V) -> String> EventColumn for SeriesColumn<V, F> {
    fn len(&self) -> usize {
        self.series.borrow().len()
    }

    fn event_time(&self, idx: usize) -> LogTime {
        self.series.borrow().events()[idx].time
    }

    fn format_event(&self, idx: usize) -> String {
        (self.format)(&self.series.borrow().events()[idx].value)
    }
}

/// Renders a boolean channel cell (`1` = true).
pub fn format_bool(value: &bool) -> String {
    String::from(if *value { "1" } else { "0" })
}

/// Renders a 4-LED state as one hex digit (bit 0 = LED 1, `1` = off).
pub fn format_led_state(value: &BitArray<4>) -> String {
    format!("{:x}", value.get_bits(0, 4))
}

/// Renders a 7-segment state as hex bytes, leftmost digit first.
pub fn format_seg_state<const BITS: usize>(value: &BitArray<BITS>) -> String {
    value.to_hex()
}

/// Renders a string cell, double-quoted with embedded quotes doubled.
pub fn format_quoted(value: &String) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Writes the merged CSV of all channels.
///
/// The header is `timestamp` followed by the channel names in map order;
/// rows appear at the union of all channel timestamps.
pub fn write_csv<W: Write>(
    out: &mut W,
    columns: &BTreeMap<String, Box<dyn EventColumn>>,
) -> std::io::Result<()> {
    write!(out, "timestamp")?;
    for name in columns.keys() {
        write!(out, ",{name}")?;
    }
    writeln!(out)?;

    let mut cursors = vec![0usize; columns.len()];
    loop {
        // The earliest unprocessed timestamp across all channels.
        let next = columns
            .values()
            .enumerate()
            .filter(|(i, column)| cursors[*i] < column.len())
            .map(|(i, column)| column.event_time(cursors[i]))
            .min();
        let Some(timestamp) = next else {
            break;
        };

        write!(out, "{timestamp}")?;
        for (i, column) in columns.values().enumerate() {
            write!(out, ",")?;
            if cursors[i] < column.len() && column.event_time(cursors[i]) == timestamp {
                write!(out, "{}", column.format_event(cursors[i]))?;
                cursors[i] += 1;
            }
        }
        writeln!(out)?;
    }
    Ok(())
}
