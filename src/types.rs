//! Core type definitions for the simulator.
//!
//! This module defines the fundamental types shared by every component of the
//! simulation: the logical clock domain, pin identifiers, and wire levels.

use serde::{Deserialize, Serialize};

/// Logical simulation time in microseconds.
///
/// There is exactly one clock in the system (owned by the
/// [`Emulator`](crate::emulator::Emulator)); every event timestamp, window
/// boundary, and delay is expressed in this unit.
pub type LogTime = u64;

/// Identifier of a digital pin.
pub type PinId = u8;

/// Logical low level (0 V). On the shield's active-low outputs this is the
/// *lit* state.
pub const LOW: i32 = 0;

/// Logical high level (5 V). The idle level of the shield's outputs.
pub const HIGH: i32 = 1;

/// Sentinel for a level that has never been driven nor observed.
///
/// Also used for a pin mode or wiring that is not (yet) determined.
pub const UNDEFINED: i32 = -1;

/// Pin mode: the pin is read by the firmware.
pub const INPUT: i32 = 0;

/// Pin mode: the pin is driven by the firmware.
pub const OUTPUT: i32 = 1;

/// Bit ordering for the serial shift helpers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitOrder {
    /// Least significant bit first.
    LsbFirst,
    /// Most significant bit first.
    MsbFirst,
}
