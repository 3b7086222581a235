//! # mcusim
//!
//! A deterministic, discrete-event simulator for microcontroller-style
//! firmware written against a fixed hardware-abstraction API (digital pin
//! I/O, timing, bit-serial shift helpers, byte-serial receive).
//!
//! Real hardware is replaced by a logical clock: the harness invokes the
//! firmware's `setup` and `loop` entry points, every API call advances the
//! clock, and every output pin transition becomes a timestamped event. The
//! events travel through a composable typed pipeline of producers,
//! transformers, and sinks, so behavioral tests assert on the *logical*
//! display content instead of the raw multiplexed waveform.
//!
//! ## Design principles
//!
//! - **One clock**: logical time (µs) owned by the [`emulator::Emulator`]
//!   is the only ordering principle; runs are fully deterministic.
//! - **Causality everywhere**: every pipeline stage rejects time moving
//!   backward; future stimuli are buffered and released by time advances.
//! - **Signal reconstruction**: the demultiplexer and aggregator filters
//!   turn rapid multiplexed toggles back into stable semantic states.

pub mod bits;
pub mod config;
pub mod dataio;
pub mod display;
pub mod emulator;
pub mod error;
pub mod event;
pub mod filters;
pub mod harness;
pub mod pipeline;
pub mod series;
pub mod shield;
pub mod simulator;
pub mod types;

// Re-export commonly used types
pub use bits::{BitArray, ShiftRegister};
pub use emulator::{ApiFunction, Emulator, PinState};
pub use error::{Result, SimulationError};
pub use event::Event;
pub use filters::{Aggregator, Demultiplexer};
pub use pipeline::{shared, EventConsumer, SharedConsumer};
pub use series::{FutureStore, TimeSeries};
pub use simulator::{Firmware, Simulator};
pub use types::{BitOrder, LogTime, PinId, HIGH, INPUT, LOW, OUTPUT};
