//! Error taxonomy of the simulator.
//!
//! Every failure in the crate is one of the flat, disjoint kinds below.
//! Errors are never retried; they bubble up through the pipeline to the
//! outermost runner.

use thiserror::Error;

use crate::types::{LogTime, PinId};

/// Errors raised by the simulation core.
#[derive(Error, Debug)]
pub enum SimulationError {
    /// Time went backward across a consumer, an append, or a future insertion.
    #[error("causality violation: time {attempted} is before {last}")]
    CausalityViolation { last: LogTime, attempted: LogTime },

    /// Positional access past the end of a sequence.
    #[error("index {index} out of range (length {length})")]
    IndexOutOfRange { index: usize, length: usize },

    /// First/last access, or a search needle, on an empty sequence.
    #[error("empty sequence: {0}")]
    EmptySequence(&'static str),

    /// The addressed pin was never registered.
    #[error("pin {0} is not defined in the emulator")]
    PinUndefined(PinId),

    /// A pin with this id is already registered.
    #[error("pin {0} is already registered")]
    PinDuplicated(PinId),

    /// The requested pin mode is not a valid mode value.
    #[error("invalid mode {mode} for pin {pin}")]
    PinModeInvalid { pin: PinId, mode: i32 },

    /// The operation conflicts with the pin's current mode.
    #[error("pin {pin}: {reason}")]
    PinModeConflict { pin: PinId, reason: &'static str },

    /// The operation conflicts with how the pin is wired on the board.
    #[error("pin {pin}: {reason}")]
    PinWiringConflict { pin: PinId, reason: &'static str },

    /// The API function has been disabled for this run.
    #[error("the {0}() function is disabled in the emulator")]
    ApiDisabled(&'static str),

    /// The API function exists but has no emulation.
    #[error("the {0}() function is not implemented in the emulator")]
    NotImplemented(&'static str),

    /// Attaching to a chain slot that is already occupied.
    #[error("a consumer is already attached to this slot")]
    ChainAlreadyAttached,

    /// Detaching from a chain slot that is empty.
    #[error("no consumer is attached to this slot")]
    ChainNotAttached,

    /// A watermark or monotonicity invariant was breached.
    #[error("invariant violation: {0}")]
    InvariantViolation(&'static str),

    /// The process-wide emulator instance was acquired twice.
    #[error("the emulator instance has already been acquired by this process")]
    AlreadyInitialized,

    /// Malformed stimulus input.
    #[error("bad input at line {line}: {reason}")]
    BadInput { line: usize, reason: String },
}

/// Result type used across the simulator.
pub type Result<T> = std::result::Result<T, SimulationError>;
