//! Signal-reconstruction filters.
//!
//! Multiplexed outputs toggle far faster than the state a human perceives.
//! These filters turn the raw waveform back into stable semantic states:
//! the [`Demultiplexer`] integrates per-bit on-time over fixed windows, and
//! the [`Aggregator`] suppresses transient equal-state oscillations that
//! survive demultiplexing.
//!
//! Recommended composition: `Demultiplexer(small window) → Aggregator(large
//! window)` with the demultiplexer window well below the aggregator's.

pub mod aggregate;
pub mod demux;

pub use aggregate::Aggregator;
pub use demux::Demultiplexer;
