//! Change aggregator.
//!
//! Even after demultiplexing, a display mid-transition can produce short
//! bursts of equal-state oscillation. The aggregator collapses everything
//! that happens inside a window into at most one emitted event: the state
//! seen last when the window closes, and only if it differs from what was
//! emitted before.

use crate::bits::BitArray;
use crate::error::{Result, SimulationError};
use crate::pipeline::{ChainLink, EventConsumer};
use crate::types::LogTime;

/// Windowed duplicate-change suppressor over [`BitArray`] events.
///
/// Typically chained after a [`Demultiplexer`](crate::filters::Demultiplexer)
/// with a considerably larger window. Like the demultiplexer, its initial
/// emitted state has every bit at the shield's idle high level.
pub struct Aggregator<const N: usize> {
    chain: ChainLink<BitArray<N>>,
    window: LogTime,
    /// Close marker of the currently open window.
    next_close: LogTime,
    /// Last state received from upstream.
    last_state: BitArray<N>,
    /// Last state emitted downstream.
    last_emitted: BitArray<N>,
}

impl<const N: usize> Aggregator<N> {
    /// Creates an aggregator; `window` must be positive.
    pub fn new(window: LogTime) -> Result<Self> {
        if window == 0 {
            return Err(SimulationError::InvariantViolation(
                "aggregation window must be greater than zero",
            ));
        }
        Ok(Self {
            chain: ChainLink::new(),
            window,
            next_close: 0,
            last_state: BitArray::filled(true),
            last_emitted: BitArray::filled(true),
        })
    }

    /// The configured window length.
    pub fn window(&self) -> LogTime {
        self.window
    }

    fn is_window_open(&self) -> bool {
        self.chain.last_time() < self.next_close
    }

    /// Resolves window boundaries up to `time`.
    fn update_window(&mut self, time: LogTime) -> Result<()> {
        while self.is_window_open() && time >= self.next_close {
            let close = self.next_close;
            self.chain.set_last_time(close);

            if self.last_state != self.last_emitted {
                self.last_emitted = self.last_state.clone();
                self.chain.forward_event(close, self.last_emitted.clone())?;
                self.next_close += self.window;
            } else {
                self.chain.forward_advance(close)?;
            }
        }
        Ok(())
    }
}

impl<const N: usize> EventConsumer<BitArray<N>> for Aggregator<N> {
    fn chain(&self) -> &ChainLink<BitArray<N>> {
        &self.chain
    }

    fn chain_mut(&mut self) -> &mut ChainLink<BitArray<N>> {
        &mut self.chain
    }

    fn process_event(&mut self, time: LogTime, value: BitArray<N>) -> Result<()> {
        self.update_window(time)?;
        self.last_state = value;
        if !self.is_window_open() {
            self.next_close = time + self.window;
        }
        Ok(())
    }

    fn process_advance(&mut self, time: LogTime) -> Result<()> {
        self.update_window(time)?;
        if !self.is_window_open() {
            self.chain.forward_advance(time)?;
        }
        Ok(())
    }

    fn process_clear(&mut self) -> Result<()> {
        self.next_close = self.chain.last_time();
        self.last_state.fill(true);
        self.last_emitted.fill(true);
        self.chain.forward_clear()
    }
}
