//! Time-window demultiplexer.
//!
//! A multiplexed output bank produces many short pulses per LED even while
//! the perceived state is stable. The demultiplexer accumulates, for every
//! bit, the time it spent set inside a fixed window and emits one event per
//! logical state change: a bit is set in the output iff its set-time within
//! the window reached the threshold.

use crate::bits::BitArray;
use crate::error::{Result, SimulationError};
use crate::pipeline::{ChainLink, EventConsumer};
use crate::types::LogTime;

/// Windowed per-bit on-time thresholding filter over [`BitArray`] events.
///
/// The filter keeps a window open from the first event it sees; when the
/// pipeline time reaches the window close it evaluates the accumulated
/// per-bit set-times against the threshold and emits the reconstructed state
/// downstream if it differs from the last emitted one. Windows stay
/// contiguous while the reconstructed state still differs from the raw input
/// state (the input is mid-transition); otherwise the filter goes dormant
/// until the next event.
///
/// The "nothing emitted yet" state has every bit high (the idle level of
/// the shield's active-low lines), so an idle bank produces no events.
pub struct Demultiplexer<const N: usize> {
    chain: ChainLink<BitArray<N>>,
    window: LogTime,
    threshold: LogTime,
    /// Close marker of the currently open window.
    next_close: LogTime,
    /// Last raw state received from upstream.
    last_state: BitArray<N>,
    /// Last reconstructed state emitted downstream.
    last_emitted: BitArray<N>,
    /// Accumulated set-time for each bit within the open window.
    active_times: Vec<LogTime>,
}

impl<const N: usize> Demultiplexer<N> {
    /// Creates a demultiplexer with an explicit threshold.
    ///
    /// `window` must be positive and `threshold` within `1..=window`.
    pub fn new(window: LogTime, threshold: LogTime) -> Result<Self> {
        if window == 0 {
            return Err(SimulationError::InvariantViolation(
                "demultiplexing window must be greater than zero",
            ));
        }
        if threshold == 0 || threshold > window {
            return Err(SimulationError::InvariantViolation(
                "demultiplexing threshold is out of the window's range",
            ));
        }
        Ok(Self {
            chain: ChainLink::new(),
            window,
            threshold,
            next_close: 0,
            last_state: BitArray::filled(true),
            last_emitted: BitArray::filled(true),
            active_times: vec![0; N],
        })
    }

    /// Creates a demultiplexer with the default threshold of `window -
    /// window/10`: a bit must stay set for ~90% of the window to survive.
    ///
    /// This suits active-low multiplexed displays, where a lit line dips low
    /// periodically while unlit lines stay high for the whole window.
    pub fn with_window(window: LogTime) -> Result<Self> {
        Self::new(window, window - window / 10)
    }

    /// The configured window length.
    pub fn window(&self) -> LogTime {
        self.window
    }

    /// The configured threshold.
    pub fn threshold(&self) -> LogTime {
        self.threshold
    }

    fn is_window_open(&self) -> bool {
        self.chain.last_time() < self.next_close
    }

    /// Adds `dt` to the accumulator of every currently set bit.
    fn accumulate(&mut self, dt: LogTime) {
        for (idx, active) in self.active_times.iter_mut().enumerate() {
            if self.last_state.bit(idx) {
                *active += dt;
            }
        }
    }

    /// Thresholds the accumulators into a reconstructed state, resetting them.
    fn demux_state(&mut self) -> BitArray<N> {
        let mut state = BitArray::new();
        for (idx, active) in self.active_times.iter_mut().enumerate() {
            if *active >= self.threshold {
                state.set_bit(idx, true);
            }
            *active = 0;
        }
        state
    }

    /// Resolves every window boundary up to `time`, then accumulates the
    /// trailing partial fragment of the still-open window.
    fn update_window(&mut self, time: LogTime) -> Result<()> {
        while self.is_window_open() && time >= self.next_close {
            let close = self.next_close;
            self.accumulate(close - self.chain.last_time());
            self.chain.set_last_time(close);

            let demuxed = self.demux_state();
            if demuxed != self.last_emitted {
                self.last_emitted = demuxed.clone();
                self.chain.forward_event(close, demuxed)?;
                self.next_close += self.window;
            } else {
                self.chain.forward_advance(close)?;
                if demuxed != self.last_state {
                    // The raw input disagrees with the stable state, so the
                    // next window may flip it; keep the windows contiguous.
                    self.next_close += self.window;
                }
            }
        }

        if self.is_window_open() && time > self.chain.last_time() {
            self.accumulate(time - self.chain.last_time());
        }
        Ok(())
    }
}

impl<const N: usize> EventConsumer<BitArray<N>> for Demultiplexer<N> {
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
            // The event opens a fresh window.
            self.next_close = time + self.window;
        }
        Ok(())
    }

    fn process_advance(&mut self, time: LogTime) -> Result<()> {
        self.update_window(time)?;
        if !self.is_window_open() {
            // Only a dormant filter passes time advances straight through;
            // an open window still owes its verdict for this span.
            self.chain.forward_advance(time)?;
        }
        Ok(())
    }

    fn process_clear(&mut self) -> Result<()> {
        self.next_close = self.chain.last_time();
        self.last_state.fill(true);
        self.last_emitted.fill(true);
        self.active_times.fill(0);
        self.chain.forward_clear()
    }
}
