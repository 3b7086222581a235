//! Event definitions for the simulator.
//!
//! An event is a timestamped value. Events are the only unit of communication
//! in the pipeline: producers emit them, filters transform them, and time
//! series record them.

use serde::{Deserialize, Serialize};

use crate::types::LogTime;

/// A single timestamped value travelling through a pipeline.
///
/// Equality and ordering consider the pair `(time, value)`; ordering is by
/// time first so that sorted runs of events form a valid time series.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event<V> {
    /// The logical time at which the event occurred.
    pub time: LogTime,
    /// The associated value (the new state).
    pub value: V,
}

impl<V> Event<V> {
    /// Creates a new event with the given time and value.
    pub fn new(time: LogTime, value: V) -> Self {
        Self { time, value }
    }
}

impl<V: PartialOrd> PartialOrd for Event<V> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match self.time.cmp(&other.time) {
            std::cmp::Ordering::Equal => self.value.partial_cmp(&other.value),
            ord => Some(ord),
        }
    }
}

impl<V: Ord> Ord for Event<V> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.value.cmp(&other.value))
    }
}
