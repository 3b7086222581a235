//! Time-series event stores.
//!
//! [`TimeSeries`] is the terminal sink of most pipelines: an append-only,
//! causality-checked sequence of timestamped values with the analytic queries
//! behavioral assertions are written against. [`FutureStore`] extends it with
//! out-of-order insertion of *future* events whose release downstream is
//! deferred until the clock reaches them.

use std::ops::Range;

use crate::error::{Result, SimulationError};
use crate::event::Event;
use crate::pipeline::{ChainLink, EventConsumer};
use crate::types::LogTime;

/// Append-only ordered store of events, usable as a pipeline sink.
///
/// Invariant: adjacent events satisfy `ev[i].time <= ev[i+1].time`; events
/// with equal times are permitted and keep insertion order. Appending is the
/// consumer entry point [`EventConsumer::on_event`] (or the [`append`]
/// convenience); violations fail with
/// [`SimulationError::CausalityViolation`].
///
/// [`append`]: TimeSeries::append
pub struct TimeSeries<V> {
    events: Vec<Event<V>>,
    chain: ChainLink<V>,
}

impl<V> Default for TimeSeries<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> TimeSeries<V> {
    /// Creates an empty series.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            chain: ChainLink::new(),
        }
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if no events are recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Positional access to a recorded event.
    pub fn get(&self, index: usize) -> Result<&Event<V>> {
        self.events
            .get(index)
            .ok_or(SimulationError::IndexOutOfRange {
                index,
                length: self.events.len(),
            })
    }

    /// The earliest recorded event.
    pub fn first(&self) -> Result<&Event<V>> {
        self.events
            .first()
            .ok_or(SimulationError::EmptySequence("no first event"))
    }

    /// The latest recorded event.
    pub fn last(&self) -> Result<&Event<V>> {
        self.events
            .last()
            .ok_or(SimulationError::EmptySequence("no last event"))
    }

    /// All recorded events in order.
    pub fn events(&self) -> &[Event<V>] {
        &self.events
    }

    /// Iterator over the recorded values in order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.events.iter().map(|e| &e.value)
    }

    /// Clamps an index range to the recorded length.
    fn clamp(&self, range: &Range<usize>) -> Range<usize> {
        let end = range.end.min(self.events.len());
        let start = range.start.min(end);
        start..end
    }

    /// Time elapsed between the first and the last event of the range.
    ///
    /// Ranges holding fewer than two events yield 0.
    pub fn duration(&self, range: Range<usize>) -> LogTime {
        let range = self.clamp(&range);
        if range.len() < 2 {
            return 0;
        }
        self.events[range.end - 1].time - self.events[range.start].time
    }

    /// Arithmetic mean of the delays between subsequent events in the range.
    pub fn delta_mean(&self, range: Range<usize>) -> f64 {
        let range = self.clamp(&range);
        if range.len() < 2 {
            return 0.0;
        }
        let deltas = self.events[range.end - 1].time - self.events[range.start].time;
        deltas as f64 / (range.len() - 1) as f64
    }

    /// Population standard deviation of the delays between subsequent events.
    ///
    /// Computed as `sqrt(E[dt^2] - (E[dt])^2)`.
    pub fn delta_stddev(&self, range: Range<usize>) -> f64 {
        let range = self.clamp(&range);
        if range.len() < 2 {
            return 0.0;
        }

        let mut deltas: u128 = 0;
        let mut square_deltas: u128 = 0;
        let mut last_time = self.events[range.start].time;
        for event in &self.events[range.start + 1..range.end] {
            let dt = (event.time - last_time) as u128;
            deltas += dt;
            square_deltas += dt * dt;
            last_time = event.time;
        }

        let count = (range.len() - 1) as f64;
        let mean = deltas as f64 / count;
        (square_deltas as f64 / count - mean * mean).max(0.0).sqrt()
    }
}

impl<V: PartialEq> TimeSeries<V> {
    /// Finds the first occurrence of `needle` as a contiguous value sequence.
    ///
    /// If no full match exists, the longest prefix match found anywhere in
    /// the series is returned (an empty range when not even one value
    /// matches). Searching with an empty needle is an error.
    pub fn find_contiguous(&self, needle: &[V]) -> Result<Range<usize>> {
        if needle.is_empty() {
            return Err(SimulationError::EmptySequence("search needle"));
        }
        if self.is_empty() {
            return Ok(0..0);
        }

        // Plain quadratic scan; the series in behavioral tests are short.
        let mut best = 0..0;
        let mut start = 0;
        while start + best.len() < self.events.len() {
            let mut len = 0;
            while len < needle.len()
                && start + len < self.events.len()
                && needle[len] == self.events[start + len].value
            {
                len += 1;
            }
            if len > best.len() {
                best = start..start + len;
                if best.len() == needle.len() {
                    break; // first full match wins
                }
            }
            start += 1;
        }

        Ok(best)
    }

    /// Finds the longest run of back-to-back repetitions of `needle`.
    ///
    /// Ties are broken by the earliest start. Searching with an empty needle
    /// is an error; a needle longer than the series matches nothing.
    pub fn find_repetition(&self, needle: &[V]) -> Result<Range<usize>> {
        if needle.is_empty() {
            return Err(SimulationError::EmptySequence("search needle"));
        }
        if needle.len() > self.events.len() {
            return Ok(0..0);
        }

        // Mark every index where a full match of the needle starts.
        let mut is_start = vec![false; self.events.len()];
        let mut starts = Vec::new();
        for start in 0..=self.events.len() - needle.len() {
            let matched = needle
                .iter()
                .zip(&self.events[start..start + needle.len()])
                .all(|(n, e)| *n == e.value);
            is_start[start] = matched;
            if matched {
                starts.push(start);
            }
        }

        // Chain starting points into the longest repetitive run.
        let mut best = 0..0;
        for start in starts {
            let mut len = 0;
            while start + len < self.events.len() && is_start[start + len] {
                len += needle.len();
            }
            if len > best.len() {
                best = start..start + len;
            }
        }

        Ok(best)
    }

    /// Greedy left-to-right projection of `needle`'s values onto this series.
    ///
    /// Haystack values that do not match the next needle value are skipped.
    /// Returns the chosen indices and whether the entire needle was consumed.
    pub fn find_selected(&self, needle: &TimeSeries<V>) -> (Vec<usize>, bool) {
        let mut indices = Vec::new();
        let mut pos = 0;
        for wanted in needle.values() {
            while pos < self.events.len() && self.events[pos].value != *wanted {
                pos += 1;
            }
            if pos >= self.events.len() {
                break;
            }
            indices.push(pos);
            pos += 1;
        }
        let complete = indices.len() == needle.len();
        (indices, complete)
    }
}

impl<V: Clone + PartialEq> TimeSeries<V> {
    /// Appends an event; shorthand for the consumer entry point.
    pub fn append(&mut self, time: LogTime, value: V) -> Result<()> {
        self.on_event(time, value)
    }

    /// Total time within `span` during which the two series disagree.
    ///
    /// Each series is interpreted as a step function: its "current value" at
    /// a given time is the value of the last event at or before that time,
    /// defaulting to `initial` before the first event. The sweep is symmetric
    /// in its arguments: `a.compare_against(b, s, v) == b.compare_against(a,
    /// s, v)`.
    pub fn compare_against(
        &self,
        other: &TimeSeries<V>,
        span: Range<LogTime>,
        initial: V,
    ) -> LogTime {
        if span.end <= span.start {
            return 0;
        }

        // Collapse everything at or before the span start into the current
        // values, then sweep both event lists in time order.
        let mut ia = 0;
        let mut va = initial.clone();
        while ia < self.events.len() && self.events[ia].time <= span.start {
            va = self.events[ia].value.clone();
            ia += 1;
        }
        let mut ib = 0;
        let mut vb = initial;
        while ib < other.events.len() && other.events[ib].time <= span.start {
            vb = other.events[ib].value.clone();
            ib += 1;
        }

        let mut disagreement = 0;
        let mut last_time = span.start;
        loop {
            let ta = self.events.get(ia).map_or(LogTime::MAX, |e| e.time);
            let tb = other.events.get(ib).map_or(LogTime::MAX, |e| e.time);
            let next = ta.min(tb).min(span.end);

            if va != vb {
                disagreement += next - last_time;
            }
            last_time = next;
            if next >= span.end {
                break;
            }
            if ta == next {
                va = self.events[ia].value.clone();
                ia += 1;
            }
            if tb == next {
                vb = other.events[ib].value.clone();
                ib += 1;
            }
        }

        disagreement
    }
}

impl<V: Clone> EventConsumer<V> for TimeSeries<V> {
    fn chain(&self) -> &ChainLink<V> {
        &self.chain
    }

    fn chain_mut(&mut self) -> &mut ChainLink<V> {
        &mut self.chain
    }

    fn process_event(&mut self, time: LogTime, value: V) -> Result<()> {
        if let Some(last) = self.events.last() {
            if last.time > time {
                return Err(SimulationError::CausalityViolation {
                    last: last.time,
                    attempted: time,
                });
            }
        }
        self.events.push(Event::new(time, value.clone()));
        self.chain.forward_event(time, value)
    }

    fn process_clear(&mut self) -> Result<()> {
        self.events.clear();
        self.chain.forward_clear()
    }
}

/// Time series that additionally buffers *future* events.
///
/// Future events may be inserted in any order as long as they are not older
/// than anything already released. They are forwarded downstream (in
/// timestamp order, insertion order for ties) only when the time advances
/// far enough. The store keeps every event it has seen, so the recorded
/// series doubles as the schedule's log.
pub struct FutureStore<V> {
    series: TimeSeries<V>,
    /// Watermark: events before this position have been forwarded.
    released: usize,
    last_released_time: LogTime,
}

impl<V> Default for FutureStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> FutureStore<V> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            series: TimeSeries::new(),
            released: 0,
            last_released_time: 0,
        }
    }

    /// The recorded series (released and pending events alike).
    pub fn series(&self) -> &TimeSeries<V> {
        &self.series
    }

    /// Number of events already forwarded downstream.
    pub fn released(&self) -> usize {
        self.released
    }

    /// Number of events still waiting for their time.
    pub fn pending(&self) -> usize {
        self.series.len() - self.released
    }
}

impl<V: Clone> FutureStore<V> {
    /// Registers an event to be released once the clock reaches `time`.
    ///
    /// Insertion keeps the sequence sorted by time; events sharing a
    /// timestamp keep their insertion order. The event must not be older
    /// than the store's watermark or anything already released.
    pub fn add_future(&mut self, time: LogTime, value: V) -> Result<()> {
        if time < self.series.chain.last_time() || time < self.last_released_time {
            return Err(SimulationError::CausalityViolation {
                last: self.series.chain.last_time().max(self.last_released_time),
                attempted: time,
            });
        }

        // Bubble the new event left to its sorted position.
        let events = &mut self.series.events;
        let mut idx = events.len();
        events.push(Event::new(time, value));
        while idx > 0 && events[idx - 1].time > events[idx].time {
            events.swap(idx - 1, idx);
            idx -= 1;
        }

        if idx < self.released {
            return Err(SimulationError::InvariantViolation(
                "future event sorted before the release watermark",
            ));
        }
        Ok(())
    }

    /// Forwards all pending events with `time <= until` downstream, in order.
    pub fn release_until(&mut self, until: LogTime) -> Result<()> {
        while self.released < self.series.events.len()
            && self.series.events[self.released].time <= until
        {
            let event = self.series.events[self.released].clone();
            self.series.chain.forward_event(event.time, event.value)?;
            self.last_released_time = event.time;
            self.released += 1;
        }
        Ok(())
    }
}

impl<V: Clone> EventConsumer<V> for FutureStore<V> {
    fn chain(&self) -> &ChainLink<V> {
        &self.series.chain
    }

    fn chain_mut(&mut self) -> &mut ChainLink<V> {
        &mut self.series.chain
    }

    /// An incoming event first releases everything due up to its time, then
    /// is stored as immediately releasable. It is *not* forwarded in-line;
    /// the next release step delivers it.
    fn process_event(&mut self, time: LogTime, value: V) -> Result<()> {
        self.release_until(time)?;
        self.add_future(time, value)
    }

    fn process_advance(&mut self, time: LogTime) -> Result<()> {
        self.release_until(time)?;
        self.series.chain.forward_advance(time)
    }

    fn process_clear(&mut self) -> Result<()> {
        self.released = 0;
        self.series.events.clear();
        self.series.chain.forward_clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::shared;

    fn series_of(times: &[LogTime]) -> TimeSeries<i32> {
        let mut ts = TimeSeries::new();
        for (i, &t) in times.iter().enumerate() {
            ts.append(t, i as i32 + 1).unwrap();
        }
        ts
    }

    #[test]
    fn test_append_and_access() {
        let mut ts = TimeSeries::new();
        ts.append(10, 'a').unwrap();
        ts.append(20, 'b').unwrap();
        ts.append(20, 'c').unwrap(); // equal times keep insertion order

        assert_eq!(ts.len(), 3);
        assert_eq!(ts.first().unwrap().value, 'a');
        assert_eq!(ts.last().unwrap().value, 'c');
        assert_eq!(ts.get(1).unwrap().time, 20);
    }

    #[test]
    fn test_causality_trap() {
        let mut ts = TimeSeries::new();
        ts.append(100, 'x').unwrap();
        let err = ts.append(50, 'y').unwrap_err();
        assert!(matches!(err, SimulationError::CausalityViolation { .. }));
    }

    #[test]
    fn test_access_errors() {
        let ts: TimeSeries<i32> = TimeSeries::new();
        assert!(matches!(
            ts.first(),
            Err(SimulationError::EmptySequence(_))
        ));
        assert!(matches!(ts.last(), Err(SimulationError::EmptySequence(_))));
        assert!(matches!(
            ts.get(0),
            Err(SimulationError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_clear_keeps_watermark() {
        let mut ts = TimeSeries::new();
        ts.append(100, 1).unwrap();
        ts.on_clear().unwrap();
        assert!(ts.is_empty());
        assert!(ts.append(50, 2).is_err()); // still bound by the watermark
        ts.append(150, 3).unwrap();
    }

    #[test]
    fn test_duration_and_deltas() {
        let ts = series_of(&[100, 200, 400, 700]);
        assert_eq!(ts.duration(0..4), 600);
        assert_eq!(ts.duration(1..2), 0); // fewer than two events
        assert!((ts.delta_mean(0..4) - 200.0).abs() < 1e-9);
        // deltas 100, 200, 300 -> E[dt^2] - (E dt)^2 = 140000/3 - 40000
        let stddev = ts.delta_stddev(0..4);
        assert!((stddev - 81.649658).abs() < 1e-3);
    }

    #[test]
    fn test_delta_stddev_regular() {
        let ts = series_of(&[0, 100, 200, 300, 400]);
        assert_eq!(ts.delta_stddev(0..5), 0.0);
    }

    #[test]
    fn test_find_contiguous() {
        let mut ts = TimeSeries::new();
        for (i, v) in [1, 2, 3, 1, 2, 3, 4].iter().enumerate() {
            ts.append(i as LogTime * 10, *v).unwrap();
        }

        assert_eq!(ts.find_contiguous(&[2, 3, 4]).unwrap(), 4..7);
        // No full match; longest prefix anywhere wins.
        assert_eq!(ts.find_contiguous(&[3, 4, 9]).unwrap(), 5..7);
        assert_eq!(ts.find_contiguous(&[9]).unwrap(), 0..0);
        assert!(ts.find_contiguous(&[]).is_err());
    }

    #[test]
    fn test_find_repetition() {
        let mut ts = TimeSeries::new();
        for (i, v) in [0, 1, 0, 1, 0, 1, 7, 0, 1].iter().enumerate() {
            ts.append(i as LogTime, *v).unwrap();
        }

        // Three back-to-back repetitions starting at 0 beat the single one at 7.
        assert_eq!(ts.find_repetition(&[0, 1]).unwrap(), 0..6);
        assert_eq!(ts.find_repetition(&[9, 9, 9, 9, 9, 9, 9, 9, 9, 9]).unwrap(), 0..0);
        assert!(ts.find_repetition(&[]).is_err());
    }

    #[test]
    fn test_find_selected() {
        let mut haystack = TimeSeries::new();
        for (i, v) in [10, 0, 10, 20, 20, 30, 31, 30, 40, 70, 40].iter().enumerate() {
            haystack.append(i as LogTime * 100, *v).unwrap();
        }
        let mut needle = TimeSeries::new();
        for (i, v) in [10, 20, 30, 40].iter().enumerate() {
            needle.append(i as LogTime * 100, *v).unwrap();
        }

        let (indices, complete) = haystack.find_selected(&needle);
        assert!(complete);
        assert_eq!(indices, vec![0, 3, 5, 8]);
    }

    #[test]
    fn test_compare_symmetric() {
        let a = series_of(&[100, 300, 500, 800]);
        let b = series_of(&[150, 350, 550, 850]);

        assert_eq!(a.compare_against(&b, 0..1000, 0), 200);
        assert_eq!(b.compare_against(&a, 0..1000, 0), 200);
        assert_eq!(a.compare_against(&a, 0..1000, 0), 0);
    }

    #[test]
    fn test_future_store_release() {
        let store = shared(FutureStore::new());
        let sink = shared(TimeSeries::new());
        store
            .borrow_mut()
            .chain_mut()
            .attach(sink.clone())
            .unwrap();

        // Insert out of order; release is driven by time advances.
        store.borrow_mut().add_future(300, 'c').unwrap();
        store.borrow_mut().add_future(100, 'a').unwrap();
        store.borrow_mut().add_future(200, 'b').unwrap();
        assert_eq!(store.borrow().pending(), 3);

        store.borrow_mut().on_time_advance(200).unwrap();
        assert_eq!(sink.borrow().len(), 2);
        assert_eq!(sink.borrow().get(0).unwrap().value, 'a');
        assert_eq!(sink.borrow().get(1).unwrap().value, 'b');

        store.borrow_mut().on_time_advance(500).unwrap();
        assert_eq!(sink.borrow().len(), 3);
        assert_eq!(store.borrow().pending(), 0);
    }

    #[test]
    fn test_future_store_rejects_past() {
        let mut store = FutureStore::new();
        store.add_future(100, 1).unwrap();
        store.release_until(100).unwrap();
        let err = store.add_future(50, 2).unwrap_err();
        assert!(matches!(err, SimulationError::CausalityViolation { .. }));
    }

    #[test]
    fn test_future_store_as_consumer_defers() {
        let store = shared(FutureStore::new());
        let sink = shared(TimeSeries::new());
        store
            .borrow_mut()
            .chain_mut()
            .attach(sink.clone())
            .unwrap();

        store.borrow_mut().add_future(50, 'a').unwrap();
        // The incoming event releases older pending events but is itself
        // deferred to the next release step.
        store.borrow_mut().on_event(100, 'b').unwrap();
        assert_eq!(sink.borrow().len(), 1);
        assert_eq!(sink.borrow().get(0).unwrap().value, 'a');

        store.borrow_mut().on_time_advance(100).unwrap();
        assert_eq!(sink.borrow().len(), 2);
    }
}
