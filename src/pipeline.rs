//! Typed event-pipeline abstractions.
//!
//! A pipeline is a single-successor chain of *consumers*. Every consumer
//! accepts three notifications: events (`on_event`), time advances
//! (`on_time_advance`), and clears (`on_clear`). Each notification first runs
//! the consumer's own logic and then forwards down the chain, so a consumer
//! may act as a sink, a transformer, or a producer for the stages after it.
//!
//! Causality is enforced at the chain entry points: a consumer never observes
//! time running backward. *Forked* consumers additionally own a sprout, a
//! secondary output of a possibly different value type, used by decoders
//! that consume pin events and produce display bitmaps.
//!
//! Links are non-owning in spirit: chains are assembled once from shared
//! handles (`Rc<RefCell<…>>`) and detached explicitly. Cycles are forbidden
//! by construction; a re-entrant call into a chain surfaces as
//! [`SimulationError::InvariantViolation`] instead of deadlocking.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Result, SimulationError};
use crate::types::LogTime;

/// Shared handle to a consumer in a pipeline chain.
pub type SharedConsumer<V> = Rc<RefCell<dyn EventConsumer<V>>>;

/// Wraps a concrete consumer into a shared handle usable in a chain.
pub fn shared<C>(consumer: C) -> Rc<RefCell<C>> {
    Rc::new(RefCell::new(consumer))
}

/// Per-consumer chain state: the successor slot and the causality watermark.
///
/// Every consumer embeds one `ChainLink` and exposes it through
/// [`EventConsumer::chain`]/[`EventConsumer::chain_mut`]; the provided trait
/// methods use it to run the causality checks and the downstream forwarding.
pub struct ChainLink<V> {
    next: Option<SharedConsumer<V>>,
    last_time: LogTime,
}

impl<V> Default for ChainLink<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ChainLink<V> {
    /// Creates an unattached link at time zero.
    pub fn new() -> Self {
        Self {
            next: None,
            last_time: 0,
        }
    }

    /// Timestamp of the last event or time advance seen by this consumer.
    pub fn last_time(&self) -> LogTime {
        self.last_time
    }

    /// Moves the watermark forward.
    ///
    /// Windowed filters use this to mark everything up to a window boundary
    /// as resolved before they continue accumulating.
    pub fn set_last_time(&mut self, time: LogTime) {
        self.last_time = time;
    }

    /// Returns the successor, if any.
    pub fn next(&self) -> Option<SharedConsumer<V>> {
        self.next.clone()
    }

    /// Attaches the next consumer right after this one.
    pub fn attach(&mut self, consumer: SharedConsumer<V>) -> Result<()> {
        if self.next.is_some() {
            return Err(SimulationError::ChainAlreadyAttached);
        }
        self.next = Some(consumer);
        Ok(())
    }

    /// Detaches the next consumer.
    pub fn detach(&mut self) -> Result<()> {
        if self.next.is_none() {
            return Err(SimulationError::ChainNotAttached);
        }
        self.next = None;
        Ok(())
    }

    /// Passes an event to the next consumer in the chain, if present.
    pub fn forward_event(&self, time: LogTime, value: V) -> Result<()> {
        if let Some(next) = &self.next {
            next.try_borrow_mut()
                .map_err(|_| SimulationError::InvariantViolation("re-entrant pipeline chain"))?
                .on_event(time, value)?;
        }
        Ok(())
    }

    /// Notifies the next consumer that time has advanced.
    pub fn forward_advance(&self, time: LogTime) -> Result<()> {
        if let Some(next) = &self.next {
            next.try_borrow_mut()
                .map_err(|_| SimulationError::InvariantViolation("re-entrant pipeline chain"))?
                .on_time_advance(time)?;
        }
        Ok(())
    }

    /// Passes the clear notification down the chain.
    pub fn forward_clear(&self) -> Result<()> {
        if let Some(next) = &self.next {
            next.try_borrow_mut()
                .map_err(|_| SimulationError::InvariantViolation("re-entrant pipeline chain"))?
                .on_clear()?;
        }
        Ok(())
    }
}

/// The core trait of every pipeline stage.
///
/// Implementations provide storage for a [`ChainLink`] and override the
/// `process_*` hooks with their own logic; the hooks default to transparent
/// forwarding. The `on_*` entry points are template methods: they run the
/// causality check, invoke the hook, and update the watermark. Callers go
/// through `on_*`; implementations override `process_*` only.
pub trait EventConsumer<V> {
    /// Read access to the chain state.
    fn chain(&self) -> &ChainLink<V>;

    /// Mutable access to the chain state.
    fn chain_mut(&mut self) -> &mut ChainLink<V>;

    /// Consumer-specific event handling; defaults to forwarding downstream.
    fn process_event(&mut self, time: LogTime, value: V) -> Result<()> {
        self.chain().forward_event(time, value)
    }

    /// Consumer-specific time-advance handling; defaults to forwarding.
    fn process_advance(&mut self, time: LogTime) -> Result<()> {
        self.chain().forward_advance(time)
    }

    /// Consumer-specific clear handling; defaults to forwarding.
    fn process_clear(&mut self) -> Result<()> {
        self.chain().forward_clear()
    }

    /// Consumes an event. The event must respect causality.
    fn on_event(&mut self, time: LogTime, value: V) -> Result<()> {
        let last = self.chain().last_time();
        if time < last {
            return Err(SimulationError::CausalityViolation {
                last,
                attempted: time,
            });
        }
        self.process_event(time, value)?;
        self.chain_mut().set_last_time(time);
        Ok(())
    }

    /// Notifies the consumer that time has advanced.
    ///
    /// Filters that delay or emit events rely on this so the pipeline does
    /// not get stuck between events.
    fn on_time_advance(&mut self, time: LogTime) -> Result<()> {
        let last = self.chain().last_time();
        if time < last {
            return Err(SimulationError::CausalityViolation {
                last,
                attempted: time,
            });
        }
        self.process_advance(time)?;
        self.chain_mut().set_last_time(time);
        Ok(())
    }

    /// Clears recorded state and starts over. The watermark is *not* reset.
    fn on_clear(&mut self) -> Result<()> {
        self.process_clear()
    }
}

/// Returns the last consumer of the chain starting at `head`.
///
/// If `head` has no successor, `head` itself is returned.
pub fn last_consumer<V>(head: &SharedConsumer<V>) -> SharedConsumer<V> {
    let mut current = head.clone();
    loop {
        let next = current.borrow().chain().next();
        match next {
            Some(n) => current = n,
            None => return current,
        }
    }
}

/// Attaches `consumer` after the last stage of the chain starting at `head`.
pub fn attach_to_tail<V>(head: &SharedConsumer<V>, consumer: SharedConsumer<V>) -> Result<()> {
    last_consumer(head).borrow_mut().chain_mut().attach(consumer)
}

/// Secondary output slot of a forked consumer.
///
/// A forked consumer is a regular consumer of `V` that additionally produces
/// events of type `W` on its sprout. Time advances and clears propagate to
/// the sprout; events appear there only when the consumer's own logic emits
/// them.
pub struct Sprout<W> {
    consumer: Option<SharedConsumer<W>>,
}

impl<W> Default for Sprout<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> Sprout<W> {
    /// Creates an empty sprout slot.
    pub fn new() -> Self {
        Self { consumer: None }
    }

    /// Returns the attached sprout consumer, if any.
    pub fn consumer(&self) -> Option<SharedConsumer<W>> {
        self.consumer.clone()
    }

    /// Attaches the consumer receiving newly emitted events.
    pub fn attach(&mut self, consumer: SharedConsumer<W>) -> Result<()> {
        if self.consumer.is_some() {
            return Err(SimulationError::ChainAlreadyAttached);
        }
        self.consumer = Some(consumer);
        Ok(())
    }

    /// Detaches the sprout consumer.
    pub fn detach(&mut self) -> Result<()> {
        if self.consumer.is_none() {
            return Err(SimulationError::ChainNotAttached);
        }
        self.consumer = None;
        Ok(())
    }

    /// Emits an event on the secondary output, if anything is attached.
    pub fn emit(&self, time: LogTime, value: W) -> Result<()> {
        if let Some(consumer) = &self.consumer {
            consumer
                .try_borrow_mut()
                .map_err(|_| SimulationError::InvariantViolation("re-entrant pipeline chain"))?
                .on_event(time, value)?;
        }
        Ok(())
    }

    /// Propagates a time advance to the sprout chain.
    pub fn advance(&self, time: LogTime) -> Result<()> {
        if let Some(consumer) = &self.consumer {
            consumer
                .try_borrow_mut()
                .map_err(|_| SimulationError::InvariantViolation("re-entrant pipeline chain"))?
                .on_time_advance(time)?;
        }
        Ok(())
    }

    /// Propagates a clear to the sprout chain.
    pub fn clear(&self) -> Result<()> {
        if let Some(consumer) = &self.consumer {
            consumer
                .try_borrow_mut()
                .map_err(|_| SimulationError::InvariantViolation("re-entrant pipeline chain"))?
                .on_clear()?;
        }
        Ok(())
    }
}

/// Callback invoked for every event (and on every tick) by [`EventAnalyzer`].
pub type EventCallback<V> = Box<dyn FnMut(LogTime, &V) -> Result<()>>;

/// Callback invoked when the pipeline is cleared.
pub type ClearCallback = Box<dyn FnMut() -> Result<()>>;

/// Pass-through consumer that exposes the stream to a pair of callables.
///
/// On a time advance the event callback is invoked again with the last value
/// seen, which lets observers react at every clock tick rather than only on
/// state changes. Errors returned by the callbacks propagate like any other
/// consumer error.
pub struct EventAnalyzer<V> {
    chain: ChainLink<V>,
    last_value: Option<V>,
    on_event_cb: EventCallback<V>,
    on_clear_cb: ClearCallback,
}

impl<V> EventAnalyzer<V> {
    /// Creates an analyzer with both callbacks.
    pub fn new(on_event_cb: EventCallback<V>, on_clear_cb: ClearCallback) -> Self {
        Self {
            chain: ChainLink::new(),
            last_value: None,
            on_event_cb,
            on_clear_cb,
        }
    }

    /// Creates an analyzer that only watches events (no-op clear callback).
    pub fn watch(on_event_cb: impl FnMut(LogTime, &V) -> Result<()> + 'static) -> Self {
        Self::new(Box::new(on_event_cb), Box::new(|| Ok(())))
    }
}

impl<V: Clone> EventConsumer<V> for EventAnalyzer<V> {
    fn chain(&self) -> &ChainLink<V> {
        &self.chain
    }

    fn chain_mut(&mut self) -> &mut ChainLink<V> {
        &mut self.chain
    }

    fn process_event(&mut self, time: LogTime, value: V) -> Result<()> {
        (self.on_event_cb)(time, &value)?;
        self.last_value = Some(value.clone());
        self.chain.forward_event(time, value)
    }

    fn process_advance(&mut self, time: LogTime) -> Result<()> {
        if let Some(value) = &self.last_value {
            (self.on_event_cb)(time, value)?;
        }
        self.chain.forward_advance(time)
    }

    fn process_clear(&mut self) -> Result<()> {
        (self.on_clear_cb)()?;
        self.chain.forward_clear()
    }
}
