// ABOUTME: Promises, channels, and the single-task cooperative scheduler

use crate::error::RuntimeError;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Instant;

// ----------------------------------------------------------------------
// Promises
// ----------------------------------------------------------------------

#[derive(Debug)]
pub enum PromiseState {
    Pending,
    Resolved(Value),
    Rejected(RuntimeError),
}

/// A single-assignment promise. Settling an already-settled promise is a
/// no-op, which is what makes timeout/race links safe to leave behind.
#[derive(Clone, Debug)]
pub struct Promise(Rc<RefCell<PromiseState>>);

impl Promise {
    pub fn pending() -> Self {
        Promise(Rc::new(RefCell::new(PromiseState::Pending)))
    }

    pub fn resolved(value: Value) -> Self {
        Promise(Rc::new(RefCell::new(PromiseState::Resolved(value))))
    }

    pub fn rejected(error: RuntimeError) -> Self {
        Promise(Rc::new(RefCell::new(PromiseState::Rejected(error))))
    }

    pub fn resolve(&self, value: Value) {
        let mut state = self.0.borrow_mut();
        if matches!(*state, PromiseState::Pending) {
            *state = PromiseState::Resolved(value);
        }
    }

    pub fn reject(&self, error: RuntimeError) {
        let mut state = self.0.borrow_mut();
        if matches!(*state, PromiseState::Pending) {
            *state = PromiseState::Rejected(error);
        }
    }

    pub fn settle(&self, result: Result<Value, RuntimeError>) {
        match result {
            Ok(value) => self.resolve(value),
            Err(error) => self.reject(error),
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(*self.0.borrow(), PromiseState::Pending)
    }

    /// Clone out the settlement, if any.
    pub fn result(&self) -> Option<Result<Value, RuntimeError>> {
        match &*self.0.borrow() {
            PromiseState::Pending => None,
            PromiseState::Resolved(value) => Some(Ok(value.clone())),
            PromiseState::Rejected(error) => Some(Err(error.clone())),
        }
    }

    pub fn state_name(&self) -> &'static str {
        match &*self.0.borrow() {
            PromiseState::Pending => "pending",
            PromiseState::Resolved(_) => "resolved",
            PromiseState::Rejected(_) => "rejected",
        }
    }

    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

// ----------------------------------------------------------------------
// Channels
// ----------------------------------------------------------------------

pub struct ChannelState {
    queue: VecDeque<Value>,
    capacity: Option<usize>,
    closed: bool,
}

/// Bounded FIFO with an open/closed state. Suspension on full/empty is done
/// by the evaluator driving scheduler turns, not by blocking the thread.
#[derive(Clone)]
pub struct Channel(Rc<RefCell<ChannelState>>);

impl Channel {
    pub fn new(capacity: Option<usize>) -> Self {
        Channel(Rc::new(RefCell::new(ChannelState {
            queue: VecDeque::new(),
            capacity,
            closed: false,
        })))
    }

    pub fn ptr_eq(&self, other: &Channel) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_closed(&self) -> bool {
        self.0.borrow().closed
    }

    pub fn close(&self) {
        self.0.borrow_mut().closed = true;
    }

    pub fn is_full(&self) -> bool {
        let state = self.0.borrow();
        match state.capacity {
            Some(cap) => state.queue.len() >= cap,
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().queue.is_empty()
    }

    /// Push if the channel is open and has room.
    pub fn try_send(&self, value: Value) -> Result<bool, RuntimeError> {
        let mut state = self.0.borrow_mut();
        if state.closed {
            return Err(RuntimeError::ChannelClosed);
        }
        if let Some(cap) = state.capacity {
            if state.queue.len() >= cap {
                return Ok(false);
            }
        }
        state.queue.push_back(value);
        Ok(true)
    }

    /// Pop the oldest value, if any. A closed channel drains normally.
    pub fn try_recv(&self) -> Option<Value> {
        self.0.borrow_mut().queue.pop_front()
    }
}

// ----------------------------------------------------------------------
// Scheduler queues
// ----------------------------------------------------------------------

/// A queued call: the evaluator invokes `func(args)` and settles `done`.
pub struct Task {
    pub func: Value,
    pub args: Vec<Value>,
    pub done: Promise,
}

pub enum TimerAction {
    Resolve(Value),
    Reject(RuntimeError),
}

pub struct Timer {
    pub deadline: Instant,
    pub promise: Promise,
    pub action: TimerAction,
}

/// `then`-style continuation: when `source` resolves, call `func` with the
/// value (or forward it unchanged when `func` is `None`) and settle `target`.
pub struct Chain {
    pub source: Promise,
    pub func: Option<Value>,
    pub target: Promise,
}

/// Fan-in: settle `target` with the ordered list once every source resolves,
/// or with the first rejection.
pub struct Gather {
    pub sources: Vec<Promise>,
    pub target: Promise,
}

/// First settlement among `sources` wins.
pub struct Race {
    pub sources: Vec<Promise>,
    pub target: Promise,
}

/// The single-task scheduler. Execution of tasks lives in the evaluator
/// (tasks call back into user code); this type owns the queues and the
/// settlement propagation that needs no evaluation.
#[derive(Default)]
pub struct Scheduler {
    pub tasks: VecDeque<Task>,
    timers: Vec<Timer>,
    chains: Vec<Chain>,
    gathers: Vec<Gather>,
    races: Vec<Race>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler::default()
    }

    /// Queue a call; the returned promise settles with its outcome.
    pub fn spawn(&mut self, func: Value, args: Vec<Value>) -> Promise {
        let done = Promise::pending();
        self.tasks.push_back(Task {
            func,
            args,
            done: done.clone(),
        });
        done
    }

    pub fn add_timer(&mut self, ms: i64, action: TimerAction) -> Promise {
        let promise = Promise::pending();
        self.add_timer_for(promise.clone(), ms, action);
        promise
    }

    pub fn add_timer_for(&mut self, promise: Promise, ms: i64, action: TimerAction) {
        let deadline = Instant::now() + std::time::Duration::from_millis(ms.max(0) as u64);
        self.timers.push(Timer {
            deadline,
            promise,
            action,
        });
    }

    /// Forward `source`'s settlement into an existing promise. Used to
    /// flatten tasks that themselves produced a promise.
    pub fn chain_into(&mut self, source: Promise, target: Promise) {
        self.chains.push(Chain {
            source,
            func: None,
            target,
        });
    }

    pub fn chain(&mut self, source: Promise, func: Option<Value>) -> Promise {
        let target = Promise::pending();
        self.chains.push(Chain {
            source,
            func,
            target: target.clone(),
        });
        target
    }

    pub fn gather(&mut self, sources: Vec<Promise>) -> Promise {
        let target = Promise::pending();
        self.gathers.push(Gather {
            sources,
            target: target.clone(),
        });
        target
    }

    pub fn race(&mut self, sources: Vec<Promise>) -> Promise {
        let target = Promise::pending();
        self.races.push(Race {
            sources,
            target: target.clone(),
        });
        target
    }

    pub fn next_task(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    pub fn has_timers(&self) -> bool {
        !self.timers.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.iter().map(|t| t.deadline).min()
    }

    /// Settle promises whose deadline has passed. Settled targets (e.g. a
    /// timeout race the real result already won) fire as no-ops.
    pub fn fire_due_timers(&mut self) -> bool {
        let now = Instant::now();
        let mut fired = false;
        let mut remaining = Vec::with_capacity(self.timers.len());
        for timer in self.timers.drain(..) {
            if timer.deadline <= now {
                fired = true;
                match timer.action {
                    TimerAction::Resolve(value) => timer.promise.resolve(value),
                    TimerAction::Reject(error) => timer.promise.reject(error),
                }
            } else if timer.promise.is_settled() {
                // Nothing left to settle; drop the timer early.
                continue;
            } else {
                remaining.push(timer);
            }
        }
        self.timers = remaining;
        fired
    }

    /// Propagate settlements through chains, gathers, and races. Returns
    /// true when anything moved (including newly queued tasks).
    pub fn propagate(&mut self) -> bool {
        let mut progressed = false;

        let mut chains = std::mem::take(&mut self.chains);
        chains.retain(|chain| {
            if chain.target.is_settled() {
                progressed = true;
                return false;
            }
            match chain.source.result() {
                None => true,
                Some(Ok(value)) => {
                    progressed = true;
                    match &chain.func {
                        Some(func) => self.tasks.push_back(Task {
                            func: func.clone(),
                            args: vec![value],
                            done: chain.target.clone(),
                        }),
                        None => chain.target.resolve(value),
                    }
                    false
                }
                Some(Err(error)) => {
                    progressed = true;
                    chain.target.reject(error);
                    false
                }
            }
        });
        self.chains = chains;

        let mut gathers = std::mem::take(&mut self.gathers);
        gathers.retain(|gather| {
            if gather.target.is_settled() {
                progressed = true;
                return false;
            }
            if let Some(error) = gather.sources.iter().find_map(|p| match p.result() {
                Some(Err(e)) => Some(e),
                _ => None,
            }) {
                progressed = true;
                gather.target.reject(error);
                return false;
            }
            let mut values = Vec::with_capacity(gather.sources.len());
            for source in &gather.sources {
                match source.result() {
                    Some(Ok(value)) => values.push(value),
                    _ => return true,
                }
            }
            progressed = true;
            gather.target.resolve(Value::List(values));
            false
        });
        self.gathers = gathers;

        let mut races = std::mem::take(&mut self.races);
        races.retain(|race| {
            if race.target.is_settled() {
                progressed = true;
                return false;
            }
            for source in &race.sources {
                if let Some(result) = source.result() {
                    progressed = true;
                    race.target.settle(result);
                    return false;
                }
            }
            true
        });
        self.races = races;

        progressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promise_is_single_assignment() {
        let p = Promise::pending();
        p.resolve(Value::Int(1));
        p.resolve(Value::Int(2));
        p.reject(RuntimeError::Deadlock);
        match p.result() {
            Some(Ok(Value::Int(1))) => {}
            other => panic!("expected first resolution to stick, got {:?}", other),
        }
    }

    #[test]
    fn test_channel_bounded_send() {
        let ch = Channel::new(Some(1));
        assert!(ch.try_send(Value::Int(1)).unwrap());
        assert!(!ch.try_send(Value::Int(2)).unwrap());
        assert!(matches!(ch.try_recv(), Some(Value::Int(1))));
        assert!(ch.try_recv().is_none());
    }

    #[test]
    fn test_closed_channel_rejects_sends_but_drains() {
        let ch = Channel::new(None);
        ch.try_send(Value::Int(1)).unwrap();
        ch.close();
        assert!(ch.try_send(Value::Int(2)).is_err());
        assert!(matches!(ch.try_recv(), Some(Value::Int(1))));
        assert!(ch.try_recv().is_none());
    }

    #[test]
    fn test_gather_resolves_in_source_order() {
        let mut sched = Scheduler::new();
        let a = Promise::pending();
        let b = Promise::pending();
        let target = sched.gather(vec![a.clone(), b.clone()]);
        // Settle out of order; the gathered list follows source order.
        b.resolve(Value::Int(2));
        assert!(!target.is_settled());
        sched.propagate();
        assert!(!target.is_settled());
        a.resolve(Value::Int(1));
        sched.propagate();
        match target.result() {
            Some(Ok(Value::List(items))) => {
                assert!(matches!(items[0], Value::Int(1)));
                assert!(matches!(items[1], Value::Int(2)));
            }
            other => panic!("expected resolved list, got {:?}", other),
        }
    }

    #[test]
    fn test_race_first_settlement_wins() {
        let mut sched = Scheduler::new();
        let a = Promise::pending();
        let b = Promise::pending();
        let target = sched.race(vec![a.clone(), b.clone()]);
        b.resolve(Value::Int(2));
        sched.propagate();
        assert!(matches!(target.result(), Some(Ok(Value::Int(2)))));
        // The loser settling later changes nothing.
        a.resolve(Value::Int(1));
        assert!(matches!(target.result(), Some(Ok(Value::Int(2)))));
    }
}
