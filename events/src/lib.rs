//! In-process named hook registry with synchronous, veto-capable dispatch.
//!
//! This is the Rust-native redesign of the original's exception-based veto
//! signal: a listener vetoes by returning `Err(Veto::...)` instead of
//! raising/catching an exception, and the dispatcher short-circuits on the
//! first veto it sees.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    BeforeFirstFork,
    BeforeFork,
    AfterFork,
    BeforePerform,
    AfterPerform,
    OnFailure,
    BeforeEnqueue,
    AfterEnqueue,
    BeforeSchedule,
    AfterSchedule,
    BeforeReserve,
    AfterReserve,
}

/// A listener's reason for aborting the enclosing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Veto {
    /// Raised from a `BeforeEnqueue` listener; `enqueue` returns `false`.
    DoNotCreate,
    /// Raised from a `BeforePerform` listener; `perform` returns `false`.
    DoNotPerform,
}

pub type HookResult = Result<(), Veto>;

/// Loosely typed argument bag passed to listeners. Different events carry
/// different fields (a queue name, a class name, a job id, ...); listeners
/// pull out what they need by key.
#[derive(Debug, Clone, Default)]
pub struct EventArgs(HashMap<&'static str, Value>);

impl EventArgs {
    pub fn new() -> Self {
        EventArgs(HashMap::new())
    }

    pub fn with(mut self, key: &'static str, value: impl Into<Value>) -> Self {
        self.0.insert(key, value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }
}

type Listener = Box<dyn Fn(Event, &EventArgs) -> HookResult + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerId(usize);

struct Registration {
    id: ListenerId,
    listener: Listener,
}

/// Synchronous, registration-ordered hook registry, shared by clone across
/// the queue engine, delayed scheduler, and worker.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    next_id: usize,
    listeners: HashMap<Event, Vec<Registration>>,
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            inner: Arc::new(Mutex::new(Inner {
                next_id: 0,
                listeners: HashMap::new(),
            })),
        }
    }

    pub fn on<F>(&self, event: Event, listener: F) -> ListenerId
    where
        F: Fn(Event, &EventArgs) -> HookResult + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;
        inner
            .listeners
            .entry(event)
            .or_insert_with(Vec::new)
            .push(Registration {
                id,
                listener: Box::new(listener),
            });
        id
    }

    pub fn off(&self, event: Event, id: ListenerId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(list) = inner.listeners.get_mut(&event) {
            list.retain(|r| r.id != id);
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.listeners.clear();
    }

    /// Dispatch synchronously, in registration order. Returns `Err(veto)` as
    /// soon as any listener vetoes, without running the remaining listeners.
    pub fn emit(&self, event: Event, args: &EventArgs) -> HookResult {
        // Collect just the ids under the lock, then look up and invoke each
        // listener with the lock released, so a listener calling back into
        // `on`/`off`/`emit` doesn't deadlock.
        let to_run: Vec<ListenerId> = {
            let inner = self.inner.lock().unwrap();
            inner
                .listeners
                .get(&event)
                .map(|list| list.iter().map(|r| r.id).collect())
                .unwrap_or_default()
        };

        for id in to_run {
            let result = {
                let inner = self.inner.lock().unwrap();
                inner
                    .listeners
                    .get(&event)
                    .and_then(|list| list.iter().find(|r| r.id == id))
                    .map(|r| (r.listener)(event, args))
            };
            match result {
                Some(Ok(())) => {}
                Some(Err(veto)) => return Err(veto),
                None => {
                    // Listener was removed mid-dispatch (via `off`); skip it.
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatches_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.on(Event::BeforeEnqueue, move |_, _| {
            o1.lock().unwrap().push(1);
            Ok(())
        });
        let o2 = order.clone();
        bus.on(Event::BeforeEnqueue, move |_, _| {
            o2.lock().unwrap().push(2);
            Ok(())
        });

        bus.emit(Event::BeforeEnqueue, &EventArgs::new()).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn veto_short_circuits_remaining_listeners() {
        let bus = EventBus::new();
        let ran = Arc::new(AtomicUsize::new(0));

        bus.on(Event::BeforePerform, |_, _| Err(Veto::DoNotPerform));
        let ran2 = ran.clone();
        bus.on(Event::BeforePerform, move |_, _| {
            ran2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let result = bus.emit(Event::BeforePerform, &EventArgs::new());
        assert_eq!(result, Err(Veto::DoNotPerform));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn off_removes_listener() {
        let bus = EventBus::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let id = bus.on(Event::AfterEnqueue, move |_, _| {
            ran2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.off(Event::AfterEnqueue, id);
        bus.emit(Event::AfterEnqueue, &EventArgs::new()).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn clear_removes_all_listeners() {
        let bus = EventBus::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        bus.on(Event::AfterPerform, move |_, _| {
            ran2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.clear();
        bus.emit(Event::AfterPerform, &EventArgs::new()).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
