//! The job envelope shape and the factory that turns a `class` identifier
//! into a runnable [`JobHandler`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::Error;

/// Determines how to generate a job id on enqueue.
pub enum JobId<'a> {
    /// Autogenerate a v4 UUID.
    Auto,
    /// Concatenate the given prefix with a v4 UUID.
    Prefix(&'a str),
    /// Use this exact value. It's up to the caller to make sure it's unique.
    Value(&'a str),
}

impl<'a> JobId<'a> {
    pub fn make_id(&self) -> String {
        match self {
            JobId::Auto => uuid::Uuid::new_v4().to_string(),
            JobId::Prefix(prefix) => format!("{}:{}", prefix, uuid::Uuid::new_v4()),
            JobId::Value(s) => s.to_string(),
        }
    }
}

/// The full job envelope as it sits in a primary queue list. Field order is
/// significant: it matches `{"args":[...],"class":"...","id":"...",
/// "prefix":"...","queue_time":...}` from the wire contract, so two
/// independently-serialized envelopes with the same logical contents compare
/// byte-equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub args: [Option<Value>; 1],
    pub class: String,
    pub id: String,
    pub prefix: String,
    pub queue_time: f64,
}

/// The envelope shape used for `delayed:<ts>` list entries, and for the
/// byte-equality comparisons `remove_delayed` performs. Field order is
/// `args, class, queue`, a strict prefix-compatible subset of
/// [`JobEnvelope`]'s field set (delayed entries may omit `id`, `prefix`, and
/// `queue_time` — promotion pushes the envelope onto the primary queue
/// exactly as stored).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayedEnvelope {
    pub args: [Option<Value>; 1],
    pub class: String,
    pub queue: String,
}

impl DelayedEnvelope {
    pub fn new(queue: impl Into<String>, class: impl Into<String>, args: Option<Value>) -> Self {
        DelayedEnvelope {
            args: [args],
            class: class.into(),
            queue: queue.into(),
        }
    }

    /// Canonical JSON used for the byte-equality removal contract. Because
    /// the fields are declared in the wire order and contain no maps with
    /// nondeterministic key order at the top level, `serde_json::to_string`
    /// already produces the canonical form.
    pub fn canonical_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

/// The capability a job handler must expose. There is no runtime
/// class-by-name lookup in Rust, so `className` is an opaque key into a
/// [`JobFactory`]'s registry rather than a language symbol.
pub trait JobHandler: Send {
    fn set_args(&mut self, args: Option<Value>);
    fn set_queue(&mut self, queue: &str);

    fn set_up(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn perform(&mut self) -> Result<(), Error>;

    fn tear_down(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Resolves a `className` + args + queue triple into a runnable handler.
pub trait JobFactory: Send + Sync {
    fn create(
        &self,
        class: &str,
        args: Option<Value>,
        queue: &str,
    ) -> Result<Box<dyn JobHandler>, Error>;
}

type HandlerCtor = dyn Fn() -> Box<dyn JobHandler> + Send + Sync;

/// Default factory: a name -> constructor registry populated at startup.
/// This is the explicit realization of "no runtime class-by-name lookup" —
/// callers register every handler class they want `className` to resolve
/// to before starting a worker.
#[derive(Clone, Default)]
pub struct RegistryJobFactory {
    handlers: Arc<Mutex<HashMap<String, Arc<HandlerCtor>>>>,
}

impl RegistryJobFactory {
    pub fn new() -> Self {
        RegistryJobFactory {
            handlers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn register<F>(&self, class: impl Into<String>, ctor: F)
    where
        F: Fn() -> Box<dyn JobHandler> + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .insert(class.into(), Arc::new(ctor));
    }
}

impl JobFactory for RegistryJobFactory {
    fn create(
        &self,
        class: &str,
        args: Option<Value>,
        queue: &str,
    ) -> Result<Box<dyn JobHandler>, Error> {
        let ctor = {
            let handlers = self.handlers.lock().unwrap();
            handlers
                .get(class)
                .cloned()
                .ok_or_else(|| Error::JobResolution(class.to_string()))?
        };

        let mut handler = ctor();
        handler.set_args(args);
        handler.set_queue(queue);
        Ok(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl JobHandler for Noop {
        fn set_args(&mut self, _args: Option<Value>) {}
        fn set_queue(&mut self, _queue: &str) {}
        fn perform(&mut self) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn unregistered_class_is_job_resolution_error() {
        let factory = RegistryJobFactory::new();
        let err = factory.create("Nope", None, "default").unwrap_err();
        assert!(matches!(err, Error::JobResolution(ref c) if c == "Nope"));
    }

    #[test]
    fn registered_class_resolves() {
        let factory = RegistryJobFactory::new();
        factory.register("Noop", || Box::new(Noop));
        assert!(factory.create("Noop", None, "default").is_ok());
    }

    #[test]
    fn delayed_envelope_canonical_json_field_order() {
        let env = DelayedEnvelope::new("q1", "Job", Some(serde_json::json!({"x": 1})));
        let json = env.canonical_json().unwrap();
        assert_eq!(json, r#"{"args":[{"x":1}],"class":"Job","queue":"q1"}"#);
    }

    #[test]
    fn job_id_variants() {
        assert_eq!(JobId::Value("abc").make_id(), "abc");
        assert!(JobId::Prefix("p").make_id().starts_with("p:"));
        assert!(!JobId::Auto.make_id().is_empty());
    }
}
