pub mod context;
pub mod error;
pub mod perform;
pub mod registry;
pub mod signals;
pub mod worker;

pub use context::Context;
pub use error::Error;
pub use perform::{parse_envelope, perform, record_failure, RawEnvelope};
pub use registry::{parse_identity_host_pid, worker_identity, WorkerRegistry, WorkingOn};
pub use signals::SignalEvent;
pub use worker::{Worker, WorkerConfig};
