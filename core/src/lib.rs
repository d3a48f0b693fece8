pub mod error;
pub mod failure;
pub mod job;
pub mod queue;
pub mod scheduler;
pub mod stats;
pub mod status;

pub use error::Error;
pub use events::{Event, EventArgs, EventBus, Veto};
pub use failure::{FailurePayload, FailureSink, RedisFailureSink};
pub use job::{DelayedEnvelope, JobEnvelope, JobFactory, JobHandler, JobId, RegistryJobFactory};
pub use queue::QueueEngine;
pub use scheduler::DelayedScheduler;
pub use stats::StatCounter;
pub use status::{JobState, StatusRecord, StatusTracker};

pub use keystore::{self, KeyStorePool, RedisDsn};
