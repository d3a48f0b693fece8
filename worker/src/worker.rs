//! The worker main loop (spec §4.3): reserve a job, fork a child to run it
//! in isolation, and account for the child's exit.
//!
//! Async work (reserving, bookkeeping) runs on a `current_thread` Tokio
//! runtime so that, at the moment of `fork()`, the process has exactly one
//! thread — the only configuration in which `fork()` inside an async
//! program is sound. The forked child never touches the parent's runtime
//! again: its first act is to build a brand new one and re-establish its
//! own Redis connections through it, exactly as the parent did at startup.

use std::time::Duration;

use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use redwork_core::{Event, EventArgs};

use crate::context::Context;
use crate::error::Error;
use crate::perform::{parse_envelope, perform, record_failure};
use crate::registry::{parse_identity_host_pid, pid_is_alive, worker_identity, WorkingOn};
use crate::signals::{self, SignalEvent};

pub struct WorkerConfig {
    pub queues: Vec<String>,
    pub blocking: bool,
    pub poll_interval: Duration,
    pub reap_interval: Duration,
    pub iterations: Option<u64>,
}

pub struct Worker {
    ctx: Context,
    config: WorkerConfig,
    id: String,
}

enum ChildOutcome {
    Exited(i32),
    Signaled(nix::sys::signal::Signal),
}

impl Worker {
    pub fn new(ctx: Context, config: WorkerConfig) -> Self {
        let host = hostname();
        let pid = std::process::id();
        let id = worker_identity(&host, pid, &config.queues);
        Worker { ctx, config, id }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Runs the worker until a shutdown signal arrives or, if configured,
    /// `iterations` jobs have been processed.
    pub fn work(&self) -> Result<(), Error> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        signals::install()?;

        rt.block_on(async {
            self.ctx.registry.register(&self.id).await?;
            self.prune_orphans().await?;
            if self.events_emit(Event::BeforeFirstFork) {
                tracing::debug!("before_first_fork listener vetoed, ignoring");
            }
            Ok::<(), Error>(())
        })?;

        let mut processed = 0u64;
        let mut paused = false;
        let mut last_reap = std::time::Instant::now();

        let result = loop {
            if let Some(event) = signals::take_pending() {
                match event {
                    SignalEvent::Term | SignalEvent::Int | SignalEvent::Quit => {
                        tracing::info!(?event, "shutdown signal received");
                        break Ok(());
                    }
                    SignalEvent::UsrTwo => {
                        tracing::info!("pausing reservation (USR2)");
                        paused = true;
                    }
                    SignalEvent::Cont => {
                        tracing::info!("resuming reservation (CONT)");
                        paused = false;
                    }
                    SignalEvent::Pipe | SignalEvent::UsrOne => {
                        // UsrOne is only meaningful while a child is running
                        // (forced kill, handled inside run_job); outside that
                        // window it and Pipe are no-ops for the parent loop.
                    }
                }
            }

            if paused {
                std::thread::sleep(self.config.poll_interval);
                continue;
            }

            if let Some(limit) = self.config.iterations {
                if processed >= limit {
                    break Ok(());
                }
            }

            if last_reap.elapsed() >= self.config.reap_interval {
                if let Err(e) = rt.block_on(self.prune_orphans()) {
                    tracing::warn!(error = %e, "orphan pruning pass failed");
                }
                last_reap = std::time::Instant::now();
            }

            let reserved = rt.block_on(self.reserve());
            let (queue, raw) = match reserved {
                Ok(Some(pair)) => pair,
                Ok(None) => {
                    std::thread::sleep(self.config.poll_interval);
                    continue;
                }
                Err(e) => break Err(e),
            };

            match self.run_job(&rt, &queue, raw) {
                Ok(()) => processed += 1,
                Err(e) => {
                    tracing::error!(error = %e, "job run failed outside the child process");
                }
            }
        };

        rt.block_on(async {
            let _ = self.ctx.registry.unregister(&self.id).await;
        });

        result
    }

    fn events_emit(&self, event: Event) -> bool {
        self.ctx.events.emit(event, &EventArgs::new()).is_err()
    }

    async fn reserve(&self) -> Result<Option<(String, String)>, Error> {
        let hook_args = EventArgs::new();
        if self.ctx.events.emit(Event::BeforeReserve, &hook_args).is_err() {
            return Ok(None);
        }

        let found = if self.config.blocking {
            self.ctx
                .queues
                .blocking_pop(&self.config.queues, self.config.poll_interval.as_secs_f64())
                .await?
        } else {
            let mut found = None;
            for queue in &self.config.queues {
                if let Some(raw) = self.ctx.queues.pop(queue).await? {
                    found = Some((queue.clone(), raw));
                    break;
                }
            }
            found
        };

        if let Err(veto) = self.ctx.events.emit(Event::AfterReserve, &hook_args) {
            tracing::debug!(?veto, "after_reserve listener returned a veto, ignoring");
        }

        Ok(found)
    }

    /// Enumerates the worker registry for entries on this host whose PID is
    /// no longer live, routes any in-flight job of theirs to the failure
    /// sink as a `DirtyExit`, and unregisters them.
    async fn prune_orphans(&self) -> Result<(), Error> {
        let host = hostname();
        let workers = self.ctx.registry.all_workers().await?;

        for identity in workers {
            if identity == self.id {
                continue;
            }

            let (entry_host, pid) = match parse_identity_host_pid(&identity) {
                Some(parsed) => parsed,
                None => continue,
            };

            if entry_host != host || pid_is_alive(pid) {
                continue;
            }

            tracing::warn!(%identity, "pruning orphaned worker");

            if let Some(working_on) = self.ctx.registry.working_on(&identity).await? {
                let err = Error::DirtyExit(None);
                record_failure(
                    &self.ctx,
                    &working_on.queue,
                    &identity,
                    &working_on.class,
                    Some(working_on.payload),
                    working_on.id.as_deref(),
                    &err,
                )
                .await?;
            }

            self.ctx.registry.unregister(&identity).await?;
        }

        Ok(())
    }

    /// Forks, waits on the child, and reconciles bookkeeping. The fork
    /// itself and the parent's wait loop are synchronous; only the
    /// pre-fork bookkeeping and the post-wait cleanup touch the runtime.
    fn run_job(
        &self,
        rt: &tokio::runtime::Runtime,
        queue: &str,
        raw: String,
    ) -> Result<(), Error> {
        let envelope = parse_envelope(&raw)?;

        rt.block_on(async {
            let working_on = WorkingOn {
                queue: queue.to_string(),
                class: envelope.class.clone(),
                id: envelope.id.clone(),
                payload: serde_json::to_value(&envelope.args[0]).unwrap_or(serde_json::Value::Null),
                run_at: chrono::Utc::now(),
            };
            self.ctx.registry.set_working_on(&self.id, &working_on).await
        })?;

        let fork_args = EventArgs::new().with("queue", queue).with("class", envelope.class.as_str());
        if self.ctx.events.emit(Event::BeforeFork, &fork_args).is_err() {
            rt.block_on(async { self.ctx.registry.clear_working_on(&self.id).await })?;
            return Ok(());
        }

        match unsafe { fork() }.map_err(Error::Fork)? {
            ForkResult::Parent { child } => {
                if let Some(id) = &envelope.id {
                    rt.block_on(self.ctx.registry.set_pid(id, child.as_raw()))?;
                }

                if let Err(veto) = self.ctx.events.emit(Event::AfterFork, &fork_args) {
                    tracing::debug!(?veto, "after_fork listener returned a veto, ignoring");
                }

                let outcome = self.wait_for_child(child)?;

                rt.block_on(async {
                    self.ctx.registry.clear_working_on(&self.id).await?;
                    if let Some(id) = &envelope.id {
                        self.ctx.registry.clear_pid(id).await?;
                    }
                    Ok::<(), Error>(())
                })?;

                match outcome {
                    ChildOutcome::Exited(0) => Ok(()),
                    ChildOutcome::Exited(code) => {
                        let err = Error::DirtyExit(Some(code));
                        rt.block_on(record_failure(
                            &self.ctx,
                            queue,
                            &self.id,
                            &envelope.class,
                            envelope.args[0].clone(),
                            envelope.id.as_deref(),
                            &err,
                        ))
                    }
                    ChildOutcome::Signaled(sig) => {
                        let err = Error::DirtyExit(Some(sig as i32));
                        rt.block_on(record_failure(
                            &self.ctx,
                            queue,
                            &self.id,
                            &envelope.class,
                            envelope.args[0].clone(),
                            envelope.id.as_deref(),
                            &err,
                        ))
                    }
                }
            }
            ForkResult::Child => {
                // Never return across a fork: build an entirely fresh
                // runtime and exit explicitly once the job is done.
                let child_rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(_) => std::process::exit(70),
                };

                let outcome = child_rt.block_on(perform(&self.ctx, queue, &self.id, envelope));
                match outcome {
                    Ok(()) => std::process::exit(0),
                    Err(_) => std::process::exit(1),
                }
            }
        }
    }

    /// Polls `waitpid` with `WNOHANG` rather than blocking indefinitely, so
    /// the loop keeps noticing an incoming USR1 (operator-forced kill of the
    /// running child).
    fn wait_for_child(&self, child: Pid) -> Result<ChildOutcome, Error> {
        loop {
            match signals::take_pending() {
                Some(SignalEvent::UsrOne) => {
                    tracing::warn!(pid = child.as_raw(), "USR1 received, killing child job");
                    let _ = nix::sys::signal::kill(child, nix::sys::signal::Signal::SIGKILL);
                }
                Some(other) => signals::requeue(other),
                None => {}
            }

            match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(ChildOutcome::Exited(code)),
                Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(ChildOutcome::Signaled(sig)),
                Ok(WaitStatus::StillAlive) => {
                    std::thread::sleep(Duration::from_millis(100));
                }
                Ok(_) => std::thread::sleep(Duration::from_millis(100)),
                Err(nix::Error::EINTR) => continue,
                Err(e) => return Err(Error::Fork(e)),
            }
        }
    }
}

fn hostname() -> String {
    gethostname::gethostname()
        .into_string()
        .unwrap_or_else(|_| "unknown-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_id_includes_pid_and_queues() {
        let id = worker_identity("host1", 42, &["default".to_string()]);
        assert!(id.contains("host1"));
        assert!(id.contains("42"));
        assert!(id.contains("default"));
    }
}
