//! The unit of work actually executed inside a forked child (spec §4.3):
//! parse the envelope, resolve a handler, run `set_up`/`perform`/`tear_down`,
//! and record the outcome.

use chrono::Utc;
use redwork_core::{Event, EventArgs, FailurePayload, JobState};
use serde::Deserialize;
use serde_json::Value;

use crate::context::Context;
use crate::error::Error;

/// Deserializes a queue list entry. Looser than [`redwork_core::JobEnvelope`]:
/// envelopes promoted straight from the delayed scheduler may lack `id`,
/// `prefix`, and `queue_time` (see `DelayedEnvelope`), so every field but
/// `class` is optional here.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEnvelope {
    #[serde(default)]
    pub args: [Option<Value>; 1],
    pub class: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub queue_time: Option<f64>,
}

pub fn parse_envelope(raw: &str) -> Result<RawEnvelope, Error> {
    Ok(serde_json::from_str(raw)?)
}

/// Runs one job to completion inside the forked child. A `beforePerform`
/// veto is the one exit path that leaves status at `RUNNING` rather than
/// reaching `COMPLETE` or `FAILED` — matching "return false without
/// recording failure, and without updating status to FAILED" verbatim.
pub async fn perform(
    ctx: &Context,
    queue: &str,
    worker_id: &str,
    envelope: RawEnvelope,
) -> Result<(), Error> {
    let job_id = envelope.id.clone();
    let class = envelope.class.clone();
    let args = envelope.args[0].clone();

    if let Some(id) = &job_id {
        ctx.status.update(id, JobState::Running, None).await?;
    }

    let hook_args = EventArgs::new()
        .with("queue", queue)
        .with("class", class.clone())
        .with("args", args.clone().unwrap_or(Value::Null));

    if let Err(veto) = ctx.events.emit(Event::BeforePerform, &hook_args) {
        tracing::debug!(?veto, "before_perform listener vetoed, skipping execution");
        return Ok(());
    }

    let outcome = run_handler(ctx, queue, &class, args.clone());

    match outcome {
        Ok(()) => {
            if let Some(id) = &job_id {
                ctx.status.update(id, JobState::Complete, None).await?;
            }
            ctx.stats.incr("processed").await?;
            ctx.stats.incr_for_worker("processed", worker_id).await?;

            if let Err(veto) = ctx.events.emit(Event::AfterPerform, &hook_args) {
                tracing::debug!(?veto, "after_perform listener returned a veto, ignoring");
            }
        }
        Err(err) => {
            record_failure(ctx, queue, worker_id, &class, args, job_id.as_deref(), &err).await?;
        }
    }

    Ok(())
}

fn run_handler(
    ctx: &Context,
    queue: &str,
    class: &str,
    args: Option<Value>,
) -> Result<(), Error> {
    let mut handler = ctx
        .factory
        .create(class, args, queue)
        .map_err(Error::from)?;

    handler.set_up().map_err(Error::from)?;
    let result = handler.perform().map_err(Error::from);
    // `tear_down` runs regardless of whether `perform` succeeded, and its own
    // error does not shadow a `perform` failure already in hand.
    let teardown_result = handler.tear_down().map_err(Error::from);

    result.and(teardown_result)
}

pub async fn record_failure(
    ctx: &Context,
    queue: &str,
    worker_id: &str,
    class: &str,
    args: Option<Value>,
    job_id: Option<&str>,
    err: &Error,
) -> Result<(), Error> {
    tracing::error!(error = %err, queue, class, "job failed");

    if let Some(id) = job_id {
        ctx.status
            .update(id, JobState::Failed, Some(Value::String(err.to_string())))
            .await?;
    }

    ctx.stats.incr("failed").await?;
    ctx.stats.incr_for_worker("failed", worker_id).await?;

    let payload = FailurePayload {
        payload: args.unwrap_or(Value::Null),
        error_kind: error_kind(err).to_string(),
        error_message: err.to_string(),
        backtrace: Some(format!("{:?}", backtrace::Backtrace::new())),
        worker_id: worker_id.to_string(),
        queue: queue.to_string(),
        failed_at: Utc::now(),
    };
    ctx.failures.record(payload).await?;

    let hook_args = EventArgs::new()
        .with("queue", queue)
        .with("class", class)
        .with("error", err.to_string());
    if let Err(veto) = ctx.events.emit(Event::OnFailure, &hook_args) {
        tracing::debug!(?veto, "on_failure listener returned a veto, ignoring");
    }

    Ok(())
}

fn error_kind(err: &Error) -> &'static str {
    match err {
        Error::Core(_) => "core",
        Error::KeyStore(_) => "keystore",
        Error::Json(_) => "json",
        Error::Fork(_) => "fork",
        Error::Signal(_) => "signal",
        Error::Io(_) => "io",
        Error::DirtyExit(_) => "dirty_exit",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_envelope() {
        let raw = r#"{"args":[{"x":1}],"class":"Job","id":"abc","prefix":"app:","queue_time":1.0}"#;
        let env = parse_envelope(raw).unwrap();
        assert_eq!(env.class, "Job");
        assert_eq!(env.id.as_deref(), Some("abc"));
    }

    #[test]
    fn parses_envelope_missing_optional_fields() {
        let raw = r#"{"args":[null],"class":"Job","queue":"q1"}"#;
        let env = parse_envelope(raw).unwrap();
        assert_eq!(env.class, "Job");
        assert_eq!(env.id, None);
        assert_eq!(env.prefix, None);
        assert_eq!(env.queue_time, None);
    }
}
