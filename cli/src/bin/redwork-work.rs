use std::sync::Arc;
use std::time::Duration;

use redwork_cli::ConnectionArgs;
use redwork_core::{EventBus, KeyStorePool, RedisFailureSink, RegistryJobFactory};
use redwork_worker::{Context, Worker, WorkerConfig};
use structopt::StructOpt;

/// Set by a supervisor-spawned child so it knows not to spawn its own
/// siblings in turn.
const CHILD_ENV: &str = "REDWORK_WORK_CHILD";

#[derive(Debug, StructOpt)]
#[structopt(about = "Run a worker loop against one or more queues")]
struct Args {
    #[structopt(flatten)]
    connection: ConnectionArgs,

    /// Queue names to reserve jobs from, in priority order.
    #[structopt(long, env = "REDWORK_QUEUES", default_value = "default", use_delimiter = true)]
    queue: Vec<String>,

    /// Use `BLPOP` to wait for work instead of polling.
    #[structopt(long, env = "REDWORK_BLOCKING")]
    blocking: bool,

    /// Seconds between reservation attempts (or the `BLPOP` timeout).
    #[structopt(long, env = "REDWORK_INTERVAL", default_value = "5")]
    interval: f64,

    /// Number of worker processes to run. Values above 1 spawn that many
    /// sibling OS processes (each re-exec'ing this same binary) and wait
    /// on all of them, rather than forking worker processes from within a
    /// single Tokio runtime.
    #[structopt(long, env = "REDWORK_COUNT", default_value = "1")]
    count: u32,
}

fn main() -> Result<(), redwork_worker::Error> {
    dotenv::dotenv().ok();
    let args = Args::from_args();
    redwork_cli::tracing_config::configure("redwork-work");

    if args.count > 1 && std::env::var(CHILD_ENV).is_err() {
        return run_supervisor(args);
    }

    run_worker(args)
}

fn run_worker(args: Args) -> Result<(), redwork_worker::Error> {
    let pool = KeyStorePool::from_url(&args.connection.redis_url)?;

    let events = EventBus::new();
    let failures = Arc::new(RedisFailureSink::new(
        pool.clone(),
        args.connection.prefix.clone(),
    ));
    let factory = Arc::new(RegistryJobFactory::new());

    let ctx = Context::new(pool, args.connection.prefix, events, failures, factory);

    let worker = Worker::new(
        ctx,
        WorkerConfig {
            queues: args.queue,
            blocking: args.blocking,
            poll_interval: Duration::from_secs_f64(args.interval),
            reap_interval: Duration::from_secs(60),
            iterations: None,
        },
    );

    tracing::info!(worker_id = worker.id(), "starting worker");
    worker.work()
}

/// Spawns `count` sibling worker processes and waits for all of them,
/// matching Resque's `rake resque:workers COUNT=n` process-per-worker
/// parallelism model rather than introducing a second, in-process fork
/// path alongside the already-forking per-job model.
fn run_supervisor(args: Args) -> Result<(), redwork_worker::Error> {
    let exe = std::env::current_exe()?;
    let mut children = Vec::with_capacity(args.count as usize);

    for n in 0..args.count {
        let mut command = std::process::Command::new(&exe);
        command
            .env(CHILD_ENV, "1")
            .env("REDWORK_COUNT", "1")
            .env("REDIS_URL", &args.connection.redis_url)
            .env("REDWORK_PREFIX", &args.connection.prefix)
            .env("REDWORK_QUEUES", args.queue.join(","))
            .env("REDWORK_INTERVAL", args.interval.to_string())
            .env("REDWORK_BLOCKING", args.blocking.to_string());

        tracing::info!(worker_index = n, "spawning sibling worker process");
        children.push(command.spawn()?);
    }

    let mut last_error = None;
    for mut child in children {
        match child.wait() {
            Ok(status) if !status.success() => {
                last_error = Some(redwork_worker::Error::DirtyExit(status.code()));
            }
            Ok(_) => {}
            Err(e) => last_error = Some(redwork_worker::Error::Io(e)),
        }
    }

    match last_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
