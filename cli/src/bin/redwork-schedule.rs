use std::time::Duration;

use redwork_cli::ConnectionArgs;
use redwork_core::{DelayedScheduler, EventBus, KeyStorePool, QueueEngine};
use graceful_shutdown::GracefulShutdown;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(about = "Promote delayed jobs whose scheduled time has arrived")]
struct Args {
    #[structopt(flatten)]
    connection: ConnectionArgs,

    /// Seconds between promotion passes.
    #[structopt(long, env = "REDWORK_INTERVAL", default_value = "5")]
    interval: f64,
}

#[tokio::main]
async fn main() -> Result<(), redwork_core::Error> {
    dotenv::dotenv().ok();
    let args = Args::from_args();
    redwork_cli::tracing_config::configure("redwork-schedule");

    let pool = KeyStorePool::from_url(&args.connection.redis_url)?;
    let events = EventBus::new();
    let scheduler = DelayedScheduler::new(pool.clone(), args.connection.prefix.clone(), events.clone());
    let queues = QueueEngine::new(pool, args.connection.prefix, events);

    let interval = Duration::from_secs_f64(args.interval);
    tracing::info!(interval_secs = args.interval, "starting delayed-job scheduler");

    let shutdown = GracefulShutdown::new();
    let mut shutting_down = shutdown.consumer();

    loop {
        if shutting_down.shutting_down() {
            break;
        }

        match scheduler.promote_ready(&queues).await {
            Ok(promoted) if promoted > 0 => {
                tracing::info!(promoted, "promoted delayed jobs");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "promotion pass failed");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutting_down.wait_for_shutdown() => break,
        }
    }

    tracing::info!("shutdown signal received, exiting promotion loop");
    Ok(())
}
