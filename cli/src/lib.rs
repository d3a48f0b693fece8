pub mod tracing_config;

use std::time::Duration;

use structopt::StructOpt;

/// Common arguments shared by every binary in this crate: where Redis lives
/// and what key prefix to operate under.
#[derive(Debug, StructOpt)]
pub struct ConnectionArgs {
    #[structopt(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    #[structopt(long, env = "REDWORK_PREFIX", default_value = "redwork:")]
    pub prefix: String,
}

pub fn parse_duration_secs(raw: &str) -> Result<Duration, std::num::ParseFloatError> {
    raw.parse::<f64>().map(Duration::from_secs_f64)
}
