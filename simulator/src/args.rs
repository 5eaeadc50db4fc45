use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Deterministic connector-pool simulator")]
pub(crate) struct Args {
    #[arg(long, value_parser = humantime::parse_duration)]
    pub(crate) duration: Option<Duration>,
    #[arg(long)]
    pub(crate) iterations: Option<u64>,
    #[arg(long)]
    pub(crate) seed: Option<u64>,
    /// Connections allowed per partition
    #[arg(long, default_value_t = 4)]
    pub(crate) pool_size: usize,
    #[arg(long, default_value_t = 0)]
    pub(crate) min_size: usize,
    #[arg(long, default_value_t = 3)]
    pub(crate) partitions: usize,
    #[arg(long, default_value_t = 16)]
    pub(crate) tasks: usize,
    #[arg(long, value_parser = humantime::parse_duration, default_value = "2ms")]
    pub(crate) idle_timeout: Duration,
    #[arg(long)]
    pub(crate) validate_on_match: bool,
    #[arg(long, default_value_t = 0.02)]
    pub(crate) break_rate: f64,
    #[arg(long, default_value_t = 0.01)]
    pub(crate) abandon_rate: f64,
    #[arg(long, default_value_t = 0.01)]
    pub(crate) create_failure_rate: f64,
    #[arg(long, default_value_t = 0.02)]
    pub(crate) evict_rate: f64,
    #[arg(long, default_value_t = 0.005)]
    pub(crate) statistics_rate: f64,
    #[arg(long, default_value_t = 0.05)]
    pub(crate) sleep_rate: f64,
    #[arg(long)]
    pub(crate) log: Option<PathBuf>,
    #[arg(long)]
    pub(crate) quick: bool,
    #[arg(long)]
    pub(crate) stress: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SimConfig {
    pub(crate) duration_ms: Option<u64>,
    pub(crate) iterations: Option<u64>,
    pub(crate) seed: u64,
    pub(crate) pool_size: usize,
    pub(crate) min_size: usize,
    pub(crate) partitions: usize,
    pub(crate) tasks: usize,
    pub(crate) idle_timeout_ms: u64,
    pub(crate) validate_on_match: bool,
    pub(crate) break_rate: f64,
    pub(crate) abandon_rate: f64,
    pub(crate) create_failure_rate: f64,
    pub(crate) evict_rate: f64,
    pub(crate) statistics_rate: f64,
    pub(crate) sleep_rate: f64,
    pub(crate) log: Option<PathBuf>,
    pub(crate) preset: Option<String>,
    pub(crate) first_steps: usize,
    pub(crate) tail_steps: usize,
}

impl SimConfig {
    pub(crate) fn from_args(args: Args) -> Self {
        let pool_size = args.pool_size.max(1);
        let mut config = SimConfig {
            duration_ms: args.duration.map(millis),
            iterations: args.iterations,
            seed: args.seed.unwrap_or_else(random_seed),
            pool_size,
            min_size: args.min_size.min(pool_size),
            partitions: args.partitions.max(1),
            tasks: args.tasks.max(1),
            idle_timeout_ms: millis(args.idle_timeout),
            validate_on_match: args.validate_on_match,
            break_rate: clamp_rate(args.break_rate),
            abandon_rate: clamp_rate(args.abandon_rate),
            create_failure_rate: clamp_rate(args.create_failure_rate),
            evict_rate: clamp_rate(args.evict_rate),
            statistics_rate: clamp_rate(args.statistics_rate),
            sleep_rate: clamp_rate(args.sleep_rate),
            log: args.log,
            preset: None,
            first_steps: 30,
            tail_steps: 80,
        };

        if args.quick {
            config.apply_quick();
        }
        if args.stress {
            config.apply_stress();
        }

        config
    }

    fn apply_quick(&mut self) {
        self.preset = Some("quick".to_string());
        self.iterations = Some(10_000);
        self.duration_ms = None;
        self.pool_size = 2;
        self.min_size = 0;
        self.partitions = 2;
        self.tasks = 4;
        self.break_rate = 0.02;
        self.abandon_rate = 0.01;
        self.create_failure_rate = 0.01;
        self.evict_rate = 0.02;
    }

    fn apply_stress(&mut self) {
        self.preset = Some("stress".to_string());
        self.iterations = Some(250_000);
        self.duration_ms = None;
        self.pool_size = 8;
        self.min_size = 1;
        self.partitions = 12;
        self.tasks = 64;
        self.validate_on_match = true;
        self.break_rate = 0.05;
        self.abandon_rate = 0.03;
        self.create_failure_rate = 0.03;
        self.evict_rate = 0.05;
        self.statistics_rate = 0.01;
    }
}

fn clamp_rate(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn random_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    now.as_secs() ^ u64::from(now.subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_rate_limits_bounds() {
        assert_eq!(clamp_rate(-1.0), 0.0);
        assert_eq!(clamp_rate(2.0), 1.0);
        assert_eq!(clamp_rate(0.5), 0.5);
        assert_eq!(clamp_rate(f64::NAN), 0.0);
    }

    #[test]
    fn millis_saturates_instead_of_truncating() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn min_size_never_exceeds_pool_size() {
        let args = Args::parse_from(["simulator", "--pool-size", "2", "--min-size", "5"]);
        let config = SimConfig::from_args(args);
        assert_eq!(config.min_size, 2);
    }
}
