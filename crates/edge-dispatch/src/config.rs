use anyhow::bail;
use clap::{Args, ValueEnum};
use core::time::Duration;
use edge_dispatch_core::ErrorTranslator;

/// Console log rendering used by [`init_telemetry`](crate::telemetry::init_telemetry).
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human-oriented output.
    #[default]
    Pretty,
    /// Single-line output.
    Compact,
    /// One JSON object per event.
    Json,
}

/// Command-line and environment settings for the job dispatcher.
///
/// Meant to be flattened into the host process's own `clap` parser:
///
/// ```rust
/// use clap::Parser;
/// use edge_dispatch::config::{DispatcherArgs, DispatcherConfig};
///
/// #[derive(Parser)]
/// struct Cli {
///     #[command(flatten)]
///     dispatcher: DispatcherArgs,
/// }
///
/// let cli = Cli::parse_from(["api", "--max-workers", "4"]);
/// let config = DispatcherConfig::try_from(cli.dispatcher).unwrap();
/// assert_eq!(config.max_workers, 4);
/// ```
#[derive(Args, Debug, Clone)]
pub struct DispatcherArgs {
    /// Number of workers, and therefore the maximum number of jobs executing
    /// against the backend at once.
    ///
    /// Each worker holds its own backend connection.
    ///
    /// Environment variable: `MAX_WORKERS`
    #[arg(long, env = "MAX_WORKERS", default_value_t = 10)]
    pub max_workers: usize,

    /// Capacity of the job queue.
    ///
    /// Producers submitting beyond this many queued jobs wait for room
    /// (backpressure) or, when submitting without waiting, are refused with
    /// `429 Too Many Requests`.
    ///
    /// Environment variable: `MAX_JOBS`
    #[arg(long, env = "MAX_JOBS", default_value_t = 100)]
    pub max_jobs: usize,

    /// Address of the inventory gRPC service workers connect to.
    ///
    /// Environment variable: `INVENTORY_ADDR`
    #[arg(long, env = "INVENTORY_ADDR", default_value_t = String::from("http://127.0.0.1:50051"))]
    pub inventory_addr: String,

    /// Timeout for establishing each backend connection, in seconds.
    ///
    /// Environment variable: `INVENTORY_CONNECT_TIMEOUT_SECS`
    #[arg(long, env = "INVENTORY_CONNECT_TIMEOUT_SECS", default_value_t = 5)]
    pub connect_timeout_secs: u64,

    /// Interval, in seconds, at which shutdown logs a warning while workers
    /// are still finishing their current jobs.
    ///
    /// Shutdown always waits for every worker; this only controls how often
    /// the wait is reported.
    ///
    /// Environment variable: `SHUTDOWN_WARN_SECS`
    #[arg(long, env = "SHUTDOWN_WARN_SECS", default_value_t = 30)]
    pub shutdown_warn_secs: u64,

    /// Console log format.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Validated dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_workers: usize,
    pub max_jobs: usize,
    pub inventory_addr: String,
    pub connect_timeout: Duration,
    pub shutdown_warn_interval: Duration,
    pub log_format: LogFormat,
    pub translator: ErrorTranslator,
}

impl DispatcherConfig {
    /// Configuration with the given capacities and defaults for everything
    /// else.
    ///
    /// Zero capacities are raised to one; use [`TryFrom<DispatcherArgs>`] to
    /// reject them instead.
    #[must_use]
    pub fn new(max_workers: usize, max_jobs: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            max_jobs: max_jobs.max(1),
            inventory_addr: String::from("http://127.0.0.1:50051"),
            connect_timeout: Duration::from_secs(5),
            shutdown_warn_interval: Duration::from_secs(30),
            log_format: LogFormat::Pretty,
            translator: ErrorTranslator::DEFAULT,
        }
    }

    #[must_use]
    pub fn with_inventory_addr(mut self, addr: impl Into<String>) -> Self {
        self.inventory_addr = addr.into();
        self
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_shutdown_warn_interval(mut self, interval: Duration) -> Self {
        self.shutdown_warn_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_translator(mut self, translator: ErrorTranslator) -> Self {
        self.translator = translator;
        self
    }
}

impl TryFrom<DispatcherArgs> for DispatcherConfig {
    type Error = anyhow::Error;

    fn try_from(args: DispatcherArgs) -> Result<Self, Self::Error> {
        if args.max_workers == 0 {
            bail!("MAX_WORKERS must be greater than 0");
        }

        if args.max_jobs == 0 {
            bail!("MAX_JOBS must be greater than 0");
        }

        if args.inventory_addr.trim().is_empty() {
            bail!("INVENTORY_ADDR must not be empty");
        }

        Ok(Self {
            max_workers: args.max_workers,
            max_jobs: args.max_jobs,
            inventory_addr: args.inventory_addr,
            connect_timeout: Duration::from_secs(args.connect_timeout_secs),
            shutdown_warn_interval: Duration::from_secs(args.shutdown_warn_secs),
            log_format: args.log_format,
            translator: ErrorTranslator::DEFAULT,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct Cli {
        #[command(flatten)]
        dispatcher: DispatcherArgs,
    }

    fn parse(args: &[&str]) -> anyhow::Result<DispatcherConfig> {
        let cli = Cli::try_parse_from(core::iter::once("api").chain(args.iter().copied()))?;
        DispatcherConfig::try_from(cli.dispatcher)
    }

    #[test]
    fn parses_flags() {
        let config = parse(&[
            "--max-workers",
            "2",
            "--max-jobs",
            "10",
            "--inventory-addr",
            "http://inventory:50051",
            "--shutdown-warn-secs",
            "3",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.max_jobs, 10);
        assert_eq!(config.inventory_addr, "http://inventory:50051");
        assert_eq!(config.shutdown_warn_interval, Duration::from_secs(3));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn rejects_zero_capacities() {
        let err = parse(&["--max-workers", "0"]).unwrap_err();
        assert_eq!(err.to_string(), "MAX_WORKERS must be greater than 0");

        let err = parse(&["--max-jobs", "0"]).unwrap_err();
        assert_eq!(err.to_string(), "MAX_JOBS must be greater than 0");
    }

    #[test]
    fn rejects_blank_inventory_address() {
        assert!(parse(&["--inventory-addr", "  "]).is_err());
    }

    #[test]
    fn programmatic_config_never_has_zero_capacity() {
        let config = DispatcherConfig::new(0, 0);
        assert_eq!(config.max_workers, 1);
        assert_eq!(config.max_jobs, 1);
    }
}
