// Command line and environment configuration
use crate::ntm_feed::{feed_url, BackoffPolicy};
use crate::ntm_health::LAGGING_THRESHOLD_SECS;
use crate::ntm_storage::FileStore;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// What happens to feed records whose coordinates or heading do not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InvalidRecordPolicy {
    /// Drop them without a trace
    Silent,
    /// Drop them and keep a running count
    Count,
    /// Drop them, count them and log each one
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Open the map window (default)
    Gui,
    /// Follow the feed in the terminal
    Watch,
}

#[derive(Debug, Parser)]
#[command(name = "ntm", version, about = "Live transit vehicle map for New Orleans")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Host serving the vehicle feed
    #[arg(long, env = "NTM_HOST", default_value = "localhost")]
    pub host: String,

    /// Port serving the vehicle feed
    #[arg(long, env = "NTM_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Use wss:// instead of ws://
    #[arg(long, env = "NTM_SECURE")]
    pub secure: bool,

    /// Route geometry GeoJSON (path or http(s) URL)
    #[arg(long, env = "NTM_ROUTES", default_value = "data/routes.json")]
    pub routes: String,

    /// File holding the saved route selection
    #[arg(long, env = "NTM_STORAGE")]
    pub storage: Option<PathBuf>,

    /// Seconds without a snapshot before the feed counts as lagging
    #[arg(long, env = "NTM_LAG_THRESHOLD", default_value_t = LAGGING_THRESHOLD_SECS, value_parser = clap::value_parser!(i64).range(0..))]
    pub lag_threshold: i64,

    #[arg(long, env = "NTM_INVALID_RECORDS", value_enum, default_value_t = InvalidRecordPolicy::Count)]
    pub invalid_records: InvalidRecordPolicy,

    /// First reconnect delay in milliseconds
    #[arg(long, env = "NTM_RETRY_BASE_MS", default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub retry_base_ms: u64,

    /// Longest reconnect delay in seconds
    #[arg(long, env = "NTM_RETRY_MAX_SECS", default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub retry_max_secs: u64,

    /// Failed attempts before giving up (0 = never give up)
    #[arg(long, env = "NTM_MAX_RETRIES", default_value_t = 10)]
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub feed_url: String,
    pub routes_source: String,
    pub storage_path: PathBuf,
    pub lag_threshold_secs: i64,
    pub invalid_records: InvalidRecordPolicy,
    pub backoff: BackoffPolicy,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Gui)
    }

    pub fn into_config(self) -> AppConfig {
        AppConfig {
            feed_url: feed_url(self.secure, &self.host, self.port),
            routes_source: self.routes,
            storage_path: self.storage.unwrap_or_else(FileStore::default_path),
            lag_threshold_secs: self.lag_threshold,
            invalid_records: self.invalid_records,
            backoff: BackoffPolicy {
                base: Duration::from_millis(self.retry_base_ms),
                max_delay: Duration::from_secs(self.retry_max_secs),
                max_attempts: self.max_retries,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_to_plain_websocket() {
        let cli = Cli::try_parse_from(["ntm"]).unwrap();
        assert_eq!(cli.command(), Command::Gui);
        let config = cli.into_config();
        assert!(config.feed_url.starts_with("ws://"));
        assert!(config.feed_url.ends_with("/ws"));
        assert_eq!(config.invalid_records, InvalidRecordPolicy::Count);
        assert_eq!(config.backoff.base, Duration::from_secs(1));
    }

    #[test]
    fn explicit_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "ntm",
            "--host",
            "transit.example.org",
            "--port",
            "443",
            "--secure",
            "--invalid-records",
            "log",
            "--max-retries",
            "0",
            "--storage",
            "/tmp/ntm.json",
            "watch",
        ])
        .unwrap();
        assert_eq!(cli.command(), Command::Watch);
        let config = cli.into_config();
        assert_eq!(config.feed_url, "wss://transit.example.org:443/ws");
        assert_eq!(config.invalid_records, InvalidRecordPolicy::Log);
        assert_eq!(config.backoff.max_attempts, 0);
        assert_eq!(config.storage_path, PathBuf::from("/tmp/ntm.json"));
    }

    #[test]
    fn rejects_zero_delays_and_negative_threshold() {
        assert!(Cli::try_parse_from(["ntm", "--retry-base-ms", "0"]).is_err());
        assert!(Cli::try_parse_from(["ntm", "--retry-max-secs", "0"]).is_err());
        assert!(Cli::try_parse_from(["ntm", "--lag-threshold=-1"]).is_err());

        let cli = Cli::try_parse_from(["ntm", "--lag-threshold", "0", "--retry-base-ms", "1"]).unwrap();
        assert_eq!(cli.lag_threshold, 0);
        assert_eq!(cli.into_config().backoff.base, Duration::from_millis(1));
    }
}
