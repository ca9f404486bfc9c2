use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};

use crate::supervisor::SupervisorConfig;

/// Command line and environment configuration of the daemon.
///
/// The three values without defaults must be present at startup, either as
/// flags or through their environment variables.
#[derive(Parser, Clone)]
#[command(name = "actionlog-daemon", version, about = "Durable action log writer")]
pub struct Cli {
    /// Store connection string, e.g. ws://127.0.0.1:8000 or surrealkv://.actionlog/db
    #[arg(long, env = "ACTIONLOG_DB_URL")]
    pub db_url: String,

    /// Authorization key of the external logging endpoint.
    #[arg(long, env = "ACTIONLOG_LOG_TOKEN", hide_env_values = true)]
    pub log_token: String,

    /// Drop actions whose taskId does not name an existing task.
    #[arg(
        long,
        env = "ACTIONLOG_FILTER_INVALID_TASKS",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub filter_invalid_tasks: bool,

    /// SurrealDB namespace.
    #[arg(long, env = "ACTIONLOG_NS", default_value = "actionlog")]
    pub ns: String,

    /// SurrealDB database.
    #[arg(long, env = "ACTIONLOG_DB", default_value = "main")]
    pub db: String,

    /// Where the HTTP API will listen.
    #[arg(long, env = "ACTIONLOG_LISTEN", default_value = "127.0.0.1:7780")]
    pub listen: SocketAddr,

    /// Delay before reconnecting after a failure, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    pub retry_delay_ms: u64,

    /// Timeout for a single store operation, in milliseconds. Unset waits forever.
    #[arg(long)]
    pub store_timeout_ms: Option<u64>,

    /// Interval of the connection health probe, in milliseconds.
    #[arg(long, default_value_t = 2_000)]
    pub health_interval_ms: u64,

    /// Log level (env-filter syntax).
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log: String,
}

impl Cli {
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            store_timeout: self.store_timeout_ms.map(Duration::from_millis),
            filter_invalid_tasks: self.filter_invalid_tasks,
        }
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }
}

impl fmt::Debug for Cli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cli")
            .field("db_url", &self.db_url)
            .field("log_token", &"<redacted>")
            .field("filter_invalid_tasks", &self.filter_invalid_tasks)
            .field("ns", &self.ns)
            .field("db", &self.db)
            .field("listen", &self.listen)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("store_timeout_ms", &self.store_timeout_ms)
            .field("health_interval_ms", &self.health_interval_ms)
            .field("log", &self.log)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 7] = [
        "actionlog-daemon",
        "--db-url",
        "mem://",
        "--log-token",
        "secret",
        "--filter-invalid-tasks",
        "yes",
    ];

    #[test]
    fn parses_required_values_and_defaults() {
        let cli = Cli::try_parse_from(REQUIRED).unwrap();
        assert_eq!(cli.db_url, "mem://");
        assert!(cli.filter_invalid_tasks);

        let cfg = cli.supervisor_config();
        assert_eq!(cfg.retry_delay, Duration::from_millis(5_000));
        assert_eq!(cfg.store_timeout, None);
    }

    #[test]
    fn missing_store_url_is_rejected() {
        let res = Cli::try_parse_from(["actionlog-daemon", "--log-token", "t", "--filter-invalid-tasks", "false"]);
        assert!(res.is_err());
    }

    #[test]
    fn debug_output_hides_log_token() {
        let cli = Cli::try_parse_from(REQUIRED).unwrap();
        let rendered = format!("{cli:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn store_timeout_is_optional() {
        let mut args = REQUIRED.to_vec();
        args.extend(["--store-timeout-ms", "250"]);
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(
            cli.supervisor_config().store_timeout,
            Some(Duration::from_millis(250))
        );
    }
}
