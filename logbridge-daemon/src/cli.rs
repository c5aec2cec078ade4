//! CLI argument definitions for logbridge-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Logbridge log streaming daemon.
///
/// Polls cloud log providers, normalizes and persists entries, evaluates
/// alert rules, and fans results out to WebSocket subscribers.
#[derive(Parser, Debug)]
#[command(name = "logbridge-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to logbridge.toml configuration file.
    #[arg(short, long, default_value = "/etc/logbridge/logbridge.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path (takes precedence over config file).
    #[arg(long)]
    pub pid_file: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_etc() {
        let cli = DaemonCli::parse_from(["logbridge-daemon"]);
        assert_eq!(
            cli.config,
            PathBuf::from("/etc/logbridge/logbridge.toml")
        );
        assert!(!cli.validate);
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let cli = DaemonCli::parse_from([
            "logbridge-daemon",
            "--config",
            "/tmp/lb.toml",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--validate",
        ]);
        assert_eq!(cli.config, PathBuf::from("/tmp/lb.toml"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.log_format.as_deref(), Some("pretty"));
        assert!(cli.validate);
    }
}
