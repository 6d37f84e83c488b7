use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kubectl-arcane")]
#[command(author = "Arcane Maintainers")]
#[command(version)]
#[command(about = "Manage Arcane streams: start/stop, downtime windows and backfills", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// API server URL (defaults to a local `kubectl proxy`)
    #[arg(long, global = true, env = "KUBECTL_ARCANE_SERVER")]
    pub server: Option<String>,

    /// Bearer token for the API server
    #[arg(long, global = true, env = "KUBECTL_ARCANE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Read the bearer token from a file
    #[arg(long, global = true, conflicts_with = "token")]
    pub token_file: Option<PathBuf>,

    /// Namespace of the streams
    #[arg(short, long, global = true, env = "KUBECTL_ARCANE_NAMESPACE")]
    pub namespace: Option<String>,

    /// Give up after this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start, stop or backfill a single stream
    #[command(subcommand)]
    Stream(StreamCommand),

    /// Declare or lift a downtime window over many streams
    #[command(subcommand)]
    Downtime(DowntimeCommand),

    /// Inspect the effective configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Stream Commands
// ============================================================================

#[derive(Subcommand)]
pub enum StreamCommand {
    /// Resume a suspended stream
    Start {
        /// Stream class the stream belongs to
        stream_class: String,
        /// Name of the stream
        stream_id: String,
    },

    /// Suspend a running stream
    Stop {
        /// Stream class the stream belongs to
        stream_class: String,
        /// Name of the stream
        stream_id: String,
    },

    /// Request a backfill of a stream
    Backfill {
        /// Stream class the stream belongs to
        stream_class: String,
        /// Name of the stream
        stream_id: String,
        /// Wait until the backfill completes
        #[arg(long)]
        wait: bool,
        /// Validate the request on the server without creating it
        #[arg(long)]
        dry_run: bool,
    },
}

// ============================================================================
// Downtime Commands
// ============================================================================

#[derive(Subcommand)]
pub enum DowntimeCommand {
    /// Suspend running streams whose name starts with a prefix
    Declare {
        /// Stream class to scan
        stream_class: String,
        /// Stream name prefix
        prefix: String,
        /// Key identifying this downtime window
        key: String,
    },

    /// Resume the streams suspended under a downtime key
    Stop {
        /// Stream class to scan
        stream_class: String,
        /// Key identifying the downtime window
        key: String,
    },
}

// ============================================================================
// Config Commands
// ============================================================================

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the config file location
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_downtime_declare() {
        let cli = Cli::try_parse_from([
            "kubectl-arcane",
            "-n",
            "streams",
            "downtime",
            "declare",
            "arcane-stream-mock",
            "abc",
            "K1",
        ])
        .unwrap();

        assert_eq!(cli.namespace.as_deref(), Some("streams"));
        match cli.command {
            Command::Downtime(DowntimeCommand::Declare {
                stream_class,
                prefix,
                key,
            }) => {
                assert_eq!(stream_class, "arcane-stream-mock");
                assert_eq!(prefix, "abc");
                assert_eq!(key, "K1");
            }
            _ => panic!("expected downtime declare"),
        }
    }

    #[test]
    fn test_parse_backfill_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "kubectl-arcane",
            "stream",
            "backfill",
            "arcane-stream-mock",
            "abc-1",
            "--wait",
            "--timeout",
            "60",
        ])
        .unwrap();

        assert_eq!(cli.timeout, Some(60));
        assert!(matches!(
            cli.command,
            Command::Stream(StreamCommand::Backfill {
                wait: true,
                dry_run: false,
                ..
            })
        ));
    }

    #[test]
    fn test_token_conflicts_with_token_file() {
        let result = Cli::try_parse_from([
            "kubectl-arcane",
            "--token",
            "t",
            "--token-file",
            "/tmp/token",
            "config",
            "path",
        ]);
        assert!(result.is_err());
    }
}
