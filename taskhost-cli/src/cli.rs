//! CLI argument parsing definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (default: ~/.taskhost.yaml)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the safety checks of every configured task type
    Check,

    /// Run a single invocation and print its reply
    Invoke {
        /// Task type to run
        #[arg(long, value_name = "NAME")]
        task: String,

        /// Payload sent to the worker
        #[arg(
            long,
            value_name = "TEXT",
            conflicts_with = "payload_file",
            required_unless_present = "payload_file"
        )]
        payload: Option<String>,

        /// Read the payload from a file
        #[arg(long, value_name = "PATH")]
        payload_file: Option<PathBuf>,
    },

    /// Serve JSON request lines from stdin, writing reply lines to stdout
    Serve,

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print or write a sample configuration file
    Sample {
        /// Output file path (stdout when omitted)
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoke_requires_one_payload_source() {
        let cli = Cli::try_parse_from(["taskhost", "invoke", "--task", "t", "--payload", "x"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Invoke { payload: Some(ref p), payload_file: None, .. } if p == "x"
        ));

        assert!(Cli::try_parse_from(["taskhost", "invoke", "--task", "t"]).is_err());
        assert!(Cli::try_parse_from([
            "taskhost",
            "invoke",
            "--task",
            "t",
            "--payload",
            "x",
            "--payload-file",
            "in.txt",
        ])
        .is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["taskhost", "serve", "--config", "/etc/taskhost.json", "--log-level", "debug"])
                .unwrap();
        assert!(matches!(cli.command, Commands::Serve));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/taskhost.json")));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }
}
