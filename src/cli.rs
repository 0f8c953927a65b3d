use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Herd Alerter: real-time herd behavior detection for product views
#[derive(Parser)]
#[command(name = "herd-alerter", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the alerter server (default)
    Serve {
        /// Port to bind (overrides HERD_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Replay a newline-delimited JSON event file and print alerts
    Replay {
        /// Path to the event file
        file: PathBuf,
        /// Detection strategy: heuristic, zscore or both
        #[arg(long)]
        strategy: Option<String>,
    },

    /// Validate configuration from the environment and exit
    CheckConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_replay() {
        let cli = Cli::parse_from(["herd-alerter", "replay", "events.ndjson", "--strategy", "zscore"]);
        match cli.command {
            Some(Commands::Replay { file, strategy }) => {
                assert_eq!(file, PathBuf::from("events.ndjson"));
                assert_eq!(strategy.as_deref(), Some("zscore"));
            }
            _ => panic!("expected replay"),
        }
    }

    #[test]
    fn test_no_subcommand_means_serve() {
        let cli = Cli::parse_from(["herd-alerter"]);
        assert!(cli.command.is_none());
    }
}
