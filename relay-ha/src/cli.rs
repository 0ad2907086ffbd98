use std::io::{self, BufRead, Write};

use clap::{Parser, Subcommand};

/// relay-ha - high availability and disaster recovery for the content relay
#[derive(Parser, Debug)]
#[command(name = "relay-ha")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Environment file loaded before reading configuration
    #[arg(long, env = "RELAY_HA_ENV_FILE", default_value = ".env", global = true)]
    pub env_file: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the monitoring service until interrupted
    Run,

    /// Print the combined status of every component
    Status,

    /// Run one health tick and a permission sync
    HealthCheck,

    /// Create a recovery package
    CreateBackup {
        /// Also write the package into the working directory
        #[arg(long)]
        save: bool,
    },

    /// Replay a recovery package
    RestoreBackup {
        /// Package id or path to a package file
        package: String,

        /// Skip the interactive confirmation
        #[arg(long)]
        confirm: bool,
    },

    /// Switch to the next healthy backup credential
    Failover {
        /// Skip the interactive confirmation
        #[arg(long)]
        confirm: bool,
    },

    /// Verify channel permissions for every credential
    SyncPermissions,

    /// Show recent failovers, health issues and notifications
    Events {
        /// Window size in hours
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },

    /// Show availability and failover statistics
    Metrics,
}

/// Ask on stderr and accept only an exact `yes`.
pub fn confirm(question: &str) -> io::Result<bool> {
    let mut stderr = io::stderr();
    write!(stderr, "{question} Type 'yes' to continue: ")?;
    stderr.flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim() == "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_restore() {
        let cli = Cli::parse_from(["relay-ha", "-vv", "restore-backup", "recovery_20250601_120000", "--confirm"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::RestoreBackup { package, confirm } => {
                assert_eq!(package, "recovery_20250601_120000");
                assert!(confirm);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_events_default_window() {
        let cli = Cli::parse_from(["relay-ha", "events"]);
        assert!(matches!(cli.command, Commands::Events { hours: 24 }));
    }
}
