mod common;
mod history;
mod publish;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::Result;

#[derive(Debug, Parser)]
#[command(version = crate::version::VERSION, about)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding run locks and run history. Defaults to `~/.local/state/release-publisher`.
    #[arg(long = "state-dir", global = true)]
    state_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build the image and push it under the version tag and a timestamp tag
    Publish(publish::PublishArgs),

    /// Show the retained runs
    History(history::HistoryArgs),
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let state_dir = common::state_dir(self.state_dir)?;
        match self.command {
            Commands::Publish(args) => {
                publish::publish(&state_dir, args)?;
            }
            Commands::History(args) => {
                history::history(&state_dir, args)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn publish_defaults_match_pipeline() {
        let cli = Cli::try_parse_from(["release-publisher", "publish"]).unwrap();
        let Commands::Publish(args) = cli.command else {
            panic!("expected the publish command");
        };
        let config = args.config(None);
        assert_eq!(config.repository, "eeacms/citus-manager");
        assert_eq!(config.tag, "1.0");
        assert_eq!(config.registry, "https://index.docker.io/v1/");
        assert_eq!(config.credentials_id, "eeajenkins");
        assert_eq!(config.context, PathBuf::from("."));
        assert_eq!(args.timeout_minutes, 60);
        assert_eq!(args.docker, "docker");
        assert!(!args.wait);
    }

    #[test]
    fn rejects_invalid_tag() {
        assert!(Cli::try_parse_from(["release-publisher", "publish", "--tag", "not valid"]).is_err());
        assert!(Cli::try_parse_from(["release-publisher", "publish", "--timeout-minutes", "0"]).is_err());
    }
}
