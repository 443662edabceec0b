//! bridgeindex: cross-chain bridge event indexer.
//!
//! # Commands
//! ```
//! bridgeindex --config config.yaml run [--backfill 100:200 ...]
//! bridgeindex --config config.yaml backfill --range 100:200 [--range 300:400]
//! bridgeindex --config config.yaml cursor get    <key>
//! bridgeindex --config config.yaml cursor set    <key> <position>
//! bridgeindex --config config.yaml cursor remove <key>
//! ```

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};

use bridgeindex_core::logging::init_tracing;
use bridgeindex_core::{BlockRange, CursorStore};

mod app;
mod config;

use app::App;
use config::ServiceConfig;

#[derive(Parser)]
#[command(
    name = "bridgeindex",
    about = "Cross-chain bridge event indexer",
    long_about = "
Scans the core chain and every configured destination chain for bridge
events, queues them, and folds them into transfer records in Postgres.

ENVIRONMENT VARIABLES:
  RUST_LOG    Overrides the configured log filter
",
    version
)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every producer and indexer until interrupted
    Run {
        /// Core-chain ranges to publish once before starting, as START:END
        #[arg(long, value_parser = parse_range)]
        backfill: Vec<BlockRange>,
    },

    /// Publish historical core-chain ranges and exit
    Backfill {
        /// Inclusive range START:END, repeatable
        #[arg(long = "range", value_parser = parse_range, required = true)]
        ranges: Vec<BlockRange>,
    },

    /// Inspect or edit producer cursors
    Cursor {
        #[command(subcommand)]
        action: CursorAction,
    },
}

#[derive(Subcommand)]
enum CursorAction {
    /// Print the stored position
    Get { key: String },
    /// Overwrite the stored position
    Set { key: String, position: String },
    /// Delete the cursor so it is re-seeded on next start
    Remove { key: String },
}

fn parse_range(s: &str) -> Result<BlockRange, String> {
    let (start, end) = s.split_once(':').ok_or_else(|| format!("expected START:END, got {s:?}"))?;
    let start: i64 = start.trim().parse().map_err(|e| format!("bad start {start:?}: {e}"))?;
    let end: i64 = end.trim().parse().map_err(|e| format!("bad end {end:?}: {e}"))?;
    if start > end {
        return Err(format!("range start {start} is after end {end}"));
    }
    Ok(BlockRange { start, end })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ServiceConfig::load(&cli.config)?;
    init_tracing(&config.log);

    let app = App::connect(config).await?;
    match cli.command {
        Commands::Run { backfill } => app.run(&backfill).await,

        Commands::Backfill { ranges } => {
            app.backfill(&ranges).await?;
            println!("published {} range(s)", ranges.len());
            Ok(())
        }

        Commands::Cursor { action } => match action {
            CursorAction::Get { key } => {
                let position = app
                    .cursors()
                    .get(&key)
                    .await?
                    .ok_or_else(|| anyhow!("cursor {key:?} not found"))?;
                println!("{position}");
                Ok(())
            }
            CursorAction::Set { key, position } => {
                app.cursors().set(&key, &position).await?;
                println!("{key} = {position}");
                Ok(())
            }
            CursorAction::Remove { key } => {
                app.cursors().remove(&key).await?;
                println!("removed {key}");
                Ok(())
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn ranges() {
        assert_eq!(parse_range("100:200").unwrap(), BlockRange { start: 100, end: 200 });
        assert_eq!(parse_range(" 5 : 5 ").unwrap(), BlockRange { start: 5, end: 5 });
        assert!(parse_range("200:100").is_err());
        assert!(parse_range("100").is_err());
        assert!(parse_range("a:1").is_err());
    }

    #[test]
    fn backfill_collects_repeated_ranges() {
        let cli = Cli::try_parse_from(["bridgeindex", "backfill", "--range", "1:10", "--range", "20:30"]).unwrap();
        match cli.command {
            Commands::Backfill { ranges } => {
                assert_eq!(ranges, vec![BlockRange { start: 1, end: 10 }, BlockRange { start: 20, end: 30 }]);
            }
            _ => panic!("expected backfill"),
        }
        assert_eq!(cli.config, PathBuf::from("config.yaml"));
    }

    #[test]
    fn cursor_set_parses() {
        let cli = Cli::try_parse_from(["bridgeindex", "-c", "prod.yaml", "cursor", "set", "evm_Goerli_erc20", "42"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("prod.yaml"));
        assert!(matches!(
            cli.command,
            Commands::Cursor { action: CursorAction::Set { ref key, ref position } } if key == "evm_Goerli_erc20" && position == "42"
        ));
    }
}
