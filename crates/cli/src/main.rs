mod command;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use command::{CommandAction, CommandHandler, CommandResponse, QueryOverrides};
use similar_vector_store::{ItemId, SimilarConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "similar", version, about = "Maintain and query the item similarity index")]
struct Cli {
    /// Configuration file (defaults to ./similar.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at info level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild the index from the catalog now and publish it
    Build {
        /// Number of trees in the forest (overrides index.trees)
        #[arg(long)]
        trees: Option<usize>,
    },
    /// Show the staleness record and the persisted generation
    Status,
    /// Flag the index for rebuild on the next scheduled check
    MarkStale,
    /// Find items similar to ITEM
    Query {
        #[arg(allow_negative_numbers = true)]
        item: i64,
        #[arg(long)]
        k: Option<usize>,
        #[arg(long)]
        threshold: Option<f32>,
        #[arg(long)]
        min_results: Option<usize>,
    },
    /// Answer item ids read from stdin while rebuilding in the background
    Serve,
}

impl Command {
    fn into_action(self) -> Option<CommandAction> {
        Some(match self {
            Self::Build { trees } => CommandAction::Build { trees },
            Self::Status => CommandAction::Status,
            Self::MarkStale => CommandAction::MarkStale,
            Self::Query {
                item,
                k,
                threshold,
                min_results,
            } => CommandAction::Query {
                item: ItemId(item),
                overrides: QueryOverrides {
                    k,
                    threshold,
                    min_results,
                },
            },
            Self::Serve => return None,
        })
    }
}

fn init_logging(verbose: bool) {
    // stdout carries JSON output
    let default_filter = if verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = SimilarConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let handler = CommandHandler::new(config);

    let Some(action) = cli.command.into_action() else {
        return handler.serve().await;
    };

    let response = match handler.execute(action).await {
        Ok(response) => response,
        Err(err) => {
            log::error!("{err:#}");
            CommandResponse::error(format!("{err:#}"))
        }
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    if response.is_error() {
        std::process::exit(1);
    }
    Ok(())
}
