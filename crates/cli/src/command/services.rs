use crate::command::context::CommandContext;
use crate::command::domain::{CommandOutcome, QueryOverrides};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use similar_indexer::{CatalogWatcher, RebuildOutcome, RebuildWatcher};
use similar_search::{SearchEngine, SimilarQuery};
use similar_vector_store::ItemId;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Serialize)]
struct MarkStaleResponse {
    changed: bool,
    needs_rebuild: bool,
}

#[derive(Default)]
pub struct IndexService;

impl IndexService {
    pub async fn build(
        &self,
        trees: Option<usize>,
        ctx: &CommandContext,
    ) -> Result<CommandOutcome> {
        CommandContext::validate_trees(trees)?;
        let active = ctx.load_active().await;
        let scheduler = ctx.scheduler(active, ctx.tracker(), trees);
        match scheduler.rebuild_now("manual").await {
            RebuildOutcome::Published(report) => CommandOutcome::from_value(report),
            RebuildOutcome::Failed(err) => bail!("index build failed: {err}"),
            RebuildOutcome::AlreadyRunning => {
                bail!("another build is already running for this index directory")
            }
            other => bail!("index build did not run: {other:?}"),
        }
    }

    pub async fn status(&self, ctx: &CommandContext) -> Result<CommandOutcome> {
        let active = ctx.load_active().await;
        let status = ctx
            .scheduler(active, ctx.tracker(), None)
            .status()
            .await
            .context("failed to read staleness record")?;
        CommandOutcome::from_value(status)
    }

    pub async fn mark_stale(&self, ctx: &CommandContext) -> Result<CommandOutcome> {
        let tracker = ctx.tracker();
        let changed = tracker
            .mark_stale()
            .await
            .context("failed to update staleness record")?;
        CommandOutcome::from_value(MarkStaleResponse {
            changed,
            needs_rebuild: true,
        })
    }
}

#[derive(Default)]
pub struct QueryService;

impl QueryService {
    pub async fn query(
        &self,
        item: ItemId,
        overrides: QueryOverrides,
        ctx: &CommandContext,
    ) -> Result<CommandOutcome> {
        let query = resolve_query(ctx, overrides);
        let engine = ctx.engine(ctx.load_active().await);
        let result = engine.find_similar_scored(item, &query).await?;
        CommandOutcome::from_value(result)
    }
}

fn resolve_query(ctx: &CommandContext, overrides: QueryOverrides) -> SimilarQuery {
    let defaults = SimilarQuery::from(&ctx.config().search);
    SimilarQuery::new(
        overrides.k.unwrap_or(defaults.k),
        overrides.threshold.unwrap_or(defaults.threshold),
        overrides.min_results.unwrap_or(defaults.min_results),
    )
}

#[derive(Serialize)]
struct ServeError {
    error: String,
}

/// Long-running mode: keeps the index fresh and answers one item id per stdin
/// line with one JSON line on stdout. Returns at end of input.
pub async fn serve(ctx: &CommandContext) -> Result<()> {
    let config = ctx.config();
    let active = ctx.load_active().await;
    let tracker = ctx.tracker();
    let scheduler = Arc::new(ctx.scheduler(active.clone(), tracker.clone(), None));

    let _rebuilds = RebuildWatcher::start(scheduler, config.rebuild.interval())?;
    let _catalog_watch = if config.rebuild.watch_catalog {
        match CatalogWatcher::start(&config.rebuild.catalog_path, tracker) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                log::warn!("Catalog watching disabled: {err}");
                None
            }
        }
    } else {
        None
    };

    let engine = ctx.engine(active);
    let query = SimilarQuery::from(&config.search);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    log::info!("Serving similarity queries on stdin");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = answer(&engine, line, &query).await?;
        stdout.write_all(response.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    Ok(())
}

async fn answer(engine: &SearchEngine, line: &str, query: &SimilarQuery) -> Result<String> {
    let item = match line.parse::<i64>() {
        Ok(id) => ItemId(id),
        Err(err) => {
            return Ok(serde_json::to_string(&ServeError {
                error: format!("invalid item id {line:?}: {err}"),
            })?)
        }
    };
    match engine.find_similar_scored(item, query).await {
        Ok(result) => Ok(serde_json::to_string(&result)?),
        Err(err) => Ok(serde_json::to_string(&ServeError {
            error: err.to_string(),
        })?),
    }
}
