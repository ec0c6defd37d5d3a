mod context;
pub mod domain;
mod services;

pub use domain::{CommandAction, CommandResponse, QueryOverrides};

use anyhow::Result;
use context::CommandContext;
use domain::{CommandOutcome, CommandStatus, ResponseMeta};
use services::{IndexService, QueryService};
use similar_vector_store::SimilarConfig;
use std::time::Instant;

pub struct CommandHandler {
    ctx: CommandContext,
    index: IndexService,
    query: QueryService,
}

impl CommandHandler {
    pub fn new(config: SimilarConfig) -> Self {
        Self {
            ctx: CommandContext::new(config),
            index: IndexService,
            query: QueryService,
        }
    }

    pub async fn execute(&self, action: CommandAction) -> Result<CommandResponse> {
        let started = Instant::now();
        let outcome: CommandOutcome = match action {
            CommandAction::Build { trees } => self.index.build(trees, &self.ctx).await?,
            CommandAction::Status => self.index.status(&self.ctx).await?,
            CommandAction::MarkStale => self.index.mark_stale(&self.ctx).await?,
            CommandAction::Query { item, overrides } => {
                self.query.query(item, overrides, &self.ctx).await?
            }
        };

        Ok(CommandResponse {
            status: CommandStatus::Ok,
            message: None,
            data: outcome.data,
            meta: ResponseMeta {
                duration_ms: Some(started.elapsed().as_millis() as u64),
            },
        })
    }

    pub async fn serve(&self) -> Result<()> {
        services::serve(&self.ctx).await
    }
}
