use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use similar_vector_store::ItemId;

#[derive(Debug, Clone, PartialEq)]
pub enum CommandAction {
    Build {
        trees: Option<usize>,
    },
    Status,
    MarkStale,
    Query {
        item: ItemId,
        overrides: QueryOverrides,
    },
}

/// Per-invocation replacements for the `[search]` defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueryOverrides {
    pub k: Option<usize>,
    pub threshold: Option<f32>,
    pub min_results: Option<usize>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Ok,
    Error,
}

#[derive(Debug, Serialize, Default, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub status: CommandStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub meta: ResponseMeta,
}

impl CommandResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Error,
            message: Some(message.into()),
            data: Value::Null,
            meta: ResponseMeta::default(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.status, CommandStatus::Error)
    }
}

pub struct CommandOutcome {
    pub data: Value,
}

impl CommandOutcome {
    pub fn from_value<T: Serialize>(value: T) -> Result<Self> {
        Ok(Self {
            data: serde_json::to_value(value)?,
        })
    }
}
