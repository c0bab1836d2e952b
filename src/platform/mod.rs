pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

use crate::voice::InlineAnswer;

/// An inline query received from any platform
#[derive(Debug, Clone)]
pub struct IncomingInlineQuery {
    /// Platform identifier (e.g., "telegram")
    pub platform: String,
    /// Platform-specific query ID, echoed back in the answer
    pub query_id: String,
    /// Platform-specific user ID
    pub user_id: u64,
    /// Username of the sender, when they have one
    pub user_name: Option<String>,
    /// Free text typed after the bot's mention; may be empty
    pub query: String,
}

/// An update drained by the dispatcher
#[derive(Debug, Clone)]
pub enum IncomingUpdate {
    InlineQuery(IncomingInlineQuery),
    /// Any other kind of update; ignored
    Other,
}

/// Submits answers to inline queries.
#[async_trait]
pub trait InlineAnswerer: Send + Sync {
    async fn answer_inline_query(&self, answer: InlineAnswer) -> Result<()>;
}
