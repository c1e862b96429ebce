//! The narrow view of the messaging platform the aggregation engine consumes.
//!
//! [`MessagePlatform`] is transport-agnostic; `crate::discord::DiscordClient`
//! implements it over the Discord REST API and tests use an in-memory fake.

use anyhow::Result;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildSummary {
    pub id: String,
    pub name: String,
    pub member_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Any channel whose history can be paged directly.
    Text,
    /// Holds posts (threads) but no messages of its own.
    Forum,
    Thread,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,
    pub parent_id: Option<String>,
}

/// Per-message facts read during a scan; nothing else about a message is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFact {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub author_id: String,
    pub is_bot: bool,
}

pub trait MessagePlatform {
    /// Guild identity and current member count.
    fn guild_summary(&self, guild_id: &str) -> Result<GuildSummary>;

    /// Every channel of the guild, fetched fresh.
    fn guild_channels(&self, guild_id: &str) -> Result<Vec<ChannelInfo>>;

    /// Active threads across the whole guild, each carrying its parent id.
    fn active_threads(&self, guild_id: &str) -> Result<Vec<ChannelInfo>>;

    /// Archived threads (forum posts included) under one parent channel.
    fn archived_threads(&self, channel_id: &str) -> Result<Vec<ChannelInfo>>;

    /// One page of history, newest first, strictly older than `before` when set.
    fn message_page(
        &self,
        channel_id: &str,
        limit: u16,
        before: Option<&str>,
    ) -> Result<Vec<MessageFact>>;
}
