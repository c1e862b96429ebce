//! In-memory platform and sleeper used by the engine's unit tests.

use crate::stats::platform::{ChannelInfo, ChannelKind, GuildSummary, MessageFact, MessagePlatform};
use crate::stats::util::Sleeper;
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

pub fn utc(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

pub fn fact(id: &str, at: &str, author: &str, is_bot: bool) -> MessageFact {
    MessageFact {
        id: id.to_string(),
        timestamp: utc(at),
        author_id: author.to_string(),
        is_bot,
    }
}

fn channel(id: &str, name: &str, kind: ChannelKind, parent_id: Option<&str>) -> ChannelInfo {
    ChannelInfo {
        id: id.to_string(),
        name: name.to_string(),
        kind,
        parent_id: parent_id.map(ToOwned::to_owned),
    }
}

pub fn text_channel(id: &str, name: &str) -> ChannelInfo {
    channel(id, name, ChannelKind::Text, None)
}

pub fn forum_channel(id: &str, name: &str) -> ChannelInfo {
    channel(id, name, ChannelKind::Forum, None)
}

pub fn thread(id: &str, name: &str, parent: &str) -> ChannelInfo {
    channel(id, name, ChannelKind::Thread, Some(parent))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCall {
    pub channel_id: String,
    pub limit: u16,
    pub before: Option<String>,
}

pub struct FakePlatform {
    pub guild: GuildSummary,
    pub channels: Vec<ChannelInfo>,
    pub active: Vec<ChannelInfo>,
    pub archived: BTreeMap<String, Vec<ChannelInfo>>,
    pub failing_archives: BTreeSet<String>,
    /// Histories stored newest first, as the platform returns them.
    pub histories: BTreeMap<String, Vec<MessageFact>>,
    pub denied: BTreeSet<String>,
    /// Fails every full-page fetch (limit > 1) once this many have succeeded.
    pub fail_after_pages: BTreeMap<String, usize>,
    /// Ignores the cursor and returns the first page again.
    pub stuck_cursor: BTreeSet<String>,
    pub page_calls: RefCell<Vec<PageCall>>,
}

impl FakePlatform {
    pub fn new(member_count: u64) -> Self {
        Self {
            guild: GuildSummary {
                id: "g1".to_string(),
                name: "Test Guild".to_string(),
                member_count,
            },
            channels: Vec::new(),
            active: Vec::new(),
            archived: BTreeMap::new(),
            failing_archives: BTreeSet::new(),
            histories: BTreeMap::new(),
            denied: BTreeSet::new(),
            fail_after_pages: BTreeMap::new(),
            stuck_cursor: BTreeSet::new(),
            page_calls: RefCell::new(Vec::new()),
        }
    }

    pub fn with_history(mut self, channel_id: &str, mut facts: Vec<MessageFact>) -> Self {
        facts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        self.histories.insert(channel_id.to_string(), facts);
        self
    }

    /// Full-page fetches issued against one channel (probes excluded).
    pub fn scan_calls(&self, channel_id: &str) -> Vec<PageCall> {
        self.page_calls
            .borrow()
            .iter()
            .filter(|call| call.channel_id == channel_id && call.limit > 1)
            .cloned()
            .collect()
    }
}

impl MessagePlatform for FakePlatform {
    fn guild_summary(&self, guild_id: &str) -> Result<GuildSummary> {
        if guild_id != self.guild.id {
            return Err(anyhow!("unknown guild {guild_id}"));
        }
        Ok(self.guild.clone())
    }

    fn guild_channels(&self, _guild_id: &str) -> Result<Vec<ChannelInfo>> {
        Ok(self.channels.clone())
    }

    fn active_threads(&self, _guild_id: &str) -> Result<Vec<ChannelInfo>> {
        Ok(self.active.clone())
    }

    fn archived_threads(&self, channel_id: &str) -> Result<Vec<ChannelInfo>> {
        if self.failing_archives.contains(channel_id) {
            return Err(anyhow!("missing access to {channel_id}"));
        }
        Ok(self.archived.get(channel_id).cloned().unwrap_or_default())
    }

    fn message_page(
        &self,
        channel_id: &str,
        limit: u16,
        before: Option<&str>,
    ) -> Result<Vec<MessageFact>> {
        let prior_pages = self.scan_calls(channel_id).len();
        self.page_calls.borrow_mut().push(PageCall {
            channel_id: channel_id.to_string(),
            limit,
            before: before.map(ToOwned::to_owned),
        });

        if self.denied.contains(channel_id) {
            return Err(anyhow!("missing access to {channel_id}"));
        }
        if limit > 1
            && let Some(ok_pages) = self.fail_after_pages.get(channel_id)
            && prior_pages >= *ok_pages
        {
            return Err(anyhow!("internal server error on {channel_id}"));
        }

        let history = self.histories.get(channel_id).cloned().unwrap_or_default();
        let before = if self.stuck_cursor.contains(channel_id) {
            None
        } else {
            before
        };
        let start = match before {
            None => 0,
            Some(cursor) => match history.iter().position(|f| f.id == cursor) {
                Some(idx) => idx + 1,
                None => history.len(),
            },
        };
        Ok(history
            .into_iter()
            .skip(start)
            .take(usize::from(limit))
            .collect())
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    pub naps: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn total(&self) -> Duration {
        self.naps.borrow().iter().sum()
    }

    pub fn count(&self) -> usize {
        self.naps.borrow().len()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.naps.borrow_mut().push(duration);
    }
}
