use crate::stats::platform::{ChannelInfo, ChannelKind, MessagePlatform};
use crate::stats::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use std::collections::BTreeSet;

/// One message-bearing unit of work: a channel, a thread or a forum post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
}

impl From<&ChannelInfo> for Container {
    fn from(info: &ChannelInfo) -> Self {
        Self {
            id: info.id.clone(),
            name: info.name.clone(),
            parent_id: info.parent_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedContainer {
    pub id: String,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    pub containers: Vec<Container>,
    pub skipped: Vec<SkippedContainer>,
    pub text_channels: usize,
    pub forums: usize,
    pub skipped_forums: usize,
}

/// Active threads under `parent` merged with its archived threads, first
/// occurrence wins.
fn threads_under(
    platform: &dyn MessagePlatform,
    active: &[ChannelInfo],
    parent: &ChannelInfo,
) -> Result<Vec<ChannelInfo>> {
    let archived = platform
        .archived_threads(&parent.id)
        .with_context(|| format!("failed to list archived threads of #{}", parent.name))?;

    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for thread in active
        .iter()
        .filter(|t| t.parent_id.as_deref() == Some(parent.id.as_str()))
        .chain(archived.iter())
    {
        if seen.insert(thread.id.clone()) {
            out.push(thread.clone());
        }
    }
    Ok(out)
}

/// Builds the flat, deduplicated worklist of scannable containers.
///
/// Text channels come first, each followed by its own threads, then forum
/// posts. Every candidate is probed with a one-message read and dropped when
/// the probe fails.
pub fn enumerate_containers(platform: &dyn MessagePlatform, guild_id: &str) -> Result<Enumeration> {
    let channels = platform
        .guild_channels(guild_id)
        .with_context(|| format!("failed to list channels of guild {guild_id}"))?;

    let active = match platform.active_threads(guild_id) {
        Ok(threads) => threads,
        Err(err) => {
            warn::emit(WarnEvent {
                code: "ACTIVE_THREADS_FAILED",
                stage: "enumerate",
                action: "list-active-threads",
                guild: guild_id,
                container: "guild",
                reason: "continuing-with-archived-threads-only",
                err: &format!("{err:#}"),
            });
            Vec::new()
        }
    };

    let mut out = Enumeration::default();
    let mut candidates: Vec<Container> = Vec::new();

    for channel in channels.iter().filter(|c| c.kind == ChannelKind::Text) {
        out.text_channels += 1;
        candidates.push(Container::from(channel));
        match threads_under(platform, &active, channel) {
            Ok(threads) => candidates.extend(threads.iter().map(Container::from)),
            Err(err) => {
                warn::emit(WarnEvent {
                    code: "THREAD_LIST_FAILED",
                    stage: "enumerate",
                    action: "list-channel-threads",
                    guild: guild_id,
                    container: &channel.name,
                    reason: "scanning-without-archived-threads",
                    err: &format!("{err:#}"),
                });
                candidates.extend(
                    active
                        .iter()
                        .filter(|t| t.parent_id.as_deref() == Some(channel.id.as_str()))
                        .map(Container::from),
                );
            }
        }
    }

    for forum in channels.iter().filter(|c| c.kind == ChannelKind::Forum) {
        out.forums += 1;
        match threads_under(platform, &active, forum) {
            Ok(posts) => candidates.extend(posts.iter().map(Container::from)),
            Err(err) => {
                out.skipped_forums += 1;
                warn::emit(WarnEvent {
                    code: "FORUM_LIST_FAILED",
                    stage: "enumerate",
                    action: "list-forum-posts",
                    guild: guild_id,
                    container: &forum.name,
                    reason: "forum-skipped",
                    err: &format!("{err:#}"),
                });
            }
        }
    }

    let mut seen = BTreeSet::new();
    for candidate in candidates {
        if !seen.insert(candidate.id.clone()) {
            continue;
        }
        match platform.message_page(&candidate.id, 1, None) {
            Ok(_) => out.containers.push(candidate),
            Err(err) => {
                warn::emit(WarnEvent {
                    code: "CONTAINER_INACCESSIBLE",
                    stage: "enumerate",
                    action: "probe-read",
                    guild: guild_id,
                    container: &candidate.name,
                    reason: "container-skipped",
                    err: &format!("{err:#}"),
                });
                out.skipped.push(SkippedContainer {
                    id: candidate.id,
                    name: candidate.name,
                    reason: format!("{err:#}"),
                });
            }
        }
    }

    tracing::info!(
        guild = guild_id,
        text_channels = out.text_channels,
        forums = out.forums,
        scannable = out.containers.len(),
        skipped = out.skipped.len(),
        "enumerated containers"
    );

    Ok(out)
}
