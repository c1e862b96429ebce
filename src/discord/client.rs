use crate::error::StatsError;
use crate::stats::config::DiscordConfig;
use crate::stats::platform::{ChannelInfo, ChannelKind, GuildSummary, MessageFact, MessagePlatform};
use crate::stats::util::Sleeper;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

const USER_AGENT: &str = concat!("DiscordBot (guild-stats, ", env!("CARGO_PKG_VERSION"), ")");
const ARCHIVE_PAGE_LIMIT: &str = "100";
const MAX_RETRY_WAIT_SECS: f64 = 60.0;

#[derive(Debug, Deserialize)]
struct WireGuild {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    approximate_member_count: Option<u64>,
    #[serde(default)]
    member_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireThreadMetadata {
    #[serde(default)]
    archive_timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChannel {
    id: String,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    thread_metadata: Option<WireThreadMetadata>,
}

#[derive(Debug, Deserialize)]
struct WireThreadList {
    #[serde(default)]
    threads: Vec<WireChannel>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct WireAuthor {
    id: String,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: String,
    timestamp: String,
    author: WireAuthor,
}

pub fn channel_kind(raw: u8) -> ChannelKind {
    match raw {
        0 | 2 | 5 | 13 => ChannelKind::Text,
        15 | 16 => ChannelKind::Forum,
        10..=12 => ChannelKind::Thread,
        _ => ChannelKind::Other,
    }
}

impl From<WireChannel> for ChannelInfo {
    fn from(wire: WireChannel) -> Self {
        ChannelInfo {
            name: wire.name.unwrap_or_else(|| wire.id.clone()),
            kind: channel_kind(wire.kind),
            parent_id: wire.parent_id,
            id: wire.id,
        }
    }
}

impl TryFrom<WireMessage> for MessageFact {
    type Error = anyhow::Error;

    fn try_from(wire: WireMessage) -> Result<Self> {
        let timestamp = DateTime::parse_from_rfc3339(&wire.timestamp)
            .with_context(|| format!("message {} has bad timestamp {}", wire.id, wire.timestamp))?
            .with_timezone(&Utc);
        Ok(MessageFact {
            id: wire.id,
            timestamp,
            author_id: wire.author.id,
            is_bot: wire.author.bot,
        })
    }
}

/// Seconds to wait before retrying a 429. The JSON body wins over the header.
fn retry_wait(header: Option<f64>, body: &str) -> Duration {
    let from_body = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| json.get("retry_after").and_then(Value::as_f64));
    let secs = from_body.or(header).unwrap_or(1.0);
    let secs = secs.clamp(0.0, MAX_RETRY_WAIT_SECS);
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::from_secs(1))
}

/// Discord REST v10 client behind the [`MessagePlatform`] seam.
pub struct DiscordClient<'a> {
    http: Client,
    api_base: String,
    token: String,
    rate_limit_retries: usize,
    sleeper: &'a dyn Sleeper,
}

impl<'a> DiscordClient<'a> {
    pub fn new(token: &str, config: &DiscordConfig, sleeper: &'a dyn Sleeper) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build discord http client")?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            rate_limit_retries: config.rate_limit_retries,
            sleeper,
        })
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.api_base, path);
        let mut retries = 0usize;

        loop {
            let response = self
                .http
                .get(&url)
                .header(AUTHORIZATION, format!("Bot {}", self.token))
                .query(query)
                .send()
                .with_context(|| format!("discord request {path} failed"))?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                if retries >= self.rate_limit_retries {
                    return Err(StatsError::RateLimited {
                        retries,
                        path: path.to_string(),
                    }
                    .into());
                }
                let header = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.trim().parse::<f64>().ok());
                let body = response.text().unwrap_or_default();
                let wait = retry_wait(header, &body);
                retries += 1;
                tracing::info!(
                    path,
                    retry = retries,
                    wait_ms = wait.as_millis() as u64,
                    "rate limited, backing off"
                );
                self.sleeper.sleep(wait);
                continue;
            }

            if !status.is_success() {
                return Err(StatsError::PlatformStatus {
                    status: status.as_u16(),
                    path: path.to_string(),
                }
                .into());
            }

            return response
                .json::<T>()
                .with_context(|| format!("discord response for {path} could not be decoded"));
        }
    }
}

impl MessagePlatform for DiscordClient<'_> {
    fn guild_summary(&self, guild_id: &str) -> Result<GuildSummary> {
        let wire: WireGuild = self.get_json(
            &format!("/guilds/{guild_id}"),
            &[("with_counts", "true".to_string())],
        )?;
        Ok(GuildSummary {
            name: wire.name.unwrap_or_else(|| wire.id.clone()),
            member_count: wire
                .approximate_member_count
                .or(wire.member_count)
                .unwrap_or(0),
            id: wire.id,
        })
    }

    fn guild_channels(&self, guild_id: &str) -> Result<Vec<ChannelInfo>> {
        let wire: Vec<WireChannel> = self.get_json(&format!("/guilds/{guild_id}/channels"), &[])?;
        Ok(wire.into_iter().map(ChannelInfo::from).collect())
    }

    fn active_threads(&self, guild_id: &str) -> Result<Vec<ChannelInfo>> {
        let wire: WireThreadList =
            self.get_json(&format!("/guilds/{guild_id}/threads/active"), &[])?;
        Ok(wire.threads.into_iter().map(ChannelInfo::from).collect())
    }

    fn archived_threads(&self, channel_id: &str) -> Result<Vec<ChannelInfo>> {
        let path = format!("/channels/{channel_id}/threads/archived/public");
        let mut out = Vec::new();
        let mut before: Option<String> = None;

        loop {
            let mut query = vec![("limit", ARCHIVE_PAGE_LIMIT.to_string())];
            if let Some(cursor) = &before {
                query.push(("before", cursor.clone()));
            }
            let page: WireThreadList = self.get_json(&path, &query)?;

            let cursor = page
                .threads
                .last()
                .and_then(|t| t.thread_metadata.as_ref())
                .and_then(|meta| meta.archive_timestamp.clone());
            out.extend(page.threads.into_iter().map(ChannelInfo::from));

            match cursor {
                Some(next) if page.has_more && before.as_deref() != Some(next.as_str()) => {
                    before = Some(next);
                }
                _ => return Ok(out),
            }
        }
    }

    fn message_page(
        &self,
        channel_id: &str,
        limit: u16,
        before: Option<&str>,
    ) -> Result<Vec<MessageFact>> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(cursor) = before {
            query.push(("before", cursor.to_string()));
        }
        let wire: Vec<WireMessage> =
            self.get_json(&format!("/channels/{channel_id}/messages"), &query)?;
        wire.into_iter().map(MessageFact::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::testing::{RecordingSleeper, utc};
    use mockito::Matcher;

    fn config(api_base: String) -> DiscordConfig {
        DiscordConfig {
            api_base,
            request_timeout_secs: 5,
            rate_limit_retries: 2,
        }
    }

    #[test]
    fn channel_types_map_to_kinds() {
        assert_eq!(channel_kind(0), ChannelKind::Text);
        assert_eq!(channel_kind(5), ChannelKind::Text);
        assert_eq!(channel_kind(15), ChannelKind::Forum);
        assert_eq!(channel_kind(11), ChannelKind::Thread);
        assert_eq!(channel_kind(4), ChannelKind::Other);
    }

    #[test]
    fn retry_wait_prefers_body_then_header() {
        assert_eq!(
            retry_wait(Some(3.0), r#"{"retry_after": 1.5}"#),
            Duration::from_millis(1500)
        );
        assert_eq!(retry_wait(Some(3.0), "slow down"), Duration::from_secs(3));
        assert_eq!(retry_wait(None, ""), Duration::from_secs(1));
        assert_eq!(retry_wait(Some(-4.0), ""), Duration::ZERO);
    }

    #[test]
    fn guild_summary_falls_back_to_member_count() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/guilds/g1")
            .match_query(Matcher::UrlEncoded("with_counts".into(), "true".into()))
            .match_header("authorization", "Bot secret")
            .with_status(200)
            .with_body(r#"{"id":"g1","name":"Guild","member_count":12}"#)
            .create();

        let sleeper = RecordingSleeper::default();
        let client = DiscordClient::new("secret", &config(server.url()), &sleeper).expect("client");
        let guild = client.guild_summary("g1").expect("guild");
        mock.assert();
        assert_eq!(guild.member_count, 12);
        assert_eq!(guild.name, "Guild");
    }

    #[test]
    fn message_page_sends_cursor_and_reads_bot_flag() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/channels/c1/messages")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("limit".into(), "100".into()),
                Matcher::UrlEncoded("before".into(), "m9".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"[
                    {"id":"m8","timestamp":"2024-02-20T10:00:00.000000+00:00","author":{"id":"u1"}},
                    {"id":"m7","timestamp":"2024-02-19T10:00:00+00:00","author":{"id":"u2","bot":true}}
                ]"#,
            )
            .create();

        let sleeper = RecordingSleeper::default();
        let client = DiscordClient::new("t", &config(server.url()), &sleeper).expect("client");
        let page = client.message_page("c1", 100, Some("m9")).expect("page");
        mock.assert();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].timestamp, utc("2024-02-20T10:00:00Z"));
        assert!(!page[0].is_bot);
        assert!(page[1].is_bot);
    }

    #[test]
    fn archived_threads_follow_has_more() {
        let mut server = mockito::Server::new();
        let first = server
            .mock("GET", "/channels/f1/threads/archived/public")
            .match_query(Matcher::Exact("limit=100".into()))
            .with_status(200)
            .with_body(
                r#"{"has_more":true,"threads":[
                    {"id":"p2","type":11,"name":"newer","parent_id":"f1","thread_metadata":{"archive_timestamp":"2024-02-10T00:00:00+00:00"}}
                ]}"#,
            )
            .expect(1)
            .create();
        let second = server
            .mock("GET", "/channels/f1/threads/archived/public")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("limit".into(), "100".into()),
                Matcher::UrlEncoded("before".into(), "2024-02-10T00:00:00+00:00".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"has_more":false,"threads":[
                    {"id":"p1","type":11,"name":"older","parent_id":"f1","thread_metadata":{"archive_timestamp":"2024-01-10T00:00:00+00:00"}}
                ]}"#,
            )
            .expect(1)
            .create();

        let sleeper = RecordingSleeper::default();
        let client = DiscordClient::new("t", &config(server.url()), &sleeper).expect("client");
        let threads = client.archived_threads("f1").expect("threads");
        first.assert();
        second.assert();
        let ids: Vec<&str> = threads.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p1"]);
        assert_eq!(threads[0].kind, ChannelKind::Thread);
        assert_eq!(threads[0].parent_id.as_deref(), Some("f1"));
    }

    #[test]
    fn persistent_rate_limit_gives_up_after_retries() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/guilds/g1/channels")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_body(r#"{"retry_after": 0.25, "global": false}"#)
            .expect(3)
            .create();

        let sleeper = RecordingSleeper::default();
        let client = DiscordClient::new("t", &config(server.url()), &sleeper).expect("client");
        let err = client.guild_channels("g1").expect_err("rate limited");
        mock.assert();
        assert!(err.to_string().contains("rate limit persisted after 2 retries"));
        assert_eq!(sleeper.count(), 2);
        assert_eq!(sleeper.total(), Duration::from_millis(500));
    }

    #[test]
    fn non_success_status_is_typed() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/channels/c1/messages")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{"message":"Missing Access","code":50001}"#)
            .create();

        let sleeper = RecordingSleeper::default();
        let client = DiscordClient::new("t", &config(server.url()), &sleeper).expect("client");
        let err = client.message_page("c1", 1, None).expect_err("forbidden");
        let typed = err.downcast_ref::<StatsError>().expect("typed error");
        assert!(matches!(typed, StatsError::PlatformStatus { status: 403, .. }));
    }
}
