use crate::stats::relay::{
    StatsRelay, StatusReport, TriggerOutcome, TriggerRequest, decode_trigger_body,
};
use crate::stats::util::truncate_with_ellipsis;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use std::time::Duration;

/// HTTP side of the background-job deployment: a trigger endpoint that
/// starts a collection and a status endpoint that reports on it.
pub struct HttpStatsRelay {
    http: Client,
    trigger_url: String,
    status_url: String,
}

impl HttpStatsRelay {
    pub fn new(trigger_url: &str, status_url: &str, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build relay http client")?;
        Ok(Self {
            http,
            trigger_url: trigger_url.to_string(),
            status_url: status_url.to_string(),
        })
    }
}

impl StatsRelay for HttpStatsRelay {
    fn trigger(&self, request: &TriggerRequest) -> Result<TriggerOutcome> {
        let response = self
            .http
            .get(&self.trigger_url)
            .query(&[
                ("guildId", request.guild_id.clone()),
                ("backfill", request.backfill.to_string()),
                ("year", request.year.to_string()),
            ])
            .send()
            .context("trigger request failed")?;

        let status = response.status();
        let body = response.text().unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!(
                "trigger returned status {}: {}",
                status,
                truncate_with_ellipsis(body.trim(), 200)
            );
        }
        Ok(decode_trigger_body(&body))
    }

    fn status(&self, guild_id: &str) -> Result<StatusReport> {
        let response = self
            .http
            .get(&self.status_url)
            .query(&[("guildId", guild_id)])
            .send()
            .context("status request failed")?;

        let status = response.status();
        let body = response.text().context("failed to read status body")?;
        if !status.is_success() {
            anyhow::bail!("status endpoint returned {status}");
        }
        StatusReport::decode(&body).context("status body is not a valid report")
    }
}
