//! Client side of the background-job deployment: trigger a remote collection,
//! then poll its status until it completes, goes stale for too long, or the
//! attempt budget runs out.

use crate::stats::dataset::Dataset;
use crate::stats::util::{Sleeper, truncate_with_ellipsis};
use crate::stats::warn::{self, WarnEvent};
use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;
pub const DEFAULT_MAX_STALE_ATTEMPTS: u32 = 36;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRequest {
    pub guild_id: String,
    pub backfill: bool,
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Acknowledged,
    Rejected(String),
}

/// Decodes a 2xx trigger body. Only an explicit `"success": false` counts as
/// a rejection; empty or non-JSON bodies are acknowledgements.
pub fn decode_trigger_body(body: &str) -> TriggerOutcome {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return TriggerOutcome::Acknowledged;
    }
    let Ok(parsed) = serde_json::from_str::<Value>(trimmed) else {
        return TriggerOutcome::Acknowledged;
    };
    if parsed.get("success").and_then(Value::as_bool) != Some(false) {
        return TriggerOutcome::Acknowledged;
    }
    let reason = ["message", "error"]
        .iter()
        .find_map(|field| parsed.get(*field).and_then(Value::as_str))
        .unwrap_or("success=false")
        .to_string();
    TriggerOutcome::Rejected(reason)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Completed,
    Stale,
    Unknown(String),
}

impl From<&str> for JobStatus {
    fn from(raw: &str) -> Self {
        match raw.trim() {
            "pending" => JobStatus::Pending,
            "completed" => JobStatus::Completed,
            "stale" => JobStatus::Stale,
            other => JobStatus::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStatus {
    #[serde(default)]
    status: String,
    message: Option<String>,
    stats: Option<Dataset>,
    last_updated: Option<String>,
    time_since_update: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub status: JobStatus,
    pub message: Option<String>,
    pub stats: Option<Dataset>,
    pub last_updated: Option<String>,
    pub time_since_update_secs: Option<f64>,
}

impl StatusReport {
    pub fn decode(body: &str) -> Result<Self> {
        let wire: WireStatus = serde_json::from_str(body)?;
        Ok(Self {
            status: JobStatus::from(wire.status.as_str()),
            message: wire.message,
            stats: wire.stats,
            last_updated: wire.last_updated,
            time_since_update_secs: wire.time_since_update,
        })
    }
}

pub trait StatsRelay {
    /// `Err` means the trigger request itself failed (transport or non-2xx).
    fn trigger(&self, request: &TriggerRequest) -> Result<TriggerOutcome>;
    fn status(&self, guild_id: &str) -> Result<StatusReport>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    pub max_stale_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_stale_attempts: DEFAULT_MAX_STALE_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    Completed { report: StatusReport, attempts: u32 },
    /// Stale data accepted after the stale budget (or the overall budget) ran out.
    StaleAccepted { report: StatusReport, attempts: u32 },
    TimedOut { attempts: u32 },
    Failed { reason: String, attempts: u32 },
}

impl RelayOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RelayOutcome::Completed { .. } => "completed",
            RelayOutcome::StaleAccepted { .. } => "stale-accepted",
            RelayOutcome::TimedOut { .. } => "timed-out",
            RelayOutcome::Failed { .. } => "failed",
        }
    }
}

/// Triggering → Polling → {Completed, Stale, TimedOut, Failed}.
///
/// Pending answers, unknown statuses and request errors all spend one
/// attempt from the same budget. Stale answers also run a second counter;
/// when it reaches `max_stale_attempts` the latest stale payload is accepted.
pub fn run_relay(
    relay: &dyn StatsRelay,
    sleeper: &dyn Sleeper,
    request: &TriggerRequest,
    policy: &PollPolicy,
) -> RelayOutcome {
    match relay.trigger(request) {
        Ok(TriggerOutcome::Acknowledged) => {
            tracing::info!(guild = %request.guild_id, "background collection triggered");
        }
        Ok(TriggerOutcome::Rejected(reason)) => {
            warn::emit(WarnEvent {
                code: "TRIGGER_REJECTED",
                stage: "relay",
                action: "trigger",
                guild: &request.guild_id,
                container: "remote-job",
                reason: "polling-anyway",
                err: &truncate_with_ellipsis(&reason, 200),
            });
        }
        Err(err) => {
            return RelayOutcome::Failed {
                reason: format!("failed to trigger background collection: {err:#}"),
                attempts: 0,
            };
        }
    }

    let max_attempts = policy.max_attempts.max(1);
    let mut stale: Option<StatusReport> = None;
    let mut stale_attempts = 0u32;
    let mut last_error: Option<String> = None;
    let mut attempts_used = 0u32;

    for attempt in 1..=max_attempts {
        attempts_used = attempt;
        let is_last = attempt == max_attempts;
        tracing::info!(attempt, max_attempts, "polling collection status");

        match relay.status(&request.guild_id) {
            Ok(report) => {
                last_error = None;
                match report.status {
                    JobStatus::Completed => {
                        return RelayOutcome::Completed {
                            report,
                            attempts: attempt,
                        };
                    }
                    JobStatus::Stale => {
                        stale_attempts += 1;
                        tracing::info!(
                            stale_attempts,
                            max_stale_attempts = policy.max_stale_attempts,
                            age_secs = ?report.time_since_update_secs,
                            "stale stats available, waiting for fresh data"
                        );
                        stale = Some(report);
                        if stale_attempts >= policy.max_stale_attempts {
                            break;
                        }
                    }
                    JobStatus::Pending => {
                        tracing::info!(message = ?report.message, "collection still pending");
                    }
                    JobStatus::Unknown(ref raw) => {
                        tracing::info!(status = %raw, "unrecognised status, treating as pending");
                    }
                }
            }
            Err(err) => {
                warn::emit(WarnEvent {
                    code: "POLL_FAILED",
                    stage: "relay",
                    action: "status",
                    guild: &request.guild_id,
                    container: "remote-job",
                    reason: if is_last { "out-of-budget" } else { "retrying" },
                    err: &format!("{err:#}"),
                });
                last_error = Some(format!("{err:#}"));
            }
        }

        if !is_last {
            sleeper.sleep(policy.interval);
        }
    }

    if let Some(report) = stale {
        let last_updated = report.last_updated.as_deref().unwrap_or("unknown");
        warn::emit(WarnEvent {
            code: "STALE_ACCEPTED",
            stage: "relay",
            action: "accept-stale",
            guild: &request.guild_id,
            container: "remote-job",
            reason: "data-may-be-outdated",
            err: &format!("last_updated={last_updated}"),
        });
        return RelayOutcome::StaleAccepted {
            report,
            attempts: attempts_used,
        };
    }

    match last_error {
        Some(reason) => RelayOutcome::Failed {
            reason: format!("status polling failed after {max_attempts} attempts: {reason}"),
            attempts: max_attempts,
        },
        None => RelayOutcome::TimedOut {
            attempts: max_attempts,
        },
    }
}
