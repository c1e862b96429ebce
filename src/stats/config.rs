use crate::error::StatsError;
use crate::stats::dataset::default_output_file;
use crate::stats::relay::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_STALE_ATTEMPTS, DEFAULT_POLL_INTERVAL_SECS, PollPolicy,
    TriggerRequest,
};
use crate::stats::walker::{DEFAULT_PAGE_DELAY_MS, MAX_PAGE_SIZE, WalkOptions};
use crate::stats::window::{MonthKey, ScanMode};
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DISCORD_API_BASE: &str = "https://discord.com/api/v10";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collector {
    /// Scan the platform from this process.
    Direct,
    /// Trigger a background job and poll it for results.
    Remote,
}

impl Collector {
    pub fn label(self) -> &'static str {
        match self {
            Collector::Direct => "direct",
            Collector::Remote => "remote",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub page_size: u16,
    pub page_delay_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            page_delay_ms: DEFAULT_PAGE_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub poll_interval_secs: u64,
    pub max_attempts: u32,
    pub max_stale_attempts: u32,
    pub request_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_stale_attempts: DEFAULT_MAX_STALE_ATTEMPTS,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub api_base: String,
    pub request_timeout_secs: u64,
    pub rate_limit_retries: usize,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_DISCORD_API_BASE.to_string(),
            request_timeout_secs: 30,
            rate_limit_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialStatsConfig {
    scan: Option<ScanConfig>,
    relay: Option<RelayConfig>,
    discord: Option<DiscordConfig>,
}

#[derive(Debug, Clone)]
pub struct StatsConfig {
    pub guild_id: String,
    pub discord_token: Option<String>,
    pub output_file: PathBuf,
    pub backfill: bool,
    pub backfill_year: i32,
    pub collector: Collector,
    pub timezone: Tz,
    pub now: DateTime<Utc>,
    pub trigger_url: Option<String>,
    pub status_url: Option<String>,
    pub scan: ScanConfig,
    pub relay: RelayConfig,
    pub discord: DiscordConfig,
}

impl StatsConfig {
    pub fn mode(&self) -> ScanMode {
        if self.backfill {
            ScanMode::Backfill {
                year: self.backfill_year,
            }
        } else {
            ScanMode::Monthly
        }
    }

    pub fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            page_size: self.scan.page_size,
            page_delay: Duration::from_millis(self.scan.page_delay_ms),
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.relay.poll_interval_secs),
            max_attempts: self.relay.max_attempts,
            max_stale_attempts: self.relay.max_stale_attempts,
        }
    }

    pub fn trigger_request(&self) -> TriggerRequest {
        TriggerRequest {
            guild_id: self.guild_id.clone(),
            backfill: self.backfill,
            year: self.backfill_year,
        }
    }
}

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env_non_empty(lookup: Lookup<'_>, var: &str) -> Option<String> {
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_first(lookup: Lookup<'_>, vars: &[&str]) -> Option<String> {
    vars.iter().find_map(|var| env_non_empty(lookup, var))
}

fn env_or_u64(lookup: Lookup<'_>, var: &str, fallback: u64) -> Result<u64> {
    match env_non_empty(lookup, var) {
        Some(v) => match v.parse::<u64>() {
            Ok(parsed) => Ok(parsed),
            Err(_) => {
                let msg = format!("{var}={v} is not a whole number");
                Err(StatsError::InvalidConfig(msg).into())
            }
        },
        None => Ok(fallback),
    }
}

fn env_or_bool(lookup: Lookup<'_>, var: &str, fallback: bool) -> bool {
    match env_non_empty(lookup, var).as_deref() {
        Some("1" | "true" | "TRUE" | "True" | "yes" | "on") => true,
        Some("0" | "false" | "FALSE" | "False" | "no" | "off") => false,
        _ => fallback,
    }
}

fn env_or_string(lookup: Lookup<'_>, var: &str, fallback: &str) -> String {
    env_non_empty(lookup, var).unwrap_or_else(|| fallback.to_string())
}

fn parse_collector(raw: &str) -> Result<Collector> {
    match raw.to_ascii_lowercase().as_str() {
        "direct" | "discord" => Ok(Collector::Direct),
        "remote" | "background" | "netlify" => Ok(Collector::Remote),
        other => {
            let msg = format!("GUILD_STATS_COLLECTOR={other}: use `direct` or `remote`");
            Err(StatsError::InvalidConfig(msg).into())
        }
    }
}

fn resolve_config_path(lookup: Lookup<'_>) -> Option<PathBuf> {
    if let Some(custom) = env_non_empty(lookup, "GUILD_STATS_CONFIG_PATH") {
        return Some(PathBuf::from(custom));
    }

    let home = dirs::home_dir()?;
    Some(home.join(".guild-stats").join("config.toml"))
}

fn merge_file_config(lookup: Lookup<'_>, cfg: &mut StatsConfig) -> Result<()> {
    let Some(path) = resolve_config_path(lookup) else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: PartialStatsConfig = toml::from_str(&raw).map_err(|err| {
        StatsError::InvalidConfig(format!("failed to parse {}: {err}", path.display()))
    })?;
    if let Some(scan) = parsed.scan {
        cfg.scan = scan;
    }
    if let Some(relay) = parsed.relay {
        cfg.relay = relay;
    }
    if let Some(discord) = parsed.discord {
        cfg.discord = discord;
    }
    Ok(())
}

fn merge_env_tuning(lookup: Lookup<'_>, cfg: &mut StatsConfig) -> Result<()> {
    let page_size = env_or_u64(
        lookup,
        "GUILD_STATS_SCAN_PAGE_SIZE",
        u64::from(cfg.scan.page_size),
    )?;
    cfg.scan.page_size = u16::try_from(page_size).unwrap_or(u16::MAX);
    cfg.scan.page_delay_ms = env_or_u64(
        lookup,
        "GUILD_STATS_SCAN_PAGE_DELAY_MS",
        cfg.scan.page_delay_ms,
    )?;

    cfg.relay.poll_interval_secs = env_or_u64(
        lookup,
        "GUILD_STATS_RELAY_POLL_INTERVAL_SECS",
        cfg.relay.poll_interval_secs,
    )?;
    let max_attempts = env_or_u64(
        lookup,
        "GUILD_STATS_RELAY_MAX_ATTEMPTS",
        u64::from(cfg.relay.max_attempts),
    )?;
    cfg.relay.max_attempts = u32::try_from(max_attempts).unwrap_or(u32::MAX);
    let max_stale_attempts = env_or_u64(
        lookup,
        "GUILD_STATS_RELAY_MAX_STALE_ATTEMPTS",
        u64::from(cfg.relay.max_stale_attempts),
    )?;
    cfg.relay.max_stale_attempts = u32::try_from(max_stale_attempts).unwrap_or(u32::MAX);
    cfg.relay.request_timeout_secs = env_or_u64(
        lookup,
        "GUILD_STATS_RELAY_REQUEST_TIMEOUT_SECS",
        cfg.relay.request_timeout_secs,
    )?;

    cfg.discord.api_base = env_or_string(
        lookup,
        "GUILD_STATS_DISCORD_API_BASE",
        &cfg.discord.api_base,
    );
    cfg.discord.request_timeout_secs = env_or_u64(
        lookup,
        "GUILD_STATS_DISCORD_REQUEST_TIMEOUT_SECS",
        cfg.discord.request_timeout_secs,
    )?;
    let retries = env_or_u64(
        lookup,
        "GUILD_STATS_DISCORD_RATE_LIMIT_RETRIES",
        cfg.discord.rate_limit_retries as u64,
    )?;
    cfg.discord.rate_limit_retries = usize::try_from(retries).unwrap_or(usize::MAX);
    Ok(())
}

fn validate(cfg: &StatsConfig) -> Result<()> {
    let invalid = |msg: String| -> anyhow::Error { StatsError::InvalidConfig(msg).into() };

    if !(1..=MAX_PAGE_SIZE).contains(&cfg.scan.page_size) {
        return Err(invalid(format!("scan page size must be between 1 and {MAX_PAGE_SIZE}")));
    }
    if cfg.relay.max_attempts == 0 {
        return Err(invalid("relay max attempts must be >= 1".to_string()));
    }
    if cfg.relay.max_stale_attempts == 0 {
        return Err(invalid("relay max stale attempts must be >= 1".to_string()));
    }
    if cfg.relay.request_timeout_secs == 0 || cfg.discord.request_timeout_secs == 0 {
        return Err(invalid("request timeouts must be >= 1 second".to_string()));
    }
    if cfg.discord.api_base.trim().is_empty() {
        return Err(invalid("discord api base cannot be empty".to_string()));
    }
    let current_year = MonthKey::of(&cfg.now.with_timezone(&cfg.timezone)).year;
    if cfg.backfill && cfg.backfill_year > current_year {
        return Err(invalid(format!(
            "BACKFILL_YEAR={} is after the current year {current_year}",
            cfg.backfill_year
        )));
    }
    Ok(())
}

/// Resolve configuration from an env lookup. Identity and mode come from the
/// environment only; tuning knobs come from the TOML file, then env overrides.
pub fn load_config_with(
    lookup: Lookup<'_>,
    cwd: &Path,
    wall_clock: DateTime<Utc>,
) -> Result<StatsConfig> {
    let guild_id = env_non_empty(lookup, "GUILD_ID").ok_or(StatsError::MissingConfig("GUILD_ID"))?;

    let collector = match env_non_empty(lookup, "GUILD_STATS_COLLECTOR") {
        Some(raw) => parse_collector(&raw)?,
        None => Collector::Direct,
    };

    let discord_token = env_first(lookup, &["DISCORD_TOKEN", "DISCORD_BOT_TOKEN"]);
    if collector == Collector::Direct && discord_token.is_none() {
        return Err(StatsError::MissingConfig("DISCORD_TOKEN").into());
    }

    let trigger_url = env_non_empty(lookup, "GUILD_STATS_TRIGGER_URL");
    let status_url = env_non_empty(lookup, "GUILD_STATS_STATUS_URL");
    if collector == Collector::Remote {
        if trigger_url.is_none() {
            return Err(StatsError::MissingConfig("GUILD_STATS_TRIGGER_URL").into());
        }
        if status_url.is_none() {
            return Err(StatsError::MissingConfig("GUILD_STATS_STATUS_URL").into());
        }
    }

    let timezone_raw = env_or_string(lookup, "GUILD_STATS_TIMEZONE", "UTC");
    let timezone: Tz = timezone_raw.parse().map_err(|err| {
        StatsError::InvalidConfig(format!("GUILD_STATS_TIMEZONE={timezone_raw}: {err}"))
    })?;

    let now = match env_non_empty(lookup, "GUILD_STATS_AS_OF") {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|err| anyhow!("GUILD_STATS_AS_OF={raw} is not RFC 3339: {err}"))?,
        None => wall_clock,
    };

    let current_year = MonthKey::of(&now.with_timezone(&timezone)).year;
    let backfill_year = env_non_empty(lookup, "BACKFILL_YEAR")
        .and_then(|v| v.parse::<i32>().ok())
        .filter(|year| *year > 0)
        .unwrap_or(current_year);

    let output_file = match env_non_empty(lookup, "OUTPUT_FILE") {
        Some(path) => cwd.join(path),
        None => default_output_file(cwd),
    };

    let mut cfg = StatsConfig {
        guild_id,
        discord_token,
        output_file,
        backfill: env_or_bool(lookup, "BACKFILL", false),
        backfill_year,
        collector,
        timezone,
        now,
        trigger_url,
        status_url,
        scan: ScanConfig::default(),
        relay: RelayConfig::default(),
        discord: DiscordConfig::default(),
    };

    merge_file_config(lookup, &mut cfg)?;
    merge_env_tuning(lookup, &mut cfg)?;
    validate(&cfg)?;
    Ok(cfg)
}

pub fn load_config() -> Result<StatsConfig> {
    let cwd = env::current_dir().context("failed to resolve working directory")?;
    load_config_with(&|var| env::var(var).ok(), &cwd, Utc::now())
}
