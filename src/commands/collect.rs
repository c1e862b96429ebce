use anyhow::Result;

use crate::commands::{CommandReport, month_line};
use crate::discord::DiscordClient;
use crate::error::StatsError;
use crate::stats::config::StatsConfig;
use crate::stats::orchestrator::{CollectRequest, run_collection};
use crate::stats::platform::MessagePlatform;
use crate::stats::util::{Sleeper, ThreadSleeper, truncate_with_ellipsis};

pub fn run(cfg: &StatsConfig) -> Result<CommandReport> {
    let token = cfg
        .discord_token
        .as_deref()
        .ok_or(StatsError::MissingConfig("DISCORD_TOKEN"))?;
    let sleeper = ThreadSleeper;
    let client = DiscordClient::new(token, &cfg.discord, &sleeper)?;
    run_with(&client, &sleeper, cfg)
}

pub fn run_with(
    platform: &dyn MessagePlatform,
    sleeper: &dyn Sleeper,
    cfg: &StatsConfig,
) -> Result<CommandReport> {
    let mode = cfg.mode();
    let mut report = CommandReport::new("collect");

    let out = run_collection(
        platform,
        sleeper,
        &CollectRequest {
            guild_id: &cfg.guild_id,
            mode,
            timezone: cfg.timezone,
            now: cfg.now,
            output_file: &cfg.output_file,
            walk: cfg.walk_options(),
        },
    )?;

    report.detail(format!("guild={} ({})", out.guild.name, out.guild.id));
    report.detail(format!("mode={}", mode.label()));
    match (out.window.months.first(), out.window.months.last()) {
        (Some(first), Some(last)) => {
            report.detail(format!("window={first}..={last} tz={}", out.window.tz));
        }
        _ => report.detail("window=empty (no complete month to backfill yet)"),
    }
    report.detail(format!("members={}", out.guild.member_count));
    report.detail(format!(
        "containers scanned={} skipped={} failed={}",
        out.containers_scanned,
        out.skipped.len(),
        out.containers_failed
    ));
    for skipped in &out.skipped {
        report.detail(format!(
            "skipped #{} ({}): {}",
            skipped.name,
            skipped.id,
            truncate_with_ellipsis(&skipped.reason, 120)
        ));
    }
    if out.forums_skipped > 0 {
        report.detail(format!("forums_unlisted={}", out.forums_skipped));
    }
    report.detail(format!("pages_fetched={}", out.pages_fetched));
    for (key, record) in &out.records {
        report.detail(month_line(key, record));
    }
    if out.dataset_written {
        report.detail(format!("output={}", out.output_file.display()));
    } else {
        report.detail(format!("output={} (unchanged)", out.output_file.display()));
    }

    Ok(report)
}
