use anyhow::{Result, anyhow};

use crate::commands::{CommandReport, month_line};
use crate::error::StatsError;
use crate::remote::HttpStatsRelay;
use crate::stats::config::StatsConfig;
use crate::stats::dataset;
use crate::stats::relay::{RelayOutcome, StatsRelay, StatusReport, run_relay};
use crate::stats::util::{Sleeper, ThreadSleeper};

pub fn run(cfg: &StatsConfig) -> Result<CommandReport> {
    let trigger_url = cfg
        .trigger_url
        .as_deref()
        .ok_or(StatsError::MissingConfig("GUILD_STATS_TRIGGER_URL"))?;
    let status_url = cfg
        .status_url
        .as_deref()
        .ok_or(StatsError::MissingConfig("GUILD_STATS_STATUS_URL"))?;
    let relay = HttpStatsRelay::new(trigger_url, status_url, cfg.relay.request_timeout_secs)?;
    run_with(&relay, &ThreadSleeper, cfg)
}

pub fn run_with(
    relay: &dyn StatsRelay,
    sleeper: &dyn Sleeper,
    cfg: &StatsConfig,
) -> Result<CommandReport> {
    let mut report = CommandReport::new("relay");
    let request = cfg.trigger_request();
    report.detail(format!("guild={}", request.guild_id));
    report.detail(format!("mode={}", cfg.mode().label()));

    let outcome = run_relay(relay, sleeper, &request, &cfg.poll_policy());
    let label = outcome.label();
    match outcome {
        RelayOutcome::Completed {
            report: status,
            attempts,
        } => {
            report.detail(format!("outcome={label} attempts={attempts}"));
            apply_remote_stats(cfg, status, &mut report)?;
        }
        RelayOutcome::StaleAccepted {
            report: status,
            attempts,
        } => {
            report.detail(format!("outcome={label} attempts={attempts}"));
            if let Some(updated) = &status.last_updated {
                report.detail(format!("last_updated={updated}"));
            }
            apply_remote_stats(cfg, status, &mut report)?;
        }
        RelayOutcome::TimedOut { attempts } => {
            report.detail(format!("outcome={label} attempts={attempts}"));
            report.issue(format!(
                "background collection did not finish after {attempts} status checks"
            ));
        }
        RelayOutcome::Failed { reason, attempts } => {
            report.detail(format!("outcome={label} attempts={attempts}"));
            report.issue(reason);
        }
    }

    Ok(report)
}

fn apply_remote_stats(
    cfg: &StatsConfig,
    status: StatusReport,
    report: &mut CommandReport,
) -> Result<()> {
    let incoming = status
        .stats
        .ok_or_else(|| anyhow!("background job finished without returning stats"))?;

    let _lock = dataset::lock_output(&cfg.output_file)?;
    let mut stored = dataset::load(&cfg.output_file)?;
    let written = dataset::overlay(&mut stored, &incoming);
    dataset::save(&cfg.output_file, &stored)?;

    tracing::info!(
        output = %cfg.output_file.display(),
        months = written,
        "remote stats written"
    );
    for (key, record) in &incoming {
        report.detail(month_line(key, record));
    }
    report.detail(format!("output={}", cfg.output_file.display()));
    Ok(())
}
