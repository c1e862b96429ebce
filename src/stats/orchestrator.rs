use crate::stats::bucket::MonthlyBuckets;
use crate::stats::dataset::{self, MonthRecord};
use crate::stats::enumerate::{SkippedContainer, enumerate_containers};
use crate::stats::platform::{GuildSummary, MessagePlatform};
use crate::stats::util::Sleeper;
use crate::stats::walker::{WalkOptions, WalkStop, walk_container};
use crate::stats::warn::{self, WarnEvent};
use crate::stats::window::{ScanMode, ScanWindow};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct CollectRequest<'a> {
    pub guild_id: &'a str,
    pub mode: ScanMode,
    pub timezone: Tz,
    pub now: DateTime<Utc>,
    pub output_file: &'a Path,
    pub walk: WalkOptions,
}

#[derive(Debug, Clone)]
pub struct CollectOutcome {
    pub guild: GuildSummary,
    pub window: ScanWindow,
    pub containers_scanned: usize,
    pub containers_failed: usize,
    pub skipped: Vec<SkippedContainer>,
    pub forums_skipped: usize,
    pub pages_fetched: usize,
    /// Records written this run, in key order.
    pub records: Vec<(String, MonthRecord)>,
    pub output_file: PathBuf,
    pub dataset_written: bool,
}

/// One full direct-shape run: lock and load the dataset, enumerate, walk
/// every container into shared month buckets, merge, and write once.
pub fn run_collection(
    platform: &dyn MessagePlatform,
    sleeper: &dyn Sleeper,
    req: &CollectRequest<'_>,
) -> Result<CollectOutcome> {
    let window = ScanWindow::for_mode(req.mode, req.now, req.timezone)?;
    let lock = dataset::lock_output(req.output_file)?;
    tracing::debug!(lock = %lock.path().display(), "output locked");
    let mut stored = dataset::load(req.output_file)?;

    let guild = platform
        .guild_summary(req.guild_id)
        .with_context(|| format!("failed to fetch guild {}", req.guild_id))?;

    let mut out = CollectOutcome {
        guild: guild.clone(),
        window: window.clone(),
        containers_scanned: 0,
        containers_failed: 0,
        skipped: Vec::new(),
        forums_skipped: 0,
        pages_fetched: 0,
        records: Vec::new(),
        output_file: req.output_file.to_path_buf(),
        dataset_written: false,
    };

    if window.is_empty() {
        warn::emit(WarnEvent {
            code: "EMPTY_WINDOW",
            stage: "orchestrate",
            action: "plan-window",
            guild: req.guild_id,
            container: "guild",
            reason: "no-complete-month-to-backfill",
            err: "na",
        });
        return Ok(out);
    }

    tracing::info!(
        guild = %guild.name,
        mode = req.mode.label(),
        start = %window.start,
        end = %window.end,
        months = window.months.len(),
        "scanning message history"
    );

    let enumeration = enumerate_containers(platform, req.guild_id)?;
    out.forums_skipped = enumeration.skipped_forums;

    let mut buckets = MonthlyBuckets::for_window(&window);
    for container in &enumeration.containers {
        let walk = walk_container(
            platform,
            sleeper,
            req.guild_id,
            container,
            &window,
            &req.walk,
            &mut buckets,
        );
        out.containers_scanned += 1;
        out.pages_fetched += walk.pages;
        if walk.stop == WalkStop::FetchFailed {
            out.containers_failed += 1;
        }
        tracing::info!(
            container = %container.name,
            parent = container.parent_id.as_deref().unwrap_or("-"),
            pages = walk.pages,
            counted = walk.counted,
            newer = walk.skipped_newer,
            stop = walk.stop.label(),
            "container scanned"
        );
    }

    out.skipped = enumeration.skipped;

    let written = dataset::merge_buckets(&mut stored, &buckets, guild.member_count);
    dataset::save(req.output_file, &stored)?;
    out.dataset_written = true;
    out.records = written
        .into_iter()
        .filter_map(|key| stored.get(&key).map(|record| (key, *record)))
        .collect();

    tracing::info!(
        output = %req.output_file.display(),
        months = out.records.len(),
        messages = buckets.total_messages(),
        "dataset written"
    );

    Ok(out)
}
