use crate::stats::bucket::MonthlyBuckets;
use crate::stats::enumerate::Container;
use crate::stats::platform::MessagePlatform;
use crate::stats::util::Sleeper;
use crate::stats::warn::{self, WarnEvent};
use crate::stats::window::ScanWindow;
use std::time::Duration;

pub const MAX_PAGE_SIZE: u16 = 100;
pub const DEFAULT_PAGE_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOptions {
    pub page_size: u16,
    pub page_delay: Duration,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            page_delay: Duration::from_millis(DEFAULT_PAGE_DELAY_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStop {
    /// History ran out (empty or short page).
    Exhausted,
    /// A message older than the window start was seen.
    ReachedWindowStart,
    /// The page cursor did not move.
    CursorStalled,
    /// A page fetch failed; facts counted before it are kept.
    FetchFailed,
}

impl WalkStop {
    pub fn label(self) -> &'static str {
        match self {
            WalkStop::Exhausted => "exhausted",
            WalkStop::ReachedWindowStart => "reached-window-start",
            WalkStop::CursorStalled => "cursor-stalled",
            WalkStop::FetchFailed => "fetch-failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOutcome {
    pub pages: usize,
    pub counted: u64,
    pub skipped_newer: u64,
    pub stop: WalkStop,
}

/// Pages backward through one container's history, filing every message in
/// `[window.start, window.end)` into `buckets`.
///
/// The first message older than the window abandons the container: pages
/// arrive newest first, so nothing further back can fall inside the window.
/// Messages newer than the window are skipped without stopping.
pub fn walk_container(
    platform: &dyn MessagePlatform,
    sleeper: &dyn Sleeper,
    guild_id: &str,
    container: &Container,
    window: &ScanWindow,
    opts: &WalkOptions,
    buckets: &mut MonthlyBuckets,
) -> WalkOutcome {
    let page_size = opts.page_size.clamp(1, MAX_PAGE_SIZE);
    let mut out = WalkOutcome {
        pages: 0,
        counted: 0,
        skipped_newer: 0,
        stop: WalkStop::Exhausted,
    };
    let mut cursor: Option<String> = None;

    loop {
        if out.pages > 0 {
            sleeper.sleep(opts.page_delay);
        }

        let page = match platform.message_page(&container.id, page_size, cursor.as_deref()) {
            Ok(page) => page,
            Err(err) => {
                warn::emit(WarnEvent {
                    code: "PAGE_FETCH_FAILED",
                    stage: "walk",
                    action: "fetch-page",
                    guild: guild_id,
                    container: &container.name,
                    reason: "container-abandoned",
                    err: &format!("{err:#}"),
                });
                out.stop = WalkStop::FetchFailed;
                return out;
            }
        };
        out.pages += 1;

        let Some(oldest) = page.last() else {
            out.stop = WalkStop::Exhausted;
            return out;
        };
        // A repeated page would file the same messages twice.
        if cursor.as_deref() == Some(oldest.id.as_str()) {
            out.stop = WalkStop::CursorStalled;
            return out;
        }

        for fact in &page {
            if window.is_before_start(fact.timestamp) {
                out.stop = WalkStop::ReachedWindowStart;
                return out;
            }
            if window.contains(fact.timestamp) {
                buckets.record(window, fact);
                out.counted += 1;
            } else {
                out.skipped_newer += 1;
            }
        }

        if page.len() < usize::from(page_size) {
            out.stop = WalkStop::Exhausted;
            return out;
        }
        cursor = Some(oldest.id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::platform::MessageFact;
    use crate::stats::testing::{FakePlatform, RecordingSleeper, fact, utc};
    use crate::stats::window::MonthKey;
    use chrono::Duration as ChronoDuration;
    use chrono_tz::Tz;

    fn container(id: &str) -> Container {
        Container {
            id: id.to_string(),
            name: id.to_string(),
            parent_id: None,
        }
    }

    fn february() -> ScanWindow {
        ScanWindow::monthly(utc("2024-03-10T12:00:00Z"), Tz::UTC).expect("window")
    }

    fn feb_key() -> MonthKey {
        MonthKey::new(2024, 2).expect("key")
    }

    fn run(
        platform: &FakePlatform,
        opts: WalkOptions,
    ) -> (WalkOutcome, MonthlyBuckets, RecordingSleeper) {
        let window = february();
        let mut buckets = MonthlyBuckets::for_window(&window);
        let sleeper = RecordingSleeper::default();
        let out = walk_container(
            platform,
            &sleeper,
            "g1",
            &container("c1"),
            &window,
            &opts,
            &mut buckets,
        );
        (out, buckets, sleeper)
    }

    fn hourly(prefix: &str, start: &str, count: usize) -> Vec<MessageFact> {
        let base = utc(start);
        (0..count)
            .map(|i| MessageFact {
                id: format!("{prefix}{i:04}"),
                timestamp: base + ChronoDuration::hours(i as i64),
                author_id: format!("user{}", i % 7),
                is_bot: false,
            })
            .collect()
    }

    #[test]
    fn boundary_messages_follow_half_open_window() {
        let platform = FakePlatform::new(1).with_history(
            "c1",
            vec![
                fact("m3", "2024-03-01T00:00:00Z", "late", false),
                fact("m2", "2024-02-01T00:00:00Z", "edge", false),
                fact("m1", "2024-01-31T23:59:59Z", "early", false),
            ],
        );

        let (out, buckets, _) = run(&platform, WalkOptions::default());
        let feb = buckets.get(&feb_key()).expect("feb");
        assert_eq!(feb.total_messages, 1);
        assert!(feb.unique_posters.contains("edge"));
        assert_eq!(out.skipped_newer, 1);
        assert_eq!(out.stop, WalkStop::ReachedWindowStart);
    }

    #[test]
    fn bot_messages_add_to_total_only() {
        let platform = FakePlatform::new(1).with_history(
            "c1",
            vec![
                fact("m1", "2024-02-03T00:00:00Z", "a", false),
                fact("m2", "2024-02-04T00:00:00Z", "bot", true),
                fact("m3", "2024-02-05T00:00:00Z", "bot", true),
            ],
        );

        let (out, buckets, _) = run(&platform, WalkOptions::default());
        let feb = buckets.get(&feb_key()).expect("feb");
        assert_eq!(out.counted, 3);
        assert_eq!(feb.total_messages, 3);
        assert_eq!(feb.unique_poster_count(), 1);
    }

    #[test]
    fn history_entirely_before_window_costs_one_page() {
        let history = hourly("old", "2023-06-01T00:00:00Z", 250);
        let platform = FakePlatform::new(1).with_history("c1", history);

        let (out, buckets, sleeper) = run(&platform, WalkOptions::default());
        assert_eq!(out.stop, WalkStop::ReachedWindowStart);
        assert_eq!(out.pages, 1);
        assert!(platform.scan_calls("c1").len() <= 3);
        assert_eq!(buckets.total_messages(), 0);
        assert_eq!(sleeper.count(), 0);
    }

    #[test]
    fn pages_chain_cursor_and_pause_between_requests() {
        let history = hourly("m", "2024-02-01T00:00:00Z", 250);
        let platform = FakePlatform::new(1).with_history("c1", history);

        let (out, buckets, sleeper) = run(&platform, WalkOptions::default());
        assert_eq!(out.stop, WalkStop::Exhausted);
        assert_eq!(out.pages, 3);
        assert_eq!(out.counted, 250);
        let feb = buckets.get(&feb_key()).expect("feb");
        assert_eq!(feb.unique_poster_count(), 7);

        let calls = platform.scan_calls("c1");
        assert_eq!(calls[0].before, None);
        assert_eq!(calls[1].before.as_deref(), Some("m0150"));
        assert_eq!(calls[2].before.as_deref(), Some("m0050"));
        assert_eq!(sleeper.count(), 2);
        assert_eq!(sleeper.total(), Duration::from_millis(1000));
    }

    #[test]
    fn stalled_cursor_stops_the_walk() {
        let history = hourly("m", "2024-02-01T00:00:00Z", 10);
        let mut platform = FakePlatform::new(1).with_history("c1", history);
        platform.stuck_cursor.insert("c1".to_string());
        let opts = WalkOptions {
            page_size: 5,
            page_delay: Duration::ZERO,
        };

        let (out, buckets, _) = run(&platform, opts);
        assert_eq!(out.stop, WalkStop::CursorStalled);
        assert_eq!(out.pages, 2);
        assert_eq!(out.counted, 5);
        assert_eq!(buckets.total_messages(), 5);
    }

    #[test]
    fn fetch_failure_abandons_container_but_keeps_counted_facts() {
        let history = hourly("m", "2024-02-01T00:00:00Z", 150);
        let mut platform = FakePlatform::new(1).with_history("c1", history);
        platform.fail_after_pages.insert("c1".to_string(), 1);

        let (out, buckets, _) = run(&platform, WalkOptions::default());
        assert_eq!(out.stop, WalkStop::FetchFailed);
        assert_eq!(out.pages, 1);
        assert_eq!(buckets.total_messages(), 100);
    }

    #[test]
    fn empty_history_is_exhausted_immediately() {
        let platform = FakePlatform::new(1);
        let (out, _, _) = run(&platform, WalkOptions::default());
        assert_eq!(out.stop, WalkStop::Exhausted);
        assert_eq!(out.pages, 1);
    }
}
