use anyhow::{Result, anyhow};
use chrono::{DateTime, Datelike, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt;

/// Calendar month identity. Ordering matches the `YYYY-MM` string ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(anyhow!("invalid month {month} for year {year}"));
        }
        if !(0..=9999).contains(&year) {
            return Err(anyhow!("year {year} cannot be written as YYYY"));
        }
        Ok(Self { year, month })
    }

    pub fn of<T: TimeZone>(at: &DateTime<T>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn prev(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// First instant of this month in `tz`, expressed in UTC.
    pub fn start_in(self, tz: Tz) -> Result<DateTime<Utc>> {
        tz.with_ymd_and_hms(self.year, self.month, 1, 0, 0, 0)
            .earliest()
            .map(|at| at.with_timezone(&Utc))
            .ok_or_else(|| anyhow!("month {self} has no local midnight in {tz}"))
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Monthly,
    Backfill { year: i32 },
}

impl ScanMode {
    pub fn label(self) -> &'static str {
        match self {
            ScanMode::Monthly => "monthly",
            ScanMode::Backfill { .. } => "backfill",
        }
    }
}

/// Half-open scan window `[start, end)` plus the month keys it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub tz: Tz,
    pub months: Vec<MonthKey>,
}

impl ScanWindow {
    pub fn for_mode(mode: ScanMode, now: DateTime<Utc>, tz: Tz) -> Result<Self> {
        match mode {
            ScanMode::Monthly => Self::monthly(now, tz),
            ScanMode::Backfill { year } => Self::backfill(year, now, tz),
        }
    }

    /// The calendar month before the one containing `now`.
    pub fn monthly(now: DateTime<Utc>, tz: Tz) -> Result<Self> {
        let current = MonthKey::of(&now.with_timezone(&tz));
        let previous = current.prev();
        Ok(Self {
            start: previous.start_in(tz)?,
            end: current.start_in(tz)?,
            tz,
            months: vec![previous],
        })
    }

    /// January of `year` up to (not including) the current month, capped at
    /// the end of `year` when backfilling a past year.
    pub fn backfill(year: i32, now: DateTime<Utc>, tz: Tz) -> Result<Self> {
        let current = MonthKey::of(&now.with_timezone(&tz));
        if year > current.year {
            return Err(anyhow!(
                "backfill year {year} is after the current year {}",
                current.year
            ));
        }

        let first = MonthKey::new(year, 1)?;
        let stop = MonthKey::new(year + 1, 1)?.min(current);

        let mut months = Vec::new();
        let mut cursor = first;
        while cursor < stop {
            months.push(cursor);
            cursor = cursor.next();
        }

        Ok(Self {
            start: first.start_in(tz)?,
            end: stop.start_in(tz)?,
            tz,
            months,
        })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }

    pub fn is_before_start(&self, at: DateTime<Utc>) -> bool {
        at < self.start
    }

    /// Month key of an instant, judged in the window's zone.
    pub fn month_of(&self, at: DateTime<Utc>) -> MonthKey {
        MonthKey::of(&at.with_timezone(&self.tz))
    }

    pub fn is_empty(&self) -> bool {
        self.months.is_empty()
    }
}
