use crate::stats::platform::MessageFact;
use crate::stats::window::{MonthKey, ScanWindow};
use std::collections::{BTreeMap, BTreeSet};

/// Running tally for one calendar month within a single run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonthBucket {
    pub total_messages: u64,
    pub unique_posters: BTreeSet<String>,
}

impl MonthBucket {
    /// Bots add to the message count but never to the poster set, so
    /// `total_messages >= unique_posters.len()` always holds.
    pub fn record(&mut self, author_id: &str, is_bot: bool) {
        self.total_messages += 1;
        if !is_bot && !self.unique_posters.contains(author_id) {
            self.unique_posters.insert(author_id.to_string());
        }
    }

    pub fn unique_poster_count(&self) -> u64 {
        self.unique_posters.len() as u64
    }
}

/// Month buckets shared by every container scanned in one run.
#[derive(Debug, Clone)]
pub struct MonthlyBuckets {
    buckets: BTreeMap<MonthKey, MonthBucket>,
}

impl MonthlyBuckets {
    /// Pre-creates an empty bucket for every month in the window so months
    /// without activity still produce a zero record.
    pub fn for_window(window: &ScanWindow) -> Self {
        let buckets = window
            .months
            .iter()
            .map(|key| (*key, MonthBucket::default()))
            .collect();
        Self { buckets }
    }

    /// Files a fact under the month of its own timestamp.
    pub fn record(&mut self, window: &ScanWindow, fact: &MessageFact) -> MonthKey {
        let key = window.month_of(fact.timestamp);
        self.buckets
            .entry(key)
            .or_default()
            .record(&fact.author_id, fact.is_bot);
        key
    }

    #[cfg(test)]
    pub fn get(&self, key: &MonthKey) -> Option<&MonthBucket> {
        self.buckets.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MonthKey, &MonthBucket)> {
        self.buckets.iter()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn total_messages(&self) -> u64 {
        self.buckets.values().map(|b| b.total_messages).sum()
    }
}
