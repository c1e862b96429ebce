//! Client for the trigger/status endpoints of a background collector.

mod job_api;

pub use job_api::HttpStatsRelay;
