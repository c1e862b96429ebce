pub mod bucket;
pub mod config;
pub mod dataset;
pub mod enumerate;
pub mod orchestrator;
pub mod platform;
pub mod relay;
pub mod util;
pub mod walker;
pub mod warn;
pub mod window;

#[cfg(test)]
pub mod testing;
