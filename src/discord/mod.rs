//! Discord REST client implementing the engine's platform seam.

mod client;

pub use client::DiscordClient;
