//! clouddetect - public cloud IP range detection
//!
//! Fetches published CIDR ranges from Amazon, Google and Microsoft, caches
//! them in memory and optionally in a snapshot file shared across processes,
//! and resolves IPs against them.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod providers;

pub use cache::CacheSource;
pub use client::Client;
pub use config::Config;
pub use error::{DetectError, DetectResult};
pub use providers::{Provider, RangeFetcher, SubnetRecord};
