//! Client-side coordination between list views and remote data.
//!
//! - [`cache::CacheStore`] serves reads behind a TTL and shares in-flight fetches
//! - [`realtime::SubscriptionMultiplexer`] opens one live feed per resource
//! - [`debounce::DebouncedValue`] turns keystrokes into settled filter commits
//! - [`list::LiveList`] composes the three into a filterable, paginated view

pub mod cache;
pub mod client;
pub mod config;
pub mod debounce;
pub mod demo;
pub mod error;
pub mod list;
pub mod realtime;
pub mod transport;

pub use client::SyncClient;
pub use error::{SyncError, SyncResult};
