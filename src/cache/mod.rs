//! Query cache shared by every list view of a record type.
//!
//! This module provides a transport-agnostic cache that:
//! - Serves values younger than a TTL without touching the transport
//! - Shares one in-flight fetch between every caller of the same key
//! - Applies fetch results in issue order ("last issued wins")
//! - Keeps the last good value when a fetch fails

mod key;
mod store;
mod traits;

pub use key::{ListQueryKey, QueryKey, SortOrder};
pub use store::CacheStore;
pub use traits::{CacheResult, CacheSource, Record};
