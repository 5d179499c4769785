//! Live list views composed from the cache, the multiplexer and a
//! debounced filter.

mod filter;
mod orchestrator;
mod view;

pub use filter::{FilterSchema, SearchFilter, Searchable};
pub use orchestrator::{ListOptions, LiveList};
pub use view::{ListStatus, ListView};
