//! Change events and the per-resource live feed multiplexer.

mod event;
mod multiplexer;

pub use event::{ChangeEvent, ChangeKind};
pub use multiplexer::{Subscription, SubscriptionMultiplexer};
