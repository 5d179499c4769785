//! Capabilities the core consumes from the outside world.
//!
//! The core never talks to a network itself. A read transport fetches one
//! page of rows, a write transport applies a single mutation, and a
//! realtime transport delivers change events for a resource.

pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;

use crate::cache::{Record, SortOrder};
use crate::error::SyncResult;
use crate::list::FilterSchema;
use crate::realtime::ChangeEvent;

pub use memory::MemoryBackend;

/// One page of a filtered, sorted listing.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest<F> {
  pub resource: String,
  pub filter: F,
  pub sort: SortOrder,
  /// Zero-based page index
  pub page: usize,
  pub page_size: usize,
}

impl<F> PageRequest<F> {
  /// Index of the first row of this page. Saturates, so a page far past
  /// the end is simply empty.
  pub fn offset(&self) -> usize {
    self.page.saturating_mul(self.page_size)
  }
}

/// Idempotent, side-effect-free read of one page.
///
/// May be called any number of times, concurrently.
#[async_trait]
pub trait ReadTransport<T: Record, F: FilterSchema<T>>: Send + Sync {
  async fn fetch_page(&self, request: PageRequest<F>) -> SyncResult<Vec<T>>;
}

/// A write against a single record.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation<T> {
  Create(T),
  Update(T),
  Delete { id: String },
}

#[async_trait]
pub trait WriteTransport<T: Record>: Send + Sync {
  /// Apply `mutation` to `resource`, returning the stored record
  /// (`None` for deletes).
  async fn mutate(&self, resource: &str, mutation: Mutation<T>) -> SyncResult<Option<T>>;
}

/// Callback the realtime transport invokes once per event, in emission order.
pub type EventSink<T> = Arc<dyn Fn(ChangeEvent<T>) + Send + Sync>;

/// Closes a realtime subscription.
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

pub trait RealtimeTransport<T: Record>: Send + Sync {
  /// Start delivering events for `resource` to `sink` until the returned
  /// closure is called.
  ///
  /// Events passed to `sink` before `subscribe` has returned may be
  /// dropped by the caller.
  fn subscribe(&self, resource: &str, sink: EventSink<T>) -> SyncResult<Unsubscribe>;
}
