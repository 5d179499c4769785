//! Composition root for one record type.

use std::sync::Arc;

use crate::cache::{CacheStore, Record};
use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::list::{FilterSchema, ListOptions, LiveList};
use crate::realtime::SubscriptionMultiplexer;
use crate::transport::{MemoryBackend, ReadTransport, RealtimeTransport, WriteTransport};

/// Owns the cache and the multiplexer shared by every list of `T`, plus the
/// transports they talk to.
///
/// Build one per record type at application start and hand clones to the
/// views that need it.
pub struct SyncClient<T: Record, F: FilterSchema<T>> {
  pub(crate) cache: CacheStore<T>,
  pub(crate) multiplexer: Arc<SubscriptionMultiplexer<T>>,
  pub(crate) reader: Arc<dyn ReadTransport<T, F>>,
  pub(crate) writer: Arc<dyn WriteTransport<T>>,
  defaults: ListOptions,
}

impl<T: Record, F: FilterSchema<T>> SyncClient<T, F> {
  pub fn new(
    reader: Arc<dyn ReadTransport<T, F>>,
    writer: Arc<dyn WriteTransport<T>>,
    realtime: Arc<dyn RealtimeTransport<T>>,
    config: &SyncConfig,
  ) -> SyncResult<Self> {
    let defaults = config.list_options();
    defaults.validate()?;

    Ok(Self {
      cache: CacheStore::new(),
      multiplexer: Arc::new(SubscriptionMultiplexer::new(realtime, config.guard_window())),
      reader,
      writer,
      defaults,
    })
  }

  /// Client whose three transports are all `backend`.
  pub fn in_memory(backend: &MemoryBackend<T>, config: &SyncConfig) -> SyncResult<Self> {
    Self::new(
      Arc::new(backend.clone()),
      Arc::new(backend.clone()),
      Arc::new(backend.clone()),
      config,
    )
  }

  /// Mount a live list of `resource` with the configured defaults.
  pub fn use_list(&self, resource: &str) -> SyncResult<LiveList<T, F>> {
    LiveList::mount(self, resource, self.defaults.clone())
  }

  /// Mount a live list of `resource` with explicit options.
  pub fn use_list_with(&self, resource: &str, options: ListOptions) -> SyncResult<LiveList<T, F>> {
    LiveList::mount(self, resource, options)
  }

  pub fn cache(&self) -> &CacheStore<T> {
    &self.cache
  }

  pub fn multiplexer(&self) -> &SubscriptionMultiplexer<T> {
    &self.multiplexer
  }

  pub fn defaults(&self) -> &ListOptions {
    &self.defaults
  }
}

impl<T: Record, F: FilterSchema<T>> Clone for SyncClient<T, F> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
      multiplexer: Arc::clone(&self.multiplexer),
      reader: Arc::clone(&self.reader),
      writer: Arc::clone(&self.writer),
      defaults: self.defaults.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::demo::Customer;
  use crate::error::SyncError;
  use crate::list::SearchFilter;

  #[tokio::test]
  async fn test_rejects_zero_page_size() {
    let backend: MemoryBackend<Customer> = MemoryBackend::new();
    let config = SyncConfig {
      page_size: 0,
      ..SyncConfig::default()
    };
    let result = SyncClient::<Customer, SearchFilter>::in_memory(&backend, &config);
    assert!(matches!(
      result,
      Err(SyncError::InvalidOption {
        name: "page_size",
        ..
      })
    ));
  }

  #[tokio::test]
  async fn test_clones_share_cache_and_feeds() {
    let backend: MemoryBackend<Customer> = MemoryBackend::new();
    let client: SyncClient<Customer, SearchFilter> =
      SyncClient::in_memory(&backend, &SyncConfig::default()).unwrap();
    let other = client.clone();

    let _a = client.use_list("customers").unwrap();
    let _b = other.use_list("customers").unwrap();
    assert_eq!(backend.subscribe_count(), 1);
    assert_eq!(client.multiplexer().listener_count("customers"), 2);
  }
}
