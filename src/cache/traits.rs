//! Core traits and types for the caching system.

use tokio::time::Instant;

/// Trait for records that can be cached and patched by change events.
///
/// Implementors must provide a stable identity so that Updated and Deleted
/// events can find the record they refer to.
pub trait Record: Clone + Send + Sync + 'static {
  /// Unique identifier for this record within its resource (e.g., customer id)
  fn id(&self) -> String;
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was fetched from the transport
  pub fetched_at: Option<Instant>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from a fetch this caller issued.
  pub fn from_network(data: T, fetched_at: Instant) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      fetched_at: Some(fetched_at),
    }
  }

  /// Create a new cache result from a fetch another caller issued.
  pub fn joined(data: T, fetched_at: Instant) -> Self {
    Self {
      data,
      source: CacheSource::Joined,
      fetched_at: Some(fetched_at),
    }
  }

  /// Create a new cache result from fresh cached data.
  pub fn from_cache(data: T, fetched_at: Instant) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      fetched_at: Some(fetched_at),
    }
  }

  /// Whether the data came over the wire during this call.
  pub fn is_network(&self) -> bool {
    matches!(self.source, CacheSource::Network | CacheSource::Joined)
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from a fetch this caller started
  Network,
  /// Data from an in-flight fetch started by another caller
  Joined,
  /// Data from cache, still within its TTL
  CacheFresh,
}
