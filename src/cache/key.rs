//! Cache key derivation for list queries.

use sha2::{Digest, Sha256};
use std::fmt;

/// Something that identifies one cacheable query.
pub trait QueryKey {
  /// Stable key used for cache lookups.
  fn cache_key(&self) -> String;

  /// Human-readable description for logs.
  fn description(&self) -> String;
}

/// Display ordering requested from the read transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
  /// Most recent first
  #[default]
  NewestFirst,
  OldestFirst,
}

impl fmt::Display for SortOrder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SortOrder::NewestFirst => f.write_str("newest"),
      SortOrder::OldestFirst => f.write_str("oldest"),
    }
  }
}

/// Key for one page of a filtered, sorted resource listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQueryKey {
  pub resource: String,
  /// Canonical encoding of the committed filter
  pub filter: String,
  pub sort: SortOrder,
  pub page: usize,
  pub page_size: usize,
}

impl ListQueryKey {
  /// Prefix shared by every key of `resource`.
  pub fn resource_prefix(resource: &str) -> String {
    format!("{}:", resource)
  }
}

impl QueryKey for ListQueryKey {
  fn cache_key(&self) -> String {
    let input = format!(
      "{}|{}|{}|{}",
      normalize_filter(&self.filter),
      self.sort,
      self.page,
      self.page_size
    );

    // SHA256 for stable, fixed-length keys; resource stays readable so
    // whole resources can be invalidated by prefix.
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}{}", Self::resource_prefix(&self.resource), &digest[..16])
  }

  fn description(&self) -> String {
    if self.filter.is_empty() {
      format!("{} page {} ({})", self.resource, self.page, self.sort)
    } else {
      format!(
        "{} [{}] page {} ({})",
        self.resource, self.filter, self.page, self.sort
      )
    }
  }
}

/// Normalize a filter encoding for consistent hashing.
/// Trims whitespace and lowercases for case-insensitive matching.
fn normalize_filter(filter: &str) -> String {
  filter.trim().to_lowercase()
}
