//! Filters that key list queries.

/// A filter value that can be committed from a search box and used to
/// derive cache keys.
pub trait FilterSchema<T>: Clone + PartialEq + Default + Send + Sync + 'static {
  /// Canonical encoding of this filter used as part of the cache key.
  /// Equal filters must produce equal fragments.
  fn cache_fragment(&self) -> String;

  /// Whether `record` passes this filter.
  fn matches(&self, record: &T) -> bool;
}

/// Records that can be matched by [`SearchFilter`].
pub trait Searchable {
  /// Text the free-form search is matched against
  fn search_text(&self) -> String;

  /// Status the status filter is matched against, if the record has one
  fn status(&self) -> Option<&str>;
}

/// Free-text search plus an optional status, the usual dashboard filter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchFilter {
  pub search: String,
  pub status: Option<String>,
}

impl SearchFilter {
  pub fn search(text: impl Into<String>) -> Self {
    Self {
      search: text.into(),
      status: None,
    }
  }

  pub fn with_status(mut self, status: impl Into<String>) -> Self {
    self.status = Some(status.into());
    self
  }
}

impl<T: Searchable> FilterSchema<T> for SearchFilter {
  fn cache_fragment(&self) -> String {
    let search = self.search.trim().to_lowercase();
    match &self.status {
      Some(status) => format!("q={}&status={}", search, status.to_lowercase()),
      None => format!("q={}", search),
    }
  }

  fn matches(&self, record: &T) -> bool {
    let search = self.search.trim().to_lowercase();
    if !search.is_empty() && !record.search_text().to_lowercase().contains(&search) {
      return false;
    }

    match &self.status {
      None => true,
      Some(wanted) => record
        .status()
        .is_some_and(|status| status.eq_ignore_ascii_case(wanted)),
    }
  }
}
