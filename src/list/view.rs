//! Snapshot of a list as a UI renders it.

use std::sync::Arc;

use crate::error::SyncError;

/// Lifecycle state of a list view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListStatus {
  /// Not mounted yet
  #[default]
  Idle,
  /// A fetch for the current key is outstanding
  Loading,
  /// Items reflect the last fetch plus any live patches
  Ready,
  /// The last fetch failed; items still hold the last good data
  Error,
}

impl ListStatus {
  pub fn is_loading(&self) -> bool {
    matches!(self, ListStatus::Loading)
  }

  pub fn is_ready(&self) -> bool {
    matches!(self, ListStatus::Ready)
  }

  pub fn is_error(&self) -> bool {
    matches!(self, ListStatus::Error)
  }
}

/// Snapshot of what a UI should display.
#[derive(Debug, Clone)]
pub struct ListView<T, F> {
  pub items: Arc<Vec<T>>,
  pub status: ListStatus,
  /// Error of the most recent failed fetch, cleared by the next success
  pub error: Option<SyncError>,
  /// Filter the items were fetched with
  pub filter: F,
  pub page: usize,
  /// Cache key of the current query
  pub key: String,
}

impl<T, F: Default> Default for ListView<T, F> {
  fn default() -> Self {
    Self {
      items: Arc::new(Vec::new()),
      status: ListStatus::Idle,
      error: None,
      filter: F::default(),
      page: 0,
      key: String::new(),
    }
  }
}

impl<T, F> ListView<T, F> {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// Line for a status bar, in the style of "Customers (loading...)".
  pub fn title(&self, label: &str) -> String {
    match (&self.status, &self.error) {
      (ListStatus::Loading, _) => format!("{} (loading...)", label),
      (ListStatus::Error, Some(e)) => format!("{} (error: {})", label, e),
      _ => format!("{} ({})", label, self.items.len()),
    }
  }
}
