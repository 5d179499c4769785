//! Debounced value: keystroke-rate drafts in, settled commits out.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// A committed value together with how many commits preceded it.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit<V> {
  pub value: V,
  /// 0 for the initial value, incremented on every commit
  pub seq: u64,
}

struct Draft<V> {
  value: V,
  /// Bumped on every draft change; a timer only commits if it still
  /// matches
  generation: u64,
  /// Set by a draft change, cleared by the commit that covers it
  dirty: bool,
}

fn lock<V>(draft: &Mutex<Draft<V>>) -> MutexGuard<'_, Draft<V>> {
  draft.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds a draft that changes on every keystroke and a committed value that
/// only changes once the draft has been left alone for `window`.
///
/// Each [`set_draft`](Self::set_draft) cancels the running timer and starts
/// a new one, so a burst of edits produces exactly one commit carrying the
/// last value of the burst.
pub struct DebouncedValue<V> {
  window: Duration,
  draft: Arc<Mutex<Draft<V>>>,
  committed: Arc<watch::Sender<Commit<V>>>,
  timer: Option<JoinHandle<()>>,
}

impl<V> DebouncedValue<V>
where
  V: Clone + Send + Sync + 'static,
{
  pub fn new(initial: V, window: Duration) -> Self {
    let (committed, _) = watch::channel(Commit {
      value: initial.clone(),
      seq: 0,
    });
    Self {
      window,
      draft: Arc::new(Mutex::new(Draft {
        value: initial,
        generation: 0,
        dirty: false,
      })),
      committed: Arc::new(committed),
      timer: None,
    }
  }

  pub fn window(&self) -> Duration {
    self.window
  }

  /// Latest value entered, committed or not.
  pub fn draft(&self) -> V {
    lock(&self.draft).value.clone()
  }

  /// Value most recently committed.
  pub fn committed(&self) -> V {
    self.committed.borrow().value.clone()
  }

  /// Number of commits so far.
  pub fn commits(&self) -> u64 {
    self.committed.borrow().seq
  }

  /// Watch committed values.
  pub fn subscribe(&self) -> watch::Receiver<Commit<V>> {
    self.committed.subscribe()
  }

  /// Whether a draft is waiting for its quiet period to end.
  pub fn is_pending(&self) -> bool {
    lock(&self.draft).dirty
  }

  /// Replace the draft and restart the quiet-period timer.
  pub fn set_draft(&mut self, value: V) {
    let generation = {
      let mut draft = lock(&self.draft);
      draft.value = value;
      draft.generation += 1;
      draft.dirty = true;
      draft.generation
    };

    if let Some(timer) = self.timer.take() {
      timer.abort();
    }

    let window = self.window;
    let draft = Arc::clone(&self.draft);
    let committed = Arc::clone(&self.committed);
    self.timer = Some(tokio::spawn(async move {
      tokio::time::sleep(window).await;
      let mut draft = lock(&draft);
      if draft.generation != generation {
        return;
      }
      draft.dirty = false;
      commit(&committed, draft.value.clone());
    }));
  }

  /// Commit the current draft now instead of waiting for the timer.
  /// Returns false if there was nothing waiting to be committed.
  pub fn flush(&mut self) -> bool {
    if let Some(timer) = self.timer.take() {
      timer.abort();
    }

    let mut draft = lock(&self.draft);
    if !draft.dirty {
      return false;
    }
    // Also invalidates a timer that already woke up but has not taken the lock.
    draft.generation += 1;
    draft.dirty = false;
    commit(&self.committed, draft.value.clone());
    true
  }
}

fn commit<V>(committed: &watch::Sender<Commit<V>>, value: V) {
  committed.send_modify(|current| {
    current.value = value;
    current.seq += 1;
    debug!(seq = current.seq, "committed debounced value");
  });
}

impl<V> Drop for DebouncedValue<V> {
  fn drop(&mut self) {
    if let Some(timer) = self.timer.take() {
      timer.abort();
    }
  }
}
