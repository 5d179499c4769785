//! Keyed query cache with TTL freshness and in-flight request sharing.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::traits::{CacheResult, Record};
use crate::error::{SyncError, SyncResult};

/// Rows produced by one completed fetch.
#[derive(Debug)]
struct Fetched<T> {
  data: Arc<Vec<T>>,
  fetched_at: Instant,
}

impl<T> Clone for Fetched<T> {
  fn clone(&self) -> Self {
    Self {
      data: Arc::clone(&self.data),
      fetched_at: self.fetched_at,
    }
  }
}

type SharedFetch<T> = Shared<BoxFuture<'static, SyncResult<Fetched<T>>>>;

struct PendingRequest<T> {
  seq: u64,
  result: SharedFetch<T>,
}

struct CacheEntry<T> {
  /// Last successfully fetched rows
  value: Option<Arc<Vec<T>>>,
  fetched_at: Option<Instant>,
  pending: Option<PendingRequest<T>>,
  /// Sequence number of the most recently issued request for this key
  issued: u64,
}

impl<T> Default for CacheEntry<T> {
  fn default() -> Self {
    Self {
      value: None,
      fetched_at: None,
      pending: None,
      issued: 0,
    }
  }
}

impl<T> CacheEntry<T> {
  fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
    self
      .fetched_at
      .is_some_and(|at| now.saturating_duration_since(at) < ttl)
  }
}

type Entries<T> = Arc<Mutex<HashMap<String, CacheEntry<T>>>>;

fn lock<T>(entries: &Entries<T>) -> MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
  entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks request `seq` for `key` as no longer in flight when dropped,
/// however the fetch ended.
struct PendingSlot<T> {
  entries: Entries<T>,
  key: String,
  seq: u64,
}

impl<T> Drop for PendingSlot<T> {
  fn drop(&mut self) {
    let mut entries = lock(&self.entries);
    if let Some(entry) = entries.get_mut(&self.key) {
      if entry.pending.as_ref().is_some_and(|p| p.seq == self.seq) {
        entry.pending = None;
      }
    }
  }
}

/// Process-wide query cache.
///
/// Guarantees at most one in-flight request per key: callers that arrive
/// while a fetch is running share its result instead of issuing their own.
/// Results are applied in issue order; a fetch that has been superseded
/// by a later one for the same key never overwrites the stored value.
///
/// All bookkeeping happens under a short synchronous lock that is never
/// held across an await point or while calling a loader.
///
/// Entries that are neither fresh nor in flight are swept whenever a new
/// key is added, so the map tracks the working set rather than every key
/// ever requested.
pub struct CacheStore<T: Record> {
  entries: Entries<T>,
  /// Source of request sequence numbers, shared by every key so a number
  /// is never reused even after its entry has been swept
  next_seq: Arc<AtomicU64>,
}

impl<T: Record> CacheStore<T> {
  pub fn new() -> Self {
    Self {
      entries: Arc::new(Mutex::new(HashMap::new())),
      next_seq: Arc::new(AtomicU64::new(0)),
    }
  }

  fn next_seq(&self) -> u64 {
    self.next_seq.fetch_add(1, Ordering::Relaxed) + 1
  }

  /// Read `key` through the cache.
  ///
  /// 1. If the stored value is younger than `ttl`, return it without calling `loader`
  /// 2. If a fetch for `key` is in flight, wait for that fetch instead
  /// 3. Otherwise call `loader` and record it as the pending request
  ///
  /// A failed fetch leaves the previously stored value in place so it can
  /// still be read with [`CacheStore::peek`]. A fetch that panics reaches
  /// its callers as [`SyncError::Cancelled`] and leaves the key usable.
  pub async fn get<F, Fut>(
    &self,
    key: &str,
    ttl: Duration,
    loader: F,
  ) -> SyncResult<CacheResult<Arc<Vec<T>>>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = SyncResult<Vec<T>>> + Send + 'static,
  {
    let (request, issued) = {
      let mut entries = lock(&self.entries);
      let now = Instant::now();

      if !entries.contains_key(key) {
        let swept = Self::sweep(&mut entries, now, ttl);
        if swept > 0 {
          debug!(swept, "swept expired cache entries");
        }
      }
      let entry = entries.entry(key.to_string()).or_default();

      if let (Some(value), Some(fetched_at)) = (&entry.value, entry.fetched_at) {
        if entry.is_fresh(now, ttl) {
          debug!(key, "cache hit");
          return Ok(CacheResult::from_cache(Arc::clone(value), fetched_at));
        }
      }

      match &entry.pending {
        Some(pending) => {
          debug!(key, seq = pending.seq, "joining in-flight fetch");
          (pending.result.clone(), None)
        }
        None => {
          let seq = self.next_seq();
          entry.issued = seq;
          debug!(key, seq, "issuing fetch");

          let (tx, rx) = oneshot::channel();
          let cancelled_key = key.to_string();
          let result = async move {
            rx.await
              .unwrap_or_else(|_| Err(SyncError::Cancelled { key: cancelled_key }))
          }
          .boxed()
          .shared();
          entry.pending = Some(PendingRequest {
            seq,
            result: result.clone(),
          });
          (result, Some((seq, tx)))
        }
      }
    };

    let issued_here = issued.is_some();
    if let Some((seq, tx)) = issued {
      // Created before the loader runs so that a panicking loader still
      // releases the pending request.
      let slot = PendingSlot {
        entries: Arc::clone(&self.entries),
        key: key.to_string(),
        seq,
      };
      self.spawn_fetch(slot, loader(), tx);
    }

    let fetched = request.await?;
    Ok(if issued_here {
      CacheResult::from_network(fetched.data, fetched.fetched_at)
    } else {
      CacheResult::joined(fetched.data, fetched.fetched_at)
    })
  }

  /// Run the fetch on its own task so that it completes, and updates the
  /// cache, even if every caller waiting on it goes away.
  fn spawn_fetch<Fut>(
    &self,
    slot: PendingSlot<T>,
    fetch: Fut,
    tx: oneshot::Sender<SyncResult<Fetched<T>>>,
  ) where
    Fut: Future<Output = SyncResult<Vec<T>>> + Send + 'static,
  {
    tokio::spawn(async move {
      let outcome = fetch.await;
      let fetched_at = Instant::now();

      let result = match outcome {
        Ok(rows) => {
          let data = Arc::new(rows);
          let mut entries = lock(&slot.entries);
          match entries.get_mut(&slot.key) {
            Some(entry) if entry.issued == slot.seq => {
              entry.value = Some(Arc::clone(&data));
              entry.fetched_at = Some(fetched_at);
            }
            latest => {
              debug!(
                key = %slot.key,
                seq = slot.seq,
                latest = ?latest.map(|entry| entry.issued),
                "discarding superseded fetch result"
              );
            }
          }
          Ok(Fetched { data, fetched_at })
        }
        Err(err) => {
          warn!(key = %slot.key, seq = slot.seq, error = %err, "fetch failed");
          Err(err)
        }
      };

      // Release the key before anyone is told, so that a caller reacting
      // to the result can issue a new request.
      drop(slot);
      let _ = tx.send(result);
    });
  }

  /// Forget the stored value for `key` so the next `get` refetches.
  ///
  /// An in-flight fetch keeps running for the callers already waiting on
  /// it, but its result is no longer stored and new callers do not join it.
  pub fn invalidate(&self, key: &str) {
    let seq = self.next_seq();
    let mut entries = lock(&self.entries);
    if let Some(entry) = entries.get_mut(key) {
      Self::reset(entry, seq);
      debug!(key, "invalidated");
    }
  }

  /// Invalidate every key that starts with `prefix`.
  pub fn invalidate_prefix(&self, prefix: &str) -> usize {
    let seq = self.next_seq();
    let mut entries = lock(&self.entries);
    let mut count = 0;
    for (_, entry) in entries.iter_mut().filter(|(k, _)| k.starts_with(prefix)) {
      Self::reset(entry, seq);
      count += 1;
    }
    debug!(prefix, count, "invalidated by prefix");
    count
  }

  fn reset(entry: &mut CacheEntry<T>, seq: u64) {
    entry.value = None;
    entry.fetched_at = None;
    entry.pending = None;
    // Supersede whatever is still in flight
    entry.issued = seq;
  }

  /// Drop every entry that is older than `ttl` and has no fetch in flight.
  pub fn evict_expired(&self, ttl: Duration) -> usize {
    let mut entries = lock(&self.entries);
    let evicted = Self::sweep(&mut entries, Instant::now(), ttl);
    debug!(evicted, "evicted expired cache entries");
    evicted
  }

  fn sweep(entries: &mut HashMap<String, CacheEntry<T>>, now: Instant, ttl: Duration) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.pending.is_some() || entry.is_fresh(now, ttl));
    before - entries.len()
  }

  /// Last stored value for `key`, fresh or not.
  pub fn peek(&self, key: &str) -> Option<Arc<Vec<T>>> {
    lock(&self.entries)
      .get(key)
      .and_then(|entry| entry.value.clone())
  }

  /// Whether a fetch for `key` is currently in flight.
  pub fn is_pending(&self, key: &str) -> bool {
    lock(&self.entries)
      .get(key)
      .is_some_and(|entry| entry.pending.is_some())
  }

  /// Number of keys the store knows about.
  pub fn len(&self) -> usize {
    lock(&self.entries).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl<T: Record> Default for CacheStore<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Record> Clone for CacheStore<T> {
  fn clone(&self) -> Self {
    Self {
      entries: Arc::clone(&self.entries),
      next_seq: Arc::clone(&self.next_seq),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheSource;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[derive(Debug, Clone, PartialEq)]
  struct Order(&'static str);

  impl Record for Order {
    fn id(&self) -> String {
      self.0.to_string()
    }
  }

  const TTL: Duration = Duration::from_secs(30);

  fn counting_loader(
    calls: &Arc<AtomicUsize>,
    rows: Vec<Order>,
    delay: Duration,
  ) -> impl FnOnce() -> BoxFuture<'static, SyncResult<Vec<Order>>> {
    let calls = Arc::clone(calls);
    move || {
      calls.fetch_add(1, Ordering::SeqCst);
      async move {
        tokio::time::sleep(delay).await;
        Ok(rows)
      }
      .boxed()
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_ttl_scenario() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let first = store
      .get(
        "orders:active",
        TTL,
        counting_loader(&calls, vec![Order("O1")], Duration::ZERO),
      )
      .await
      .unwrap();
    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(*first.data, vec![Order("O1")]);

    tokio::time::advance(Duration::from_secs(5)).await;
    let second = store
      .get(
        "orders:active",
        TTL,
        counting_loader(&calls, vec![Order("O2")], Duration::ZERO),
      )
      .await
      .unwrap();
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(*second.data, vec![Order("O1")]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(26)).await;
    let third = store
      .get(
        "orders:active",
        TTL,
        counting_loader(&calls, vec![Order("O1"), Order("O2")], Duration::ZERO),
      )
      .await
      .unwrap();
    assert_eq!(third.source, CacheSource::Network);
    assert_eq!(third.data.len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_gets_share_one_fetch() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let gets = (0..5).map(|_| {
      store.get(
        "orders:active",
        TTL,
        counting_loader(&calls, vec![Order("O1")], Duration::from_millis(100)),
      )
    });
    let results = futures::future::join_all(gets).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let sources: Vec<CacheSource> = results.iter().map(|r| r.as_ref().unwrap().source).collect();
    assert_eq!(
      sources.iter().filter(|s| **s == CacheSource::Network).count(),
      1
    );
    assert_eq!(
      sources.iter().filter(|s| **s == CacheSource::Joined).count(),
      4
    );
    assert!(!store.is_pending("orders:active"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_pending_visible_while_in_flight() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let background = store.clone();
    let loader = counting_loader(&calls, vec![Order("O1")], Duration::from_millis(100));
    let handle = tokio::spawn(async move { background.get("k", TTL, loader).await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(store.is_pending("k"));

    handle.await.unwrap().unwrap();
    assert!(!store.is_pending("k"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_last_issued_wins_when_earlier_fetch_finishes_late() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let slow_store = store.clone();
    let slow_loader = counting_loader(&calls, vec![Order("stale")], Duration::from_millis(200));
    let slow = tokio::spawn(async move { slow_store.get("k", TTL, slow_loader).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Second request issued after the first; it resolves first.
    store.invalidate("k");
    let fast = store
      .get(
        "k",
        TTL,
        counting_loader(&calls, vec![Order("fresh")], Duration::from_millis(20)),
      )
      .await
      .unwrap();
    assert_eq!(*fast.data, vec![Order("fresh")]);

    // The first caller still gets its own answer...
    let slow = slow.await.unwrap().unwrap();
    assert_eq!(*slow.data, vec![Order("stale")]);

    // ...but it never reaches the cache.
    assert_eq!(*store.peek("k").unwrap(), vec![Order("fresh")]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failure_reaches_all_callers_and_keeps_stale_value() {
    let store = CacheStore::new();
    store
      .get("k", Duration::ZERO, || async { Ok(vec![Order("O1")]) })
      .await
      .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let make_failing = || {
      let calls = Arc::clone(&calls);
      move || {
        calls.fetch_add(1, Ordering::SeqCst);
        async {
          tokio::time::sleep(Duration::from_millis(50)).await;
          Err(SyncError::read("boom"))
        }
      }
    };

    let (a, b) = tokio::join!(
      store.get("k", Duration::ZERO, make_failing()),
      store.get("k", Duration::ZERO, make_failing()),
    );
    assert_eq!(a.unwrap_err(), SyncError::read("boom"));
    assert_eq!(b.unwrap_err(), SyncError::read("boom"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*store.peek("k").unwrap(), vec![Order("O1")]);
    assert!(!store.is_pending("k"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_failure_on_one_key_leaves_others_alone() {
    let store = CacheStore::new();
    store
      .get("good", TTL, || async { Ok(vec![Order("G")]) })
      .await
      .unwrap();
    let err = store
      .get("bad", TTL, || async { Err(SyncError::read("down")) })
      .await;
    assert!(err.is_err());

    let good = store
      .get("good", TTL, || async { Ok(vec![Order("other")]) })
      .await
      .unwrap();
    assert_eq!(good.source, CacheSource::CacheFresh);
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidate_forces_refetch() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
      store
        .get(
          "k",
          TTL,
          counting_loader(&calls, vec![Order("O1")], Duration::ZERO),
        )
        .await
        .unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    store.invalidate("k");
    assert!(store.peek("k").is_none());
    store
      .get(
        "k",
        TTL,
        counting_loader(&calls, vec![Order("O1")], Duration::ZERO),
      )
      .await
      .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidate_prefix_only_touches_matching_keys() {
    let store = CacheStore::new();
    for key in ["orders:a", "orders:b", "customers:a"] {
      store
        .get(key, TTL, || async { Ok(vec![Order("x")]) })
        .await
        .unwrap();
    }

    assert_eq!(store.invalidate_prefix("orders:"), 2);
    assert!(store.peek("orders:a").is_none());
    assert!(store.peek("orders:b").is_none());
    assert!(store.peek("customers:a").is_some());
  }

  #[tokio::test(start_paused = true)]
  async fn test_fetch_completes_after_caller_drops() {
    let store = CacheStore::new();
    let background = store.clone();
    let handle = tokio::spawn(async move {
      background
        .get("k", TTL, || async {
          tokio::time::sleep(Duration::from_millis(100)).await;
          Ok(vec![Order("O1")])
        })
        .await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.abort();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(*store.peek("k").unwrap(), vec![Order("O1")]);
  }
  #[tokio::test(start_paused = true)]
  async fn test_panicking_fetch_leaves_key_usable() {
    let store: CacheStore<Order> = CacheStore::new();
    let result = store
      .get("k", Duration::ZERO, || async {
        let rows: Vec<Order> = Vec::new();
        if rows.is_empty() {
          panic!("loader blew up");
        }
        Ok(rows)
      })
      .await;
    assert_eq!(
      result.unwrap_err(),
      SyncError::Cancelled {
        key: "k".to_string()
      }
    );
    assert!(!store.is_pending("k"));

    let next = store
      .get("k", Duration::ZERO, || async { Ok(vec![Order("O1")]) })
      .await
      .unwrap();
    assert_eq!(next.source, CacheSource::Network);
    assert_eq!(*next.data, vec![Order("O1")]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_loader_that_panics_before_returning_a_future() {
    let store: CacheStore<Order> = CacheStore::new();
    let background = store.clone();
    let handle = tokio::spawn(async move {
      background
        .get("k", TTL, || -> BoxFuture<'static, SyncResult<Vec<Order>>> {
          panic!("no future for you")
        })
        .await
    });
    assert!(handle.await.is_err());
    assert!(!store.is_pending("k"));

    let next = store
      .get("k", TTL, || async { Ok(vec![Order("O1")]) })
      .await
      .unwrap();
    assert_eq!(next.source, CacheSource::Network);
  }

  #[tokio::test(start_paused = true)]
  async fn test_loader_may_use_the_store() {
    let store: CacheStore<Order> = CacheStore::new();
    let inner = store.clone();
    let result = store
      .get("k", TTL, move || {
        let own_request_pending = inner.is_pending("k");
        let cached_keys = inner.len();
        async move {
          assert!(own_request_pending);
          assert_eq!(cached_keys, 1);
          Ok(vec![Order("O1")])
        }
      })
      .await
      .unwrap();
    assert_eq!(*result.data, vec![Order("O1")]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_expired_entries_are_swept_when_new_keys_arrive() {
    let store = CacheStore::new();
    let ttl = Duration::from_secs(1);
    for i in 0..100 {
      store
        .get(&format!("orders:{}", i), ttl, || async { Ok(vec![Order("x")]) })
        .await
        .unwrap();
    }
    assert_eq!(store.len(), 100);

    tokio::time::advance(Duration::from_secs(3600)).await;
    store
      .get("orders:new", ttl, || async { Ok(vec![Order("y")]) })
      .await
      .unwrap();
    assert_eq!(store.len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_evict_expired_keeps_fresh_and_pending_entries() {
    let store = CacheStore::new();
    store
      .get("old", TTL, || async { Ok(vec![Order("x")]) })
      .await
      .unwrap();
    tokio::time::advance(Duration::from_secs(20)).await;
    store
      .get("young", TTL, || async { Ok(vec![Order("y")]) })
      .await
      .unwrap();

    let background = store.clone();
    let slow = tokio::spawn(async move {
      background
        .get("slow", TTL, || async {
          tokio::time::sleep(Duration::from_secs(60)).await;
          Ok(vec![Order("z")])
        })
        .await
    });
    tokio::time::sleep(Duration::from_secs(15)).await;

    assert_eq!(store.evict_expired(TTL), 1);
    assert!(store.peek("old").is_none());
    assert!(store.peek("young").is_some());
    assert!(store.is_pending("slow"));

    slow.await.unwrap().unwrap();
    assert!(store.peek("slow").is_some());
  }

  #[tokio::test(start_paused = true)]
  async fn test_superseded_fetch_stays_discarded_after_sweep() {
    let store = CacheStore::new();
    let background = store.clone();
    let slow = tokio::spawn(async move {
      background
        .get("k", TTL, || async {
          tokio::time::sleep(Duration::from_millis(200)).await;
          Ok(vec![Order("stale")])
        })
        .await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Invalidated, then swept away entirely before a new request for it.
    store.invalidate("k");
    assert_eq!(store.evict_expired(TTL), 1);
    let fresh_store = store.clone();
    let fresh = tokio::spawn(async move {
      fresh_store
        .get("k", TTL, || async {
          tokio::time::sleep(Duration::from_millis(500)).await;
          Ok(vec![Order("fresh")])
        })
        .await
    });

    slow.await.unwrap().unwrap();
    assert!(store.peek("k").is_none());

    assert_eq!(*fresh.await.unwrap().unwrap().data, vec![Order("fresh")]);
    assert_eq!(*store.peek("k").unwrap(), vec![Order("fresh")]);
  }
}
