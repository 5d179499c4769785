//! In-memory backend implementing all three transports.
//!
//! Writes go through [`WriteTransport::mutate`] and are broadcast to live
//! subscribers as change events, the way a hosted database with a realtime
//! channel would behave. Counters and failure switches make it usable as an
//! instrumented transport in tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use super::{
  EventSink, Mutation, PageRequest, ReadTransport, RealtimeTransport, Unsubscribe, WriteTransport,
};
use crate::cache::{Record, SortOrder};
use crate::error::{SyncError, SyncResult};
use crate::list::FilterSchema;
use crate::realtime::ChangeEvent;

struct State<T> {
  /// Rows per resource, oldest first
  tables: HashMap<String, Vec<T>>,
  subscribers: HashMap<String, Vec<(u64, EventSink<T>)>>,
  next_subscriber: u64,
  latency: Duration,
  read_failure: Option<String>,
  write_failure: Option<String>,
  subscribe_failure: Option<String>,
  fetches: usize,
  subscribes: usize,
  unsubscribes: usize,
}

pub struct MemoryBackend<T> {
  state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for MemoryBackend<T> {
  fn clone(&self) -> Self {
    Self {
      state: Arc::clone(&self.state),
    }
  }
}

impl<T: Record> Default for MemoryBackend<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Record> MemoryBackend<T> {
  pub fn new() -> Self {
    Self {
      state: Arc::new(Mutex::new(State {
        tables: HashMap::new(),
        subscribers: HashMap::new(),
        next_subscriber: 0,
        latency: Duration::ZERO,
        read_failure: None,
        write_failure: None,
        subscribe_failure: None,
        fetches: 0,
        subscribes: 0,
        unsubscribes: 0,
      })),
    }
  }

  /// Simulated round-trip time for reads and writes.
  pub fn with_latency(self, latency: Duration) -> Self {
    self.lock().latency = latency;
    self
  }

  fn lock(&self) -> MutexGuard<'_, State<T>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Insert rows without emitting change events.
  pub fn seed(&self, resource: &str, rows: impl IntoIterator<Item = T>) {
    self
      .lock()
      .tables
      .entry(resource.to_string())
      .or_default()
      .extend(rows);
  }

  /// Current rows of `resource`, oldest first.
  pub fn rows(&self, resource: &str) -> Vec<T> {
    self.lock().tables.get(resource).cloned().unwrap_or_default()
  }

  /// Deliver `event` to every live subscriber of `resource` without
  /// touching the stored rows.
  pub fn emit(&self, resource: &str, event: ChangeEvent<T>) {
    let sinks: Vec<EventSink<T>> = self
      .lock()
      .subscribers
      .get(resource)
      .map(|subs| subs.iter().map(|(_, sink)| Arc::clone(sink)).collect())
      .unwrap_or_default();

    debug!(resource, id = %event.id(), kind = ?event.kind(), sinks = sinks.len(), "emitting");
    for sink in sinks {
      sink(event.clone());
    }
  }

  pub fn fail_reads(&self, message: Option<&str>) {
    self.lock().read_failure = message.map(String::from);
  }

  pub fn fail_writes(&self, message: Option<&str>) {
    self.lock().write_failure = message.map(String::from);
  }

  pub fn fail_subscribes(&self, message: Option<&str>) {
    self.lock().subscribe_failure = message.map(String::from);
  }

  pub fn fetch_count(&self) -> usize {
    self.lock().fetches
  }

  pub fn subscribe_count(&self) -> usize {
    self.lock().subscribes
  }

  pub fn unsubscribe_count(&self) -> usize {
    self.lock().unsubscribes
  }

  /// Number of open subscriptions on `resource`.
  pub fn live_subscriptions(&self, resource: &str) -> usize {
    self.lock().subscribers.get(resource).map_or(0, Vec::len)
  }

  fn latency(&self) -> Duration {
    self.lock().latency
  }
}

#[async_trait]
impl<T: Record, F: FilterSchema<T>> ReadTransport<T, F> for MemoryBackend<T> {
  async fn fetch_page(&self, request: PageRequest<F>) -> SyncResult<Vec<T>> {
    tokio::time::sleep(self.latency()).await;

    let mut state = self.lock();
    state.fetches += 1;
    if let Some(message) = &state.read_failure {
      return Err(SyncError::read(message.clone()));
    }

    let rows = state
      .tables
      .get(&request.resource)
      .map(Vec::as_slice)
      .unwrap_or(&[]);
    let matching: Box<dyn Iterator<Item = &T>> = match request.sort {
      SortOrder::NewestFirst => Box::new(rows.iter().rev()),
      SortOrder::OldestFirst => Box::new(rows.iter()),
    };

    Ok(
      matching
        .filter(|row| request.filter.matches(row))
        .skip(request.offset())
        .take(request.page_size)
        .cloned()
        .collect(),
    )
  }
}

#[async_trait]
impl<T: Record> WriteTransport<T> for MemoryBackend<T> {
  async fn mutate(&self, resource: &str, mutation: Mutation<T>) -> SyncResult<Option<T>> {
    tokio::time::sleep(self.latency()).await;

    let (event, stored) = {
      let mut state = self.lock();
      if let Some(message) = &state.write_failure {
        return Err(SyncError::write(message.clone()));
      }
      let table = state.tables.entry(resource.to_string()).or_default();

      match mutation {
        Mutation::Create(record) => {
          let id = record.id();
          if table.iter().any(|row| row.id() == id) {
            return Err(SyncError::write(format!("{} {} already exists", resource, id)));
          }
          table.push(record.clone());
          (ChangeEvent::Created(record.clone()), Some(record))
        }
        Mutation::Update(record) => {
          let id = record.id();
          let row = table
            .iter_mut()
            .find(|row| row.id() == id)
            .ok_or_else(|| SyncError::write(format!("{} {} not found", resource, id)))?;
          *row = record.clone();
          (ChangeEvent::Updated(record.clone()), Some(record))
        }
        Mutation::Delete { id } => {
          let before = table.len();
          table.retain(|row| row.id() != id);
          if table.len() == before {
            return Err(SyncError::write(format!("{} {} not found", resource, id)));
          }
          (ChangeEvent::Deleted { id }, None)
        }
      }
    };

    self.emit(resource, event);
    Ok(stored)
  }
}

impl<T: Record> RealtimeTransport<T> for MemoryBackend<T> {
  fn subscribe(&self, resource: &str, sink: EventSink<T>) -> SyncResult<Unsubscribe> {
    let id = {
      let mut state = self.lock();
      if let Some(message) = &state.subscribe_failure {
        return Err(SyncError::subscribe(message.clone()));
      }
      let id = state.next_subscriber;
      state.next_subscriber += 1;
      state.subscribes += 1;
      state
        .subscribers
        .entry(resource.to_string())
        .or_default()
        .push((id, sink));
      id
    };

    let backend = self.clone();
    let resource = resource.to_string();
    Ok(Box::new(move || {
      let mut state = backend.lock();
      state.unsubscribes += 1;
      if let Some(subs) = state.subscribers.get_mut(&resource) {
        subs.retain(|(sub_id, _)| *sub_id != id);
        if subs.is_empty() {
          state.subscribers.remove(&resource);
        }
      }
    }))
  }
}
