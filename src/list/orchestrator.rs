//! Live, filterable, paginated list built from the cache, the multiplexer
//! and a debounced filter.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::filter::FilterSchema;
use super::view::{ListStatus, ListView};
use crate::cache::{CacheResult, CacheStore, ListQueryKey, QueryKey, Record, SortOrder};
use crate::client::SyncClient;
use crate::debounce::{Commit, DebouncedValue};
use crate::error::{SyncError, SyncResult};
use crate::realtime::{ChangeEvent, Subscription, SubscriptionMultiplexer};
use crate::transport::{Mutation, PageRequest, ReadTransport, WriteTransport};

/// Per-list tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOptions {
  /// How long a fetched page is served from cache
  pub ttl: Duration,
  /// Quiet period before a filter edit is committed
  pub debounce_window: Duration,
  pub page_size: usize,
  pub sort: SortOrder,
}

impl Default for ListOptions {
  fn default() -> Self {
    Self {
      ttl: Duration::from_secs(30),
      debounce_window: Duration::from_millis(300),
      page_size: 20,
      sort: SortOrder::NewestFirst,
    }
  }
}

impl ListOptions {
  pub fn validate(&self) -> SyncResult<()> {
    if self.page_size == 0 {
      return Err(SyncError::InvalidOption {
        name: "page_size",
        reason: "must be at least 1".to_string(),
      });
    }
    Ok(())
  }
}

enum Command {
  Refresh,
  LoadPage(usize),
  Unmount,
}

struct FetchDone<T> {
  generation: u64,
  result: SyncResult<CacheResult<Arc<Vec<T>>>>,
}

/// A mounted list view.
///
/// Mounting registers a listener with the multiplexer and starts the first
/// fetch. A background task owns the view state and applies, one at a time,
/// fetch results, committed filter changes, page changes and live change
/// events. Dropping or [unmounting](Self::unmount) the list stops that task
/// and detaches the listener; fetches other lists are waiting on keep
/// running.
///
/// Fetch failures are reported through [`ListStatus::Error`] and are never
/// retried automatically.
pub struct LiveList<T: Record, F: FilterSchema<T>> {
  resource: String,
  filter: DebouncedValue<F>,
  commands: mpsc::UnboundedSender<Command>,
  view: watch::Receiver<ListView<T, F>>,
  cache: CacheStore<T>,
  multiplexer: Arc<SubscriptionMultiplexer<T>>,
  writer: Arc<dyn WriteTransport<T>>,
  task: Option<JoinHandle<()>>,
}

impl<T: Record, F: FilterSchema<T>> LiveList<T, F> {
  pub fn mount(client: &SyncClient<T, F>, resource: &str, options: ListOptions) -> SyncResult<Self> {
    options.validate()?;

    let filter = DebouncedValue::new(F::default(), options.debounce_window);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let subscription = client.multiplexer.add_listener(
      resource,
      |_| true,
      move |event: &ChangeEvent<T>| {
        // Closed only after the actor has stopped.
        let _ = event_tx.send(event.clone());
      },
    )?;

    let (view_tx, view_rx) = watch::channel(ListView::default());
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();

    let actor = ListActor {
      resource: resource.to_string(),
      options,
      filter: F::default(),
      page: 0,
      generation: 0,
      cache: client.cache.clone(),
      reader: Arc::clone(&client.reader),
      multiplexer: Arc::clone(&client.multiplexer),
      view: view_tx,
      fetch_tx,
      fetch_task: None,
      subscription: Some(subscription),
    };
    let filters = filter.subscribe();
    let task = tokio::spawn(actor.run(command_rx, filters, event_rx, fetch_rx));

    info!(resource, "list mounted");
    Ok(Self {
      resource: resource.to_string(),
      filter,
      commands: command_tx,
      view: view_rx,
      cache: client.cache.clone(),
      multiplexer: Arc::clone(&client.multiplexer),
      writer: Arc::clone(&client.writer),
      task: Some(task),
    })
  }

  pub fn resource(&self) -> &str {
    &self.resource
  }

  /// Current snapshot.
  pub fn view(&self) -> ListView<T, F> {
    self.view.borrow().clone()
  }

  pub fn items(&self) -> Arc<Vec<T>> {
    Arc::clone(&self.view.borrow().items)
  }

  pub fn status(&self) -> ListStatus {
    self.view.borrow().status
  }

  pub fn error(&self) -> Option<SyncError> {
    self.view.borrow().error.clone()
  }

  /// Receiver that is notified on every view change.
  pub fn watch(&self) -> watch::Receiver<ListView<T, F>> {
    self.view.clone()
  }

  /// Wait for the next view change. Returns false once the list has stopped.
  pub async fn changed(&mut self) -> bool {
    self.view.changed().await.is_ok()
  }

  /// Wait until the view satisfies `predicate`.
  pub async fn wait_for(
    &mut self,
    predicate: impl FnMut(&ListView<T, F>) -> bool,
  ) -> SyncResult<ListView<T, F>> {
    self
      .view
      .wait_for(predicate)
      .await
      .map(|view| view.clone())
      .map_err(|_| SyncError::Cancelled {
        key: self.resource.clone(),
      })
  }

  /// Update the filter draft; the list refetches once typing settles.
  pub fn set_filter(&mut self, draft: F) {
    self.filter.set_draft(draft);
  }

  /// Commit the filter draft without waiting for the quiet period.
  pub fn submit_filter(&mut self) -> bool {
    self.filter.flush()
  }

  pub fn filter_draft(&self) -> F {
    self.filter.draft()
  }

  /// Refetch the current page, bypassing the cache.
  pub fn refresh(&self) {
    let _ = self.commands.send(Command::Refresh);
  }

  pub fn load_page(&self, page: usize) {
    let _ = self.commands.send(Command::LoadPage(page));
  }

  /// Apply a write through the write transport.
  ///
  /// Nothing is patched locally. The guard window of the resource is ended
  /// first so the write's own change event reaches every list of the
  /// resource. On success every cached page of the resource is invalidated
  /// and this list refetches its current page. Failures are returned to the
  /// caller and leave the view untouched.
  pub async fn mutate(&self, mutation: Mutation<T>) -> SyncResult<Option<T>> {
    self.multiplexer.clear_guard(&self.resource);
    let stored = self.writer.mutate(&self.resource, mutation).await?;
    let invalidated = self
      .cache
      .invalidate_prefix(&ListQueryKey::resource_prefix(&self.resource));
    debug!(resource = %self.resource, invalidated, "mutation applied");
    let _ = self.commands.send(Command::Refresh);
    Ok(stored)
  }

  /// Stop the list and detach it from the live feed.
  pub async fn unmount(mut self) {
    let _ = self.commands.send(Command::Unmount);
    if let Some(task) = self.task.take() {
      let _ = task.await;
    }
  }
}

/// State owned by the background task of a [`LiveList`].
struct ListActor<T: Record, F: FilterSchema<T>> {
  resource: String,
  options: ListOptions,
  /// Committed filter
  filter: F,
  page: usize,
  /// Bumped on every fetch this list starts; older results are ignored
  generation: u64,
  cache: CacheStore<T>,
  reader: Arc<dyn ReadTransport<T, F>>,
  multiplexer: Arc<SubscriptionMultiplexer<T>>,
  view: watch::Sender<ListView<T, F>>,
  fetch_tx: mpsc::UnboundedSender<FetchDone<T>>,
  fetch_task: Option<JoinHandle<()>>,
  subscription: Option<Subscription<T>>,
}

impl<T: Record, F: FilterSchema<T>> ListActor<T, F> {
  async fn run(
    mut self,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut filters: watch::Receiver<Commit<F>>,
    mut events: mpsc::UnboundedReceiver<ChangeEvent<T>>,
    mut fetches: mpsc::UnboundedReceiver<FetchDone<T>>,
  ) {
    self.start_fetch();
    let mut filters_open = true;

    loop {
      tokio::select! {
        command = commands.recv() => match command {
          Some(Command::Refresh) => {
            self.cache.invalidate(&self.query_key().cache_key());
            self.start_fetch();
          }
          Some(Command::LoadPage(page)) => {
            self.page = page;
            self.start_fetch();
          }
          Some(Command::Unmount) | None => break,
        },
        changed = filters.changed(), if filters_open => match changed {
          Ok(()) => {
            let filter = filters.borrow_and_update().value.clone();
            if filter != self.filter {
              self.filter = filter;
              self.page = 0;
              self.start_fetch();
            }
          }
          Err(_) => filters_open = false,
        },
        Some(event) = events.recv() => self.apply_event(event),
        Some(done) = fetches.recv() => self.finish_fetch(done),
      }
    }

    self.shutdown();
  }

  fn query_key(&self) -> ListQueryKey {
    ListQueryKey {
      resource: self.resource.clone(),
      filter: self.filter.cache_fragment(),
      sort: self.options.sort,
      page: self.page,
      page_size: self.options.page_size,
    }
  }

  fn start_fetch(&mut self) {
    self.generation += 1;
    let generation = self.generation;
    let query = self.query_key();
    let key = query.cache_key();
    debug!(key = %key, query = %query.description(), generation, "list loading");

    // Abandon interest in the previous fetch; the cache finishes it for
    // anyone else waiting on it.
    if let Some(task) = self.fetch_task.take() {
      task.abort();
    }

    let filter = self.filter.clone();
    let page = self.page;
    let view_key = key.clone();
    self.view.send_modify(|view| {
      view.status = ListStatus::Loading;
      view.filter = filter;
      view.page = page;
      view.key = view_key;
    });

    let request = PageRequest {
      resource: self.resource.clone(),
      filter: self.filter.clone(),
      sort: self.options.sort,
      page: self.page,
      page_size: self.options.page_size,
    };
    let cache = self.cache.clone();
    let reader = Arc::clone(&self.reader);
    let ttl = self.options.ttl;
    let tx = self.fetch_tx.clone();

    self.fetch_task = Some(tokio::spawn(async move {
      let result = cache
        .get(&key, ttl, move || async move { reader.fetch_page(request).await })
        .await;
      let _ = tx.send(FetchDone { generation, result });
    }));
  }

  fn finish_fetch(&mut self, done: FetchDone<T>) {
    if done.generation != self.generation {
      debug!(
        resource = %self.resource,
        generation = done.generation,
        current = self.generation,
        "ignoring superseded list fetch"
      );
      return;
    }
    self.fetch_task = None;

    match done.result {
      Ok(result) => {
        if result.is_network() {
          self.multiplexer.note_fetch(&self.resource);
        }
        debug!(
          resource = %self.resource,
          rows = result.data.len(),
          source = ?result.source,
          "list ready"
        );
        self.view.send_modify(|view| {
          view.items = result.data;
          view.status = ListStatus::Ready;
          view.error = None;
        });
      }
      Err(err) => {
        warn!(resource = %self.resource, error = %err, "list fetch failed");
        self.view.send_modify(|view| {
          view.status = ListStatus::Error;
          view.error = Some(err);
        });
      }
    }
  }

  fn apply_event(&mut self, event: ChangeEvent<T>) {
    let status = self.view.borrow().status;
    if status != ListStatus::Ready {
      debug!(
        resource = %self.resource,
        id = %event.id(),
        status = ?status,
        "ignoring change event until list is ready"
      );
      return;
    }

    // Keep the list consistent with the committed filter.
    let event = match event {
      ChangeEvent::Created(record) if !self.filter.matches(&record) => {
        debug!(
          resource = %self.resource,
          id = %record.id(),
          "ignoring created record outside the filter"
        );
        return;
      }
      ChangeEvent::Updated(record) if !self.filter.matches(&record) => ChangeEvent::Deleted {
        id: record.id(),
      },
      event => event,
    };

    let changed = self
      .view
      .send_if_modified(|view| event.apply_to(Arc::make_mut(&mut view.items)));
    debug!(
      resource = %self.resource,
      id = %event.id(),
      kind = ?event.kind(),
      changed,
      "applied change event"
    );
  }

  fn shutdown(&mut self) {
    if let Some(task) = self.fetch_task.take() {
      task.abort();
    }
    if let Some(subscription) = self.subscription.take() {
      subscription.detach();
    }
    self.view.send_modify(|view| {
      view.status = ListStatus::Idle;
    });
    info!(resource = %self.resource, "list unmounted");
  }
}
