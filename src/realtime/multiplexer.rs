//! One live change feed per resource, shared by any number of listeners.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use super::event::ChangeEvent;
use crate::cache::Record;
use crate::error::SyncResult;
use crate::transport::{EventSink, RealtimeTransport, Unsubscribe};

type Predicate<T> = Box<dyn Fn(&ChangeEvent<T>) -> bool + Send + Sync>;
type Callback<T> = Arc<dyn Fn(&ChangeEvent<T>) + Send + Sync>;

struct Listener<T> {
  id: u64,
  predicate: Predicate<T>,
  callback: Callback<T>,
}

/// A resource with at least one listener. Removed from the registry, and
/// its feed closed, as soon as the last listener detaches.
struct Registration<T> {
  listeners: Vec<Listener<T>>,
  live: Unsubscribe,
}

struct Registry<T> {
  resources: HashMap<String, Registration<T>>,
  /// When a network fetch for each resource last completed
  fetches: HashMap<String, Instant>,
  next_id: u64,
}

type SharedRegistry<T> = Arc<Mutex<Registry<T>>>;

fn lock<T>(registry: &Mutex<Registry<T>>) -> MutexGuard<'_, Registry<T>> {
  registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reference-counted fan-out over a [`RealtimeTransport`].
///
/// The first listener for a resource opens the transport subscription;
/// the last one to detach closes it. Each incoming event is handed to every
/// listener whose predicate matches, in registration order, before the next
/// event is looked at.
///
/// Events that arrive within `guard_window` of a completed fetch for the
/// same resource are dropped on the assumption that the fetch already
/// reflects them. This can lose an event that raced the fetch; the window
/// bounds how long that exposure lasts. A zero window disables suppression.
pub struct SubscriptionMultiplexer<T: Record> {
  transport: Arc<dyn RealtimeTransport<T>>,
  registry: SharedRegistry<T>,
  guard_window: Duration,
}

impl<T: Record> SubscriptionMultiplexer<T> {
  pub fn new(transport: Arc<dyn RealtimeTransport<T>>, guard_window: Duration) -> Self {
    Self {
      transport,
      registry: Arc::new(Mutex::new(Registry {
        resources: HashMap::new(),
        fetches: HashMap::new(),
        next_id: 0,
      })),
      guard_window,
    }
  }

  pub fn guard_window(&self) -> Duration {
    self.guard_window
  }

  /// Register `callback` for events on `resource` that satisfy `predicate`.
  ///
  /// The returned [`Subscription`] detaches the listener when dropped.
  pub fn add_listener<P, C>(
    &self,
    resource: &str,
    predicate: P,
    callback: C,
  ) -> SyncResult<Subscription<T>>
  where
    P: Fn(&ChangeEvent<T>) -> bool + Send + Sync + 'static,
    C: Fn(&ChangeEvent<T>) + Send + Sync + 'static,
  {
    // The transport is called without the registry lock held, so a
    // transport that delivers while subscribing cannot deadlock us. Such
    // early events find no registration yet and are dropped.
    let mut opened: Option<Unsubscribe> = None;
    loop {
      let mut registry = lock(&self.registry);

      if !registry.resources.contains_key(resource) {
        match opened.take() {
          Some(live) => {
            registry.resources.insert(
              resource.to_string(),
              Registration {
                listeners: Vec::new(),
                live,
              },
            );
          }
          None => {
            drop(registry);
            opened = Some(
              self
                .transport
                .subscribe(resource, self.dispatcher(resource))?,
            );
            info!(resource, "opened live feed");
            continue;
          }
        }
      }

      let id = registry.next_id;
      registry.next_id += 1;

      if let Some(registration) = registry.resources.get_mut(resource) {
        registration.listeners.push(Listener {
          id,
          predicate: Box::new(predicate),
          callback: Arc::new(callback),
        });
        debug!(
          resource,
          listener = id,
          listeners = registration.listeners.len(),
          "listener attached"
        );
      }
      drop(registry);

      // Another caller opened the feed while ours was being set up.
      if let Some(surplus) = opened {
        debug!(resource, "closing duplicate live feed");
        surplus();
      }

      return Ok(Subscription {
        resource: resource.to_string(),
        id,
        registry: Arc::downgrade(&self.registry),
        detached: false,
      });
    }
  }

  /// Build the sink handed to the transport for `resource`.
  fn dispatcher(&self, resource: &str) -> EventSink<T> {
    let registry = Arc::downgrade(&self.registry);
    let resource = resource.to_string();
    let guard_window = self.guard_window;

    Arc::new(move |event: ChangeEvent<T>| {
      let Some(registry) = registry.upgrade() else {
        return;
      };

      let callbacks: Vec<Callback<T>> = {
        let registry = lock(&registry);

        if let Some(fetched_at) = registry.fetches.get(&resource) {
          if fetched_at.elapsed() < guard_window {
            debug!(
              resource = %resource,
              id = %event.id(),
              kind = ?event.kind(),
              "suppressing event inside fetch guard window"
            );
            return;
          }
        }

        match registry.resources.get(&resource) {
          Some(registration) => registration
            .listeners
            .iter()
            .filter(|listener| (listener.predicate)(&event))
            .map(|listener| Arc::clone(&listener.callback))
            .collect(),
          None => return,
        }
      };

      // Invoked outside the lock so listeners may attach or detach.
      for callback in callbacks {
        callback(&event);
      }
    })
  }

  /// Record that a network fetch for `resource` just completed, opening the
  /// guard window.
  pub fn note_fetch(&self, resource: &str) {
    let guard_window = self.guard_window;
    let mut registry = lock(&self.registry);
    // Only timestamps still inside their window matter.
    registry
      .fetches
      .retain(|_, fetched_at| fetched_at.elapsed() < guard_window);
    registry
      .fetches
      .insert(resource.to_string(), Instant::now());
  }

  /// End the guard window for `resource` early so that the next event is
  /// delivered, e.g. the event caused by a write this process just made.
  pub fn clear_guard(&self, resource: &str) {
    lock(&self.registry).fetches.remove(resource);
  }

  /// Whether events for `resource` are currently being suppressed.
  pub fn in_guard_window(&self, resource: &str) -> bool {
    lock(&self.registry)
      .fetches
      .get(resource)
      .is_some_and(|at| at.elapsed() < self.guard_window)
  }

  pub fn listener_count(&self, resource: &str) -> usize {
    lock(&self.registry)
      .resources
      .get(resource)
      .map_or(0, |registration| registration.listeners.len())
  }

  /// Whether a transport subscription is open for `resource`.
  pub fn is_live(&self, resource: &str) -> bool {
    lock(&self.registry).resources.contains_key(resource)
  }
}

/// Detach handle returned by [`SubscriptionMultiplexer::add_listener`].
#[must_use = "dropping a Subscription detaches the listener"]
pub struct Subscription<T: Record> {
  resource: String,
  id: u64,
  registry: Weak<Mutex<Registry<T>>>,
  detached: bool,
}

impl<T: Record> Subscription<T> {
  pub fn resource(&self) -> &str {
    &self.resource
  }

  /// Remove the listener. Closes the feed if it was the last one.
  pub fn detach(mut self) {
    self.release();
  }

  fn release(&mut self) {
    if self.detached {
      return;
    }
    self.detached = true;

    let Some(registry) = self.registry.upgrade() else {
      return;
    };

    let closing = {
      let mut registry = lock(&registry);
      let remaining = match registry.resources.get_mut(&self.resource) {
        Some(registration) => {
          registration.listeners.retain(|listener| listener.id != self.id);
          registration.listeners.len()
        }
        None => return,
      };
      debug!(
        resource = %self.resource,
        listener = self.id,
        remaining,
        "listener detached"
      );

      if remaining == 0 {
        registry.resources.remove(&self.resource)
      } else {
        None
      }
    };

    if let Some(registration) = closing {
      info!(resource = %self.resource, "closing live feed");
      (registration.live)();
    }
  }
}

impl<T: Record> Drop for Subscription<T> {
  fn drop(&mut self) {
    self.release();
  }
}
