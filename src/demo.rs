//! Scripted walk through the core against the in-memory backend.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::cache::Record;
use crate::client::SyncClient;
use crate::config::Config;
use crate::list::{ListStatus, ListView, LiveList, SearchFilter, Searchable};
use crate::transport::{MemoryBackend, Mutation};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
  pub id: String,
  pub name: String,
  pub status: String,
  pub created_at: DateTime<Utc>,
}

impl Customer {
  pub fn new(id: impl Into<String>, name: impl Into<String>, status: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      status: status.into(),
      created_at: Utc::now(),
    }
  }
}

impl Record for Customer {
  fn id(&self) -> String {
    self.id.clone()
  }
}

impl Searchable for Customer {
  fn search_text(&self) -> String {
    self.name.clone()
  }

  fn status(&self) -> Option<&str> {
    Some(&self.status)
  }
}

const NAMES: &[&str] = &[
  "Ada Lovelace",
  "Alan Turing",
  "Barbara Liskov",
  "Edsger Dijkstra",
  "Grace Hopper",
  "John McCarthy",
  "Ken Thompson",
  "Margaret Hamilton",
];

/// `count` customers, oldest first, cycling through a fixed set of names.
pub fn seed_customers(count: usize) -> Vec<Customer> {
  let now = Utc::now();
  (0..count)
    .map(|i| {
      let name = NAMES[i % NAMES.len()];
      let status = if i % 3 == 2 { "churned" } else { "active" };
      Customer {
        id: format!("C{}", i + 1),
        name: name.to_string(),
        status: status.to_string(),
        created_at: now - ChronoDuration::minutes((count - i) as i64),
      }
    })
    .collect()
}

type CustomerList = LiveList<Customer, SearchFilter>;

async fn settle(list: &mut CustomerList) -> Result<ListView<Customer, SearchFilter>> {
  list
    .wait_for(|view| matches!(view.status, ListStatus::Ready | ListStatus::Error))
    .await
    .map_err(|e| eyre!("List stopped unexpectedly: {}", e))
}

fn report(step: &str, view: &ListView<Customer, SearchFilter>) -> Result<()> {
  let names: Vec<&str> = view.items.iter().map(|c| c.name.as_str()).collect();
  println!("{:<28} {}", step, view.title("customers"));
  println!("{:<28} {}", "", serde_json::to_string(&names)?);
  Ok(())
}

/// Run the scenario described by `config.demo`.
pub async fn run(config: &Config) -> Result<()> {
  let resource = config.demo.resource.as_str();
  let backend: MemoryBackend<Customer> =
    MemoryBackend::new().with_latency(Duration::from_millis(config.demo.latency_ms));
  backend.seed(resource, seed_customers(config.demo.seed));

  let client: SyncClient<Customer, SearchFilter> = SyncClient::in_memory(&backend, &config.sync)?;

  // Two views of the same resource: one feed, one fetch.
  let mut list = client.use_list(resource)?;
  let mut sidebar = client.use_list(resource)?;
  let view = settle(&mut list).await?;
  settle(&mut sidebar).await?;
  report("mounted", &view)?;
  info!(
    fetches = backend.fetch_count(),
    subscriptions = backend.subscribe_count(),
    "two lists mounted"
  );

  // Keystroke-rate filter edits commit once.
  for draft in ["a", "ad", "ada"] {
    list.set_filter(SearchFilter::search(draft));
    tokio::time::sleep(Duration::from_millis(config.sync.debounce_ms / 3)).await;
  }
  let view = list
    .wait_for(|view| view.filter.search == "ada" && view.status != ListStatus::Loading)
    .await?;
  report("filter \"ada\"", &view)?;

  list.set_filter(SearchFilter::default());
  list.submit_filter();
  let view = list
    .wait_for(|view| view.filter == SearchFilter::default() && view.status == ListStatus::Ready)
    .await?;
  report("filter cleared", &view)?;

  let created = Customer::new(
    format!("C{}", config.demo.seed + 1),
    "Frances Allen",
    "active",
  );
  list.mutate(Mutation::Create(created.clone())).await?;
  let view = list
    .wait_for(|view| view.items.first().is_some_and(|c| c.id == created.id))
    .await?;
  report("created", &view)?;

  let renamed = Customer {
    name: "Frances E. Allen".to_string(),
    ..created.clone()
  };
  list.mutate(Mutation::Update(renamed)).await?;
  let view = list
    .wait_for(|view| view.items.iter().any(|c| c.name == "Frances E. Allen"))
    .await?;
  report("updated", &view)?;

  list
    .mutate(Mutation::Delete {
      id: created.id.clone(),
    })
    .await?;
  let view = list
    .wait_for(|view| view.items.iter().all(|c| c.id != created.id))
    .await?;
  report("deleted", &view)?;

  list.load_page(1);
  let view = list
    .wait_for(|view| view.page == 1 && view.status != ListStatus::Loading)
    .await?;
  report("page 2", &view)?;

  list.unmount().await;
  sidebar.unmount().await;
  println!(
    "fetches={} subscribes={} unsubscribes={}",
    backend.fetch_count(),
    backend.subscribe_count(),
    backend.unsubscribe_count()
  );

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_seed_is_oldest_first() {
    let customers = seed_customers(4);
    assert_eq!(customers.len(), 4);
    assert_eq!(customers[0].id, "C1");
    assert!(customers[0].created_at < customers[3].created_at);
    assert_eq!(customers[2].status, "churned");
  }

  #[test]
  fn test_customer_serializes() {
    let customer = Customer::new("C1", "Ada Lovelace", "active");
    let json = serde_json::to_value(&customer).unwrap();
    assert_eq!(json["id"], "C1");
    assert_eq!(json["status"], "active");
  }

  #[tokio::test(start_paused = true)]
  async fn test_demo_runs_to_completion() {
    let config = Config::default();
    run(&config).await.unwrap();
  }
}
