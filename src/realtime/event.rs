use crate::cache::Record;

/// Kind of change carried by a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
  Created,
  Updated,
  Deleted,
}

/// A record was created, updated or deleted on the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<T> {
  Created(T),
  Updated(T),
  /// Deletes only carry the identity of the removed record
  Deleted { id: String },
}

impl<T: Record> ChangeEvent<T> {
  pub fn kind(&self) -> ChangeKind {
    match self {
      ChangeEvent::Created(_) => ChangeKind::Created,
      ChangeEvent::Updated(_) => ChangeKind::Updated,
      ChangeEvent::Deleted { .. } => ChangeKind::Deleted,
    }
  }

  /// Identity of the affected record.
  pub fn id(&self) -> String {
    match self {
      ChangeEvent::Created(record) | ChangeEvent::Updated(record) => record.id(),
      ChangeEvent::Deleted { id } => id.clone(),
    }
  }

  /// Apply this event to a list of records in place.
  ///
  /// Created records are prepended (newest first). Updates and deletes for
  /// records that are not in the list are no-ops. Returns whether `items`
  /// changed.
  pub fn apply_to(&self, items: &mut Vec<T>) -> bool {
    match self {
      ChangeEvent::Created(record) => {
        items.insert(0, record.clone());
        true
      }
      ChangeEvent::Updated(record) => {
        let id = record.id();
        match items.iter_mut().find(|item| item.id() == id) {
          Some(existing) => {
            *existing = record.clone();
            true
          }
          None => false,
        }
      }
      ChangeEvent::Deleted { id } => {
        let before = items.len();
        items.retain(|item| item.id() != *id);
        items.len() != before
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, Clone, PartialEq)]
  struct Customer {
    id: &'static str,
    name: &'static str,
  }

  impl Record for Customer {
    fn id(&self) -> String {
      self.id.to_string()
    }
  }

  fn customers() -> Vec<Customer> {
    vec![
      Customer { id: "C1", name: "Ada" },
      Customer { id: "C2", name: "Brian" },
    ]
  }

  #[test]
  fn test_created_is_prepended() {
    let mut items = customers();
    let event = ChangeEvent::Created(Customer { id: "C3", name: "Cleo" });
    assert!(event.apply_to(&mut items));
    assert_eq!(items[0].id, "C3");
    assert_eq!(items.len(), 3);
  }

  #[test]
  fn test_updated_replaces_in_place() {
    let mut items = customers();
    let event = ChangeEvent::Updated(Customer { id: "C2", name: "Bryan" });
    assert!(event.apply_to(&mut items));
    assert_eq!(items[1].name, "Bryan");
    assert_eq!(items.len(), 2);
  }

  #[test]
  fn test_updated_missing_is_noop() {
    let mut items = customers();
    let event = ChangeEvent::Updated(Customer { id: "C9", name: "Zed" });
    assert!(!event.apply_to(&mut items));
    assert_eq!(items, customers());
  }

  #[test]
  fn test_deleted_removes() {
    let mut items = customers();
    let event: ChangeEvent<Customer> = ChangeEvent::Deleted { id: "C1".to_string() };
    assert!(event.apply_to(&mut items));
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "C2");
  }

  #[test]
  fn test_deleted_missing_is_noop() {
    let mut items = customers();
    let event: ChangeEvent<Customer> = ChangeEvent::Deleted { id: "C42".to_string() };
    assert!(!event.apply_to(&mut items));
    assert_eq!(items, customers());
  }

  #[test]
  fn test_kind_and_id() {
    let event = ChangeEvent::Updated(Customer { id: "C1", name: "Ada" });
    assert_eq!(event.kind(), ChangeKind::Updated);
    assert_eq!(event.id(), "C1");
  }
}
