//! Error taxonomy for the synchronization core.

use std::fmt;
use thiserror::Error;

/// Which transport capability failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOp {
  Read,
  Write,
  Subscribe,
}

impl fmt::Display for TransportOp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TransportOp::Read => f.write_str("read"),
      TransportOp::Write => f.write_str("write"),
      TransportOp::Subscribe => f.write_str("subscribe"),
    }
  }
}

/// Errors surfaced by the cache, multiplexer and list orchestrator.
///
/// `Clone` so that a single failed fetch can be handed to every caller
/// that joined it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
  /// The read, write or subscribe transport reported a failure.
  #[error("{op} transport failed: {message}")]
  Transport { op: TransportOp, message: String },

  /// A shared fetch ended without producing a result.
  #[error("fetch for {key} was cancelled")]
  Cancelled { key: String },

  /// A configuration value is out of range.
  #[error("invalid option {name}: {reason}")]
  InvalidOption { name: &'static str, reason: String },
}

impl SyncError {
  pub fn read(message: impl Into<String>) -> Self {
    Self::Transport {
      op: TransportOp::Read,
      message: message.into(),
    }
  }

  pub fn write(message: impl Into<String>) -> Self {
    Self::Transport {
      op: TransportOp::Write,
      message: message.into(),
    }
  }

  pub fn subscribe(message: impl Into<String>) -> Self {
    Self::Transport {
      op: TransportOp::Subscribe,
      message: message.into(),
    }
  }
}

pub type SyncResult<T> = Result<T, SyncError>;
