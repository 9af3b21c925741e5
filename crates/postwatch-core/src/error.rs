//! Error types for `postwatch-core`.

use std::fmt;

use thiserror::Error;

/// The kind of record an evaluation could not do without.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
  Discussion,
  Forum,
  Course,
}

impl fmt::Display for Dependency {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Discussion => "discussion",
      Self::Forum => "forum",
      Self::Course => "course",
    })
  }
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("could not find {kind} {id}")]
  DependencyMissing { kind: Dependency, id: i64 },

  #[error("unknown mail channel: {0:?}")]
  UnknownChannel(String),

  #[error("a subject is required")]
  EmptySubject,

  #[error("mail window out of range: {days} days before now minus {grace_secs}s")]
  WindowOutOfRange { days: u32, grace_secs: i64 },

  #[error("provider error: {0}")]
  Provider(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Wrap a backend error without altering it.
  pub fn provider<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Provider(Box::new(err))
  }

  pub fn missing(kind: Dependency, id: i64) -> Self {
    Self::DependencyMissing { kind, id }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
