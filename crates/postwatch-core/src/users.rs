//! A bounded cache of user records for one run.
//!
//! Large forums can have tens of thousands of subscribers. Only the first
//! `limit` are kept as full records; the rest are remembered by id and
//! loaded again when actually needed.

use std::collections::HashMap;

use crate::{
  Error, Result,
  forum::{User, UserId},
  provider::ForumProvider,
};

/// How many full user records a run keeps by default.
pub const DEFAULT_USER_CACHE_LIMIT: usize = 5000;

#[derive(Debug, Clone)]
enum Entry {
  Minimal,
  Full(User),
}

#[derive(Debug)]
pub struct UserCache {
  limit:   usize,
  full:    usize,
  entries: HashMap<UserId, Entry>,
}

impl Default for UserCache {
  fn default() -> Self { Self::new(DEFAULT_USER_CACHE_LIMIT) }
}

impl UserCache {
  pub fn new(limit: usize) -> Self {
    Self { limit, full: 0, entries: HashMap::new() }
  }

  /// Remember `user`, keeping the full record only while under the limit.
  pub fn insert(&mut self, user: User) {
    let id = user.id;
    if matches!(self.entries.get(&id), Some(Entry::Full(_))) {
      self.entries.insert(id, Entry::Full(user));
      return;
    }
    if self.full < self.limit {
      self.full += 1;
      self.entries.insert(id, Entry::Full(user));
    } else {
      self.entries.insert(id, Entry::Minimal);
    }
  }

  pub fn contains(&self, id: UserId) -> bool { self.entries.contains_key(&id) }

  /// Whether a full record is held for `id` without asking the provider.
  pub fn is_full(&self, id: UserId) -> bool {
    matches!(self.entries.get(&id), Some(Entry::Full(_)))
  }

  pub fn len(&self) -> usize { self.entries.len() }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }

  /// Ids of every cached user, ascending.
  pub fn ids(&self) -> Vec<UserId> {
    let mut ids: Vec<_> = self.entries.keys().copied().collect();
    ids.sort_unstable();
    ids
  }

  /// Return the full record for `id`, loading it when only the id is known
  /// or the user was never seen. `Ok(None)` if the provider has no such user.
  ///
  /// Minimal entries stay minimal. A user never seen before is added while
  /// there is room, so the number of full records never exceeds the limit.
  pub async fn resolve<P: ForumProvider>(
    &mut self,
    provider: &P,
    id: UserId,
  ) -> Result<Option<User>> {
    if let Some(Entry::Full(user)) = self.entries.get(&id) {
      return Ok(Some(user.clone()));
    }
    let loaded = provider.get_user(id).await.map_err(Error::provider)?;
    if let Some(user) = &loaded
      && !self.entries.contains_key(&id)
      && self.full < self.limit
    {
      self.insert(user.clone());
    }
    Ok(loaded)
  }
}
