//! Capabilities and the visibility rules built on them.
//!
//! Capability answers are memoised for the whole run by [`CapabilityCache`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  forum::{Discussion, Forum, ForumId, ForumType, Post, UserId},
  provider::ForumProvider,
};

/// The capabilities the mail run consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
  #[serde(rename = "moodle/site:viewfullnames")]
  ViewFullNames,
  #[serde(rename = "moodle/site:accessallgroups")]
  AccessAllGroups,
  #[serde(rename = "mod/forum:viewdiscussion")]
  ViewDiscussion,
  #[serde(rename = "mod/forum:viewqandawithoutposting")]
  ViewQandaWithoutPosting,
  #[serde(rename = "mod/forum:replypost")]
  ReplyPost,
  #[serde(rename = "mod/forum:replynews")]
  ReplyNews,
}

impl Capability {
  pub const ALL: [Capability; 6] = [
    Self::ViewFullNames,
    Self::AccessAllGroups,
    Self::ViewDiscussion,
    Self::ViewQandaWithoutPosting,
    Self::ReplyPost,
    Self::ReplyNews,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::ViewFullNames => "moodle/site:viewfullnames",
      Self::AccessAllGroups => "moodle/site:accessallgroups",
      Self::ViewDiscussion => "mod/forum:viewdiscussion",
      Self::ViewQandaWithoutPosting => "mod/forum:viewqandawithoutposting",
      Self::ReplyPost => "mod/forum:replypost",
      Self::ReplyNews => "mod/forum:replynews",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|c| c.as_str() == s)
  }

  /// The capability needed to reply in a forum of this type.
  pub fn reply_for(kind: ForumType) -> Self {
    match kind {
      ForumType::News => Self::ReplyNews,
      _ => Self::ReplyPost,
    }
  }
}

// ─── Run cache ───────────────────────────────────────────────────────────────

/// Memoised capability lookups for one run, keyed by user, forum and
/// capability. Posts of the same forum ask the same questions again.
#[derive(Debug, Default)]
pub struct CapabilityCache {
  known: HashMap<(UserId, ForumId, Capability), bool>,
}

impl CapabilityCache {
  pub fn new() -> Self { Self::default() }

  /// Answer from the cache, asking the provider on a miss.
  pub async fn has<P: ForumProvider>(
    &mut self,
    provider: &P,
    user_id: UserId,
    forum: &Forum,
    capability: Capability,
  ) -> Result<bool> {
    let key = (user_id, forum.id, capability);
    if let Some(&allowed) = self.known.get(&key) {
      return Ok(allowed);
    }
    let allowed = provider
      .has_capability(user_id, forum.id, capability)
      .await
      .map_err(Error::provider)?;
    self.known.insert(key, allowed);
    Ok(allowed)
  }

  pub fn len(&self) -> usize { self.known.len() }

  pub fn is_empty(&self) -> bool { self.known.is_empty() }
}

// ─── Visibility rules ────────────────────────────────────────────────────────

/// Facts about one viewer needed to decide whether a post is visible.
#[derive(Debug, Clone, Copy)]
pub struct ViewerAccess {
  pub viewer_id:                      UserId,
  pub can_view_discussion:            bool,
  pub can_view_qanda_without_posting: bool,
  pub has_posted:                     bool,
}

/// Whether `viewer` may read `post`.
///
/// Q&A forums hide replies from anyone who has not posted yet, unless they
/// wrote the reply themselves or hold the bypass capability.
pub fn post_visible(
  forum: &Forum,
  discussion: &Discussion,
  post: &Post,
  viewer: ViewerAccess,
) -> bool {
  if !viewer.can_view_discussion {
    return false;
  }
  if forum.kind == ForumType::QAndA
    && post.id != discussion.first_post_id
    && post.author_id != viewer.viewer_id
    && !viewer.has_posted
    && !viewer.can_view_qanda_without_posting
  {
    return false;
  }
  true
}
