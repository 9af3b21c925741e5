//! Digest preferences and the entries queued for digest delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::forum::{DiscussionId, PostId, UserId};

/// A per-forum row holding this value defers to the user's default.
pub const USE_USER_DEFAULT: i32 = -1;

/// How a user wants mail from one forum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestMode {
  Immediate,
  /// One mail a day with the full text of each post.
  Complete,
  /// One mail a day with subjects only.
  Subjects,
}

impl DigestMode {
  /// Any positive preference defers delivery; unknown positive values are
  /// treated as complete digests.
  pub fn from_preference(pref: i32) -> Self {
    match pref {
      i32::MIN..=0 => Self::Immediate,
      2 => Self::Subjects,
      _ => Self::Complete,
    }
  }

  pub fn is_digest(self) -> bool { !matches!(self, Self::Immediate) }
}

/// Combine an optional per-forum preference with the user's default.
pub fn resolve_preference(per_forum: Option<i32>, user_default: i32) -> i32 {
  match per_forum {
    Some(pref) if pref != USE_USER_DEFAULT => pref,
    _ => user_default,
  }
}

/// A post held back for a user's next digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestEntry {
  pub user_id:       UserId,
  pub discussion_id: DiscussionId,
  pub post_id:       PostId,
  /// Sort key inside the digest: the post's creation time.
  pub time_modified: DateTime<Utc>,
}
