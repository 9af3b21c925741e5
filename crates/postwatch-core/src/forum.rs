//! Forum records as the evaluator sees them.
//!
//! Every record here is a read-only snapshot loaded for a single run. Nothing
//! in this crate writes them back; persistence belongs to the provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type PostId = i64;
pub type DiscussionId = i64;
pub type ForumId = i64;
pub type CourseId = i64;
pub type UserId = i64;
pub type GroupId = i64;
pub type GroupingId = i64;

// ─── Posts and discussions ───────────────────────────────────────────────────

/// A single message inside a discussion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
  pub id:            PostId,
  pub discussion_id: DiscussionId,
  /// `None` for the post that opened the discussion.
  #[serde(default)]
  pub parent:        Option<PostId>,
  pub author_id:     UserId,
  pub created:       DateTime<Utc>,
  pub modified:      DateTime<Utc>,
  pub subject:       String,
  /// Bypass the editing grace period and mail on the next run.
  #[serde(default)]
  pub mail_now:      bool,
  /// Already handled by a previous mail run.
  #[serde(default)]
  pub mailed:        bool,
}

/// A thread: the root of a tree of posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discussion {
  pub id:            DiscussionId,
  pub forum_id:      ForumId,
  #[serde(default)]
  pub name:          String,
  /// `0` or negative means the discussion belongs to no group.
  #[serde(default)]
  pub group_id:      GroupId,
  pub first_post_id: PostId,
  pub created:       DateTime<Utc>,
  /// Timed discussions are hidden before `time_start`.
  #[serde(default)]
  pub time_start:    Option<DateTime<Utc>>,
  /// Timed discussions are hidden after `time_end`.
  #[serde(default)]
  pub time_end:      Option<DateTime<Utc>>,
}

impl Discussion {
  pub fn is_grouped(&self) -> bool { self.group_id > 0 }
}

// ─── Forums and courses ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForumType {
  #[default]
  General,
  News,
  #[serde(rename = "qanda")]
  QAndA,
  Single,
  #[serde(rename = "eachuser")]
  EachUser,
  Blog,
}

impl ForumType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::General => "general",
      Self::News => "news",
      Self::QAndA => "qanda",
      Self::Single => "single",
      Self::EachUser => "eachuser",
      Self::Blog => "blog",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    Some(match s {
      "general" => Self::General,
      "news" => Self::News,
      "qanda" => Self::QAndA,
      "single" => Self::Single,
      "eachuser" => Self::EachUser,
      "blog" => Self::Blog,
      _ => return None,
    })
  }
}

/// How groups partition an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMode {
  #[default]
  NoGroups,
  Separate,
  Visible,
}

impl GroupMode {
  /// Separate and visible groups both restrict group-only posts.
  pub fn is_enforcing(self) -> bool { !matches!(self, Self::NoGroups) }

  pub fn as_i64(self) -> i64 {
    match self {
      Self::NoGroups => 0,
      Self::Separate => 1,
      Self::Visible => 2,
    }
  }

  pub fn from_i64(v: i64) -> Option<Self> {
    match v {
      0 => Some(Self::NoGroups),
      1 => Some(Self::Separate),
      2 => Some(Self::Visible),
      _ => None,
    }
  }
}

/// A forum-like container of discussions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forum {
  pub id:          ForumId,
  pub course_id:   CourseId,
  #[serde(default)]
  pub name:        String,
  #[serde(default, rename = "type")]
  pub kind:        ForumType,
  #[serde(default)]
  pub group_mode:  GroupMode,
  /// Restricts group lookups to the groups of one grouping.
  #[serde(default)]
  pub grouping_id: Option<GroupingId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
  pub id:               CourseId,
  #[serde(default)]
  pub group_mode:       GroupMode,
  /// When set, the course mode overrides every activity's own mode.
  #[serde(default)]
  pub force_group_mode: bool,
}

impl Course {
  /// The group mode that actually applies to `forum`.
  pub fn effective_group_mode(&self, forum: &Forum) -> GroupMode {
    if self.force_group_mode { self.group_mode } else { forum.group_mode }
  }
}

// ─── Users and groups ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub id:          UserId,
  #[serde(default)]
  pub username:    String,
  pub email:       String,
  #[serde(default)]
  pub first_name:  String,
  #[serde(default)]
  pub last_name:   String,
  /// Default digest preference used when a forum has no override.
  #[serde(default)]
  pub mail_digest: i32,
  #[serde(default)]
  pub deleted:     bool,
  #[serde(default)]
  pub suspended:   bool,
}

impl User {
  /// Deleted and suspended accounts never count as subscribers.
  pub fn is_active(&self) -> bool { !self.deleted && !self.suspended }

  pub fn full_name(&self) -> String {
    format!("{} {}", self.first_name, self.last_name).trim().to_owned()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
  pub id:          GroupId,
  pub course_id:   CourseId,
  #[serde(default)]
  pub name:        String,
  #[serde(default)]
  pub grouping_id: Option<GroupingId>,
}

// ─── Subscriptions ───────────────────────────────────────────────────────────

/// A user's explicit stance on one discussion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DiscussionSubscription {
  Subscribed { since: DateTime<Utc> },
  Unsubscribed,
}
