//! The time window used to pick which posts a mail run looks at.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  error::{Error, Result},
  forum::{Discussion, Post},
};

/// Posts younger than this many seconds are still editable and are held back.
pub const DEFAULT_MAX_EDITING_SECS: i64 = 30 * 60;

/// Bounds for [`ForumProvider::posts_in_window`](crate::provider::ForumProvider::posts_in_window).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostWindow {
  pub start:          DateTime<Utc>,
  pub end:            DateTime<Utc>,
  /// The single clock reading for the whole run.
  pub now:            DateTime<Utc>,
  /// Also return posts an earlier run already mailed.
  pub include_mailed: bool,
  /// Honour discussion `time_start` / `time_end`.
  pub timed_posts:    bool,
}

impl PostWindow {
  /// Compute the window a mail run at `now` would use.
  ///
  /// Without an explicit `start`, the window reaches back `days` days from
  /// the end of the editing grace period. `force` drops the grace period and
  /// includes posts that were already mailed.
  ///
  /// Fails when either bound falls outside the representable date range.
  pub fn resolve(
    now: DateTime<Utc>,
    start: Option<DateTime<Utc>>,
    days: u32,
    max_editing_time: Duration,
    force: bool,
  ) -> Result<Self> {
    let out_of_range =
      || Error::WindowOutOfRange { days, grace_secs: max_editing_time.num_seconds() };

    let grace_end = now.checked_sub_signed(max_editing_time).ok_or_else(out_of_range)?;
    let start = match start {
      Some(start) => start,
      None => Duration::try_hours(24 * i64::from(days))
        .and_then(|span| grace_end.checked_sub_signed(span))
        .ok_or_else(out_of_range)?,
    };
    let end = if force { now } else { grace_end };
    Ok(Self { start, end, now, include_mailed: force, timed_posts: false })
  }

  pub fn with_timed_posts(mut self, timed_posts: bool) -> Self {
    self.timed_posts = timed_posts;
    self
  }

  /// Whether `post` in `discussion` falls inside this window.
  pub fn admits(&self, post: &Post, discussion: &Discussion) -> bool {
    if post.mailed && !self.include_mailed {
      return false;
    }
    if !(post.created < self.end || post.mail_now) {
      return false;
    }
    if self.timed_posts {
      let starts_inside = discussion.time_start.is_some_and(|t| t >= self.start);
      (post.created >= self.start || starts_inside) && discussion_open_at(discussion, self.now)
    } else {
      post.created >= self.start
    }
  }
}

/// Whether a timed discussion has started and not yet ended at `now`.
pub fn discussion_open_at(discussion: &Discussion, now: DateTime<Utc>) -> bool {
  let started = discussion.time_start.is_none_or(|start| start < now);
  let not_ended = discussion.time_end.is_none_or(|end| end > now);
  started && not_ended
}
