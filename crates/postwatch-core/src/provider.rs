//! The `ForumProvider` trait: every lookup the evaluator needs.
//!
//! The trait is implemented by data backends (e.g. `postwatch-store-sqlite`,
//! or the in-memory [`Snapshot`](crate::snapshot::Snapshot)). The evaluator
//! depends on this abstraction only, never on how the answers are produced.

use std::{collections::BTreeSet, future::Future};

use crate::{
  access::Capability,
  forum::{
    Course, CourseId, Discussion, DiscussionId, DiscussionSubscription, Forum,
    ForumId, GroupId, Post, PostId, User, UserId,
  },
  window::PostWindow,
};

/// Read-only access to forum data for one evaluation run.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes. A missing record is `Ok(None)`, never an
/// error; errors are reserved for the backend itself failing.
pub trait ForumProvider: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Records ───────────────────────────────────────────────────────────

  fn get_post(
    &self,
    id: PostId,
  ) -> impl Future<Output = Result<Option<Post>, Self::Error>> + Send + '_;

  fn get_discussion(
    &self,
    id: DiscussionId,
  ) -> impl Future<Output = Result<Option<Discussion>, Self::Error>> + Send + '_;

  fn get_forum(
    &self,
    id: ForumId,
  ) -> impl Future<Output = Result<Option<Forum>, Self::Error>> + Send + '_;

  fn get_course(
    &self,
    id: CourseId,
  ) -> impl Future<Output = Result<Option<Course>, Self::Error>> + Send + '_;

  fn get_user(
    &self,
    id: UserId,
  ) -> impl Future<Output = Result<Option<User>, Self::Error>> + Send + '_;

  // ── Candidate selection ───────────────────────────────────────────────

  /// Active (not deleted, not suspended) users subscribed to `forum_id`,
  /// ordered by id.
  fn subscribed_users(
    &self,
    forum_id: ForumId,
  ) -> impl Future<Output = Result<Vec<User>, Self::Error>> + Send + '_;

  /// Posts due for mailing inside `window`, oldest modification first.
  fn posts_in_window<'a>(
    &'a self,
    window: &'a PostWindow,
  ) -> impl Future<Output = Result<Vec<Post>, Self::Error>> + Send + 'a;

  // ── Subscriptions ─────────────────────────────────────────────────────

  fn is_subscribed_to_forum(
    &self,
    user_id: UserId,
    forum_id: ForumId,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// The user's explicit stance on one discussion, if any.
  fn discussion_subscription(
    &self,
    forum_id: ForumId,
    user_id: UserId,
    discussion_id: DiscussionId,
  ) -> impl Future<Output = Result<Option<DiscussionSubscription>, Self::Error>>
  + Send
  + '_;

  /// Resolved digest mode for `user_id` in `forum_id`: `0` immediate,
  /// anything above means the post is held for a digest.
  fn digest_preference(
    &self,
    user_id: UserId,
    forum_id: ForumId,
  ) -> impl Future<Output = Result<i32, Self::Error>> + Send + '_;

  // ── Participation, groups, access ─────────────────────────────────────

  fn user_has_posted_in(
    &self,
    discussion_id: DiscussionId,
    user_id: UserId,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Groups of the forum's course (narrowed to its grouping, if any) that
  /// `user_id` belongs to.
  fn groups_of(
    &self,
    user_id: UserId,
    forum_id: ForumId,
  ) -> impl Future<Output = Result<BTreeSet<GroupId>, Self::Error>> + Send + '_;

  /// Whether the group still exists.
  fn group_exists(
    &self,
    group_id: GroupId,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn has_capability(
    &self,
    user_id: UserId,
    forum_id: ForumId,
    capability: Capability,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn can_see_post<'a>(
    &'a self,
    post: &'a Post,
    discussion: &'a Discussion,
    viewer_id: UserId,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;
}
