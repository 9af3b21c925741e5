//! An in-memory [`ForumProvider`] built from a serialisable snapshot.
//!
//! Snapshots are how fixtures are written down: a JSON document with every
//! record a run needs. The SQLite store can import the same document.

use std::{collections::BTreeSet, convert::Infallible};

use serde::{Deserialize, Serialize};

use crate::{
  Result,
  access::{Capability, ViewerAccess, post_visible},
  digest::resolve_preference,
  forum::{
    Course, CourseId, Discussion, DiscussionId, DiscussionSubscription, Forum,
    ForumId, Group, GroupId, GroupingId, Post, PostId, User, UserId,
  },
  provider::ForumProvider,
  window::PostWindow,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscussionSubscriptionRow {
  pub forum_id:      ForumId,
  pub discussion_id: DiscussionId,
  pub user_id:       UserId,
  #[serde(flatten)]
  pub subscription:  DiscussionSubscription,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForumSubscriptionRow {
  pub forum_id: ForumId,
  pub user_id:  UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestRow {
  pub forum_id:    ForumId,
  pub user_id:     UserId,
  pub mail_digest: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRow {
  pub group_id: GroupId,
  pub user_id:  UserId,
}

/// A granted or denied capability. `forum_id: None` applies site-wide; a
/// forum-level row wins over a site-wide one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRow {
  pub user_id:    UserId,
  #[serde(default)]
  pub forum_id:   Option<ForumId>,
  pub capability: Capability,
  #[serde(default = "granted")]
  pub allowed:    bool,
}

fn granted() -> bool { true }

/// Every record a run may consult.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
  pub courses:                  Vec<Course>,
  pub forums:                   Vec<Forum>,
  pub discussions:              Vec<Discussion>,
  pub posts:                    Vec<Post>,
  pub users:                    Vec<User>,
  pub groups:                   Vec<Group>,
  pub group_members:            Vec<MembershipRow>,
  pub forum_subscriptions:      Vec<ForumSubscriptionRow>,
  pub discussion_subscriptions: Vec<DiscussionSubscriptionRow>,
  pub digests:                  Vec<DigestRow>,
  pub capabilities:             Vec<CapabilityRow>,
}

impl Snapshot {
  pub fn from_json(raw: &str) -> Result<Self> { Ok(serde_json::from_str(raw)?) }

  pub fn to_json(&self) -> Result<String> { Ok(serde_json::to_string_pretty(self)?) }

  fn discussion(&self, id: DiscussionId) -> Option<&Discussion> {
    self.discussions.iter().find(|d| d.id == id)
  }

  fn forum(&self, id: ForumId) -> Option<&Forum> {
    self.forums.iter().find(|f| f.id == id)
  }

  fn user(&self, id: UserId) -> Option<&User> { self.users.iter().find(|u| u.id == id) }

  fn capability(&self, user_id: UserId, forum_id: ForumId, capability: Capability) -> bool {
    let rows = || {
      self
        .capabilities
        .iter()
        .filter(move |r| r.user_id == user_id && r.capability == capability)
    };
    rows()
      .find(|r| r.forum_id == Some(forum_id))
      .or_else(|| rows().find(|r| r.forum_id.is_none()))
      .is_some_and(|r| r.allowed)
  }

  fn posted_in(&self, discussion_id: DiscussionId, user_id: UserId) -> bool {
    self
      .posts
      .iter()
      .any(|p| p.discussion_id == discussion_id && p.author_id == user_id)
  }

  fn is_member(&self, group_id: GroupId, user_id: UserId) -> bool {
    self
      .group_members
      .iter()
      .any(|m| m.group_id == group_id && m.user_id == user_id)
  }

  fn in_grouping(group: &Group, grouping: Option<GroupingId>) -> bool {
    grouping.is_none_or(|g| group.grouping_id == Some(g))
  }
}

impl ForumProvider for Snapshot {
  type Error = Infallible;

  async fn get_post(&self, id: PostId) -> Result<Option<Post>, Infallible> {
    Ok(self.posts.iter().find(|p| p.id == id).cloned())
  }

  async fn get_discussion(&self, id: DiscussionId) -> Result<Option<Discussion>, Infallible> {
    Ok(self.discussion(id).cloned())
  }

  async fn get_forum(&self, id: ForumId) -> Result<Option<Forum>, Infallible> {
    Ok(self.forum(id).cloned())
  }

  async fn get_course(&self, id: CourseId) -> Result<Option<Course>, Infallible> {
    Ok(self.courses.iter().find(|c| c.id == id).cloned())
  }

  async fn get_user(&self, id: UserId) -> Result<Option<User>, Infallible> {
    Ok(self.user(id).cloned())
  }

  async fn subscribed_users(&self, forum_id: ForumId) -> Result<Vec<User>, Infallible> {
    let mut users: Vec<User> = self
      .forum_subscriptions
      .iter()
      .filter(|s| s.forum_id == forum_id)
      .filter_map(|s| self.user(s.user_id))
      .filter(|u| u.is_active())
      .cloned()
      .collect();
    users.sort_by_key(|u| u.id);
    users.dedup_by_key(|u| u.id);
    Ok(users)
  }

  async fn posts_in_window<'a>(&'a self, window: &'a PostWindow) -> Result<Vec<Post>, Infallible> {
    let mut posts: Vec<Post> = self
      .posts
      .iter()
      .filter(|p| {
        self
          .discussion(p.discussion_id)
          .is_some_and(|d| window.admits(p, d))
      })
      .cloned()
      .collect();
    posts.sort_by_key(|p| (p.modified, p.id));
    Ok(posts)
  }

  async fn is_subscribed_to_forum(
    &self,
    user_id: UserId,
    forum_id: ForumId,
  ) -> Result<bool, Infallible> {
    Ok(
      self
        .forum_subscriptions
        .iter()
        .any(|s| s.forum_id == forum_id && s.user_id == user_id),
    )
  }

  async fn discussion_subscription(
    &self,
    forum_id: ForumId,
    user_id: UserId,
    discussion_id: DiscussionId,
  ) -> Result<Option<DiscussionSubscription>, Infallible> {
    Ok(
      self
        .discussion_subscriptions
        .iter()
        .find(|s| {
          s.forum_id == forum_id && s.user_id == user_id && s.discussion_id == discussion_id
        })
        .map(|s| s.subscription),
    )
  }

  async fn digest_preference(&self, user_id: UserId, forum_id: ForumId) -> Result<i32, Infallible> {
    let per_forum = self
      .digests
      .iter()
      .find(|d| d.forum_id == forum_id && d.user_id == user_id)
      .map(|d| d.mail_digest);
    let default = self.user(user_id).map_or(0, |u| u.mail_digest);
    Ok(resolve_preference(per_forum, default))
  }

  async fn user_has_posted_in(
    &self,
    discussion_id: DiscussionId,
    user_id: UserId,
  ) -> Result<bool, Infallible> {
    Ok(self.posted_in(discussion_id, user_id))
  }

  async fn groups_of(
    &self,
    user_id: UserId,
    forum_id: ForumId,
  ) -> Result<BTreeSet<GroupId>, Infallible> {
    let Some(forum) = self.forum(forum_id) else {
      return Ok(BTreeSet::new());
    };
    Ok(
      self
        .groups
        .iter()
        .filter(|g| g.course_id == forum.course_id)
        .filter(|g| Self::in_grouping(g, forum.grouping_id))
        .filter(|g| self.is_member(g.id, user_id))
        .map(|g| g.id)
        .collect(),
    )
  }

  async fn group_exists(&self, group_id: GroupId) -> Result<bool, Infallible> {
    Ok(self.groups.iter().any(|g| g.id == group_id))
  }

  async fn has_capability(
    &self,
    user_id: UserId,
    forum_id: ForumId,
    capability: Capability,
  ) -> Result<bool, Infallible> {
    Ok(self.capability(user_id, forum_id, capability))
  }

  async fn can_see_post<'a>(
    &'a self,
    post: &'a Post,
    discussion: &'a Discussion,
    viewer_id: UserId,
  ) -> Result<bool, Infallible> {
    let Some(forum) = self.forum(discussion.forum_id) else {
      return Ok(false);
    };
    let viewer = ViewerAccess {
      viewer_id,
      can_view_discussion: self.capability(viewer_id, forum.id, Capability::ViewDiscussion),
      can_view_qanda_without_posting: self.capability(
        viewer_id,
        forum.id,
        Capability::ViewQandaWithoutPosting,
      ),
      has_posted: self.posted_in(discussion.id, viewer_id),
    };
    Ok(post_visible(forum, discussion, post, viewer))
  }
}
