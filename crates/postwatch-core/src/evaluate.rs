//! The notification eligibility pass.
//!
//! For one post, every candidate user walks an ordered list of gates and
//! ends in exactly one outcome: sent now, queued for a digest, or skipped
//! with a reason. Gates never share state across users apart from the
//! record caches held by [`Evaluator`].

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  access::{Capability, CapabilityCache},
  digest::DigestEntry,
  error::Dependency,
  forum::{
    Course, CourseId, Discussion, DiscussionId, DiscussionSubscription, Forum,
    ForumId, ForumType, GroupId, Post, PostId, User, UserId,
  },
  provider::ForumProvider,
  users::UserCache,
};

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// Why a user will not be notified about a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
  NotSubscribed,
  SubscribedAfterPost,
  QandaNotParticipant,
  AuthorMissing,
  GroupMissing,
  GroupMismatch,
  CannotViewPost,
}

impl SkipReason {
  /// Stable machine-readable code.
  pub fn code(self) -> &'static str {
    match self {
      Self::NotSubscribed => "not-subscribed",
      Self::SubscribedAfterPost => "subscribed-after-post",
      Self::QandaNotParticipant => "qanda-not-participant",
      Self::AuthorMissing => "author-missing",
      Self::GroupMissing => "group-missing",
      Self::GroupMismatch => "group-mismatch",
      Self::CannotViewPost => "cannot-view-post",
    }
  }

  pub fn describe(self) -> &'static str {
    match self {
      Self::NotSubscribed => {
        "User does not subscribe to this forum or this specific discussion."
      }
      Self::SubscribedAfterPost => "User was subscribed after the post was created.",
      Self::QandaNotParticipant => {
        "User has not posted in this Q and A discussion."
      }
      Self::AuthorMissing => "Could not find the author of the post.",
      Self::GroupMissing => "Could not find group.",
      Self::GroupMismatch => "Post belongs to a group the user cannot see.",
      Self::CannotViewPost => "User can not see the post.",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
  /// Mailed on this run, `delay_secs` after the post was written.
  Send { delay_secs: i64 },
  Queue { entry: DigestEntry },
  Skip { reason: SkipReason },
}

impl Outcome {
  pub fn is_send(&self) -> bool { matches!(self, Self::Send { .. }) }

  pub fn is_queue(&self) -> bool { matches!(self, Self::Queue { .. }) }

  pub fn skip_reason(&self) -> Option<SkipReason> {
    match self {
      Self::Skip { reason } => Some(*reason),
      _ => None,
    }
  }
}

/// What was learnt about a recipient once the cheap gates had passed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientProfile {
  pub view_full_names:   bool,
  pub can_post:          bool,
  pub access_all_groups: bool,
  pub groups:            BTreeSet<GroupId>,
  /// Filled only when the digest gate is reached.
  pub digest:            Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
  pub user_id: UserId,
  pub email:   Option<String>,
  #[serde(flatten)]
  pub outcome: Outcome,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub profile: Option<RecipientProfile>,
}

/// Everything one pass over one post produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
  pub post_id:      PostId,
  pub subject:      String,
  pub post_created: DateTime<Utc>,
  pub evaluated_at: DateTime<Utc>,
  pub results:      Vec<EvaluationResult>,
  /// Number of `Send` outcomes.
  pub delivered:    u32,
}

impl Evaluation {
  pub fn result_for(&self, user_id: UserId) -> Option<&EvaluationResult> {
    self.results.iter().find(|r| r.user_id == user_id)
  }

  pub fn digest_queue(&self) -> impl Iterator<Item = &DigestEntry> {
    self.results.iter().filter_map(|r| match &r.outcome {
      Outcome::Queue { entry } => Some(entry),
      _ => None,
    })
  }

  pub fn queued(&self) -> usize { self.digest_queue().count() }

  pub fn skipped(&self) -> usize {
    self.results.iter().filter(|r| r.outcome.skip_reason().is_some()).count()
  }

  /// Skip counts per reason, in reason order.
  pub fn skip_counts(&self) -> Vec<(SkipReason, usize)> {
    let mut counts: Vec<(SkipReason, usize)> = Vec::new();
    for reason in self.results.iter().filter_map(|r| r.outcome.skip_reason()) {
      match counts.iter_mut().find(|(r, _)| *r == reason) {
        Some((_, n)) => *n += 1,
        None => counts.push((reason, 1)),
      }
    }
    counts.sort_by_key(|(r, _)| *r as u8);
    counts
  }
}

// ─── Evaluator ───────────────────────────────────────────────────────────────

/// The records a post hangs off.
#[derive(Debug, Clone)]
pub struct PostContext {
  pub discussion: Discussion,
  pub forum:      Forum,
  pub course:     Course,
}

/// Runs eligibility passes against a provider, caching the discussion,
/// forum, course and user records it loads along the way.
pub struct Evaluator<'p, P: ForumProvider> {
  provider:    &'p P,
  now:         DateTime<Utc>,
  users:       UserCache,
  caps:        CapabilityCache,
  discussions: HashMap<DiscussionId, Discussion>,
  forums:      HashMap<ForumId, Forum>,
  courses:     HashMap<CourseId, Course>,
}

impl<'p, P: ForumProvider> Evaluator<'p, P> {
  /// `now` is the only clock reading the evaluator ever uses.
  pub fn new(provider: &'p P, now: DateTime<Utc>) -> Self {
    Self {
      provider,
      now,
      users: UserCache::default(),
      caps: CapabilityCache::new(),
      discussions: HashMap::new(),
      forums: HashMap::new(),
      courses: HashMap::new(),
    }
  }

  pub fn with_user_cache(mut self, users: UserCache) -> Self {
    self.users = users;
    self
  }

  pub fn now(&self) -> DateTime<Utc> { self.now }

  pub fn users(&self) -> &UserCache { &self.users }

  pub fn capabilities(&self) -> &CapabilityCache { &self.caps }

  /// Load the active subscribers of `forum_id` into the user cache and
  /// return their ids in ascending order.
  pub async fn prime_subscribers(&mut self, forum_id: ForumId) -> Result<Vec<UserId>> {
    let subscribers = self
      .provider
      .subscribed_users(forum_id)
      .await
      .map_err(Error::provider)?;
    let mut ids = Vec::with_capacity(subscribers.len());
    for user in subscribers {
      ids.push(user.id);
      self.users.insert(user);
    }
    tracing::debug!(forum_id, count = ids.len(), "primed subscriber cache");
    Ok(ids)
  }

  /// Resolve the discussion, forum and course of `post`.
  ///
  /// Any missing record aborts with [`Error::DependencyMissing`].
  pub async fn context(&mut self, post: &Post) -> Result<PostContext> {
    let discussion = match self.discussions.get(&post.discussion_id) {
      Some(d) => d.clone(),
      None => {
        let d = self
          .provider
          .get_discussion(post.discussion_id)
          .await
          .map_err(Error::provider)?
          .ok_or_else(|| Error::missing(Dependency::Discussion, post.discussion_id))?;
        self.discussions.insert(d.id, d.clone());
        d
      }
    };

    let forum = match self.forums.get(&discussion.forum_id) {
      Some(f) => f.clone(),
      None => {
        let f = self
          .provider
          .get_forum(discussion.forum_id)
          .await
          .map_err(Error::provider)?
          .ok_or_else(|| Error::missing(Dependency::Forum, discussion.forum_id))?;
        self.forums.insert(f.id, f.clone());
        f
      }
    };

    let course = match self.courses.get(&forum.course_id) {
      Some(c) => c.clone(),
      None => {
        let c = self
          .provider
          .get_course(forum.course_id)
          .await
          .map_err(Error::provider)?
          .ok_or_else(|| Error::missing(Dependency::Course, forum.course_id))?;
        self.courses.insert(c.id, c.clone());
        c
      }
    };

    Ok(PostContext { discussion, forum, course })
  }

  /// Classify every candidate for `post`.
  ///
  /// Duplicate candidate ids are evaluated once; results keep the order in
  /// which ids first appear.
  pub async fn evaluate(&mut self, post: &Post, candidates: &[UserId]) -> Result<Evaluation> {
    let ctx = self.context(post).await?;
    tracing::info!(
      post_id = post.id,
      discussion_id = ctx.discussion.id,
      forum_id = ctx.forum.id,
      candidates = candidates.len(),
      "evaluating post"
    );

    let mut seen = HashSet::with_capacity(candidates.len());
    let mut results = Vec::with_capacity(candidates.len());
    let mut delivered = 0u32;

    for &user_id in candidates {
      if !seen.insert(user_id) {
        continue;
      }
      let result = self.evaluate_user(post, &ctx, user_id).await?;
      match &result.outcome {
        Outcome::Send { delay_secs } => {
          delivered += 1;
          tracing::debug!(user_id, delay_secs, "would send");
        }
        Outcome::Queue { .. } => tracing::debug!(user_id, "queued for digest"),
        Outcome::Skip { reason } => tracing::debug!(user_id, reason = reason.code(), "skipped"),
      }
      results.push(result);
    }

    tracing::info!(post_id = post.id, delivered, total = results.len(), "evaluation finished");

    Ok(Evaluation {
      post_id: post.id,
      subject: post.subject.clone(),
      post_created: post.created,
      evaluated_at: self.now,
      results,
      delivered,
    })
  }

  async fn evaluate_user(
    &mut self,
    post: &Post,
    ctx: &PostContext,
    user_id: UserId,
  ) -> Result<EvaluationResult> {
    let PostContext { discussion, forum, course } = ctx;
    let provider = self.provider;

    let user = self.users.resolve(provider, user_id).await?;
    let mut result = EvaluationResult {
      user_id,
      email: user.as_ref().map(|u| u.email.clone()),
      outcome: Outcome::Skip { reason: SkipReason::NotSubscribed },
      profile: None,
    };

    // Subscription gates.
    if !user.as_ref().is_some_and(User::is_active)
      || !provider
        .is_subscribed_to_forum(user_id, forum.id)
        .await
        .map_err(Error::provider)?
    {
      return Ok(result);
    }
    match provider
      .discussion_subscription(forum.id, user_id, discussion.id)
      .await
      .map_err(Error::provider)?
    {
      Some(DiscussionSubscription::Unsubscribed) => return Ok(result),
      Some(DiscussionSubscription::Subscribed { since }) if since > post.created => {
        return Ok(skip(result, SkipReason::SubscribedAfterPost));
      }
      _ => {}
    }

    // Q&A forums only mail participants, except for the opening post.
    if forum.kind == ForumType::QAndA
      && post.id != discussion.first_post_id
      && !provider
        .user_has_posted_in(discussion.id, user_id)
        .await
        .map_err(Error::provider)?
    {
      return Ok(skip(result, SkipReason::QandaNotParticipant));
    }

    if self.users.resolve(provider, post.author_id).await?.is_none() {
      return Ok(skip(result, SkipReason::AuthorMissing));
    }

    let groups = provider
      .groups_of(user_id, forum.id)
      .await
      .map_err(Error::provider)?;
    let caps = &mut self.caps;
    let access_all_groups = caps.has(provider, user_id, forum, Capability::AccessAllGroups).await?;
    let group_mode = course.effective_group_mode(forum);
    let in_discussion_group =
      !discussion.is_grouped() || !group_mode.is_enforcing() || groups.contains(&discussion.group_id);
    let mut profile = RecipientProfile {
      view_full_names: caps.has(provider, user_id, forum, Capability::ViewFullNames).await?,
      can_post: caps
        .has(provider, user_id, forum, Capability::reply_for(forum.kind))
        .await?
        && (in_discussion_group || access_all_groups),
      access_all_groups,
      groups,
      digest: None,
    };

    // Group gates: the group must still exist, then the user must belong to
    // it or hold the all-groups override.
    if discussion.is_grouped() && group_mode.is_enforcing() {
      if !provider
        .group_exists(discussion.group_id)
        .await
        .map_err(Error::provider)?
      {
        result.profile = Some(profile);
        return Ok(skip(result, SkipReason::GroupMissing));
      }
      if !profile.groups.contains(&discussion.group_id) && !profile.access_all_groups {
        result.profile = Some(profile);
        return Ok(skip(result, SkipReason::GroupMismatch));
      }
    }

    if !provider
      .can_see_post(post, discussion, user_id)
      .await
      .map_err(Error::provider)?
    {
      result.profile = Some(profile);
      return Ok(skip(result, SkipReason::CannotViewPost));
    }

    let digest = provider
      .digest_preference(user_id, forum.id)
      .await
      .map_err(Error::provider)?;
    profile.digest = Some(digest);
    result.profile = Some(profile);

    result.outcome = if digest > 0 {
      Outcome::Queue {
        entry: DigestEntry {
          user_id,
          discussion_id: discussion.id,
          post_id: post.id,
          time_modified: post.created,
        },
      }
    } else {
      Outcome::Send { delay_secs: (self.now - post.created).num_seconds() }
    };
    Ok(result)
  }
}

fn skip(mut result: EvaluationResult, reason: SkipReason) -> EvaluationResult {
  result.outcome = Outcome::Skip { reason };
  result
}

/// One-shot evaluation of `post` against `candidates` at `now`.
pub async fn evaluate<P: ForumProvider>(
  post: &Post,
  candidates: &[UserId],
  provider: &P,
  now: DateTime<Utc>,
) -> Result<Evaluation> {
  Evaluator::new(provider, now).evaluate(post, candidates).await
}
