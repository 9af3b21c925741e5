//! Evaluator behaviour against the in-memory snapshot provider.

use std::{
  collections::BTreeSet,
  fmt,
  sync::atomic::{AtomicUsize, Ordering},
};

use chrono::{DateTime, TimeZone, Utc};

use crate::{
  Error, Outcome, SkipReason,
  access::Capability,
  error::Dependency,
  evaluate::{Evaluator, evaluate},
  forum::{
    Course, Discussion, DiscussionSubscription, Forum, ForumType, Group, GroupMode, Post,
    User,
  },
  provider::ForumProvider,
  snapshot::{
    CapabilityRow, DigestRow, DiscussionSubscriptionRow, ForumSubscriptionRow, MembershipRow,
    Snapshot,
  },
  users::UserCache,
  window::PostWindow,
};

fn at(secs: i64) -> DateTime<Utc> { Utc.timestamp_opt(secs, 0).unwrap() }

const NOW: i64 = 10_000;
const REPLY_CREATED: i64 = 2_000;

fn user(id: i64) -> User {
  User {
    id,
    username: format!("user{id}"),
    email: format!("user{id}@example.com"),
    first_name: "User".into(),
    last_name: id.to_string(),
    mail_digest: 0,
    deleted: false,
    suspended: false,
  }
}

fn post(id: i64, author_id: i64, created: i64, parent: Option<i64>) -> Post {
  Post {
    id,
    discussion_id: 10,
    parent,
    author_id,
    created: at(created),
    modified: at(created),
    subject: format!("post {id}"),
    mail_now: false,
    mailed: false,
  }
}

/// One course, one general forum, one discussion opened by user 2 with a
/// reply by user 3. Users 1-4 subscribe; everyone may view discussions.
fn base() -> Snapshot {
  let mut s = Snapshot {
    courses: vec![Course { id: 1, group_mode: GroupMode::NoGroups, force_group_mode: false }],
    forums: vec![Forum {
      id:          1,
      course_id:   1,
      name:        "General".into(),
      kind:        ForumType::General,
      group_mode:  GroupMode::NoGroups,
      grouping_id: None,
    }],
    discussions: vec![Discussion {
      id:            10,
      forum_id:      1,
      name:          "Welcome".into(),
      group_id:      0,
      first_post_id: 100,
      created:       at(1_000),
      time_start:    None,
      time_end:      None,
    }],
    posts: vec![post(100, 2, 1_000, None), post(101, 3, REPLY_CREATED, Some(100))],
    users: (1..=5).map(user).collect(),
    ..Snapshot::default()
  };
  for user_id in 1..=4 {
    s.forum_subscriptions.push(ForumSubscriptionRow { forum_id: 1, user_id });
  }
  for user_id in 1..=5 {
    s.capabilities.push(CapabilityRow {
      user_id,
      forum_id: None,
      capability: Capability::ViewDiscussion,
      allowed: true,
    });
  }
  s
}

fn reply(s: &Snapshot) -> Post { s.posts[1].clone() }

fn first_post(s: &Snapshot) -> Post { s.posts[0].clone() }

fn skip_reason(s: &Snapshot, post: &Post, user_id: i64) -> Option<SkipReason> {
  let eval = block_on(evaluate(post, &[user_id], s, at(NOW))).unwrap();
  eval.results[0].outcome.skip_reason()
}

/// The snapshot provider never suspends, so a current-thread runtime is
/// enough to drive it from synchronous helpers.
fn block_on<F: std::future::Future>(f: F) -> F::Output {
  tokio::runtime::Builder::new_current_thread()
    .build()
    .expect("runtime")
    .block_on(f)
}

fn with_groups(mut s: Snapshot, mode: GroupMode) -> Snapshot {
  s.forums[0].group_mode = mode;
  s.discussions[0].group_id = 5;
  s.groups.push(Group { id: 5, course_id: 1, name: "Red".into(), grouping_id: None });
  s.group_members.push(MembershipRow { group_id: 5, user_id: 1 });
  s
}

// ─── Sending ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn subscriber_is_sent_with_delay_from_run_clock() {
  let s = base();
  let eval = evaluate(&reply(&s), &[1], &s, at(NOW)).await.unwrap();

  assert_eq!(eval.delivered, 1);
  assert_eq!(eval.results.len(), 1);
  assert_eq!(eval.results[0].outcome, Outcome::Send { delay_secs: NOW - REPLY_CREATED });
  assert_eq!(eval.results[0].email.as_deref(), Some("user1@example.com"));
  assert_eq!(eval.evaluated_at, at(NOW));
}

#[tokio::test]
async fn every_subscriber_counts_once() {
  let s = base();
  let eval = evaluate(&reply(&s), &[1, 2, 3, 4, 2, 1], &s, at(NOW)).await.unwrap();

  assert_eq!(eval.results.len(), 4);
  assert_eq!(eval.delivered, 4);
  let ids: Vec<_> = eval.results.iter().map(|r| r.user_id).collect();
  assert_eq!(ids, [1, 2, 3, 4]);
}

#[tokio::test]
async fn evaluation_is_idempotent() {
  let mut s = base();
  s.digests.push(DigestRow { forum_id: 1, user_id: 2, mail_digest: 1 });
  s.forum_subscriptions.retain(|r| r.user_id != 4);

  let candidates = [1, 2, 3, 4, 5];
  let first = evaluate(&reply(&s), &candidates, &s, at(NOW)).await.unwrap();
  let second = evaluate(&reply(&s), &candidates, &s, at(NOW)).await.unwrap();
  assert_eq!(first, second);

  // Reusing one evaluator (and its caches) gives the same answer too.
  let mut evaluator = Evaluator::new(&s, at(NOW));
  let a = evaluator.evaluate(&reply(&s), &candidates).await.unwrap();
  let b = evaluator.evaluate(&reply(&s), &candidates).await.unwrap();
  assert_eq!(a, b);
  assert_eq!(a, first);
}

// ─── Subscription gates ──────────────────────────────────────────────────────

#[test]
fn non_subscriber_is_skipped() {
  let s = base();
  assert_eq!(skip_reason(&s, &reply(&s), 5), Some(SkipReason::NotSubscribed));
}

#[test]
fn unknown_and_inactive_users_are_not_subscribers() {
  let mut s = base();
  s.users[0].suspended = true;
  assert_eq!(skip_reason(&s, &reply(&s), 1), Some(SkipReason::NotSubscribed));
  assert_eq!(skip_reason(&s, &reply(&s), 999), Some(SkipReason::NotSubscribed));
}

#[test]
fn discussion_unsubscribe_wins_over_forum_subscription() {
  let mut s = base();
  s.discussion_subscriptions.push(DiscussionSubscriptionRow {
    forum_id:      1,
    discussion_id: 10,
    user_id:       1,
    subscription:  DiscussionSubscription::Unsubscribed,
  });
  assert_eq!(skip_reason(&s, &reply(&s), 1), Some(SkipReason::NotSubscribed));
}

#[test]
fn subscribed_before_post_passes() {
  let mut s = base();
  s.discussion_subscriptions.push(DiscussionSubscriptionRow {
    forum_id:      1,
    discussion_id: 10,
    user_id:       1,
    subscription:  DiscussionSubscription::Subscribed { since: at(REPLY_CREATED - 10) },
  });
  assert_eq!(skip_reason(&s, &reply(&s), 1), None);
}

#[test]
fn subscribed_at_post_creation_passes() {
  let mut s = base();
  s.discussion_subscriptions.push(DiscussionSubscriptionRow {
    forum_id:      1,
    discussion_id: 10,
    user_id:       1,
    subscription:  DiscussionSubscription::Subscribed { since: at(REPLY_CREATED) },
  });
  assert_eq!(skip_reason(&s, &reply(&s), 1), None);
}

#[test]
fn subscribed_after_post_is_skipped() {
  let mut s = base();
  s.discussion_subscriptions.push(DiscussionSubscriptionRow {
    forum_id:      1,
    discussion_id: 10,
    user_id:       1,
    subscription:  DiscussionSubscription::Subscribed { since: at(REPLY_CREATED + 10) },
  });
  assert_eq!(skip_reason(&s, &reply(&s), 1), Some(SkipReason::SubscribedAfterPost));
}

// ─── Q&A ─────────────────────────────────────────────────────────────────────

#[test]
fn qanda_first_post_reaches_non_participants() {
  let mut s = base();
  s.forums[0].kind = ForumType::QAndA;
  assert_eq!(skip_reason(&s, &first_post(&s), 1), None);
}

#[test]
fn qanda_reply_needs_participation() {
  let mut s = base();
  s.forums[0].kind = ForumType::QAndA;
  assert_eq!(skip_reason(&s, &reply(&s), 1), Some(SkipReason::QandaNotParticipant));
  // User 2 opened the discussion.
  assert_eq!(skip_reason(&s, &reply(&s), 2), None);

  s.posts.push(post(102, 1, 1_500, Some(100)));
  assert_eq!(skip_reason(&s, &reply(&s), 1), None);
}

// ─── Author ──────────────────────────────────────────────────────────────────

#[test]
fn missing_author_is_skipped() {
  let mut s = base();
  s.users.retain(|u| u.id != 3);
  assert_eq!(skip_reason(&s, &reply(&s), 1), Some(SkipReason::AuthorMissing));
}

// ─── Groups ──────────────────────────────────────────────────────────────────

#[test]
fn group_member_passes_and_outsider_is_skipped() {
  for mode in [GroupMode::Separate, GroupMode::Visible] {
    let s = with_groups(base(), mode);
    assert_eq!(skip_reason(&s, &reply(&s), 1), None, "{mode:?}");
    assert_eq!(skip_reason(&s, &reply(&s), 2), Some(SkipReason::GroupMismatch), "{mode:?}");
  }
}

#[test]
fn access_all_groups_overrides_membership() {
  let mut s = with_groups(base(), GroupMode::Separate);
  s.capabilities.push(CapabilityRow {
    user_id:    2,
    forum_id:   Some(1),
    capability: Capability::AccessAllGroups,
    allowed:    true,
  });
  assert_eq!(skip_reason(&s, &reply(&s), 2), None);
}

#[test]
fn override_reaches_groups_without_membership() {
  // Nobody belongs to group 5; it still exists.
  let mut s = with_groups(base(), GroupMode::Separate);
  s.group_members.clear();
  s.capabilities.push(CapabilityRow {
    user_id:    2,
    forum_id:   Some(1),
    capability: Capability::AccessAllGroups,
    allowed:    true,
  });
  assert_eq!(skip_reason(&s, &reply(&s), 2), None);
  assert_eq!(skip_reason(&s, &reply(&s), 1), Some(SkipReason::GroupMismatch));
}

#[test]
fn deleted_group_is_skipped() {
  let mut s = with_groups(base(), GroupMode::Separate);
  s.groups.clear();
  assert_eq!(skip_reason(&s, &reply(&s), 1), Some(SkipReason::GroupMissing));
  assert_eq!(skip_reason(&s, &reply(&s), 2), Some(SkipReason::GroupMissing));
}

#[test]
fn groups_ignored_without_group_mode() {
  let s = with_groups(base(), GroupMode::NoGroups);
  assert_eq!(skip_reason(&s, &reply(&s), 2), None);
}

#[test]
fn forced_course_group_mode_applies() {
  let mut s = with_groups(base(), GroupMode::NoGroups);
  s.courses[0].group_mode = GroupMode::Separate;
  s.courses[0].force_group_mode = true;
  assert_eq!(skip_reason(&s, &reply(&s), 2), Some(SkipReason::GroupMismatch));
}

#[tokio::test]
async fn profile_records_groups_and_capabilities() {
  let mut s = with_groups(base(), GroupMode::Separate);
  s.capabilities.push(CapabilityRow {
    user_id:    1,
    forum_id:   None,
    capability: Capability::ReplyPost,
    allowed:    true,
  });
  let eval = evaluate(&reply(&s), &[1], &s, at(NOW)).await.unwrap();
  let profile = eval.results[0].profile.clone().unwrap();
  assert_eq!(profile.groups, BTreeSet::from([5]));
  assert!(profile.can_post);
  assert!(!profile.view_full_names);
  assert_eq!(profile.digest, Some(0));
}

// ─── Visibility ──────────────────────────────────────────────────────────────

#[test]
fn viewer_without_view_capability_is_skipped() {
  let mut s = base();
  s.capabilities.push(CapabilityRow {
    user_id:    1,
    forum_id:   Some(1),
    capability: Capability::ViewDiscussion,
    allowed:    false,
  });
  assert_eq!(skip_reason(&s, &reply(&s), 1), Some(SkipReason::CannotViewPost));
}

// ─── Digests ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn digest_user_is_queued_not_sent() {
  let mut s = base();
  s.digests.push(DigestRow { forum_id: 1, user_id: 1, mail_digest: 1 });
  let p = reply(&s);
  let eval = evaluate(&p, &[1], &s, at(NOW)).await.unwrap();

  assert_eq!(eval.delivered, 0);
  assert_eq!(eval.queued(), 1);
  let entry = eval.digest_queue().next().unwrap();
  assert_eq!(entry.user_id, 1);
  assert_eq!(entry.discussion_id, 10);
  assert_eq!(entry.post_id, p.id);
  assert_eq!(entry.time_modified, p.created);
}

#[tokio::test]
async fn positive_digest_never_sends() {
  let mut s = base();
  // User default and per-forum overrides, including the "use default" row.
  s.users[0].mail_digest = 2;
  s.digests.push(DigestRow { forum_id: 1, user_id: 2, mail_digest: 1 });
  s.digests.push(DigestRow { forum_id: 1, user_id: 3, mail_digest: 2 });
  s.users[3].mail_digest = 1;
  s.digests.push(DigestRow { forum_id: 1, user_id: 4, mail_digest: -1 });

  let eval = evaluate(&reply(&s), &[1, 2, 3, 4], &s, at(NOW)).await.unwrap();
  assert_eq!(eval.delivered, 0);
  assert!(eval.results.iter().all(|r| r.outcome.is_queue()));
}

#[tokio::test]
async fn forum_row_can_opt_back_into_immediate_mail() {
  let mut s = base();
  s.users[0].mail_digest = 1;
  s.digests.push(DigestRow { forum_id: 1, user_id: 1, mail_digest: 0 });
  let eval = evaluate(&reply(&s), &[1], &s, at(NOW)).await.unwrap();
  assert!(eval.results[0].outcome.is_send());
}

// ─── Missing dependencies ────────────────────────────────────────────────────

#[tokio::test]
async fn missing_forum_aborts_run() {
  let mut s = base();
  s.forums.clear();
  let err = evaluate(&reply(&s), &[1], &s, at(NOW)).await.unwrap_err();
  assert!(matches!(err, Error::DependencyMissing { kind: Dependency::Forum, id: 1 }));
  assert_eq!(err.to_string(), "could not find forum 1");
}

#[tokio::test]
async fn missing_discussion_and_course_abort_run() {
  let mut s = base();
  s.courses.clear();
  let err = evaluate(&reply(&s), &[1], &s, at(NOW)).await.unwrap_err();
  assert!(matches!(err, Error::DependencyMissing { kind: Dependency::Course, id: 1 }));

  let s = base();
  let mut orphan = reply(&s);
  orphan.discussion_id = 77;
  let err = evaluate(&orphan, &[1], &s, at(NOW)).await.unwrap_err();
  assert!(matches!(err, Error::DependencyMissing { kind: Dependency::Discussion, id: 77 }));
}

// ─── Provider failures ───────────────────────────────────────────────────────

#[derive(Debug)]
struct Unavailable;

impl fmt::Display for Unavailable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("backend unavailable") }
}

impl std::error::Error for Unavailable {}

/// Delegates to a snapshot, counting capability lookups. With `fail_digests`
/// set, every digest lookup fails.
struct Wrapped {
  inner:              Snapshot,
  fail_digests:       bool,
  capability_lookups: AtomicUsize,
}

impl Wrapped {
  fn new(inner: Snapshot) -> Self {
    Self { inner, fail_digests: false, capability_lookups: AtomicUsize::new(0) }
  }

  fn flaky(inner: Snapshot) -> Self { Self { fail_digests: true, ..Self::new(inner) } }

  fn lookups(&self) -> usize { self.capability_lookups.load(Ordering::SeqCst) }
}

impl ForumProvider for Wrapped {
  type Error = Unavailable;

  async fn get_post(&self, id: i64) -> Result<Option<Post>, Unavailable> {
    Ok(self.inner.get_post(id).await.unwrap_or_default())
  }

  async fn get_discussion(&self, id: i64) -> Result<Option<Discussion>, Unavailable> {
    Ok(self.inner.get_discussion(id).await.unwrap_or_default())
  }

  async fn get_forum(&self, id: i64) -> Result<Option<Forum>, Unavailable> {
    Ok(self.inner.get_forum(id).await.unwrap_or_default())
  }

  async fn get_course(&self, id: i64) -> Result<Option<Course>, Unavailable> {
    Ok(self.inner.get_course(id).await.unwrap_or_default())
  }

  async fn get_user(&self, id: i64) -> Result<Option<User>, Unavailable> {
    Ok(self.inner.get_user(id).await.unwrap_or_default())
  }

  async fn subscribed_users(&self, forum_id: i64) -> Result<Vec<User>, Unavailable> {
    Ok(self.inner.subscribed_users(forum_id).await.unwrap_or_default())
  }

  async fn posts_in_window<'a>(&'a self, window: &'a PostWindow) -> Result<Vec<Post>, Unavailable> {
    Ok(self.inner.posts_in_window(window).await.unwrap_or_default())
  }

  async fn is_subscribed_to_forum(&self, user_id: i64, forum_id: i64) -> Result<bool, Unavailable> {
    Ok(self.inner.is_subscribed_to_forum(user_id, forum_id).await.unwrap_or_default())
  }

  async fn discussion_subscription(
    &self,
    forum_id: i64,
    user_id: i64,
    discussion_id: i64,
  ) -> Result<Option<DiscussionSubscription>, Unavailable> {
    Ok(
      self
        .inner
        .discussion_subscription(forum_id, user_id, discussion_id)
        .await
        .unwrap_or_default(),
    )
  }

  async fn digest_preference(&self, user_id: i64, forum_id: i64) -> Result<i32, Unavailable> {
    if self.fail_digests {
      return Err(Unavailable);
    }
    Ok(self.inner.digest_preference(user_id, forum_id).await.unwrap_or_default())
  }

  async fn user_has_posted_in(&self, discussion_id: i64, user_id: i64) -> Result<bool, Unavailable> {
    Ok(self.inner.user_has_posted_in(discussion_id, user_id).await.unwrap_or_default())
  }

  async fn groups_of(&self, user_id: i64, forum_id: i64) -> Result<BTreeSet<i64>, Unavailable> {
    Ok(self.inner.groups_of(user_id, forum_id).await.unwrap_or_default())
  }

  async fn group_exists(&self, group_id: i64) -> Result<bool, Unavailable> {
    Ok(self.inner.group_exists(group_id).await.unwrap_or_default())
  }

  async fn has_capability(
    &self,
    user_id: i64,
    forum_id: i64,
    capability: Capability,
  ) -> Result<bool, Unavailable> {
    self.capability_lookups.fetch_add(1, Ordering::SeqCst);
    Ok(self.inner.has_capability(user_id, forum_id, capability).await.unwrap_or_default())
  }

  async fn can_see_post<'a>(
    &'a self,
    post: &'a Post,
    discussion: &'a Discussion,
    viewer_id: i64,
  ) -> Result<bool, Unavailable> {
    Ok(self.inner.can_see_post(post, discussion, viewer_id).await.unwrap_or_default())
  }
}

#[tokio::test]
async fn provider_failure_propagates() {
  let s = base();
  let p = reply(&s);
  let flaky = Wrapped::flaky(s);

  // Users who stop at an earlier gate never touch the failing lookup.
  let eval = evaluate(&p, &[5], &flaky, at(NOW)).await.unwrap();
  assert_eq!(eval.results[0].outcome.skip_reason(), Some(SkipReason::NotSubscribed));

  let err = evaluate(&p, &[5, 1], &flaky, at(NOW)).await.unwrap_err();
  assert!(matches!(err, Error::Provider(_)));
  assert_eq!(err.to_string(), "provider error: backend unavailable");
}

// ─── Run caches ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn capability_answers_are_reused_across_posts() {
  let s = base();
  let (first, second) = (first_post(&s), reply(&s));
  let provider = Wrapped::new(s);
  let mut evaluator = Evaluator::new(&provider, at(NOW));

  evaluator.evaluate(&first, &[1, 2]).await.unwrap();
  let asked = provider.lookups();
  assert!(asked > 0);
  assert_eq!(evaluator.capabilities().len(), asked);

  // Same forum, same recipients: nothing new to ask.
  let eval = evaluator.evaluate(&second, &[1, 2]).await.unwrap();
  assert_eq!(eval.delivered, 2);
  assert_eq!(provider.lookups(), asked);

  // A fresh evaluator starts cold.
  evaluate(&second, &[1], &provider, at(NOW)).await.unwrap();
  assert!(provider.lookups() > asked);
}

#[tokio::test]
async fn user_cache_keeps_only_limit_full_records() {
  let s = base();
  let mut evaluator = Evaluator::new(&s, at(NOW)).with_user_cache(UserCache::new(2));
  let ids = evaluator.prime_subscribers(1).await.unwrap();
  assert_eq!(ids, [1, 2, 3, 4]);
  assert!(evaluator.users().is_full(1));
  assert!(evaluator.users().is_full(2));
  assert!(!evaluator.users().is_full(3));
  assert!(evaluator.users().contains(4));

  // Minimal entries are loaded on demand, so emails are still reported.
  let eval = evaluator.evaluate(&reply(&s), &ids).await.unwrap();
  assert_eq!(eval.delivered, 4);
  assert_eq!(eval.result_for(4).unwrap().email.as_deref(), Some("user4@example.com"));
  assert!(!evaluator.users().is_full(4));
}

// ─── Snapshot documents ──────────────────────────────────────────────────────

#[tokio::test]
async fn snapshot_parses_from_json() {
  let raw = r#"{
    "courses": [{ "id": 1 }],
    "forums": [{ "id": 2, "course_id": 1, "type": "qanda" }],
    "discussions": [{
      "id": 3, "forum_id": 2, "first_post_id": 4,
      "created": "2024-01-01T00:00:00Z"
    }],
    "posts": [{
      "id": 4, "discussion_id": 3, "author_id": 9, "subject": "Why?",
      "created": "2024-01-01T00:00:00Z", "modified": "2024-01-01T00:00:00Z"
    }],
    "users": [{ "id": 9, "email": "nine@example.com" }],
    "forum_subscriptions": [{ "forum_id": 2, "user_id": 9 }],
    "discussion_subscriptions": [{
      "forum_id": 2, "discussion_id": 3, "user_id": 9,
      "state": "subscribed", "since": "2023-12-31T00:00:00Z"
    }],
    "capabilities": [{ "user_id": 9, "capability": "mod/forum:viewdiscussion" }]
  }"#;
  let s = Snapshot::from_json(raw).unwrap();
  assert_eq!(s.forums[0].kind, ForumType::QAndA);
  assert!(s.groups.is_empty());

  let p = s.posts[0].clone();
  let eval = evaluate(&p, &[9], &s, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())
    .await
    .unwrap();
  assert_eq!(eval.results[0].outcome, Outcome::Send { delay_secs: 86_400 });

  let back = Snapshot::from_json(&s.to_json().unwrap()).unwrap();
  assert_eq!(back, s);
}
