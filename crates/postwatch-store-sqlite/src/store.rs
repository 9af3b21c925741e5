//! [`SqliteStore`]: the SQLite implementation of [`ForumProvider`] and
//! [`Mailer`].

use std::{collections::BTreeSet, path::Path};

use rusqlite::OptionalExtension as _;

use postwatch_core::{
  access::{Capability, ViewerAccess, post_visible},
  digest::resolve_preference,
  forum::{
    Course, CourseId, Discussion, DiscussionId, DiscussionSubscription, Forum, ForumId,
    GroupId, Post, PostId, User, UserId,
  },
  mail::{Mailer, OutgoingMail},
  provider::ForumProvider,
  snapshot::Snapshot,
  window::PostWindow,
};

use crate::{
  Result,
  encode::{
    POST_COLUMNS, RawCourse, RawDiscussion, RawForum, RawOutgoing, RawPost, USER_COLUMNS,
    decode_subscription, encode_dt, encode_subscription, raw_user,
  },
  schema::SCHEMA,
};

/// Row counts written by [`SqliteStore::import_snapshot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
  pub courses:     usize,
  pub forums:      usize,
  pub discussions: usize,
  pub posts:       usize,
  pub users:       usize,
  /// Groups, memberships, subscriptions, digests and capabilities.
  pub other:       usize,
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// Forum data and the mail outbox in a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store; useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Write every record of `snapshot` in one transaction. Existing rows with
  /// the same keys are replaced.
  pub async fn import_snapshot(&self, snapshot: &Snapshot) -> Result<ImportSummary> {
    let s = snapshot.clone();

    let summary = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut summary = ImportSummary::default();

        for c in &s.courses {
          summary.courses += tx.execute(
            "INSERT OR REPLACE INTO courses (course_id, group_mode, force_group_mode)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![c.id, c.group_mode.as_i64(), c.force_group_mode],
          )?;
        }

        for f in &s.forums {
          summary.forums += tx.execute(
            "INSERT OR REPLACE INTO forums
               (forum_id, course_id, name, forum_type, group_mode, grouping_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
              f.id,
              f.course_id,
              f.name,
              f.kind.as_str(),
              f.group_mode.as_i64(),
              f.grouping_id,
            ],
          )?;
        }

        for d in &s.discussions {
          summary.discussions += tx.execute(
            "INSERT OR REPLACE INTO discussions
               (discussion_id, forum_id, name, group_id, first_post_id, created,
                time_start, time_end)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
              d.id,
              d.forum_id,
              d.name,
              d.group_id,
              d.first_post_id,
              encode_dt(d.created),
              d.time_start.map(encode_dt),
              d.time_end.map(encode_dt),
            ],
          )?;
        }

        for p in &s.posts {
          summary.posts += tx.execute(
            "INSERT OR REPLACE INTO posts
               (post_id, discussion_id, parent_id, author_id, created, modified,
                subject, mail_now, mailed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
              p.id,
              p.discussion_id,
              p.parent,
              p.author_id,
              encode_dt(p.created),
              encode_dt(p.modified),
              p.subject,
              p.mail_now,
              p.mailed,
            ],
          )?;
        }

        for u in &s.users {
          summary.users += tx.execute(
            "INSERT OR REPLACE INTO users
               (user_id, username, email, first_name, last_name, mail_digest,
                deleted, suspended)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
              u.id,
              u.username,
              u.email,
              u.first_name,
              u.last_name,
              u.mail_digest,
              u.deleted,
              u.suspended,
            ],
          )?;
        }

        for g in &s.groups {
          summary.other += tx.execute(
            "INSERT OR REPLACE INTO course_groups (group_id, course_id, name, grouping_id)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![g.id, g.course_id, g.name, g.grouping_id],
          )?;
        }

        for m in &s.group_members {
          summary.other += tx.execute(
            "INSERT OR REPLACE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
            rusqlite::params![m.group_id, m.user_id],
          )?;
        }

        for sub in &s.forum_subscriptions {
          summary.other += tx.execute(
            "INSERT OR REPLACE INTO forum_subscriptions (forum_id, user_id) VALUES (?1, ?2)",
            rusqlite::params![sub.forum_id, sub.user_id],
          )?;
        }

        for sub in &s.discussion_subscriptions {
          let (state, since) = encode_subscription(&sub.subscription);
          summary.other += tx.execute(
            "INSERT OR REPLACE INTO discussion_subscriptions
               (forum_id, discussion_id, user_id, state, since)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![sub.forum_id, sub.discussion_id, sub.user_id, state, since],
          )?;
        }

        for d in &s.digests {
          summary.other += tx.execute(
            "INSERT OR REPLACE INTO forum_digests (forum_id, user_id, mail_digest)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![d.forum_id, d.user_id, d.mail_digest],
          )?;
        }

        for c in &s.capabilities {
          summary.other += tx.execute(
            "INSERT OR REPLACE INTO capabilities (user_id, forum_id, capability, allowed)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![c.user_id, c.forum_id.unwrap_or(0), c.capability.as_str(), c.allowed],
          )?;
        }

        tx.commit()?;
        Ok(summary)
      })
      .await?;

    tracing::info!(
      posts = summary.posts,
      users = summary.users,
      discussions = summary.discussions,
      "snapshot imported"
    );
    Ok(summary)
  }

  /// Every spooled message, oldest first.
  pub async fn outbox(&self) -> Result<Vec<OutgoingMail>> {
    let raws: Vec<RawOutgoing> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT message_id, channel, from_name, from_address, to_name, to_address,
                  subject, body_text, body_html, queued_at
           FROM outbox
           ORDER BY queued_at ASC, rowid ASC",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawOutgoing {
              message_id:   row.get(0)?,
              channel:      row.get(1)?,
              from_name:    row.get(2)?,
              from_address: row.get(3)?,
              to_name:      row.get(4)?,
              to_address:   row.get(5)?,
              subject:      row.get(6)?,
              body_text:    row.get(7)?,
              body_html:    row.get(8)?,
              queued_at:    row.get(9)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawOutgoing::into_mail).collect()
  }

  /// Look up a capability, preferring a forum-level row over a site-wide one.
  async fn capability(
    &self,
    user_id: UserId,
    forum_id: ForumId,
    capability: Capability,
  ) -> Result<bool> {
    let allowed: Option<bool> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT allowed FROM capabilities
               WHERE user_id = ?1 AND capability = ?3 AND forum_id IN (?2, 0)
               ORDER BY forum_id = 0
               LIMIT 1",
              rusqlite::params![user_id, forum_id, capability.as_str()],
              |row| row.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(allowed.unwrap_or(false))
  }

  async fn posted_in(&self, discussion_id: DiscussionId, user_id: UserId) -> Result<bool> {
    let posted = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT 1 FROM posts WHERE discussion_id = ?1 AND author_id = ?2 LIMIT 1",
              rusqlite::params![discussion_id, user_id],
              |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false),
        )
      })
      .await?;
    Ok(posted)
  }
}

// ─── ForumProvider impl ──────────────────────────────────────────────────────

impl ForumProvider for SqliteStore {
  type Error = crate::Error;

  // ── Records ───────────────────────────────────────────────────────────────

  async fn get_post(&self, id: PostId) -> Result<Option<Post>> {
    let raw: Option<RawPost> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {POST_COLUMNS} FROM posts p WHERE p.post_id = ?1"),
              rusqlite::params![id],
              RawPost::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawPost::into_post).transpose()
  }

  async fn get_discussion(&self, id: DiscussionId) -> Result<Option<Discussion>> {
    let raw: Option<RawDiscussion> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT discussion_id, forum_id, name, group_id, first_post_id, created,
                      time_start, time_end
               FROM discussions WHERE discussion_id = ?1",
              rusqlite::params![id],
              |row| {
                Ok(RawDiscussion {
                  discussion_id: row.get(0)?,
                  forum_id:      row.get(1)?,
                  name:          row.get(2)?,
                  group_id:      row.get(3)?,
                  first_post_id: row.get(4)?,
                  created:       row.get(5)?,
                  time_start:    row.get(6)?,
                  time_end:      row.get(7)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawDiscussion::into_discussion).transpose()
  }

  async fn get_forum(&self, id: ForumId) -> Result<Option<Forum>> {
    let raw: Option<RawForum> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT forum_id, course_id, name, forum_type, group_mode, grouping_id
               FROM forums WHERE forum_id = ?1",
              rusqlite::params![id],
              |row| {
                Ok(RawForum {
                  forum_id:    row.get(0)?,
                  course_id:   row.get(1)?,
                  name:        row.get(2)?,
                  forum_type:  row.get(3)?,
                  group_mode:  row.get(4)?,
                  grouping_id: row.get(5)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawForum::into_forum).transpose()
  }

  async fn get_course(&self, id: CourseId) -> Result<Option<Course>> {
    let raw: Option<RawCourse> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT course_id, group_mode, force_group_mode FROM courses WHERE course_id = ?1",
              rusqlite::params![id],
              |row| {
                Ok(RawCourse {
                  course_id:        row.get(0)?,
                  group_mode:       row.get(1)?,
                  force_group_mode: row.get(2)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawCourse::into_course).transpose()
  }

  async fn get_user(&self, id: UserId) -> Result<Option<User>> {
    let user = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {USER_COLUMNS} FROM users u WHERE u.user_id = ?1"),
              rusqlite::params![id],
              raw_user,
            )
            .optional()?,
        )
      })
      .await?;
    Ok(user)
  }

  // ── Candidate selection ───────────────────────────────────────────────────

  async fn subscribed_users(&self, forum_id: ForumId) -> Result<Vec<User>> {
    let users = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {USER_COLUMNS}
           FROM users u
           JOIN forum_subscriptions s ON s.user_id = u.user_id
           WHERE s.forum_id = ?1 AND u.deleted = 0 AND u.suspended = 0
           ORDER BY u.user_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![forum_id], raw_user)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(users)
  }

  async fn posts_in_window<'a>(&'a self, window: &'a PostWindow) -> Result<Vec<Post>> {
    let start = encode_dt(window.start);
    let end = encode_dt(window.end);
    let now = encode_dt(window.now);
    let include_mailed = window.include_mailed;

    // ?4 is always referenced, so the statement always takes four params.
    let start_clause = if window.timed_posts {
      "(p.created >= ?1 OR d.time_start >= ?1)
       AND (d.time_start IS NULL OR d.time_start < ?3)
       AND (d.time_end IS NULL OR d.time_end > ?3)"
    } else {
      "p.created >= ?1"
    };

    let raws: Vec<RawPost> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {POST_COLUMNS}
           FROM posts p
           JOIN discussions d ON d.discussion_id = p.discussion_id
           WHERE {start_clause}
             AND (p.created < ?2 OR p.mail_now = 1)
             AND (p.mailed = 0 OR ?4)
           ORDER BY p.modified ASC, p.post_id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![start, end, now, include_mailed], RawPost::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    tracing::debug!(count = raws.len(), "posts in window");
    raws.into_iter().map(RawPost::into_post).collect()
  }

  // ── Subscriptions ─────────────────────────────────────────────────────────

  async fn is_subscribed_to_forum(&self, user_id: UserId, forum_id: ForumId) -> Result<bool> {
    let subscribed = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT 1 FROM forum_subscriptions WHERE forum_id = ?1 AND user_id = ?2",
              rusqlite::params![forum_id, user_id],
              |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false),
        )
      })
      .await?;
    Ok(subscribed)
  }

  async fn discussion_subscription(
    &self,
    forum_id: ForumId,
    user_id: UserId,
    discussion_id: DiscussionId,
  ) -> Result<Option<DiscussionSubscription>> {
    let raw: Option<(String, Option<String>)> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT state, since FROM discussion_subscriptions
               WHERE forum_id = ?1 AND user_id = ?2 AND discussion_id = ?3",
              rusqlite::params![forum_id, user_id, discussion_id],
              |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(|(state, since)| decode_subscription(&state, since)).transpose()
  }

  async fn digest_preference(&self, user_id: UserId, forum_id: ForumId) -> Result<i32> {
    let row: Option<(Option<i32>, i32)> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT d.mail_digest, u.mail_digest
               FROM users u
               LEFT JOIN forum_digests d ON d.user_id = u.user_id AND d.forum_id = ?2
               WHERE u.user_id = ?1",
              rusqlite::params![user_id, forum_id],
              |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?,
        )
      })
      .await?;

    Ok(row.map_or(0, |(per_forum, default)| resolve_preference(per_forum, default)))
  }

  // ── Participation, groups, access ─────────────────────────────────────────

  async fn user_has_posted_in(&self, discussion_id: DiscussionId, user_id: UserId) -> Result<bool> {
    self.posted_in(discussion_id, user_id).await
  }

  async fn groups_of(&self, user_id: UserId, forum_id: ForumId) -> Result<BTreeSet<GroupId>> {
    let ids: Vec<GroupId> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT g.group_id
           FROM course_groups g
           JOIN group_members m ON m.group_id = g.group_id
           JOIN forums f        ON f.course_id = g.course_id
           WHERE f.forum_id = ?1
             AND m.user_id = ?2
             AND (f.grouping_id IS NULL OR f.grouping_id = 0 OR g.grouping_id = f.grouping_id)",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![forum_id, user_id], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(ids.into_iter().collect())
  }

  async fn group_exists(&self, group_id: GroupId) -> Result<bool> {
    let exists = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT 1 FROM course_groups WHERE group_id = ?1",
              rusqlite::params![group_id],
              |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false),
        )
      })
      .await?;
    Ok(exists)
  }

  async fn has_capability(
    &self,
    user_id: UserId,
    forum_id: ForumId,
    capability: Capability,
  ) -> Result<bool> {
    self.capability(user_id, forum_id, capability).await
  }

  async fn can_see_post<'a>(
    &'a self,
    post: &'a Post,
    discussion: &'a Discussion,
    viewer_id: UserId,
  ) -> Result<bool> {
    let Some(forum) = self.get_forum(discussion.forum_id).await? else {
      return Ok(false);
    };
    let viewer = ViewerAccess {
      viewer_id,
      can_view_discussion: self
        .capability(viewer_id, forum.id, Capability::ViewDiscussion)
        .await?,
      can_view_qanda_without_posting: self
        .capability(viewer_id, forum.id, Capability::ViewQandaWithoutPosting)
        .await?,
      has_posted: self.posted_in(discussion.id, viewer_id).await?,
    };
    Ok(post_visible(&forum, discussion, post, viewer))
  }
}

// ─── Mailer impl ─────────────────────────────────────────────────────────────

impl Mailer for SqliteStore {
  type Error = crate::Error;

  async fn send<'a>(&'a self, mail: &'a OutgoingMail) -> Result<()> {
    let id_str = mail.id.hyphenated().to_string();
    let channel = mail.channel.as_str();
    let from = mail.from.clone();
    let to = mail.to.clone();
    let subject = mail.subject.clone();
    let text = mail.text.clone();
    let html = mail.html.clone();
    let at_str = encode_dt(mail.queued_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO outbox (
             message_id, channel, from_name, from_address, to_name, to_address,
             subject, body_text, body_html, queued_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
          rusqlite::params![
            id_str,
            channel,
            from.name,
            from.address,
            to.name,
            to.address,
            subject,
            text,
            html,
            at_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    tracing::info!(message_id = %mail.id, channel = %mail.channel, to = %mail.to, "mail spooled");
    Ok(())
  }
}
