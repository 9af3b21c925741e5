//! Encoding and decoding helpers between domain types and the plain
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds, `Z`
//! suffix) so that string comparison in SQL matches chronological order.
//! Enumerations are stored as their lowercase names or small integers.

use chrono::{DateTime, SecondsFormat, Utc};
use postwatch_core::{
  forum::{Course, Discussion, DiscussionSubscription, Forum, ForumType, GroupMode, Post, User},
  mail::{MailChannel, Mailbox, OutgoingMail},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Micros, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

// ─── Enumerations ────────────────────────────────────────────────────────────

pub fn decode_forum_type(s: &str) -> Result<ForumType> {
  ForumType::parse(s).ok_or_else(|| Error::InvalidValue { column: "forum_type", value: s.into() })
}

pub fn decode_group_mode(v: i64) -> Result<GroupMode> {
  GroupMode::from_i64(v).ok_or_else(|| Error::InvalidValue { column: "group_mode", value: v.to_string() })
}

pub fn encode_subscription(sub: &DiscussionSubscription) -> (&'static str, Option<String>) {
  match sub {
    DiscussionSubscription::Subscribed { since } => ("subscribed", Some(encode_dt(*since))),
    DiscussionSubscription::Unsubscribed => ("unsubscribed", None),
  }
}

pub fn decode_subscription(state: &str, since: Option<String>) -> Result<DiscussionSubscription> {
  match (state, since) {
    ("subscribed", Some(since)) => Ok(DiscussionSubscription::Subscribed { since: decode_dt(&since)? }),
    ("unsubscribed", _) => Ok(DiscussionSubscription::Unsubscribed),
    (other, _) => Err(Error::InvalidValue { column: "state", value: other.into() }),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `posts` row.
pub struct RawPost {
  pub post_id:       i64,
  pub discussion_id: i64,
  pub parent_id:     Option<i64>,
  pub author_id:     i64,
  pub created:       String,
  pub modified:      String,
  pub subject:       String,
  pub mail_now:      bool,
  pub mailed:        bool,
}

/// Column list matching [`RawPost::from_row`].
pub const POST_COLUMNS: &str = "p.post_id, p.discussion_id, p.parent_id, p.author_id, \
   p.created, p.modified, p.subject, p.mail_now, p.mailed";

impl RawPost {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      post_id:       row.get(0)?,
      discussion_id: row.get(1)?,
      parent_id:     row.get(2)?,
      author_id:     row.get(3)?,
      created:       row.get(4)?,
      modified:      row.get(5)?,
      subject:       row.get(6)?,
      mail_now:      row.get(7)?,
      mailed:        row.get(8)?,
    })
  }

  pub fn into_post(self) -> Result<Post> {
    Ok(Post {
      id:            self.post_id,
      discussion_id: self.discussion_id,
      parent:        self.parent_id.filter(|&p| p > 0),
      author_id:     self.author_id,
      created:       decode_dt(&self.created)?,
      modified:      decode_dt(&self.modified)?,
      subject:       self.subject,
      mail_now:      self.mail_now,
      mailed:        self.mailed,
    })
  }
}

pub struct RawDiscussion {
  pub discussion_id: i64,
  pub forum_id:      i64,
  pub name:          String,
  pub group_id:      i64,
  pub first_post_id: i64,
  pub created:       String,
  pub time_start:    Option<String>,
  pub time_end:      Option<String>,
}

impl RawDiscussion {
  pub fn into_discussion(self) -> Result<Discussion> {
    Ok(Discussion {
      id:            self.discussion_id,
      forum_id:      self.forum_id,
      name:          self.name,
      group_id:      self.group_id,
      first_post_id: self.first_post_id,
      created:       decode_dt(&self.created)?,
      time_start:    decode_opt_dt(self.time_start)?,
      time_end:      decode_opt_dt(self.time_end)?,
    })
  }
}

pub struct RawForum {
  pub forum_id:    i64,
  pub course_id:   i64,
  pub name:        String,
  pub forum_type:  String,
  pub group_mode:  i64,
  pub grouping_id: Option<i64>,
}

impl RawForum {
  pub fn into_forum(self) -> Result<Forum> {
    Ok(Forum {
      id:          self.forum_id,
      course_id:   self.course_id,
      name:        self.name,
      kind:        decode_forum_type(&self.forum_type)?,
      group_mode:  decode_group_mode(self.group_mode)?,
      grouping_id: self.grouping_id.filter(|&g| g > 0),
    })
  }
}

pub struct RawCourse {
  pub course_id:        i64,
  pub group_mode:       i64,
  pub force_group_mode: bool,
}

impl RawCourse {
  pub fn into_course(self) -> Result<Course> {
    Ok(Course {
      id:               self.course_id,
      group_mode:       decode_group_mode(self.group_mode)?,
      force_group_mode: self.force_group_mode,
    })
  }
}

/// Column list matching [`raw_user`].
pub const USER_COLUMNS: &str = "u.user_id, u.username, u.email, u.first_name, u.last_name, \
   u.mail_digest, u.deleted, u.suspended";

/// Users carry no encoded columns, so they are read straight into the
/// domain type.
pub fn raw_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
  Ok(User {
    id:          row.get(0)?,
    username:    row.get(1)?,
    email:       row.get(2)?,
    first_name:  row.get(3)?,
    last_name:   row.get(4)?,
    mail_digest: row.get(5)?,
    deleted:     row.get(6)?,
    suspended:   row.get(7)?,
  })
}

/// Raw strings read directly from an `outbox` row.
pub struct RawOutgoing {
  pub message_id:   String,
  pub channel:      String,
  pub from_name:    String,
  pub from_address: String,
  pub to_name:      String,
  pub to_address:   String,
  pub subject:      String,
  pub body_text:    String,
  pub body_html:    String,
  pub queued_at:    String,
}

impl RawOutgoing {
  pub fn into_mail(self) -> Result<OutgoingMail> {
    Ok(OutgoingMail {
      id:        Uuid::parse_str(&self.message_id)?,
      channel:   self.channel.parse::<MailChannel>()?,
      from:      Mailbox { name: self.from_name, address: self.from_address },
      to:        Mailbox { name: self.to_name, address: self.to_address },
      subject:   self.subject,
      text:      self.body_text,
      html:      self.body_html,
      queued_at: decode_dt(&self.queued_at)?,
    })
  }
}
