//! `postwatch post`: explain who the next mail run would notify about a post.

use std::path::PathBuf;

use anyhow::Context as _;
use chrono::{DateTime, TimeZone as _, Utc};
use clap::Args;
use postwatch_core::{
  Evaluator,
  forum::{PostId, UserId},
  provider::ForumProvider,
  users::UserCache,
  window::PostWindow,
};

use crate::{report::PostReport, settings::Settings};

#[derive(Args, Debug, Clone)]
pub struct PostArgs {
  /// Id of the post to examine.
  #[arg(short, long)]
  pub pid: PostId,

  /// Only examine this recipient.
  #[arg(short, long)]
  pub uid: Option<UserId>,

  /// Start of the window, as a unix timestamp or RFC 3339 date.
  #[arg(short, long, value_parser = parse_start)]
  pub start: Option<DateTime<Utc>>,

  /// Days to look back when no start is given.
  #[arg(short, long, default_value_t = 1)]
  pub days: u32,

  /// Ignore the editing grace period and include already mailed posts.
  #[arg(short, long)]
  pub force: bool,

  /// Print the report as JSON.
  #[arg(long)]
  pub json: bool,

  /// Read forum data from a JSON snapshot instead of the database.
  #[arg(long, value_name = "FILE")]
  pub snapshot: Option<PathBuf>,
}

pub fn parse_start(raw: &str) -> Result<DateTime<Utc>, String> {
  if let Ok(secs) = raw.parse::<i64>() {
    return Utc
      .timestamp_opt(secs, 0)
      .single()
      .ok_or_else(|| format!("timestamp out of range: {secs}"));
  }
  DateTime::parse_from_rfc3339(raw)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| format!("expected unix seconds or RFC 3339: {e}"))
}

/// Find the post inside the mail window and evaluate it. A post outside the
/// window is a report, not an error.
pub async fn run<P: ForumProvider>(
  provider: &P,
  args: &PostArgs,
  settings: &Settings,
  now: DateTime<Utc>,
) -> anyhow::Result<PostReport> {
  let window = PostWindow::resolve(
    now,
    args.start,
    args.days,
    settings.max_editing_time()?,
    args.force,
  )
  .context("failed to resolve the mail window")?
  .with_timed_posts(settings.timed_posts);

  let posts = provider
    .posts_in_window(&window)
    .await
    .context("failed to list posts in window")?;
  tracing::debug!(count = posts.len(), start = %window.start, end = %window.end, "window resolved");

  let Some(post) = posts.iter().find(|p| p.id == args.pid).cloned() else {
    return Ok(PostReport::NotInWindow {
      post_id:      args.pid,
      start:        window.start,
      end:          window.end,
      window_empty: posts.is_empty(),
    });
  };

  let mut evaluator =
    Evaluator::new(provider, now).with_user_cache(UserCache::new(settings.user_cache_limit));

  let candidates = match args.uid {
    Some(uid) => vec![uid],
    None => {
      let ctx = evaluator.context(&post).await?;
      evaluator.prime_subscribers(ctx.forum.id).await?
    }
  };

  let evaluation = evaluator.evaluate(&post, &candidates).await?;
  Ok(PostReport::Evaluated { single_user: args.uid.is_some(), evaluation })
}
