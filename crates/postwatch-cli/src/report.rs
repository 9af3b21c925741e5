//! Human and JSON renderings of a `post` run.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use postwatch_core::{Evaluation, EvaluationResult, Outcome, forum::PostId};
use serde::Serialize;

const DATE: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PostReport {
  /// The post is not due for mailing inside the selected window.
  NotInWindow {
    post_id:      PostId,
    start:        DateTime<Utc>,
    end:          DateTime<Utc>,
    window_empty: bool,
  },
  Evaluated {
    /// Only one user was asked about, so no total is printed.
    single_user: bool,
    evaluation:  Evaluation,
  },
}

impl PostReport {
  pub fn to_json(&self) -> serde_json::Result<String> { serde_json::to_string_pretty(self) }

  pub fn to_text(&self) -> String {
    let mut out = String::new();
    match self {
      Self::NotInWindow { post_id, start, end, window_empty } => {
        let range = format!("{} <> {}", start.format(DATE), end.format(DATE));
        if *window_empty {
          let _ = writeln!(out, "No posts found in the range {range}");
        }
        let _ = writeln!(out, "Postid {post_id} not found in range {range}");
      }
      Self::Evaluated { single_user, evaluation } => {
        let _ = writeln!(out, "Processing post {} {}", evaluation.post_id, evaluation.subject);
        for result in &evaluation.results {
          let _ = writeln!(out, "{}", result_line(evaluation, result));
        }
        if !single_user {
          let _ = writeln!(
            out,
            "{} users could be sent post {}, '{}'",
            evaluation.delivered, evaluation.post_id, evaluation.subject
          );
        }
      }
    }
    out
  }
}

fn result_line(evaluation: &Evaluation, result: &EvaluationResult) -> String {
  let who = format!(
    "User {} {}",
    result.user_id,
    result.email.as_deref().unwrap_or("(unknown)")
  );
  match &result.outcome {
    Outcome::Send { delay_secs } => format!(
      "Would send post {} from {} to user {} after delay of {} seconds at {} : {}",
      evaluation.post_id,
      evaluation.post_created.format(DATE),
      result.user_id,
      delay_secs,
      evaluation.evaluated_at.format("%Y-%m-%d %H:%M:%S%.6f"),
      evaluation.subject,
    ),
    Outcome::Queue { .. } => format!("{who}. Email queued, user wants emails as digest."),
    Outcome::Skip { reason } => format!("{who}. [{}] {}", reason.code(), reason.describe()),
  }
}
