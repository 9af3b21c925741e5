//! `postwatch email`: compose a test message and hand it to the mailer.

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use clap::Args;
use postwatch_core::mail::{
  DEFAULT_TEST_RECIPIENT, MailChannel, Mailer, OutgoingMail, TestMail, compose_test_mail,
};

use crate::settings::Settings;

#[derive(Args, Debug, Clone)]
pub struct EmailArgs {
  /// Subject line; required.
  #[arg(short, long)]
  pub subject: String,

  /// Recipient address.
  #[arg(short, long, default_value = DEFAULT_TEST_RECIPIENT)]
  pub to: String,

  /// Sender address (defaults to `support_email` from the config).
  #[arg(short, long)]
  pub from: Option<String>,

  /// Delivery channel: `email` or `message`.
  #[arg(short, long, default_value = "email")]
  pub method: MailChannel,

  /// Print what would be sent instead of sending it.
  #[arg(short, long)]
  pub dry_run: bool,
}

/// Build the test message for `args`.
pub fn compose(
  args: &EmailArgs,
  settings: &Settings,
  now: DateTime<Utc>,
) -> anyhow::Result<OutgoingMail> {
  let from = args.from.clone().unwrap_or_else(|| settings.support_email.clone());
  let input = TestMail {
    subject: args.subject.clone(),
    from:    from.clone(),
    to:      args.to.clone(),
    channel: args.method,
    link:    settings.site_url.clone(),
    details: vec![
      ("subject".into(), args.subject.clone()),
      ("from".into(), from),
      ("to".into(), args.to.clone()),
      ("method".into(), args.method.to_string()),
      ("dryrun".into(), args.dry_run.to_string()),
    ],
  };
  compose_test_mail(&input, now).context("failed to compose test mail")
}

/// Send (or, on a dry run, only describe) the test message. Returns the line
/// to print.
pub async fn run<M: Mailer>(
  mailer: &M,
  args: &EmailArgs,
  settings: &Settings,
  now: DateTime<Utc>,
) -> anyhow::Result<String> {
  let mail = compose(args, settings, now)?;
  if args.dry_run {
    return Ok(dry_run_line(&mail));
  }

  mailer.send(&mail).await.context("failed to send test mail")?;
  Ok(match mail.channel {
    MailChannel::Email => format!(
      "Queued email {} (from: {}, to: {})",
      mail.id, mail.from.address, mail.to.address
    ),
    MailChannel::Message => format!("Queued notification {} to {}", mail.id, mail.to.address),
  })
}

pub fn dry_run_line(mail: &OutgoingMail) -> String {
  format!("Dry run: email from {} to {}", mail.from.address, mail.to.address)
}
