//! Outgoing mail and the transport seam.
//!
//! Delivery itself is someone else's job. A [`Mailer`] accepts a finished
//! [`OutgoingMail`] and hands it on (e.g. the SQLite store spools it into an
//! outbox table for the platform's mail transport).

use std::{fmt, future::Future, str::FromStr};

use chrono::{DateTime, Utc};
use quick_xml::escape::escape;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Default recipient for test mail: a public deliverability checker.
pub const DEFAULT_TEST_RECIPIENT: &str = "ping@tools.mxtoolbox.com";

/// Which platform API a message goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailChannel {
  /// Straight to the mail transport.
  #[default]
  Email,
  /// Through the notification API, which picks the user's processors.
  Message,
}

impl MailChannel {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Email => "email",
      Self::Message => "message",
    }
  }
}

impl fmt::Display for MailChannel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for MailChannel {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "email" => Ok(Self::Email),
      "message" => Ok(Self::Message),
      other => Err(Error::UnknownChannel(other.to_owned())),
    }
  }
}

/// A mailbox: address plus display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailbox {
  pub name:    String,
  pub address: String,
}

impl fmt::Display for Mailbox {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.name.is_empty() {
      f.write_str(&self.address)
    } else {
      write!(f, "{} <{}>", self.name, self.address)
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMail {
  pub id:        Uuid,
  pub channel:   MailChannel,
  pub from:      Mailbox,
  pub to:        Mailbox,
  pub subject:   String,
  pub text:      String,
  pub html:      String,
  pub queued_at: DateTime<Utc>,
}

/// A transport for finished mail.
pub trait Mailer: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn send<'a>(
    &'a self,
    mail: &'a OutgoingMail,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}

// ─── Test mail ───────────────────────────────────────────────────────────────

/// Inputs for [`compose_test_mail`].
#[derive(Debug, Clone)]
pub struct TestMail {
  pub subject: String,
  pub from:    String,
  pub to:      String,
  pub channel: MailChannel,
  /// Link placed in the body to check URL rewriting by relays.
  pub link:    String,
  /// Free-form lines echoed in a preformatted block (the options used).
  pub details: Vec<(String, String)>,
}

/// Build the test message. The text part is written alongside the HTML
/// rather than derived from it.
pub fn compose_test_mail(input: &TestMail, now: DateTime<Utc>) -> Result<OutgoingMail> {
  let subject = input.subject.trim();
  if subject.is_empty() {
    return Err(Error::EmptySubject);
  }

  let details: String = input
    .details
    .iter()
    .map(|(k, v)| format!("{k}: {v}\n"))
    .collect();

  let html = format!(
    "<h2>Subject: {subject}</h2>\n\
     <p>A test email</p>\n\
     <a href=\"{link}\">Somewhere</a>\n\
     <a href=\"{link}\">{link}</a>\n\
     <ul>\n<li>Some items</li>\n<li>Some items</li>\n</ul>\n\
     <pre>\n{details}</pre>\n",
    subject = escape(subject),
    link = escape(input.link.as_str()),
    details = escape(details.as_str()),
  );
  let text = format!(
    "SUBJECT: {subject}\n\nA test email\n\nSomewhere [{link}]\n{link}\n\n\
     * Some items\n* Some items\n\n{details}",
    link = input.link,
  );

  Ok(OutgoingMail {
    id: Uuid::new_v4(),
    channel: input.channel,
    from: Mailbox { name: "Bob Smith".into(), address: input.from.clone() },
    to: Mailbox { name: "Bob Smith".into(), address: input.to.clone() },
    subject: subject.to_owned(),
    text,
    html,
    queued_at: now,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn input(subject: &str) -> TestMail {
    TestMail {
      subject: subject.into(),
      from:    "noreply@example.com".into(),
      to:      DEFAULT_TEST_RECIPIENT.into(),
      channel: MailChannel::Email,
      link:    "https://lms.example.com/mod/forum/view.php?id=3".into(),
      details: vec![("method".into(), "email".into())],
    }
  }

  #[test]
  fn empty_subject_is_rejected() {
    assert!(matches!(
      compose_test_mail(&input("   "), Utc::now()),
      Err(Error::EmptySubject)
    ));
  }

  #[test]
  fn both_parts_carry_subject_and_link() {
    let mail = compose_test_mail(&input("Ping <1>"), Utc::now()).unwrap();
    assert_eq!(mail.subject, "Ping <1>");
    assert!(mail.html.contains("<h2>Subject: Ping &lt;1&gt;</h2>"));
    assert!(mail.html.contains("view.php?id=3"));
    assert!(mail.text.starts_with("SUBJECT: Ping <1>"));
    assert!(mail.text.contains("method: email"));
  }

  #[test]
  fn markup_in_link_and_details_is_escaped() {
    let mut mail = input("Q&A");
    mail.link = "https://lms.example.com/?a=1&b=\"2\"".into();
    mail.details = vec![("note".into(), "it's <b>bold</b>".into())];
    let mail = compose_test_mail(&mail, Utc::now()).unwrap();

    assert!(mail.html.contains("<h2>Subject: Q&amp;A</h2>"));
    assert!(mail.html.contains("href=\"https://lms.example.com/?a=1&amp;b=&quot;2&quot;\""));
    assert!(mail.html.contains("note: it&apos;s &lt;b&gt;bold&lt;/b&gt;"));
    assert!(mail.text.contains("note: it's <b>bold</b>"));
  }

  #[test]
  fn channel_parses() {
    assert_eq!("message".parse::<MailChannel>().unwrap(), MailChannel::Message);
    assert!("pigeon".parse::<MailChannel>().is_err());
  }

  #[test]
  fn mailbox_display() {
    let m = Mailbox { name: "Bob Smith".into(), address: "bob@example.com".into() };
    assert_eq!(m.to_string(), "Bob Smith <bob@example.com>");
  }
}
