//! Core types and trait definitions for postwatch.
//!
//! This crate holds the forum notification eligibility pass and the seams it
//! talks through. It is deliberately free of database and CLI dependencies;
//! backends implement [`provider::ForumProvider`] and [`mail::Mailer`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod access;
pub mod digest;
pub mod error;
pub mod evaluate;
pub mod forum;
pub mod mail;
pub mod provider;
pub mod snapshot;
pub mod users;
pub mod window;

pub use error::{Error, Result};
pub use evaluate::{Evaluation, EvaluationResult, Evaluator, Outcome, SkipReason, evaluate};

#[cfg(test)]
mod tests;
