//! vulnwatch Notify - report delivery
//!
//! This crate provides:
//! - `MailTransport`: the email seam, with `SmtpMailer` over lettre
//! - `ReportDispatcher`: fetch a finished report from the engine, store the
//!   artifact, and mail it to the task's recipient

pub mod dispatcher;
pub mod mailer;

pub use dispatcher::ReportDispatcher;
pub use mailer::{validate_recipient, MailTransport, OutgoingMail, SmtpMailer};
