//! Subscriber alerting: gating, delivery log and the e-mail transport.

pub mod email;
pub mod notifier;

pub use email::{Mailer, OutgoingEmail, SmtpMailer, SmtpSettings, SmtpTls};
pub use notifier::{Notifier, NotifyReport};
