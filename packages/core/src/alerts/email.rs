//! E-mail transport.
//!
//! The notifier only sees the [`Mailer`] trait; [`SmtpMailer`] is the
//! production implementation on top of lettre's async SMTP transport.

use std::str::FromStr;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::ingest::error::{IngestError, IngestResult};

/// A single rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> IngestResult<()>;
}

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpTls {
    /// Implicit TLS, usually port 465.
    Wrapper,
    /// Plain connection upgraded with STARTTLS, usually port 587.
    StartTls,
    /// No encryption. Local relays and test servers only.
    None,
}

impl FromStr for SmtpTls {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wrapper" | "tls" => Ok(SmtpTls::Wrapper),
            "starttls" => Ok(SmtpTls::StartTls),
            "none" | "plain" => Ok(SmtpTls::None),
            other => Err(format!(
                "Invalid SMTP_TLS '{}'. Must be one of: starttls, wrapper, none",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub tls: SmtpTls,
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings) -> Result<Self, String> {
        let builder = match settings.tls {
            SmtpTls::Wrapper => AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
                .map_err(|e| format!("Invalid SMTP host '{}': {}", settings.host, e))?,
            SmtpTls::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                    .map_err(|e| format!("Invalid SMTP host '{}': {}", settings.host, e))?
            }
            SmtpTls::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host),
        };

        let mut builder = builder.port(settings.port);
        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let from = settings
            .from
            .parse::<Mailbox>()
            .map_err(|e| format!("Invalid SMTP_FROM '{}': {}", settings.from, e))?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn build_message(&self, email: &OutgoingEmail) -> IngestResult<Message> {
        let to = email
            .to
            .parse::<Mailbox>()
            .map_err(|e| IngestError::delivery(&email.to, format!("invalid address: {}", e)))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())
            .map_err(|e| IngestError::delivery(&email.to, e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> IngestResult<()> {
        let message = self.build_message(email)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| IngestError::delivery(&email.to, e.to_string()))?;

        tracing::info!("Email sent to {}", email.to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(tls: SmtpTls) -> SmtpSettings {
        SmtpSettings {
            host: "localhost".into(),
            port: 2525,
            username: None,
            password: None,
            from: "CityGuard <alerts@cityguard.local>".into(),
            tls,
        }
    }

    #[test]
    fn tls_mode_parses_known_values() {
        assert_eq!("STARTTLS".parse::<SmtpTls>().unwrap(), SmtpTls::StartTls);
        assert_eq!("wrapper".parse::<SmtpTls>().unwrap(), SmtpTls::Wrapper);
        assert_eq!("none".parse::<SmtpTls>().unwrap(), SmtpTls::None);
        assert!("ssl3".parse::<SmtpTls>().is_err());
    }

    #[tokio::test]
    async fn rejects_invalid_sender() {
        let mut bad = settings(SmtpTls::None);
        bad.from = "not an address".into();
        assert!(SmtpMailer::new(&bad).is_err());
    }

    #[tokio::test]
    async fn invalid_recipient_is_delivery_error() {
        let mailer = SmtpMailer::new(&settings(SmtpTls::None)).unwrap();
        let email = OutgoingEmail {
            to: "nobody".into(),
            subject: "s".into(),
            body: "b".into(),
        };

        let err = mailer.build_message(&email).unwrap_err();
        assert!(matches!(err, IngestError::Delivery { .. }));
    }

    #[tokio::test]
    async fn builds_plain_text_message() {
        let mailer = SmtpMailer::new(&settings(SmtpTls::None)).unwrap();
        let email = OutgoingEmail {
            to: "resident@example.com".into(),
            subject: "[CityGuard] HIGH alert: Bridge closed".into(),
            body: "Bridge closed".into(),
        };

        let message = mailer.build_message(&email).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("To: resident@example.com"));
        assert!(raw.contains("Subject: [CityGuard] HIGH alert: Bridge closed"));
    }
}
