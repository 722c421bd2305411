// src/notify/email.rs
use anyhow::Context;
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use crate::error::NotifyError;
use crate::event::Alert;

use super::Notifier;

/// SMTP channel: one message per configured recipient, plain-text body
/// taken from the alert content.
pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailNotifier {
    pub fn new(
        smtp_host: &str,
        smtp_port: u16,
        username: String,
        password: String,
        to_list: &[String],
        use_tls: bool,
    ) -> anyhow::Result<Self> {
        let mut builder = if use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(smtp_host)
                .with_context(|| format!("smtp relay {smtp_host}"))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        };
        builder = builder.port(smtp_port);
        if !username.is_empty() {
            builder = builder.credentials(Credentials::new(username.clone(), password));
        }

        let from: Mailbox = username
            .parse()
            .with_context(|| format!("invalid from address {username:?}"))?;
        let to = to_list
            .iter()
            .map(|addr| {
                addr.parse::<Mailbox>()
                    .with_context(|| format!("invalid recipient {addr:?}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        anyhow::ensure!(!to.is_empty(), "email notifier has no recipients");

        Ok(Self {
            mailer: builder.build(),
            from,
            to,
        })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn channel(&self) -> &'static str {
        "email"
    }

    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        let subject = format!("[relwatch] {}", alert.event.title);
        for to in &self.to {
            let msg = Message::builder()
                .from(self.from.clone())
                .to(to.clone())
                .subject(subject.clone())
                .header(header::ContentType::TEXT_PLAIN)
                .body(alert.content.clone())
                .context("build email")?;
            self.mailer.send(msg).await.context("send email")?;
        }
        Ok(())
    }
}
