use std::{fmt, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::{config::SmtpConfig, leads::Lead};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Where new-lead notifications go. Each channel is optional and a lead
/// with neither configured is simply stored.
#[derive(Clone, Debug, Default)]
pub struct Notifier {
    webhook: Option<Webhook>,
    email: Option<Email>,
}

#[derive(Clone, Debug)]
struct Webhook {
    client: reqwest::Client,
    url: String,
}

#[derive(Clone)]
struct Email {
    transport: Arc<AsyncSmtpTransport<Tokio1Executor>>,
    relay: String,
    from: Mailbox,
    to: Mailbox,
}

impl fmt::Debug for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Email")
            .field("relay", &self.relay)
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct WebhookMessage {
    text: String,
}

impl Notifier {
    pub fn new(webhook_url: Option<&str>, smtp: Option<&SmtpConfig>) -> Result<Self> {
        let webhook = webhook_url.map(Webhook::new).transpose()?;
        let email = smtp.map(Email::new).transpose()?;
        Ok(Self { webhook, email })
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook.is_some() || self.email.is_some()
    }

    /// Names of the configured channels, for startup logging.
    pub fn channels(&self) -> Vec<&'static str> {
        let mut channels = Vec::new();
        if self.email.is_some() {
            channels.push("email");
        }
        if self.webhook.is_some() {
            channels.push("webhook");
        }
        channels
    }

    /// Delivers in the background; the submitter never waits on it.
    pub fn spawn(&self, lead: Lead) {
        if !self.is_enabled() {
            return;
        }
        let notifier = self.clone();
        tokio::spawn(async move {
            if let Err(err) = notifier.deliver(&lead).await {
                warn!("lead notification failed: {err:#}");
            }
        });
    }

    /// Tries every channel. One failing does not stop the other; the first
    /// error is returned.
    pub async fn deliver(&self, lead: &Lead) -> Result<()> {
        let emailed = match &self.email {
            Some(email) => email.send(lead).await,
            None => Ok(()),
        };
        let posted = match &self.webhook {
            Some(webhook) => webhook.post(lead).await,
            None => Ok(()),
        };
        emailed.and(posted)
    }
}

impl Webhook {
    fn new(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .context("failed building webhook client")?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    async fn post(&self, lead: &Lead) -> Result<()> {
        let message = WebhookMessage {
            text: format!("{}\n\n{}", subject(lead), body(lead)),
        };
        self.client
            .post(&self.url)
            .json(&message)
            .send()
            .await
            .context("webhook request failed")?
            .error_for_status()
            .context("webhook rejected notification")?;
        info!("lead webhook delivered for {}", lead.email);
        Ok(())
    }
}

impl Email {
    fn new(config: &SmtpConfig) -> Result<Self> {
        let from = config
            .from
            .parse::<Mailbox>()
            .with_context(|| format!("SMTP_FROM {:?} is not a mailbox", config.from))?;
        let to = config
            .to
            .parse::<Mailbox>()
            .with_context(|| format!("SMTP_TO {:?} is not a mailbox", config.to))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .with_context(|| format!("invalid SMTP relay {}", config.host))?
            .port(config.port)
            .timeout(Some(DELIVERY_TIMEOUT));
        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        Ok(Self {
            transport: Arc::new(builder.build()),
            relay: format!("{}:{}", config.host, config.port),
            from,
            to,
        })
    }

    fn message(&self, lead: &Lead) -> Result<Message> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject(lead))
            .header(ContentType::TEXT_PLAIN)
            .body(body(lead))
            .context("failed building lead email")
    }

    async fn send(&self, lead: &Lead) -> Result<()> {
        let message = self.message(lead)?;
        self.transport
            .send(message)
            .await
            .with_context(|| format!("smtp delivery via {} failed", self.relay))?;
        info!("lead email sent for {}", lead.email);
        Ok(())
    }
}

pub fn subject(lead: &Lead) -> String {
    format!(
        "New Lead: {} ({})",
        lead.name,
        lead.plan.as_deref().unwrap_or("undecided")
    )
}

pub fn body(lead: &Lead) -> String {
    let value = |v: &Option<String>| v.clone().unwrap_or_default();
    [
        ("name", lead.name.clone()),
        ("email", lead.email.clone()),
        ("business", value(&lead.business)),
        ("plan", value(&lead.plan)),
        ("goal", value(&lead.goal)),
        ("page", value(&lead.page)),
        ("ts", lead.ts.clone()),
    ]
    .iter()
    .map(|(key, value)| format!("{key}: {value}"))
    .collect::<Vec<_>>()
    .join("\n")
}
