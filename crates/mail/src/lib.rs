//! Outbound mail notifier.
//!
//! A thin wrapper over the `lettre` async SMTP transport used by
//! job-completion flows. Configuration happens once; if mail was never
//! configured, [`Notifier::send`] is a silent no-op so callers do not have to
//! branch on deployment setup.

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::PoolConfig;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    /// A required configuration field was absent. Raised at construction
    /// time; the notifier fails fast rather than at first send.
    #[error("Mail configuration error: missing field \"{0}\"")]
    MissingField(&'static str),

    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Email build error: {0}")]
    Build(String),
}

// ---------------------------------------------------------------------------
// MailConfig
// ---------------------------------------------------------------------------

/// SMTP configuration. `host`, `port`, `secure`, `user`, `pass`, and `from`
/// are required; the default recipients are optional and merged under
/// per-call options.
#[derive(Debug, Clone, Default)]
pub struct MailConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub secure: Option<bool>,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub cc: Option<String>,
    pub bcc: Option<String>,
}

impl MailConfig {
    /// Load configuration from `MAIL_*` environment variables.
    ///
    /// Returns `None` if `MAIL_HOST` is not set, signalling that mail is not
    /// configured for this deployment. Missing required fields surface later
    /// as [`MailError::MissingField`] when the notifier is constructed.
    ///
    /// | Variable      | Required |
    /// |---------------|----------|
    /// | `MAIL_HOST`   | yes      |
    /// | `MAIL_PORT`   | yes      |
    /// | `MAIL_SECURE` | yes      |
    /// | `MAIL_USER`   | yes      |
    /// | `MAIL_PASS`   | yes      |
    /// | `MAIL_FROM`   | yes      |
    /// | `MAIL_TO`     | no       |
    /// | `MAIL_CC`     | no       |
    /// | `MAIL_BCC`    | no       |
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("MAIL_HOST").ok()?;
        Some(Self {
            host: Some(host),
            port: std::env::var("MAIL_PORT").ok().and_then(|p| p.parse().ok()),
            secure: std::env::var("MAIL_SECURE")
                .ok()
                .and_then(|s| s.parse().ok()),
            user: std::env::var("MAIL_USER").ok(),
            pass: std::env::var("MAIL_PASS").ok(),
            from: std::env::var("MAIL_FROM").ok(),
            to: std::env::var("MAIL_TO").ok(),
            cc: std::env::var("MAIL_CC").ok(),
            bcc: std::env::var("MAIL_BCC").ok(),
        })
    }

    fn validated(self) -> Result<ValidConfig, MailError> {
        Ok(ValidConfig {
            host: self.host.ok_or(MailError::MissingField("host"))?,
            port: self.port.ok_or(MailError::MissingField("port"))?,
            secure: self.secure.ok_or(MailError::MissingField("secure"))?,
            user: self.user.ok_or(MailError::MissingField("user"))?,
            pass: self.pass.ok_or(MailError::MissingField("pass"))?,
            from: self.from.ok_or(MailError::MissingField("from"))?,
            to: self.to,
            cc: self.cc,
            bcc: self.bcc,
        })
    }
}

#[derive(Debug, Clone)]
struct ValidConfig {
    host: String,
    port: u16,
    secure: bool,
    user: String,
    pass: String,
    from: String,
    to: Option<String>,
    cc: Option<String>,
    bcc: Option<String>,
}

// ---------------------------------------------------------------------------
// SendOptions
// ---------------------------------------------------------------------------

/// Per-call send options, merged over the configured defaults: an explicit
/// field wins, an absent one falls back to the default recipient.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub to: Option<String>,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub subject: String,
    pub body: String,
}

// ---------------------------------------------------------------------------
// Mailer / Notifier
// ---------------------------------------------------------------------------

/// A configured SMTP mailer with a pooled connection.
#[derive(Debug)]
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: ValidConfig,
}

/// Pooled connection ceiling, mirroring the service's SMTP provider limits.
const MAX_POOL_CONNECTIONS: u32 = 5;

impl Mailer {
    /// Build a mailer, failing fast on the first missing required field.
    pub fn new(config: MailConfig) -> Result<Self, MailError> {
        let config = config.validated()?;

        let credentials = Credentials::new(config.user.clone(), config.pass.clone());
        let builder = if config.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        };
        let transport = builder
            .port(config.port)
            .credentials(credentials)
            .pool_config(PoolConfig::new().max_size(MAX_POOL_CONNECTIONS))
            .build();

        Ok(Self { transport, config })
    }

    /// Send one message, merging `options` over the configured defaults.
    pub async fn send(&self, options: SendOptions) -> Result<(), MailError> {
        let to = options
            .to
            .or_else(|| self.config.to.clone())
            .ok_or(MailError::MissingField("to"))?;

        let mut builder = Message::builder()
            .from(self.config.from.parse::<Mailbox>()?)
            .to(to.parse::<Mailbox>()?)
            .subject(options.subject)
            .header(ContentType::TEXT_PLAIN);

        if let Some(cc) = options.cc.or_else(|| self.config.cc.clone()) {
            builder = builder.cc(cc.parse::<Mailbox>()?);
        }
        if let Some(bcc) = options.bcc.or_else(|| self.config.bcc.clone()) {
            builder = builder.bcc(bcc.parse::<Mailbox>()?);
        }

        let email = builder
            .body(options.body)
            .map_err(|e| MailError::Build(e.to_string()))?;

        self.transport.send(email).await?;
        Ok(())
    }
}

/// Optional mailer. When mail was never configured, `send` does nothing and
/// reports success, so notification call sites stay unconditional.
#[derive(Default)]
pub struct Notifier {
    mailer: Option<Mailer>,
}

impl Notifier {
    /// Notifier for deployments without mail.
    pub fn disabled() -> Self {
        Self { mailer: None }
    }

    pub fn new(mailer: Mailer) -> Self {
        Self {
            mailer: Some(mailer),
        }
    }

    /// Build from the environment: disabled when `MAIL_HOST` is unset,
    /// fail-fast when the configuration is present but incomplete.
    pub fn from_env() -> Result<Self, MailError> {
        match MailConfig::from_env() {
            Some(config) => Ok(Self::new(Mailer::new(config)?)),
            None => Ok(Self::disabled()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.mailer.is_some()
    }

    pub async fn send(&self, options: SendOptions) -> Result<(), MailError> {
        match &self.mailer {
            Some(mailer) => mailer.send(options).await,
            None => {
                tracing::debug!("Mail not configured; notification dropped");
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
