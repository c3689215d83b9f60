//! SMTP transport backed by lettre

use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::providers::EmailSettings;
use crate::traits::{MailError, MailTransport, OutgoingMail, ProviderError, ProviderKind};

/// Port that expects TLS from the first byte
const IMPLICIT_TLS_PORT: u16 = 465;

/// How the session is secured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlsMode {
    /// TLS handshake before the greeting (SMTPS)
    Implicit,
    /// STARTTLS must succeed before AUTH or MAIL
    Required,
    /// STARTTLS whenever the server offers it, plaintext otherwise
    Opportunistic,
}

fn tls_mode(settings: &EmailSettings) -> TlsMode {
    if settings.port == IMPLICIT_TLS_PORT {
        TlsMode::Implicit
    } else if settings.use_tls {
        TlsMode::Required
    } else {
        TlsMode::Opportunistic
    }
}

pub struct LettreMailTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl LettreMailTransport {
    pub fn new(settings: &EmailSettings) -> Result<Self, ProviderError> {
        let transport_error = |e: lettre::transport::smtp::Error| ProviderError::Transport {
            kind: ProviderKind::Email,
            message: format!("failed to create SMTP relay: {}", e),
        };

        let mode = tls_mode(settings);
        let mut builder = match mode {
            TlsMode::Implicit => {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host).map_err(transport_error)?
            }
            TlsMode::Required => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host).map_err(transport_error)?
            }
            TlsMode::Opportunistic => {
                let parameters = TlsParameters::new(settings.host.clone()).map_err(transport_error)?;
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
                    .tls(Tls::Opportunistic(parameters))
            }
        };

        builder = builder.port(settings.port).timeout(Some(settings.timeout));
        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        tracing::debug!(
            host = %settings.host,
            port = settings.port,
            tls = ?mode,
            "Initialized SMTP transport"
        );
        Ok(Self { transport: builder.build() })
    }
}

pub(crate) fn build_message(mail: &OutgoingMail) -> Result<Message, MailError> {
    let from_address: Address = mail
        .from
        .parse()
        .map_err(|e| MailError::InvalidAddress(format!("{}: {}", mail.from, e)))?;
    let to_address: Address = mail
        .to
        .parse()
        .map_err(|e| MailError::InvalidAddress(format!("{}: {}", mail.to, e)))?;

    Message::builder()
        .from(Mailbox::new(mail.from_name.clone(), from_address))
        .to(Mailbox::new(None, to_address))
        .subject(mail.subject.as_str())
        .header(ContentType::TEXT_PLAIN)
        .body(mail.body.clone())
        .map_err(|e| MailError::BuildError(e.to_string()))
}

fn map_smtp_error(e: lettre::transport::smtp::Error) -> MailError {
    if e.is_timeout() {
        MailError::Timeout
    } else if e.is_transient() {
        MailError::Transient(e.to_string())
    } else if e.is_permanent() {
        MailError::Permanent(e.to_string())
    } else {
        MailError::ConnectionError(e.to_string())
    }
}

#[async_trait::async_trait]
impl MailTransport for LettreMailTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let message = build_message(mail)?;
        let response = self.transport.send(message).await.map_err(|e| {
            tracing::warn!(to = %mail.to, error = %e, "SMTP send failed");
            map_smtp_error(e)
        })?;

        tracing::debug!(to = %mail.to, code = %response.code(), "Email accepted by relay");
        Ok(())
    }

    async fn test_connection(&self) -> Result<(), MailError> {
        match self.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(MailError::ConnectionError("server did not answer NOOP".to_string())),
            Err(e) => Err(map_smtp_error(e)),
        }
    }
}
