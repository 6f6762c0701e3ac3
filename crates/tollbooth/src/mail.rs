//! Outbound mail. The gateway only ever sends one kind of message (the
//! generated password for webhook-provisioned accounts), always
//! best-effort: a send failure is logged, never fatal.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("building message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("smtp: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send_password(&self, recipient: &str, password: &str) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
}

impl SmtpMailer {
    pub fn new(
        host: &str,
        port: u16,
        sender_email: &str,
        sender_password: &str,
    ) -> Result<Self, MailError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
            .port(port)
            .credentials(Credentials::new(
                sender_email.to_string(),
                sender_password.to_string(),
            ))
            .build();

        Ok(Self {
            transport,
            sender: sender_email.parse()?,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_password(&self, recipient: &str, password: &str) -> Result<(), MailError> {
        let message = Message::builder()
            .from(self.sender.clone())
            .to(recipient.parse()?)
            .subject("Your Tollbooth account")
            .body(format!(
                "Hello,\n\nAn account was created for {recipient}.\n\
                 Your generated password is: {password}\n\n\
                 Please change it after your first login.\n"
            ))?;

        self.transport.send(message).await?;
        debug!(recipient, "password email sent");
        Ok(())
    }
}

/// Stand-in when no sender is configured.
pub struct NoopMailer;

#[async_trait]
impl Mailer for NoopMailer {
    async fn send_password(&self, recipient: &str, _password: &str) -> Result<(), MailError> {
        debug!(recipient, "mail disabled, skipping password email");
        Ok(())
    }
}
