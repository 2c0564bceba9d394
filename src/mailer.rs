#![cfg(feature = "web")]

use lettre::address::{Address, Envelope};
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{FileTransport, Message, SmtpTransport, Transport};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{Config, MailTransport, SmtpConfig};
use crate::photo::Attachment;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("could not build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("could not write message: {0}")]
    File(#[from] lettre::transport::file::Error),
    #[error("invalid attachment type '{0}'")]
    ContentType(String),
    #[error("no recipients")]
    NoRecipients,
    #[error("mail task failed: {0}")]
    Task(String),
}

/// A report ready to be delivered
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    pub attachments: Vec<Attachment>,
}

/// Somewhere reports can be delivered to. Calls block.
pub trait Outbox: Send + Sync {
    fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

/// Build the MIME message
///
/// The body is `multipart/mixed`: the HTML report first, then one part per
/// photo or signature. When `sender` is given it becomes both the Reply-To
/// header and the envelope sender, so bounces and answers reach a mailbox
/// someone reads even though `From` is a no-reply address.
pub fn build_message(
    from: &str,
    sender: Option<&str>,
    email: &OutgoingEmail,
) -> Result<Message, MailError> {
    if email.to.is_empty() {
        return Err(MailError::NoRecipients);
    }

    let from: Mailbox = from.parse()?;
    let mut builder = Message::builder().from(from.clone()).subject(email.subject.as_str());

    let mut recipients = Vec::with_capacity(email.to.len());
    for to in &email.to {
        let mailbox: Mailbox = to.parse()?;
        recipients.push(mailbox.email.clone());
        builder = builder.to(mailbox);
    }

    let envelope_from = match sender.filter(|s| !s.trim().is_empty()) {
        Some(sender) => {
            let reply_to: Mailbox = sender.parse()?;
            builder = builder.reply_to(reply_to.clone());
            reply_to.email
        }
        None => from.email,
    };
    builder = builder.envelope(Envelope::new(Some(envelope_from), recipients)?);

    let mut body = MultiPart::mixed().singlepart(SinglePart::html(email.html.clone()));
    for attachment in &email.attachments {
        let content_type = ContentType::parse(&attachment.mime)
            .map_err(|_| MailError::ContentType(attachment.mime.clone()))?;
        body = body.singlepart(
            MailAttachment::new(attachment.filename.clone())
                .body(attachment.content.clone(), content_type),
        );
    }

    Ok(builder.multipart(body)?)
}

/// SMTP delivery with STARTTLS and login
pub struct Mailer {
    smtp: SmtpTransport,
    from: String,
    user: String,
}

impl Mailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let smtp = SmtpTransport::starttls_relay(&config.server)?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Mailer {
            smtp,
            from: config.from.clone(),
            user: config.user.clone(),
        })
    }
}

impl Outbox for Mailer {
    fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let message = build_message(&self.from, Some(&self.user), email)?;
        self.smtp.send(&message)?;
        info!("report '{}' sent to {}", email.subject, email.to.join(", "));
        Ok(())
    }
}

/// Writes each message as an `.eml` file instead of sending it
pub struct FileOutbox {
    dir: PathBuf,
    from: String,
    sender: Option<String>,
}

impl FileOutbox {
    pub fn new(dir: impl Into<PathBuf>, from: &str, sender: Option<String>) -> Self {
        FileOutbox {
            dir: dir.into(),
            from: from.to_string(),
            sender,
        }
    }
}

impl Outbox for FileOutbox {
    fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| MailError::Task(e.to_string()))?;
        let message = build_message(&self.from, self.sender.as_deref(), email)?;
        let id = FileTransport::new(&self.dir).send(&message)?;
        info!("report '{}' written to {}/{}.eml", email.subject, self.dir.display(), id);
        Ok(())
    }
}

/// Parse an address the way the envelope needs it.
pub fn parse_address(raw: &str) -> Result<Address, MailError> {
    Ok(raw.trim().parse()?)
}

/// Build the outbox selected in the `[mail]` configuration section.
pub fn open_outbox(config: &Config) -> Result<Arc<dyn Outbox>, MailError> {
    let outbox: Arc<dyn Outbox> = match config.mail.transport {
        MailTransport::Smtp => {
            info!("sending reports through {}:{}", config.smtp.server, config.smtp.port);
            Arc::new(Mailer::new(&config.smtp)?)
        }
        MailTransport::File => {
            info!("writing reports to {}", config.mail.outbox_dir.display());
            let sender = Some(config.smtp.user.clone()).filter(|u| !u.trim().is_empty());
            Arc::new(FileOutbox::new(&config.mail.outbox_dir, &config.smtp.from, sender))
        }
    };
    Ok(outbox)
}

/// Run a blocking send on the blocking thread pool.
pub async fn deliver(outbox: Arc<dyn Outbox>, email: OutgoingEmail) -> Result<(), MailError> {
    tokio::task::spawn_blocking(move || outbox.send(&email))
        .await
        .map_err(|e| MailError::Task(e.to_string()))?
}
