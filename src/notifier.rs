use crate::{error::Error, flows::invitation::MailMessage};
use email_address::EmailAddress;
use tracing::info;

/// Hands a finished message to whatever delivers mail.
pub trait Notifier: Send + Sync {
    fn send(&self, recipient: &EmailAddress, message: &MailMessage) -> Result<(), Error>;
}

/// Records the dispatch in the log instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, recipient: &EmailAddress, message: &MailMessage) -> Result<(), Error> {
        info!("Mail \"{}\" queued for {}", message.subject, recipient);
        #[cfg(feature = "debug-logging")]
        tracing::debug!("Action url for {}: {:?}", recipient, message.get_action_url());
        Ok(())
    }
}
