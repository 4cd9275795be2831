use crate::{
    error::Error,
    hash_string,
    signed_link::{ExpiringLink, LinkParameters, SignedLinkService},
};
use chrono::Duration;
use email_address::EmailAddress;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ID_KEY: &str = "id";
pub const HASH_KEY: &str = "hash";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitee {
    user_id: Uuid,
    email: EmailAddress,
}

impl Invitee {
    pub fn new(user_id: Uuid, email: EmailAddress) -> Self {
        Self { user_id, email }
    }
    pub fn get_user_id(&self) -> &Uuid {
        &self.user_id
    }
    pub fn get_email(&self) -> &EmailAddress {
        &self.email
    }
    pub fn email_hash(&self) -> String {
        hash_string(&self.email.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailAction {
    pub text: String,
    pub url: String,
}

/// Plain description of a notification mail. Lines added before the action
/// land in `intro_lines`, lines added after it in `outro_lines`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MailMessage {
    pub subject: String,
    pub intro_lines: Vec<String>,
    pub action: Option<MailAction>,
    pub outro_lines: Vec<String>,
}

impl MailMessage {
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        if self.action.is_none() {
            self.intro_lines.push(line.into());
        } else {
            self.outro_lines.push(line.into());
        }
        self
    }

    pub fn action(mut self, text: impl Into<String>, url: impl Into<String>) -> Self {
        self.action = Some(MailAction {
            text: text.into(),
            url: url.into(),
        });
        self
    }

    pub fn get_action_url(&self) -> Option<&str> {
        self.action.as_ref().map(|action| action.url.as_str())
    }
}

/// Produces the acceptance link for an invitee.
pub trait LinkBuilder: Send + Sync {
    fn build_link(
        &self,
        service: &SignedLinkService,
        invitee: &Invitee,
    ) -> Result<ExpiringLink, Error>;
}

/// Produces the mail sent to an invitee for a given acceptance URL.
pub trait MessageBuilder: Send + Sync {
    fn build_message(&self, invitee: &Invitee, url: &str) -> MailMessage;
}

/// Signs `{ id, hash(email) }` with a fixed lifetime.
pub struct SignedRouteLinkBuilder {
    lifetime: Duration,
}

impl SignedRouteLinkBuilder {
    pub fn new(lifetime: Duration) -> Self {
        Self { lifetime }
    }
}

impl LinkBuilder for SignedRouteLinkBuilder {
    fn build_link(
        &self,
        service: &SignedLinkService,
        invitee: &Invitee,
    ) -> Result<ExpiringLink, Error> {
        let mut parameters = LinkParameters::new();
        let _ = parameters.insert(ID_KEY, invitee.get_user_id().to_string());
        let _ = parameters.insert(HASH_KEY, invitee.email_hash());
        service.generate_link(&parameters, self.lifetime)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct InvitationMessageBuilder;

impl MessageBuilder for InvitationMessageBuilder {
    fn build_message(&self, _invitee: &Invitee, url: &str) -> MailMessage {
        MailMessage::default()
            .subject("You have a new invitation.")
            .line("Please click the button below to confirm the invitation.")
            .action("Accept the Invitation", url)
            .line("If you did not want to accept the invitation, no further action is required.")
    }
}

/// The invitation notification: a signed link wrapped in a mail message.
pub struct InviteEmail {
    link_builder: Box<dyn LinkBuilder>,
    message_builder: Box<dyn MessageBuilder>,
}

impl InviteEmail {
    pub fn new(link_builder: Box<dyn LinkBuilder>, message_builder: Box<dyn MessageBuilder>) -> Self {
        Self {
            link_builder,
            message_builder,
        }
    }

    pub fn with_lifetime(lifetime: Duration) -> Self {
        Self::new(
            Box::new(SignedRouteLinkBuilder::new(lifetime)),
            Box::new(InvitationMessageBuilder),
        )
    }

    pub fn to_mail(
        &self,
        service: &SignedLinkService,
        invitee: &Invitee,
    ) -> Result<(MailMessage, ExpiringLink), Error> {
        let link = self.link_builder.build_link(service, invitee)?;
        let message = self
            .message_builder
            .build_message(invitee, &link.to_string());
        Ok((message, link))
    }
}
