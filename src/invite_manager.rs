use crate::{
    config::Config,
    error::{Error, SignedLinkError},
    flows::invitation::{InviteEmail, Invitee, HASH_KEY, ID_KEY},
    hash_string,
    notifier::Notifier,
    r#trait::Clock,
    signed_link::{LinkParameters, SignedLinkService},
};
use chrono::{DateTime, Utc};
use email_address::EmailAddress;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct Invitation {
    pub user_id: Uuid,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expiry: DateTime<Utc>,
}

/// What a verified invitation link vouches for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcceptedInvitation {
    pub user_id: Uuid,
    pub email_hash: String,
}

impl AcceptedInvitation {
    fn from_parameters(parameters: &LinkParameters) -> Result<Self, Error> {
        let user_id = match parameters.get(ID_KEY).map(Uuid::parse_str) {
            Some(Ok(user_id)) => user_id,
            Some(Err(err)) => {
                return Err(SignedLinkError::InvalidParameter(format!("{}: {}", ID_KEY, err)).into())
            }
            None => {
                return Err(SignedLinkError::InvalidParameter(format!("missing {}", ID_KEY)).into())
            }
        };
        let email_hash = match parameters.get(HASH_KEY) {
            Some(email_hash) => email_hash.to_string(),
            None => {
                return Err(
                    SignedLinkError::InvalidParameter(format!("missing {}", HASH_KEY)).into(),
                )
            }
        };
        Ok(Self {
            user_id,
            email_hash,
        })
    }

    pub fn matches_email(&self, email: &EmailAddress) -> bool {
        hash_string(&email.to_string()) == self.email_hash
    }
}

pub struct InviteManager {
    pub config: Config,
    link_service: SignedLinkService,
    invite_email: InviteEmail,
    notifier: Arc<dyn Notifier>,
}

impl InviteManager {
    pub fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        invite_email: InviteEmail,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let link_service = SignedLinkService::new(
            config.get_base_url(),
            config.get_signing_keys().to_owned(),
            clock,
        );
        Self {
            config,
            link_service,
            invite_email,
            notifier,
        }
    }

    pub fn get_link_service(&self) -> &SignedLinkService {
        &self.link_service
    }

    pub fn invite_user(&self, email: EmailAddress) -> Result<Invitation, Error> {
        self.invite(Invitee::new(Uuid::new_v4(), email))
    }

    /// Builds the signed acceptance link for `invitee` and hands the mail to the notifier.
    pub fn invite(&self, invitee: Invitee) -> Result<Invitation, Error> {
        let (message, link) = self.invite_email.to_mail(&self.link_service, &invitee)?;
        let expiry = match link.get_expiry() {
            Some(expiry) => expiry,
            None => {
                return Err(SignedLinkError::InvalidParameter(format!(
                    "expiry {} out of range",
                    link.get_expires()
                ))
                .into())
            }
        };
        self.notifier.send(invitee.get_email(), &message)?;
        info!(
            "Invitation sent to user {}, valid until {}",
            invitee.get_user_id(),
            expiry
        );
        Ok(Invitation {
            user_id: *invitee.get_user_id(),
            expiry,
        })
    }

    pub fn accept_invitation(&self, url: &str) -> Result<AcceptedInvitation, Error> {
        let parameters = self.link_service.verify(url)?;
        AcceptedInvitation::from_parameters(&parameters)
    }

    /// Rebuilds the full link from the query an HTTP request arrived with.
    pub fn accept_invitation_query(&self, query: &str) -> Result<AcceptedInvitation, Error> {
        self.accept_invitation(&format!("{}?{}", self.link_service.get_base_url(), query))
    }
}
