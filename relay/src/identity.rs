//! Identity check for the management API.
//!
//! A caller proves ownership by presenting a Trello token that belongs to a
//! member who can read the card being configured. The member's username,
//! suffixed with `@trello`, becomes the owner of any mapping they create.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::trello::{TrelloApi, TrelloError};

/// Suffix appended to a Trello username to form an endpoint owner.
pub const TRELLO_OWNER_SUFFIX: &str = "@trello";

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("missing card or token")]
    MissingCredentials,
    #[error(transparent)]
    Trello(#[from] TrelloError),
}

/// Verifies a (token, card) pair and returns the owner it maps to.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str, card: &str) -> Result<String, IdentityError>;
}

/// Owner string for a Trello member.
pub fn trello_owner(username: &str) -> String {
    format!("{username}{TRELLO_OWNER_SUFFIX}")
}

/// Checks tokens against the live Trello API.
#[derive(Clone)]
pub struct TrelloIdentity {
    api: TrelloApi,
}

impl TrelloIdentity {
    pub fn new(api: TrelloApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl IdentityVerifier for TrelloIdentity {
    async fn verify(&self, token: &str, card: &str) -> Result<String, IdentityError> {
        if token.is_empty() || card.is_empty() {
            return Err(IdentityError::MissingCredentials);
        }

        let username = self.api.member_username(token).await?;
        self.api.check_card(token, card).await?;

        debug!(username = %username, card = %card, "trello_identity_verified");
        Ok(trello_owner(&username))
    }
}
