//! Minimal Trello REST client shared by the comment sink and the identity check.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Errors from talking to Trello.
#[derive(Error, Debug)]
pub enum TrelloError {
    #[error("invalid trello api url '{0}'")]
    InvalidUrl(String),
    #[error("trello request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("trello returned '{body}' on /{call} call.")]
    Rejected {
        call: &'static str,
        status: u16,
        body: String,
    },
}

/// Trello API handle: shared HTTP client, base URL and application key.
#[derive(Clone)]
pub struct TrelloApi {
    client: Client,
    base: Url,
    key: String,
}

#[derive(Deserialize)]
struct Member {
    username: String,
}

impl TrelloApi {
    pub fn new(client: Client, base_url: &str, key: impl Into<String>) -> Result<Self, TrelloError> {
        let base = Url::parse(base_url).map_err(|_| TrelloError::InvalidUrl(base_url.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(TrelloError::InvalidUrl(base_url.to_string()));
        }

        Ok(Self {
            client,
            base,
            key: key.into(),
        })
    }

    /// Build `{base}/1/{segments...}`, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("1").extend(segments);
        }
        url
    }

    /// Post `text` as a comment on `card`.
    pub async fn post_comment(
        &self,
        card: &str,
        token: &str,
        text: &str,
        timeout: Duration,
    ) -> Result<(), TrelloError> {
        let resp = self
            .client
            .post(self.endpoint(&["cards", card, "actions", "comments"]))
            .query(&[("key", self.key.as_str()), ("token", token), ("text", text)])
            .timeout(timeout)
            .send()
            .await?;

        ensure_success(resp, "comments").await?;
        Ok(())
    }

    /// Username of the member owning `token`.
    pub async fn member_username(&self, token: &str) -> Result<String, TrelloError> {
        let resp = self
            .client
            .get(self.endpoint(&["members", "me"]))
            .query(&[("key", self.key.as_str()), ("token", token), ("fields", "username")])
            .send()
            .await?;

        let member: Member = ensure_success(resp, "members").await?.json().await?;
        Ok(member.username)
    }

    /// Succeeds when `token` can read `card`.
    pub async fn check_card(&self, token: &str, card: &str) -> Result<(), TrelloError> {
        let resp = self
            .client
            .get(self.endpoint(&["cards", card]))
            .query(&[("key", self.key.as_str()), ("token", token), ("fields", "shortLink")])
            .send()
            .await?;

        ensure_success(resp, "cards").await?;
        Ok(())
    }
}

/// Turn any non-2xx response into [`TrelloError::Rejected`] carrying the body verbatim.
async fn ensure_success(resp: Response, call: &'static str) -> Result<Response, TrelloError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    Err(TrelloError::Rejected {
        call,
        status: status.as_u16(),
        body,
    })
}
