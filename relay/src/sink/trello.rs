//! Trello comment sink: posts the filtered payload as a card comment.

use async_trait::async_trait;
use tracing::info;

use super::{OutgoingRequest, Sink, SinkError};
use crate::routing::EndpointTarget;
use crate::trello::TrelloApi;

/// Sink kind stored in `output.kind` for Trello comments.
pub const TRELLO_COMMENT_KIND: &str = "trello:comment";

/// Comments on the card named by `target.target`, authenticating with
/// `target.data.token`.
#[derive(Clone)]
pub struct TrelloCommentSink {
    api: TrelloApi,
}

impl TrelloCommentSink {
    pub fn new(api: TrelloApi) -> Self {
        Self { api }
    }
}

/// Render the comment body: a header naming the address followed by the
/// payload as a markdown quote block.
pub fn comment_text(address: &str, payload: &[u8]) -> String {
    let body = String::from_utf8_lossy(payload);
    let quoted = body.split('\n').collect::<Vec<_>>().join("\n>");
    format!("Got webhook on **{address}**:\n\n>{quoted}")
}

#[async_trait]
impl Sink for TrelloCommentSink {
    fn name(&self) -> &str {
        TRELLO_COMMENT_KIND
    }

    async fn dispatch(
        &self,
        request: &OutgoingRequest,
        payload: &[u8],
        target: &EndpointTarget,
    ) -> Result<(), SinkError> {
        let token = target
            .data
            .get("token")
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                SinkError::Config(format!(
                    "missing trello token for target '{}' on address '{}'",
                    target.target, target.address
                ))
            })?;

        let text = comment_text(&target.address, payload);
        self.api
            .post_comment(&target.target, token, &text, request.remaining())
            .await?;

        info!(
            card = %target.target,
            address = %target.address,
            text_length = text.len(),
            "trello_comment_posted"
        );
        Ok(())
    }
}
