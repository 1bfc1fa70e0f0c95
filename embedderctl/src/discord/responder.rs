use std::path::Path;

use async_trait::async_trait;
use embedder_core::pipeline::{Delivery, DeliveryError};
use serenity::all::{CommandInteraction, Context, CreateAttachment, EditInteractionResponse};
use tracing::warn;

/// Longest message body Discord accepts.
pub const MAX_MESSAGE_CHARS: usize = 2000;

pub const SUCCESS_REACTION: char = '👍';

/// Answers a deferred `/embed` interaction by editing its response.
pub struct InteractionResponder {
    ctx: Context,
    command: CommandInteraction,
}

impl InteractionResponder {
    pub fn new(ctx: Context, command: CommandInteraction) -> Self {
        Self { ctx, command }
    }

    pub async fn defer(&self) {
        if let Err(error) = self.command.defer(&self.ctx.http).await {
            warn!(%error, "could not respond to interaction");
        }
    }
}

#[async_trait]
impl Delivery for InteractionResponder {
    async fn deliver(&self, file: &Path, file_name: &str) -> Result<(), DeliveryError> {
        if !is_mp4_name(file_name) {
            warn!(file = %file_name, "uploading a container other than mp4");
        }
        let mut attachment = CreateAttachment::path(file)
            .await
            .map_err(|err| DeliveryError::Transport(err.to_string()))?;
        attachment.filename = file_name.to_string();
        let message = self
            .command
            .edit_response(
                &self.ctx.http,
                EditInteractionResponse::new().new_attachment(attachment),
            )
            .await
            .map_err(|err| DeliveryError::Transport(err.to_string()))?;
        if let Err(error) = message.react(&self.ctx.http, SUCCESS_REACTION).await {
            warn!(%error, "could not add reaction to message");
        }
        Ok(())
    }

    async fn report_failure(&self, message: &str) -> Result<(), DeliveryError> {
        self.command
            .edit_response(
                &self.ctx.http,
                EditInteractionResponse::new().content(truncate_message(message)),
            )
            .await
            .map(|_| ())
            .map_err(|err| DeliveryError::Transport(err.to_string()))
    }
}

/// Discord derives the attachment content type from its extension; only
/// `.mp4` names go up as `video/mp4`.
pub fn is_mp4_name(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mp4"))
}

/// Cuts `message` to the Discord limit, marking the cut with an ellipsis.
pub fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_CHARS {
        return message.to_string();
    }
    let mut truncated: String = message.chars().take(MAX_MESSAGE_CHARS - 1).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_messages_are_untouched() {
        assert_eq!(truncate_message("could not download video"), "could not download video");
    }

    #[test]
    fn long_messages_fit_the_limit() {
        let message = format!("could not convert video: {}", "é".repeat(3000));
        let truncated = truncate_message(&message);
        assert_eq!(truncated.chars().count(), MAX_MESSAGE_CHARS);
        assert!(truncated.starts_with("could not convert video: "));
        assert!(truncated.ends_with('…'));
    }

    #[test]
    fn untouched_downloads_keep_their_container() {
        assert!(is_mp4_name("68747470-convert.mp4"));
        assert!(is_mp4_name("68747470.MP4"));
        assert!(!is_mp4_name("68747470.webm"));
        assert!(!is_mp4_name("68747470.mkv"));
        assert!(!is_mp4_name("mp4"));
    }
}
