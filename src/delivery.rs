//! Delivery engine: renders a stored post into platform send calls.
use crate::client::{ChannelClient, Keyboard, MessageRef, OutgoingMedia, UrlButton};
use crate::db::{self, posts, Button, Pool};
use crate::error::DeliveryError;
use crate::model::{Actor, PostStatus};
use crate::validation;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Text of the follow-up message that carries the keyboard of a media group.
pub const KEYBOARD_ANCHOR: &str = "⬆️";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { message_id: i32 },
    Failed(DeliveryError),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Group buttons by row, rows ascending and positions ascending within a row.
pub fn build_keyboard(buttons: &[Button]) -> Keyboard {
    let mut sorted: Vec<&Button> = buttons.iter().collect();
    sorted.sort_by_key(|b| (b.row_index, b.position, b.id));
    let mut rows: Vec<Vec<UrlButton>> = Vec::new();
    let mut current_row: Option<i64> = None;
    for b in sorted {
        if current_row != Some(b.row_index) {
            rows.push(Vec::new());
            current_row = Some(b.row_index);
        }
        if let Some(row) = rows.last_mut() {
            row.push(UrlButton {
                label: b.label.clone(),
                url: b.url.clone(),
            });
        }
    }
    Keyboard { rows }
}

#[derive(Clone)]
pub struct Delivery {
    pool: Pool,
    client: Arc<dyn ChannelClient>,
}

impl Delivery {
    pub fn new(pool: Pool, client: Arc<dyn ChannelClient>) -> Self {
        Self { pool, client }
    }

    pub fn client(&self) -> &Arc<dyn ChannelClient> {
        &self.client
    }

    /// Send a post to its channel. Never fails past this boundary: the
    /// outcome carries either the remote message id or a typed cause.
    /// Post and schedule bookkeeping is left to the caller.
    #[instrument(skip(self))]
    pub async fn publish(&self, post_id: i64) -> DeliveryOutcome {
        match self.send(post_id).await {
            Ok(MessageRef(message_id)) => {
                info!(post_id, message_id, "post delivered");
                DeliveryOutcome::Delivered { message_id }
            }
            Err(err) => {
                warn!(post_id, %err, "post delivery failed");
                DeliveryOutcome::Failed(err)
            }
        }
    }

    async fn load(&self, post_id: i64) -> Result<db::PostWithRelations, DeliveryError> {
        posts::get(&self.pool, post_id)
            .await
            .map_err(|e| DeliveryError::Repository(format!("{:#}", e)))?
            .ok_or(DeliveryError::NotFound(post_id))
    }

    async fn send(&self, post_id: i64) -> Result<MessageRef, DeliveryError> {
        let post = self.load(post_id).await?;
        if !post.channel.is_active {
            return Err(DeliveryError::Permanent(format!(
                "channel {} is deactivated",
                post.channel.title
            )));
        }
        let chat_id = post.channel.tg_chat_id;
        let body = validation::platform_html(&post.post.text);
        let body = body.as_str();
        let keyboard = build_keyboard(&post.buttons);
        let keyboard = (!keyboard.is_empty()).then_some(keyboard);

        match post.media.as_slice() {
            [] => Ok(self.client.send_text(chat_id, body, keyboard.as_ref()).await?),
            [single] => {
                let item = OutgoingMedia {
                    kind: single.kind,
                    file_id: single.file_id.clone(),
                    caption: Some(
                        single
                            .caption
                            .as_deref()
                            .map_or_else(|| body.to_string(), validation::platform_html),
                    ),
                };
                Ok(self
                    .client
                    .send_media(chat_id, &item, keyboard.as_ref())
                    .await?)
            }
            many => {
                let items: Vec<OutgoingMedia> = many
                    .iter()
                    .enumerate()
                    .map(|(i, m)| OutgoingMedia {
                        kind: m.kind,
                        file_id: m.file_id.clone(),
                        caption: if i == 0 {
                            Some(body.to_string())
                        } else {
                            m.caption.as_deref().map(validation::platform_html)
                        },
                    })
                    .collect();
                let refs = self.client.send_media_group(chat_id, &items).await?;
                let first = refs.first().copied().ok_or_else(|| {
                    DeliveryError::Permanent("media group returned no messages".into())
                })?;
                // Albums cannot carry inline keyboards. The album is already
                // out, so a failed keyboard message must not trigger a resend.
                if let Some(kb) = keyboard.as_ref() {
                    if let Err(err) = self.client.send_text(chat_id, KEYBOARD_ANCHOR, Some(kb)).await {
                        warn!(post_id, %err, "failed to send keyboard for media group");
                    }
                }
                Ok(first)
            }
        }
    }

    /// Delete the published message of a post and return the post to DRAFT.
    /// For media groups only the first message of the album is removed.
    #[instrument(skip(self))]
    pub async fn retract(&self, post_id: i64, actor: Actor) -> Result<(), DeliveryError> {
        let post = self.load(post_id).await?;
        let message_id = match (post.post.status, post.post.remote_message_id) {
            (PostStatus::Published, Some(id)) => id,
            _ => {
                return Err(DeliveryError::Permanent(format!(
                    "post {} is not published",
                    post_id
                )))
            }
        };
        self.client
            .delete_message(post.channel.tg_chat_id, MessageRef(message_id))
            .await?;
        posts::mark_retracted(&self.pool, post_id, actor)
            .await
            .map_err(|e| DeliveryError::Repository(format!("{:#}", e)))?;
        info!(post_id, message_id, "post retracted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn button(id: i64, label: &str, row_index: i64, position: i64) -> Button {
        Button {
            id,
            post_id: 1,
            label: label.into(),
            url: format!("https://{}.example", label),
            row_index,
            position,
        }
    }

    #[test]
    fn keyboard_groups_rows_then_positions() {
        let buttons = vec![
            button(1, "r1p0", 1, 0),
            button(2, "r0p9", 0, 9),
            button(3, "r0p2", 0, 2),
            button(4, "r2p1", 2, 1),
        ];
        let kb = build_keyboard(&buttons);
        let labels: Vec<Vec<&str>> = kb
            .rows
            .iter()
            .map(|r| r.iter().map(|b| b.label.as_str()).collect())
            .collect();
        assert_eq!(labels, vec![vec!["r0p2", "r0p9"], vec!["r1p0"], vec!["r2p1"]]);
    }

    #[test]
    fn no_buttons_no_keyboard() {
        assert!(build_keyboard(&[]).is_empty());
    }
}
