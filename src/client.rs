//! Boundary to the messaging platform.
//!
//! The delivery engine, the scheduler and channel registration only see
//! [`ChannelClient`]; the teloxide implementation lives in `telegram`.
use crate::error::ClientError;
use crate::model::MediaKind;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlButton {
    pub label: String,
    pub url: String,
}

/// Inline URL keyboard, one inner vector per row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<UrlButton>>,
}

impl Keyboard {
    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|r| r.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMedia {
    pub kind: MediaKind,
    pub file_id: String,
    pub caption: Option<String>,
}

/// Platform identifier of a sent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    Owner,
    Administrator,
    Member,
    Restricted,
    Left,
    Banned,
}

impl MemberRole {
    /// Roles that allow the bot to post into a channel.
    pub fn can_publish(&self) -> bool {
        matches!(self, MemberRole::Owner | MemberRole::Administrator)
    }
}

#[async_trait]
pub trait ChannelClient: Send + Sync {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, ClientError>;

    async fn send_media(
        &self,
        chat_id: i64,
        media: &OutgoingMedia,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, ClientError>;

    /// Items are sent as one album, in order. Returns one reference per item.
    async fn send_media_group(
        &self,
        chat_id: i64,
        items: &[OutgoingMedia],
    ) -> Result<Vec<MessageRef>, ClientError>;

    /// User id of the bot itself.
    async fn self_id(&self) -> Result<u64, ClientError>;

    async fn member_role(&self, chat_id: i64, user_id: u64) -> Result<MemberRole, ClientError>;

    async fn delete_message(&self, chat_id: i64, message: MessageRef) -> Result<(), ClientError>;
}
