use crate::client::{ChannelClient, Keyboard, MemberRole, MessageRef, OutgoingMedia};
use crate::error::ClientError;
use crate::model::MediaKind;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    ChatMemberKind, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, InputMedia,
    InputMediaAnimation, InputMediaDocument, InputMediaPhoto, InputMediaVideo, MessageId,
    ParseMode,
};
use teloxide::RequestError;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};
use url::Url;

/// [`ChannelClient`] backed by the Telegram Bot API. Texts and captions are
/// sent with HTML parse mode.
#[derive(Clone)]
pub struct TelegramClient {
    bot: Bot,
    me: std::sync::Arc<OnceCell<u64>>,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            me: Default::default(),
        }
    }
}

/// Rate limits and connection problems are worth retrying; anything the
/// API itself rejected is not.
pub fn classify(err: RequestError) -> ClientError {
    match err {
        RequestError::RetryAfter(_) | RequestError::Network(_) | RequestError::Io(_) => {
            ClientError::Transient(err.to_string())
        }
        other => ClientError::Permanent(other.to_string()),
    }
}

fn markup(keyboard: &Keyboard) -> Result<InlineKeyboardMarkup, ClientError> {
    let mut rows = Vec::with_capacity(keyboard.rows.len());
    for row in &keyboard.rows {
        let mut buttons = Vec::with_capacity(row.len());
        for b in row {
            let url = Url::parse(&b.url)
                .map_err(|e| ClientError::Permanent(format!("invalid button url {}: {}", b.url, e)))?;
            buttons.push(InlineKeyboardButton::url(b.label.clone(), url));
        }
        rows.push(buttons);
    }
    Ok(InlineKeyboardMarkup::new(rows))
}

fn input_media(item: &OutgoingMedia) -> InputMedia {
    let file = InputFile::file_id(item.file_id.clone());
    match (item.kind, item.caption.clone()) {
        (MediaKind::Photo, Some(c)) => {
            InputMedia::Photo(InputMediaPhoto::new(file).caption(c).parse_mode(ParseMode::Html))
        }
        (MediaKind::Photo, None) => InputMedia::Photo(InputMediaPhoto::new(file)),
        (MediaKind::Video, Some(c)) => {
            InputMedia::Video(InputMediaVideo::new(file).caption(c).parse_mode(ParseMode::Html))
        }
        (MediaKind::Video, None) => InputMedia::Video(InputMediaVideo::new(file)),
        (MediaKind::Document, Some(c)) => InputMedia::Document(
            InputMediaDocument::new(file).caption(c).parse_mode(ParseMode::Html),
        ),
        (MediaKind::Document, None) => InputMedia::Document(InputMediaDocument::new(file)),
        (MediaKind::Animation, Some(c)) => InputMedia::Animation(
            InputMediaAnimation::new(file).caption(c).parse_mode(ParseMode::Html),
        ),
        (MediaKind::Animation, None) => InputMedia::Animation(InputMediaAnimation::new(file)),
    }
}

#[async_trait]
impl ChannelClient for TelegramClient {
    #[instrument(skip_all, fields(chat_id = chat_id))]
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, ClientError> {
        let mut req = self
            .bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html);
        if let Some(kb) = keyboard {
            req = req.reply_markup(markup(kb)?);
        }
        let msg = req.await.map_err(classify)?;
        Ok(MessageRef(msg.id.0))
    }

    #[instrument(skip_all, fields(chat_id = chat_id, kind = media.kind.as_str()))]
    async fn send_media(
        &self,
        chat_id: i64,
        media: &OutgoingMedia,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, ClientError> {
        let chat = ChatId(chat_id);
        let file = InputFile::file_id(media.file_id.clone());
        let markup = keyboard.map(markup).transpose()?;
        let caption = media.caption.clone();

        // Each send request is its own payload type, so the optional setters
        // are applied per branch.
        macro_rules! send {
            ($req:expr) => {{
                let mut req = $req.parse_mode(ParseMode::Html);
                if let Some(c) = caption {
                    req = req.caption(c);
                }
                if let Some(m) = markup {
                    req = req.reply_markup(m);
                }
                req.await.map_err(classify)?
            }};
        }

        let msg = match media.kind {
            MediaKind::Photo => send!(self.bot.send_photo(chat, file)),
            MediaKind::Video => send!(self.bot.send_video(chat, file)),
            MediaKind::Document => send!(self.bot.send_document(chat, file)),
            MediaKind::Animation => send!(self.bot.send_animation(chat, file)),
        };
        Ok(MessageRef(msg.id.0))
    }

    #[instrument(skip_all, fields(chat_id = chat_id, items = items.len()))]
    async fn send_media_group(
        &self,
        chat_id: i64,
        items: &[OutgoingMedia],
    ) -> Result<Vec<MessageRef>, ClientError> {
        let media: Vec<InputMedia> = items.iter().map(input_media).collect();
        let sent = self
            .bot
            .send_media_group(ChatId(chat_id), media)
            .await
            .map_err(classify)?;
        Ok(sent.iter().map(|m| MessageRef(m.id.0)).collect())
    }

    async fn self_id(&self) -> Result<u64, ClientError> {
        let id = self
            .me
            .get_or_try_init(|| async {
                let me = self.bot.get_me().await.map_err(classify)?;
                debug!(bot_id = me.user.id.0, "resolved bot identity");
                Ok::<u64, ClientError>(me.user.id.0)
            })
            .await?;
        Ok(*id)
    }

    async fn member_role(&self, chat_id: i64, user_id: u64) -> Result<MemberRole, ClientError> {
        let member = self
            .bot
            .get_chat_member(ChatId(chat_id), UserId(user_id))
            .await
            .map_err(classify)?;
        Ok(match member.kind {
            ChatMemberKind::Owner(_) => MemberRole::Owner,
            ChatMemberKind::Administrator(_) => MemberRole::Administrator,
            ChatMemberKind::Member => MemberRole::Member,
            ChatMemberKind::Restricted(_) => MemberRole::Restricted,
            ChatMemberKind::Left => MemberRole::Left,
            ChatMemberKind::Banned(_) => MemberRole::Banned,
        })
    }

    async fn delete_message(&self, chat_id: i64, message: MessageRef) -> Result<(), ClientError> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message.0))
            .await
            .map_err(classify)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::UrlButton;
    use teloxide::ApiError;

    #[test]
    fn api_rejections_are_permanent() {
        let err = classify(RequestError::Api(ApiError::BotKicked));
        assert!(matches!(err, ClientError::Permanent(_)));
        let err = classify(RequestError::Api(ApiError::MessageToDeleteNotFound));
        assert!(matches!(err, ClientError::Permanent(_)));
    }

    #[test]
    fn keyboard_rows_keep_their_shape() {
        let kb = Keyboard {
            rows: vec![
                vec![
                    UrlButton { label: "a".into(), url: "https://a.example".into() },
                    UrlButton { label: "b".into(), url: "https://b.example".into() },
                ],
                vec![UrlButton { label: "c".into(), url: "https://c.example".into() }],
            ],
        };
        let m = markup(&kb).unwrap();
        assert_eq!(m.inline_keyboard.len(), 2);
        assert_eq!(m.inline_keyboard[0].len(), 2);
        assert_eq!(m.inline_keyboard[1][0].text, "c");

        let bad = Keyboard {
            rows: vec![vec![UrlButton { label: "x".into(), url: "not a url".into() }]],
        };
        assert!(matches!(markup(&bad), Err(ClientError::Permanent(_))));
    }
}
