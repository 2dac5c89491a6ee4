//! Telegram update handling: turns admin messages and button presses into
//! composer inputs and sends the replies back as HTML.
use crate::action::{Action, Menu};
use crate::commands::{self, Parsed};
use crate::compose::{Composer, ForwardedChannel, Input, Reply};
use crate::db::NewMedia;
use crate::model::MediaKind;
use anyhow::Result;
use std::str::FromStr;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode};
use teloxide::utils::html::escape;
use tracing::{debug, error, info, instrument, warn};

const UNSUPPORTED: &str =
    "Unsupported message type. Send text, a photo, a video, a document or an animation.";
const APOLOGY: &str = "Sorry, something went wrong. Please try again.";

pub struct AppState {
    pub composer: Composer,
    pub admin_id: i64,
}

/// What an incoming text turned into before it reaches the composer.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Incoming {
    Input(Input),
    Notice(String),
}

fn text_input(text: &str) -> Incoming {
    match commands::parse(text) {
        Parsed::NotACommand => Incoming::Input(Input::Text(text.to_string())),
        Parsed::Command(cmd) => Incoming::Input(Input::Command(cmd)),
        Parsed::Usage(usage) => Incoming::Notice(format!("Usage: {}", escape(usage))),
        Parsed::Unknown(name) => Incoming::Notice(format!(
            "Unknown command /{}. Send /help for the list of commands.",
            escape(&name)
        )),
    }
}

fn media_input(msg: &Message) -> Option<NewMedia> {
    let caption = msg.caption().map(str::to_owned);
    // Animations also carry a document; check them first.
    let (kind, file_id, size) = if let Some(a) = msg.animation() {
        (MediaKind::Animation, a.file.id.clone(), a.file.size)
    } else if let Some(p) = msg.photo().and_then(|sizes| sizes.last()) {
        (MediaKind::Photo, p.file.id.clone(), p.file.size)
    } else if let Some(v) = msg.video() {
        (MediaKind::Video, v.file.id.clone(), v.file.size)
    } else if let Some(d) = msg.document() {
        (MediaKind::Document, d.file.id.clone(), d.file.size)
    } else {
        return None;
    };
    Some(NewMedia {
        file_id,
        kind,
        file_size: Some(i64::from(size)),
        caption,
    })
}

fn message_input(msg: &Message) -> Incoming {
    if let Some(chat) = msg.forward_from_chat() {
        if chat.is_channel() {
            return Incoming::Input(Input::ForwardedChannel(ForwardedChannel {
                chat_id: chat.id.0,
                title: chat.title().unwrap_or("untitled channel").to_string(),
                username: chat.username().map(str::to_owned),
            }));
        }
    }
    if let Some(text) = msg.text() {
        return text_input(text);
    }
    match media_input(msg) {
        Some(media) => Incoming::Input(Input::Media(media)),
        None => Incoming::Notice(UNSUPPORTED.to_string()),
    }
}

fn keyboard(menu: &Menu) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(menu.iter().map(|row| {
        row.iter()
            .map(|b| InlineKeyboardButton::callback(b.label.clone(), b.action.to_string()))
            .collect::<Vec<_>>()
    }))
}

async fn send_reply(bot: &Bot, chat_id: ChatId, reply: Reply) -> Result<()> {
    if reply.is_empty() {
        return Ok(());
    }
    let last = reply.messages.len().saturating_sub(1);
    for (i, text) in reply.messages.into_iter().enumerate() {
        let mut req = bot.send_message(chat_id, text).parse_mode(ParseMode::Html);
        if i == last && !reply.menu.is_empty() {
            req = req.reply_markup(keyboard(&reply.menu));
        }
        req.await?;
    }
    Ok(())
}

#[instrument(skip_all)]
async fn handle_message(bot: &Bot, state: &AppState, msg: &Message) -> Result<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let admin = user.id.0 as i64;
    if admin != state.admin_id {
        debug!(user_id = admin, "ignoring message from non-admin");
        return Ok(());
    }
    let reply = match message_input(msg) {
        Incoming::Input(input) => state.composer.handle(admin, input).await,
        Incoming::Notice(text) => Reply::text(text),
    };
    send_reply(bot, msg.chat.id, reply).await
}

#[instrument(skip_all)]
async fn handle_callback(bot: &Bot, state: &AppState, q: &CallbackQuery) -> Result<()> {
    let admin = q.from.id.0 as i64;
    if admin != state.admin_id {
        debug!(user_id = admin, "ignoring callback from non-admin");
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    }
    let chat_id = q
        .message
        .as_ref()
        .map(|m| m.chat.id)
        .unwrap_or(ChatId(admin));
    let action = q.data.as_deref().map(Action::from_str);
    let reply = match action {
        Some(Ok(action)) => {
            bot.answer_callback_query(q.id.clone()).await?;
            state.composer.handle(admin, Input::Action(action)).await
        }
        Some(Err(err)) => {
            warn!(%err, "stale or foreign callback payload");
            bot.answer_callback_query(q.id.clone())
                .text("This button is no longer valid.")
                .await?;
            return Ok(());
        }
        None => {
            bot.answer_callback_query(q.id.clone()).await?;
            return Ok(());
        }
    };
    send_reply(bot, chat_id, reply).await
}

async fn on_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if let Err(err) = handle_message(&bot, &state, &msg).await {
        error!(?err, "failed to handle message");
        let _ = bot.send_message(msg.chat.id, APOLOGY).await;
    }
    Ok(())
}

async fn on_callback(bot: Bot, q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    if let Err(err) = handle_callback(&bot, &state, &q).await {
        error!(?err, "failed to handle callback");
        if let Some(m) = q.message.as_ref() {
            let _ = bot.send_message(m.chat.id, APOLOGY).await;
        }
    }
    Ok(())
}

/// Serve updates until Ctrl-C.
pub async fn run(bot: Bot, state: Arc<AppState>) {
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_callback_query().endpoint(on_callback));

    info!(admin_id = state.admin_id, "starting telegram dispatcher");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{MenuButton, TimeChoice};
    use crate::commands::Command;

    #[test]
    fn plain_text_goes_to_the_composer() {
        assert_eq!(
            text_input("Hello <b>world</b>"),
            Incoming::Input(Input::Text("Hello <b>world</b>".into()))
        );
        assert_eq!(
            text_input("/newpost"),
            Incoming::Input(Input::Command(Command::NewPost))
        );
    }

    #[test]
    fn usage_and_unknown_commands_are_answered_directly() {
        assert_eq!(
            text_input("/editpost x"),
            Incoming::Notice("Usage: /editpost &lt;id&gt;".into())
        );
        match text_input("/nope") {
            Incoming::Notice(text) => assert!(text.contains("/nope")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn menus_become_callback_keyboards() {
        let menu = vec![
            vec![
                MenuButton::new("Now", Action::Time(TimeChoice::Now)),
                MenuButton::new("Quick", Action::Time(TimeChoice::Quick)),
            ],
            vec![MenuButton::new("Cancel", Action::Cancel)],
        ];
        let markup = keyboard(&menu);
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(markup.inline_keyboard[0].len(), 2);
        assert_eq!(markup.inline_keyboard[0][1].text, "Quick");
    }
}
