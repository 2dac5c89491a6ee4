//! Composition state machine and the admin command surface.
//!
//! [`Composer`] turns one admin [`Input`] into one [`Reply`]. It owns no
//! transport: `handlers` maps Telegram updates into inputs and renders
//! replies. Replies are HTML; every piece of stored or user supplied text
//! that is not the post body itself is escaped.
use crate::action::{Action, Menu, MenuButton, PostAction, PreviewChoice, TimeChoice};
use crate::calendar::{self, ViewSpan};
use crate::commands::{self, Command};
use crate::db::{channels, posts, schedules, NewMedia, Pool, Post, ScheduleEntry};
use crate::delivery::{Delivery, DeliveryOutcome};
use crate::draft::{Draft, DraftSessions, EditField, Intent, Step};
use crate::error::{ComposeError, DeliveryError, ValidationError};
use crate::model::{Actor, PostStatus};
use crate::scheduler::Scheduler;
use crate::validation::{self, MAX_MEDIA_ITEMS};
use anyhow::anyhow;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use std::sync::Arc;
use teloxide::utils::html::escape;
use tracing::{error, info, instrument, warn};

const LIST_LIMIT: i64 = 20;
const SNIPPET_CHARS: usize = 40;

/// A channel the admin forwarded a message from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedChannel {
    pub chat_id: i64,
    pub title: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Command(Command),
    Text(String),
    Media(NewMedia),
    Action(Action),
    ForwardedChannel(ForwardedChannel),
}

/// Messages to send back, in order. The menu belongs to the last message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub messages: Vec<String>,
    pub menu: Menu,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            messages: vec![text.into()],
            menu: Vec::new(),
        }
    }

    pub fn with_menu(mut self, menu: Menu) -> Self {
        self.menu = menu;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

fn snippet(text: &str) -> String {
    let plain = validation::strip_tags(text);
    let plain = plain.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out: String = plain.chars().take(SNIPPET_CHARS).collect();
    if plain.chars().count() > SNIPPET_CHARS {
        out.push('…');
    }
    escape(&out)
}

fn cancel_row() -> Vec<MenuButton> {
    vec![MenuButton::new("Cancel", Action::Cancel)]
}

fn expect_step(draft: &Draft, step: Step) -> Result<(), ComposeError> {
    if draft.step() == step {
        Ok(())
    } else {
        Err(ValidationError::UnexpectedInput.into())
    }
}

fn describe_delivery_failure(err: &DeliveryError) -> &'static str {
    match err {
        DeliveryError::Transient(_) => "Telegram is temporarily unavailable.",
        DeliveryError::Permanent(_) => {
            "Telegram rejected the post. Check that I am still an administrator of the channel."
        }
        DeliveryError::NotFound(_) => "The post no longer exists.",
        DeliveryError::Repository(_) => "The post could not be loaded.",
    }
}

/// Schedule browsing view for `[span containing anchor]`.
pub fn render_schedule(
    span: ViewSpan,
    anchor: NaiveDate,
    entries: &[ScheduleEntry],
    offset: FixedOffset,
) -> Reply {
    let mut text = format!("<b>Schedule · {}</b>\n", escape(&span.title(anchor)));
    if entries.is_empty() {
        text.push_str("\nNothing scheduled.");
    }
    for e in entries {
        let local = e.scheduled_at.with_timezone(&offset);
        text.push_str(&format!(
            "\n{} · {} · {} · #{} {}",
            local.format("%a %d %b %H:%M"),
            e.status.as_str(),
            escape(&e.channel_title),
            e.post_id,
            snippet(&e.text)
        ));
    }
    Reply::text(text).with_menu(span.navigation(anchor))
}

pub struct Composer {
    pool: Pool,
    sessions: DraftSessions,
    delivery: Delivery,
    offset: FixedOffset,
    scheduler: Option<Arc<Scheduler>>,
}

impl Composer {
    pub fn new(pool: Pool, sessions: DraftSessions, delivery: Delivery, offset: FixedOffset) -> Self {
        Self {
            pool,
            sessions,
            delivery,
            offset,
            scheduler: None,
        }
    }

    /// Enables `/publishdue`.
    pub fn with_scheduler(mut self, scheduler: Arc<Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub async fn handle(&self, admin: i64, input: Input) -> Reply {
        self.handle_at(admin, input, Utc::now()).await
    }

    /// Like [`Composer::handle`] with an explicit clock.
    #[instrument(skip(self, input))]
    pub async fn handle_at(&self, admin: i64, input: Input, now: DateTime<Utc>) -> Reply {
        match self.dispatch(admin, input, now).await {
            Ok(reply) => reply,
            Err(err) => self.failure_reply(admin, err, now).await,
        }
    }

    async fn failure_reply(&self, admin: i64, err: ComposeError, now: DateTime<Utc>) -> Reply {
        let message = escape(&err.user_message());
        match err {
            ComposeError::Validation(_) => {
                // Re-prompt the step the draft is still in.
                let prompt = match self.sessions.load(admin).await {
                    Ok(Some(draft)) => self.prompt(&draft, now).await.ok(),
                    _ => None,
                };
                match prompt {
                    Some(mut reply) => {
                        reply.messages.insert(0, message);
                        reply
                    }
                    None => Reply::text(message),
                }
            }
            ComposeError::Repository(ref cause) => {
                error!(admin, err = ?cause, "composition step failed");
                match self.sessions.load(admin).await {
                    Ok(Some(_)) => Reply {
                        messages: vec![
                            message,
                            "Your draft is still open; nothing was lost.".to_string(),
                        ],
                        menu: Vec::new(),
                    },
                    _ => Reply::text(message),
                }
            }
            ComposeError::NotFound(_) | ComposeError::SessionExpired => Reply::text(message),
        }
    }

    async fn dispatch(
        &self,
        admin: i64,
        input: Input,
        now: DateTime<Utc>,
    ) -> Result<Reply, ComposeError> {
        match input {
            Input::Command(cmd) => self.command(admin, cmd, now).await,
            Input::ForwardedChannel(channel) => self.register_channel(admin, channel).await,
            Input::Action(action) => self.action(admin, action, now).await,
            Input::Text(text) => self.text(admin, &text, now).await,
            Input::Media(media) => self.media(admin, media).await,
        }
    }

    async fn require_draft(&self, admin: i64) -> Result<Draft, ComposeError> {
        self.sessions
            .load(admin)
            .await?
            .ok_or(ComposeError::SessionExpired)
    }

    async fn command(
        &self,
        admin: i64,
        cmd: Command,
        now: DateTime<Utc>,
    ) -> Result<Reply, ComposeError> {
        let actor = Actor::Admin(admin);
        match cmd {
            Command::Help => Ok(Reply::text(escape(commands::HELP))),
            Command::NewPost => {
                if channels::list_active(&self.pool).await?.is_empty() {
                    return Ok(Reply::text(
                        "No channels yet. Add me to a channel as an administrator and forward any message from it here.",
                    ));
                }
                let draft = Draft::new();
                self.sessions.save(admin, &draft).await?;
                self.prompt(&draft, now).await
            }
            Command::EditPost(id) => self.start_edit(admin, id, now).await,
            Command::Cancel => self.cancel(admin).await,
            Command::Drafts => self.list_drafts().await,
            Command::Posts(status) => self.list_posts(status).await,
            Command::Channels => self.list_channels().await,
            Command::RemoveChannel(id) => {
                if !channels::deactivate(&self.pool, id, actor).await? {
                    return Err(ComposeError::NotFound(format!("Channel #{}", id)));
                }
                Ok(Reply::text(format!("Channel #{} removed.", id)))
            }
            Command::Duplicate(id) => self.duplicate(id, actor).await,
            Command::Delete(id) => self.delete(id, actor).await,
            Command::Retract(id) => self.retract(id, actor).await,
            Command::Schedule(span) => {
                self.schedule_view(span, calendar::local_today(now, self.offset))
                    .await
            }
            Command::PublishDue => match &self.scheduler {
                Some(scheduler) => {
                    let report = scheduler.trigger().await;
                    info!(admin, %report, "manual publishing run");
                    Ok(Reply::text(format!("Publishing run finished. {}", report)))
                }
                None => Ok(Reply::text("Manual publishing is not available.")),
            },
        }
    }

    async fn text(&self, admin: i64, text: &str, now: DateTime<Utc>) -> Result<Reply, ComposeError> {
        let mut draft = self.require_draft(admin).await?;
        match draft.step() {
            Step::EnteringText => {
                draft.set_text(text)?;
                self.sessions.save(admin, &draft).await?;
                self.prompt(&draft, now).await
            }
            Step::AddingButtons => {
                let added = draft.add_buttons(text)?;
                self.sessions.save(admin, &draft).await?;
                Ok(Reply::text(format!(
                    "Added {} button(s), {} in total. Send more or press Done.",
                    added,
                    draft.buttons().len()
                ))
                .with_menu(self.buttons_menu()))
            }
            _ => Err(ValidationError::UnexpectedInput.into()),
        }
    }

    async fn media(&self, admin: i64, media: NewMedia) -> Result<Reply, ComposeError> {
        let mut draft = self.require_draft(admin).await?;
        expect_step(&draft, Step::AddingMedia)?;
        let label = media.kind.label();
        let position = draft.add_media(media)?;
        self.sessions.save(admin, &draft).await?;
        Ok(Reply::text(format!(
            "Added {} ({}/{}). Send more or press Done.",
            label,
            position + 1,
            MAX_MEDIA_ITEMS
        ))
        .with_menu(self.media_menu()))
    }

    async fn action(
        &self,
        admin: i64,
        action: Action,
        now: DateTime<Utc>,
    ) -> Result<Reply, ComposeError> {
        let actor = Actor::Admin(admin);
        match action {
            Action::Noop => return Ok(Reply::default()),
            Action::Cancel | Action::Preview(PreviewChoice::Cancel) => {
                return self.cancel(admin).await
            }
            Action::Post(PostAction::Edit, id) => return self.start_edit(admin, id, now).await,
            Action::Post(PostAction::Duplicate, id) => return self.duplicate(id, actor).await,
            Action::Post(PostAction::Delete, id) => return self.delete(id, actor).await,
            Action::Schedule(span, anchor) => return self.schedule_view(span, anchor).await,
            _ => {}
        }

        let mut draft = self.require_draft(admin).await?;
        match action {
            Action::Channel(id) => {
                expect_step(&draft, Step::SelectingChannel)?;
                if channels::get_active(&self.pool, id).await?.is_none() {
                    return Err(ValidationError::ChannelUnavailable.into());
                }
                draft.select_channel(id);
            }
            Action::MediaDone => {
                expect_step(&draft, Step::AddingMedia)?;
                draft.finish_media();
            }
            Action::ButtonsDone => {
                expect_step(&draft, Step::AddingButtons)?;
                draft.finish_buttons();
            }
            Action::Time(choice) => {
                expect_step(&draft, Step::SelectingTime)?;
                match choice {
                    TimeChoice::Now => draft.publish_now(),
                    TimeChoice::Pick => draft.start_picking(),
                    TimeChoice::Quick => draft.schedule_quick(now),
                    TimeChoice::Draft => draft.save_as_draft(),
                }
            }
            Action::Date(date) => {
                expect_step(&draft, Step::SelectingDate)?;
                draft.pick_date(date, calendar::local_today(now, self.offset))?;
            }
            Action::Hour(hour) => {
                expect_step(&draft, Step::SelectingHour)?;
                draft.pick_hour(hour)?;
            }
            Action::Minute(minute) => {
                expect_step(&draft, Step::SelectingMinute)?;
                let picked = draft.pick_minute(minute, self.offset, now);
                // A past time moves the draft back to the hour menu.
                self.sessions.save(admin, &draft).await?;
                picked?;
                return self.prompt(&draft, now).await;
            }
            Action::Preview(PreviewChoice::Confirm) => {
                expect_step(&draft, Step::Preview)?;
                return self.commit(admin, &draft).await;
            }
            Action::Preview(PreviewChoice::Edit) => {
                expect_step(&draft, Step::Preview)?;
                draft.open_edit_menu();
            }
            Action::Edit(field) => {
                expect_step(&draft, Step::EditMenu)?;
                draft.edit(field);
            }
            Action::BackToPreview => {
                expect_step(&draft, Step::EditMenu)?;
                draft.back_to_preview();
            }
            Action::Noop
            | Action::Cancel
            | Action::Preview(PreviewChoice::Cancel)
            | Action::Post(..)
            | Action::Schedule(..) => return Ok(Reply::default()),
        }
        self.sessions.save(admin, &draft).await?;
        self.prompt(&draft, now).await
    }

    async fn cancel(&self, admin: i64) -> Result<Reply, ComposeError> {
        let had_draft = self.sessions.load(admin).await?.is_some();
        self.sessions.clear(admin).await?;
        Ok(Reply::text(if had_draft {
            "Cancelled. Nothing was saved."
        } else {
            "Nothing to cancel."
        }))
    }

    async fn start_edit(
        &self,
        admin: i64,
        post_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Reply, ComposeError> {
        let post = posts::get(&self.pool, post_id)
            .await?
            .ok_or_else(|| ComposeError::NotFound(format!("Post #{}", post_id)))?;
        let draft = Draft::from_post(&post)?;
        self.sessions.save(admin, &draft).await?;
        self.prompt(&draft, now).await
    }

    /// Write the draft durably and dispatch exactly one terminal action.
    /// The session is cleared only once the write has succeeded.
    #[instrument(skip(self, draft))]
    async fn commit(&self, admin: i64, draft: &Draft) -> Result<Reply, ComposeError> {
        let new = draft.to_new_post()?;
        let intent = draft.intent().ok_or(ValidationError::MissingIntent)?;
        let channel = channels::get_active(&self.pool, new.channel_id)
            .await?
            .ok_or(ValidationError::ChannelUnavailable)?;
        let actor = Actor::Admin(admin);

        let post = match draft.post_id() {
            Some(id) => {
                let existing = posts::get_post(&self.pool, id)
                    .await?
                    .ok_or_else(|| ComposeError::NotFound(format!("Post #{}", id)))?;
                if existing.status == PostStatus::Published {
                    return Err(ValidationError::PublishedNotEditable.into());
                }
                posts::replace_content(&self.pool, id, &new, actor).await?
            }
            None => posts::create_with_content(&self.pool, &new, actor).await?,
        };
        if let Err(err) = self.sessions.clear(admin).await {
            warn!(?err, admin, "failed to clear draft session after commit");
        }
        info!(post_id = post.id, ?intent, "draft committed");

        let title = escape(&channel.title);
        match intent {
            Intent::Immediate => match self.delivery.publish(post.id).await {
                DeliveryOutcome::Delivered { message_id } => {
                    // The message is already in the channel.
                    if let Err(err) =
                        posts::mark_published(&self.pool, post.id, message_id, Utc::now(), actor)
                            .await
                    {
                        error!(post_id = post.id, message_id, ?err, "published but status not saved");
                        return Ok(Reply::text(format!(
                            "Published post #{} to {}, but its status could not be saved. Do not publish it again.",
                            post.id, title
                        )));
                    }
                    Ok(Reply::text(format!("Published post #{} to {}.", post.id, title)))
                }
                DeliveryOutcome::Failed(err) => {
                    if let Err(save_err) = posts::mark_failed(&self.pool, post.id, actor).await {
                        error!(post_id = post.id, err = ?save_err, "failed status not saved");
                    }
                    Ok(Reply::text(format!(
                        "Could not publish to {}. {} The post was saved as #{}; use /editpost {} to try again.",
                        title,
                        describe_delivery_failure(&err),
                        post.id,
                        post.id
                    )))
                }
            },
            Intent::Scheduled(at) => Ok(Reply::text(format!(
                "Scheduled post #{} for {} in {}.",
                post.id,
                at.with_timezone(&self.offset).format("%Y-%m-%d %H:%M"),
                title
            ))),
            Intent::Draft => Ok(Reply::text(format!("Saved draft #{}.", post.id))),
        }
    }

    #[instrument(skip(self, channel), fields(chat_id = channel.chat_id))]
    async fn register_channel(
        &self,
        admin: i64,
        channel: ForwardedChannel,
    ) -> Result<Reply, ComposeError> {
        let title = escape(&channel.title);
        let client = self.delivery.client();
        let role = match client.self_id().await {
            Ok(me) => client.member_role(channel.chat_id, me).await,
            Err(err) => Err(err),
        };
        let role = match role {
            Ok(role) => role,
            Err(err) => {
                warn!(%err, "failed to check channel membership");
                return Ok(Reply::text(format!(
                    "I could not check my role in {}. Add me to the channel as an administrator and forward the message again.",
                    title
                )));
            }
        };
        if !role.can_publish() {
            return Ok(Reply::text(format!(
                "I am not an administrator of {}. Promote me with the right to post messages, then forward again.",
                title
            )));
        }
        let registered = channels::upsert(
            &self.pool,
            channel.chat_id,
            &channel.title,
            channel.username.as_deref(),
            Actor::Admin(admin),
        )
        .await?;
        Ok(Reply::text(format!(
            "Channel {} registered as #{}.",
            title, registered.id
        )))
    }

    async fn duplicate(&self, post_id: i64, actor: Actor) -> Result<Reply, ComposeError> {
        if posts::get_post(&self.pool, post_id).await?.is_none() {
            return Err(ComposeError::NotFound(format!("Post #{}", post_id)));
        }
        let copy = posts::duplicate(&self.pool, post_id, actor).await?;
        Ok(Reply::text(format!(
            "Copied post #{} into new draft #{}. Use /editpost {} to change it.",
            post_id, copy.id, copy.id
        )))
    }

    async fn delete(&self, post_id: i64, actor: Actor) -> Result<Reply, ComposeError> {
        if !posts::delete(&self.pool, post_id, actor).await? {
            return Err(ComposeError::NotFound(format!("Post #{}", post_id)));
        }
        Ok(Reply::text(format!("Post #{} deleted.", post_id)))
    }

    async fn retract(&self, post_id: i64, actor: Actor) -> Result<Reply, ComposeError> {
        let post = posts::get_post(&self.pool, post_id)
            .await?
            .ok_or_else(|| ComposeError::NotFound(format!("Post #{}", post_id)))?;
        if post.status != PostStatus::Published {
            return Ok(Reply::text(format!(
                "Post #{} is not published, so there is nothing to retract.",
                post_id
            )));
        }
        match self.delivery.retract(post_id, actor).await {
            Ok(()) => Ok(Reply::text(format!(
                "Post #{} was removed from the channel and moved back to drafts.",
                post_id
            ))),
            Err(DeliveryError::NotFound(_)) => {
                Err(ComposeError::NotFound(format!("Post #{}", post_id)))
            }
            Err(DeliveryError::Repository(cause)) => Err(ComposeError::Repository(anyhow!(cause))),
            Err(err) => Ok(Reply::text(format!(
                "Could not retract post #{}. {}",
                post_id,
                describe_delivery_failure(&err)
            ))),
        }
    }

    fn post_line(post: &Post) -> String {
        format!("#{} · {}", post.id, snippet(&post.text))
    }

    async fn list_drafts(&self) -> Result<Reply, ComposeError> {
        let drafts = posts::list_by_status(&self.pool, PostStatus::Draft, LIST_LIMIT).await?;
        if drafts.is_empty() {
            return Ok(Reply::text("No drafts."));
        }
        let mut text = String::from("<b>Drafts</b>\n");
        let mut menu: Menu = Vec::with_capacity(drafts.len());
        for post in &drafts {
            text.push('\n');
            text.push_str(&Self::post_line(post));
            menu.push(vec![
                MenuButton::new(format!("Edit #{}", post.id), Action::Post(PostAction::Edit, post.id)),
                MenuButton::new(
                    format!("Copy #{}", post.id),
                    Action::Post(PostAction::Duplicate, post.id),
                ),
                MenuButton::new(
                    format!("Delete #{}", post.id),
                    Action::Post(PostAction::Delete, post.id),
                ),
            ]);
        }
        Ok(Reply::text(text).with_menu(menu))
    }

    async fn list_posts(&self, status: PostStatus) -> Result<Reply, ComposeError> {
        let found = posts::list_by_status(&self.pool, status, LIST_LIMIT).await?;
        if found.is_empty() {
            return Ok(Reply::text(format!("No {} posts.", status.as_str().to_lowercase())));
        }
        let mut text = format!("<b>{} posts</b>\n", status.as_str());
        for post in &found {
            text.push('\n');
            text.push_str(&Self::post_line(post));
        }
        Ok(Reply::text(text))
    }

    async fn list_channels(&self) -> Result<Reply, ComposeError> {
        let active = channels::list_active(&self.pool).await?;
        if active.is_empty() {
            return Ok(Reply::text(
                "No channels registered. Forward a message from a channel where I am an administrator.",
            ));
        }
        let mut text = String::from("<b>Channels</b>\n");
        for ch in &active {
            text.push_str(&format!("\n#{} · {}", ch.id, escape(&ch.title)));
            if let Some(username) = ch.username.as_deref() {
                text.push_str(&format!(" (@{})", escape(username)));
            }
        }
        Ok(Reply::text(text))
    }

    async fn schedule_view(&self, span: ViewSpan, anchor: NaiveDate) -> Result<Reply, ComposeError> {
        let (from, to) = span
            .range(anchor, self.offset)
            .ok_or_else(|| anyhow!("schedule view out of range for {}", anchor))?;
        let entries = schedules::list_between(&self.pool, from, to).await?;
        Ok(render_schedule(span, anchor, &entries, self.offset))
    }

    fn media_menu(&self) -> Menu {
        vec![vec![
            MenuButton::new("Done", Action::MediaDone),
            MenuButton::new("Cancel", Action::Cancel),
        ]]
    }

    fn buttons_menu(&self) -> Menu {
        vec![vec![
            MenuButton::new("Done", Action::ButtonsDone),
            MenuButton::new("Cancel", Action::Cancel),
        ]]
    }

    /// Prompt for the step the draft is in.
    async fn prompt(&self, draft: &Draft, now: DateTime<Utc>) -> Result<Reply, ComposeError> {
        let reply = match draft.step() {
            Step::SelectingChannel => {
                let active = channels::list_active(&self.pool).await?;
                let mut menu: Menu = active
                    .iter()
                    .map(|ch| vec![MenuButton::new(ch.title.clone(), Action::Channel(ch.id))])
                    .collect();
                menu.push(cancel_row());
                Reply::text("Choose the channel to post to:").with_menu(menu)
            }
            Step::EnteringText => Reply::text(
                "Send the post text. Supported formatting: &lt;b&gt;, &lt;i&gt;, &lt;u&gt;, &lt;s&gt;, &lt;code&gt;, &lt;pre&gt;, &lt;a href=\"…\"&gt;, &lt;spoiler&gt;.",
            )
            .with_menu(vec![cancel_row()]),
            Step::AddingMedia => Reply::text(format!(
                "Send photos, videos, documents or animations, up to {}. Photos and videos can share an album; documents only go with documents and an animation stands alone. Press Done when finished.",
                MAX_MEDIA_ITEMS
            ))
            .with_menu(self.media_menu()),
            Step::AddingButtons => Reply::text(
                "Send link buttons, one per line, as <code>label | url</code>. Press Done to continue.",
            )
            .with_menu(self.buttons_menu()),
            Step::SelectingTime => Reply::text("When should the post go out?").with_menu(vec![
                vec![
                    MenuButton::new("Publish now", Action::Time(TimeChoice::Now)),
                    MenuButton::new("Pick date and time", Action::Time(TimeChoice::Pick)),
                ],
                vec![
                    MenuButton::new("In 2 minutes", Action::Time(TimeChoice::Quick)),
                    MenuButton::new("Save as draft", Action::Time(TimeChoice::Draft)),
                ],
                cancel_row(),
            ]),
            Step::SelectingDate => Reply::text("Pick a date:")
                .with_menu(calendar::date_menu(calendar::local_today(now, self.offset))),
            Step::SelectingHour => {
                let day = draft
                    .picked_date()
                    .map(|d| d.format("%a %d %b").to_string())
                    .unwrap_or_default();
                Reply::text(format!("Pick the hour for {}:", day)).with_menu(calendar::hour_menu())
            }
            Step::SelectingMinute => Reply::text("Pick the minute:")
                .with_menu(calendar::minute_menu(draft.picked_hour())),
            Step::Preview => self.preview(draft).await?,
            Step::EditMenu => Reply::text("What would you like to change?").with_menu(vec![
                vec![
                    MenuButton::new("Text", Action::Edit(EditField::Text)),
                    MenuButton::new("Media", Action::Edit(EditField::Media)),
                    MenuButton::new("Buttons", Action::Edit(EditField::Buttons)),
                ],
                vec![
                    MenuButton::new("Time", Action::Edit(EditField::Time)),
                    MenuButton::new("Channel", Action::Edit(EditField::Channel)),
                ],
                vec![
                    MenuButton::new("Back to preview", Action::BackToPreview),
                    MenuButton::new("Cancel", Action::Cancel),
                ],
            ]),
        };
        Ok(reply)
    }

    async fn preview(&self, draft: &Draft) -> Result<Reply, ComposeError> {
        let channel = match draft.channel_id() {
            Some(id) => channels::get(&self.pool, id)
                .await?
                .map(|c| escape(&c.title))
                .unwrap_or_else(|| "unknown channel".to_string()),
            None => "none".to_string(),
        };
        let media = if draft.media().is_empty() {
            "none".to_string()
        } else {
            let kinds: Vec<&str> = draft.media().iter().map(|m| m.kind.label()).collect();
            format!("{} ({})", kinds.len(), kinds.join(", "))
        };
        let rows = draft
            .buttons()
            .iter()
            .map(|b| b.row_index)
            .collect::<std::collections::BTreeSet<_>>()
            .len();
        let when = match draft.intent() {
            Some(Intent::Immediate) => "publish now".to_string(),
            Some(Intent::Scheduled(at)) => format!(
                "scheduled for {}",
                at.with_timezone(&self.offset).format("%Y-%m-%d %H:%M")
            ),
            Some(Intent::Draft) => "save as draft".to_string(),
            None => "not chosen".to_string(),
        };
        let heading = match draft.post_id() {
            Some(id) => format!("<b>Preview of post #{}</b>", id),
            None => "<b>Preview</b>".to_string(),
        };
        let summary = format!(
            "{}\nChannel: {}\nMedia: {}\nButtons: {} in {} row(s)\nWhen: {}",
            heading,
            channel,
            media,
            draft.buttons().len(),
            rows,
            when
        );
        let body = validation::platform_html(draft.text().unwrap_or_default());
        let mut messages = vec![summary];
        if !body.is_empty() {
            messages.push(body);
        }
        Ok(Reply {
            messages,
            menu: vec![vec![
                MenuButton::new("Confirm", Action::Preview(PreviewChoice::Confirm)),
                MenuButton::new("Edit", Action::Preview(PreviewChoice::Edit)),
                MenuButton::new("Cancel", Action::Preview(PreviewChoice::Cancel)),
            ]],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScheduleStatus;
    use chrono::TimeZone;

    #[test]
    fn snippets_are_plain_escaped_and_short() {
        assert_eq!(snippet("<b>Tom & Jerry</b>"), "Tom &amp; Jerry");
        let long = "word ".repeat(20);
        let s = snippet(&long);
        assert!(s.ends_with('…'));
        assert_eq!(s.chars().count(), SNIPPET_CHARS + 1);
    }

    #[test]
    fn schedule_view_lists_entries_in_local_time() {
        let offset = FixedOffset::east_opt(3 * 3600).unwrap();
        let anchor = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let entries = vec![ScheduleEntry {
            schedule_id: 1,
            post_id: 9,
            scheduled_at: Utc.with_ymd_and_hms(2026, 10, 16, 9, 30, 0).unwrap(),
            status: ScheduleStatus::Pending,
            attempts: 0,
            channel_title: "News <1>".into(),
            text: "<i>Morning</i> digest".into(),
        }];
        let reply = render_schedule(ViewSpan::Day, anchor, &entries, offset);
        let text = &reply.messages[0];
        assert!(text.contains("Fri 16 Oct 12:30 · PENDING · News &lt;1&gt; · #9 Morning digest"));
        assert_eq!(reply, render_schedule(ViewSpan::Day, anchor, &entries, offset));
        assert!(!reply.menu.is_empty());

        let empty = render_schedule(ViewSpan::Week, anchor, &[], offset);
        assert!(empty.messages[0].contains("Nothing scheduled."));
    }
}
