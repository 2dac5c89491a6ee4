//! In-progress post composition and the ephemeral session store it lives in.
//!
//! A [`Draft`] is owned by one admin conversation. Every composition step has
//! exactly one mutation method; the methods validate their input and move the
//! draft to the next [`Step`]. Drafts are stored as JSON blobs behind the
//! [`SessionStore`] trait, keyed by admin id, with a TTL refreshed on write.
use crate::calendar;
use crate::db::{NewButton, NewMedia, NewPost, PostWithRelations};
use crate::error::ValidationError;
use crate::model::{PostStatus, ScheduleStatus};
use crate::validation::{self, MAX_BUTTONS_PER_ROW};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    SelectingChannel,
    EnteringText,
    AddingMedia,
    AddingButtons,
    SelectingTime,
    SelectingDate,
    SelectingHour,
    SelectingMinute,
    Preview,
    EditMenu,
}

/// What confirming the preview will do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    Immediate,
    Scheduled(DateTime<Utc>),
    Draft,
}

/// Field reachable from the edit menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditField {
    Channel,
    Text,
    Media,
    Buttons,
    Time,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    post_id: Option<i64>,
    channel_id: Option<i64>,
    text: Option<String>,
    media: Vec<NewMedia>,
    buttons: Vec<NewButton>,
    intent: Option<Intent>,
    step: Step,
    /// Set once the draft has reached the preview; field steps then return
    /// to the preview instead of advancing.
    revisiting: bool,
    picked_date: Option<NaiveDate>,
    picked_hour: Option<u32>,
}

impl Default for Draft {
    fn default() -> Self {
        Self::new()
    }
}

impl Draft {
    pub fn new() -> Self {
        Self {
            post_id: None,
            channel_id: None,
            text: None,
            media: Vec::new(),
            buttons: Vec::new(),
            intent: None,
            step: Step::SelectingChannel,
            revisiting: false,
            picked_date: None,
            picked_hour: None,
        }
    }

    /// Load an existing post for editing. Starts at the preview.
    pub fn from_post(post: &PostWithRelations) -> Result<Self, ValidationError> {
        if post.post.status == PostStatus::Published {
            return Err(ValidationError::PublishedNotEditable);
        }
        let intent = match &post.schedule {
            Some(s) if post.post.status == PostStatus::Scheduled && s.status == ScheduleStatus::Pending => {
                Intent::Scheduled(s.scheduled_at)
            }
            _ => Intent::Draft,
        };
        Ok(Self {
            post_id: Some(post.post.id),
            channel_id: Some(post.post.channel_id),
            text: Some(post.post.text.clone()),
            media: post
                .media
                .iter()
                .map(|m| NewMedia {
                    file_id: m.file_id.clone(),
                    kind: m.kind,
                    file_size: m.file_size,
                    caption: m.caption.clone(),
                })
                .collect(),
            buttons: post
                .buttons
                .iter()
                .map(|b| NewButton {
                    label: b.label.clone(),
                    url: b.url.clone(),
                    row_index: b.row_index,
                    position: b.position,
                })
                .collect(),
            intent: Some(intent),
            step: Step::Preview,
            revisiting: true,
            picked_date: None,
            picked_hour: None,
        })
    }

    pub fn post_id(&self) -> Option<i64> {
        self.post_id
    }

    pub fn channel_id(&self) -> Option<i64> {
        self.channel_id
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn media(&self) -> &[NewMedia] {
        &self.media
    }

    pub fn buttons(&self) -> &[NewButton] {
        &self.buttons
    }

    pub fn intent(&self) -> Option<Intent> {
        self.intent
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn picked_date(&self) -> Option<NaiveDate> {
        self.picked_date
    }

    pub fn picked_hour(&self) -> Option<u32> {
        self.picked_hour
    }

    fn after_field(&mut self, next: Step) {
        self.step = if self.revisiting { Step::Preview } else { next };
    }

    pub fn select_channel(&mut self, channel_id: i64) {
        self.channel_id = Some(channel_id);
        self.after_field(Step::EnteringText);
    }

    pub fn set_text(&mut self, text: &str) -> Result<(), ValidationError> {
        validation::validate_post_text(text)?;
        self.text = Some(text.to_string());
        self.after_field(Step::AddingMedia);
        Ok(())
    }

    /// Append one media item; returns its position.
    pub fn add_media(&mut self, item: NewMedia) -> Result<usize, ValidationError> {
        let size = item.file_size.and_then(|s| u64::try_from(s).ok());
        validation::validate_media(item.kind, size, self.media.len())?;
        let kinds: Vec<_> = self.media.iter().map(|m| m.kind).collect();
        validation::validate_album(&kinds, item.kind)?;
        if let Some(caption) = item.caption.as_deref() {
            validation::validate_html(caption)?;
        }
        self.media.push(item);
        Ok(self.media.len() - 1)
    }

    pub fn finish_media(&mut self) {
        self.after_field(Step::AddingButtons);
    }

    /// Append every `label | url` line of `input`, or none of them.
    /// Buttons fill the current row; a full row opens the next one.
    pub fn add_buttons(&mut self, input: &str) -> Result<usize, ValidationError> {
        let specs = validation::parse_buttons(input)?;
        let added = specs.len();
        for spec in specs {
            let (row_index, position) = match self.buttons.last() {
                Some(last) if (last.position as usize) + 1 < MAX_BUTTONS_PER_ROW => {
                    (last.row_index, last.position + 1)
                }
                Some(last) => (last.row_index + 1, 0),
                None => (0, 0),
            };
            self.buttons.push(NewButton {
                label: spec.label,
                url: spec.url,
                row_index,
                position,
            });
        }
        Ok(added)
    }

    pub fn finish_buttons(&mut self) {
        self.after_field(Step::SelectingTime);
    }

    pub fn publish_now(&mut self) {
        self.set_intent(Intent::Immediate);
    }

    pub fn save_as_draft(&mut self) {
        self.set_intent(Intent::Draft);
    }

    /// Fast path: two minutes from `now`.
    pub fn schedule_quick(&mut self, now: DateTime<Utc>) {
        self.set_intent(Intent::Scheduled(calendar::quick_target(now)));
    }

    fn set_intent(&mut self, intent: Intent) {
        self.intent = Some(intent);
        self.picked_date = None;
        self.picked_hour = None;
        self.step = Step::Preview;
        self.revisiting = true;
    }

    pub fn start_picking(&mut self) {
        self.picked_date = None;
        self.picked_hour = None;
        self.step = Step::SelectingDate;
    }

    pub fn pick_date(&mut self, date: NaiveDate, today: NaiveDate) -> Result<(), ValidationError> {
        if date < today {
            return Err(ValidationError::PastDate);
        }
        self.picked_date = Some(date);
        self.step = Step::SelectingHour;
        Ok(())
    }

    pub fn pick_hour(&mut self, hour: u32) -> Result<(), ValidationError> {
        if hour > 23 {
            return Err(ValidationError::InvalidHour);
        }
        self.picked_hour = Some(hour);
        self.step = Step::SelectingMinute;
        Ok(())
    }

    /// Completes the calendar path. A local time that is not in the future
    /// sends the admin back to the hour menu.
    pub fn pick_minute(
        &mut self,
        minute: u32,
        offset: FixedOffset,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ValidationError> {
        if !calendar::MINUTES.contains(&minute) {
            return Err(ValidationError::MinuteNotQuantized);
        }
        let (Some(date), Some(hour)) = (self.picked_date, self.picked_hour) else {
            self.step = Step::SelectingDate;
            return Err(ValidationError::UnexpectedInput);
        };
        let at = calendar::resolve_local(date, hour, minute, offset)
            .ok_or(ValidationError::InvalidHour)?;
        if at <= now {
            self.picked_hour = None;
            self.step = Step::SelectingHour;
            return Err(ValidationError::PastTime);
        }
        self.set_intent(Intent::Scheduled(at));
        Ok(at)
    }

    pub fn open_edit_menu(&mut self) {
        self.revisiting = true;
        self.step = Step::EditMenu;
    }

    /// Jump from the edit menu to one field. Media and buttons are
    /// collected afresh.
    pub fn edit(&mut self, field: EditField) {
        self.revisiting = true;
        self.step = match field {
            EditField::Channel => Step::SelectingChannel,
            EditField::Text => Step::EnteringText,
            EditField::Media => {
                self.media.clear();
                Step::AddingMedia
            }
            EditField::Buttons => {
                self.buttons.clear();
                Step::AddingButtons
            }
            EditField::Time => Step::SelectingTime,
        };
    }

    pub fn back_to_preview(&mut self) {
        self.step = Step::Preview;
    }

    /// Everything the commit path writes. Fails when a required field is
    /// still missing.
    pub fn to_new_post(&self) -> Result<NewPost, ValidationError> {
        let channel_id = self.channel_id.ok_or(ValidationError::ChannelUnavailable)?;
        let text = self.text.clone().ok_or(ValidationError::EmptyText)?;
        let intent = self.intent.ok_or(ValidationError::MissingIntent)?;
        let (status, schedule_at) = match intent {
            Intent::Scheduled(at) => (PostStatus::Scheduled, Some(at)),
            Intent::Immediate | Intent::Draft => (PostStatus::Draft, None),
        };
        Ok(NewPost {
            channel_id,
            text,
            status,
            media: self.media.clone(),
            buttons: self.buttons.clone(),
            schedule_at,
        })
    }
}

/// Opaque session blobs keyed by admin id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: i64) -> Result<Option<String>>;
    /// Stores the blob and restarts its TTL.
    async fn set(&self, key: i64, blob: String) -> Result<()>;
    async fn delete(&self, key: i64) -> Result<()>;
}

/// Process-local session store. Entries past their TTL read as absent.
pub struct InMemorySessionStore {
    ttl: Duration,
    entries: Mutex<HashMap<i64, (Instant, String)>>,
}

impl InMemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, key: i64) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(&key) {
            Some((expires_at, _)) if *expires_at <= Instant::now() => {
                entries.remove(&key);
                Ok(None)
            }
            Some((_, blob)) => Ok(Some(blob.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: i64, blob: String) -> Result<()> {
        let expires_at = Instant::now() + self.ttl;
        self.entries.lock().await.insert(key, (expires_at, blob));
        Ok(())
    }

    async fn delete(&self, key: i64) -> Result<()> {
        self.entries.lock().await.remove(&key);
        Ok(())
    }
}

/// Typed access to drafts on top of a [`SessionStore`].
#[derive(Clone)]
pub struct DraftSessions {
    store: Arc<dyn SessionStore>,
}

impl DraftSessions {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(InMemorySessionStore::new(ttl)))
    }

    pub async fn load(&self, admin: i64) -> Result<Option<Draft>> {
        let Some(blob) = self.store.get(admin).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&blob) {
            Ok(draft) => Ok(Some(draft)),
            Err(err) => {
                warn!(?err, admin, "discarding unreadable draft session");
                self.store.delete(admin).await?;
                Ok(None)
            }
        }
    }

    pub async fn save(&self, admin: i64, draft: &Draft) -> Result<()> {
        let blob = serde_json::to_string(draft)?;
        self.store.set(admin, blob).await
    }

    pub async fn clear(&self, admin: i64) -> Result<()> {
        self.store.delete(admin).await
    }
}
