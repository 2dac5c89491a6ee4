//! Database entity and view models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use crate::model::{MediaKind, PostStatus, ScheduleStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub tg_chat_id: i64,
    pub title: String,
    pub username: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: i64,
    pub channel_id: i64,
    pub text: String,
    pub status: PostStatus,
    pub remote_message_id: Option<i32>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    pub id: i64,
    pub post_id: i64,
    pub file_id: String,
    pub kind: MediaKind,
    pub file_size: Option<i64>,
    pub caption: Option<String>,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub id: i64,
    pub post_id: i64,
    pub label: String,
    pub url: String,
    pub row_index: i64,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub id: i64,
    pub post_id: i64,
    pub scheduled_at: DateTime<Utc>,
    pub status: ScheduleStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statistics {
    pub id: i64,
    pub post_id: i64,
    pub views: i64,
    pub forwards: i64,
    pub reactions: i64,
    pub updated_at: DateTime<Utc>,
}

/// A post loaded together with everything the delivery engine and the edit
/// flow need. Media are ordered by position, buttons by (row, position).
#[derive(Debug, Clone)]
pub struct PostWithRelations {
    pub post: Post,
    pub channel: Channel,
    pub media: Vec<Media>,
    pub buttons: Vec<Button>,
    pub schedule: Option<Schedule>,
    pub statistics: Option<Statistics>,
}

/// Media item to attach to a post; position is assigned by the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMedia {
    pub file_id: String,
    pub kind: MediaKind,
    pub file_size: Option<i64>,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewButton {
    pub label: String,
    pub url: String,
    pub row_index: i64,
    pub position: i64,
}

/// Complete post content written in one transaction by the commit path.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub channel_id: i64,
    pub text: String,
    pub status: PostStatus,
    pub media: Vec<NewMedia>,
    pub buttons: Vec<NewButton>,
    pub schedule_at: Option<DateTime<Utc>>,
}

/// Partial update of a post's own columns. Status changes go through the
/// `mark_*` functions so the remote reference stays consistent with it.
#[derive(Debug, Clone, Default)]
pub struct PostUpdate {
    pub channel_id: Option<i64>,
    pub text: Option<String>,
}

/// Schedule slice handed to the scheduler loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueSchedule {
    pub schedule_id: i64,
    pub post_id: i64,
    pub scheduled_at: DateTime<Utc>,
    pub attempts: i64,
}

/// Row of the schedule browsing views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub schedule_id: i64,
    pub post_id: i64,
    pub scheduled_at: DateTime<Utc>,
    pub status: ScheduleStatus,
    pub attempts: i64,
    pub channel_title: String,
    pub text: String,
}
