use serde::{Deserialize, Serialize};

/// Lifecycle of a post. A remote message id exists only while `Published`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PostStatus {
    Draft,
    Scheduled,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "DRAFT",
            PostStatus::Scheduled => "SCHEDULED",
            PostStatus::Published => "PUBLISHED",
            PostStatus::Failed => "FAILED",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Some(PostStatus::Draft),
            "SCHEDULED" => Some(PostStatus::Scheduled),
            "PUBLISHED" => Some(PostStatus::Published),
            "FAILED" => Some(PostStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScheduleStatus {
    Pending,
    Published,
    Failed,
    Cancelled,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "PENDING",
            ScheduleStatus::Published => "PUBLISHED",
            ScheduleStatus::Failed => "FAILED",
            ScheduleStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(ScheduleStatus::Pending),
            "PUBLISHED" => Some(ScheduleStatus::Published),
            "FAILED" => Some(ScheduleStatus::Failed),
            "CANCELLED" => Some(ScheduleStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Photo,
    Video,
    Document,
    Animation,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "PHOTO",
            MediaKind::Video => "VIDEO",
            MediaKind::Document => "DOCUMENT",
            MediaKind::Animation => "ANIMATION",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        match s {
            "PHOTO" => Some(MediaKind::Photo),
            "VIDEO" => Some(MediaKind::Video),
            "DOCUMENT" => Some(MediaKind::Document),
            "ANIMATION" => Some(MediaKind::Animation),
            _ => None,
        }
    }

    /// Upload ceiling accepted by the composition flow, in bytes.
    pub fn max_size(&self) -> u64 {
        const MB: u64 = 1024 * 1024;
        match self {
            MediaKind::Photo => 10 * MB,
            MediaKind::Video | MediaKind::Document | MediaKind::Animation => 50 * MB,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
            MediaKind::Animation => "animation",
        }
    }
}

/// Who performed a mutation; recorded on the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Admin(i64),
    Scheduler,
    System,
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::Admin(id) => write!(f, "admin:{}", id),
            Actor::Scheduler => f.write_str("scheduler"),
            Actor::System => f.write_str("system"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_round_trip_through_storage_strings() {
        for s in [
            PostStatus::Draft,
            PostStatus::Scheduled,
            PostStatus::Published,
            PostStatus::Failed,
        ] {
            assert_eq!(PostStatus::parse_status(s.as_str()), Some(s));
        }
        assert_eq!(PostStatus::parse_status("drafts"), None);
        assert_eq!(ScheduleStatus::parse_status("CANCELLED"), Some(ScheduleStatus::Cancelled));
    }

    #[test]
    fn media_ceilings() {
        assert_eq!(MediaKind::Photo.max_size(), 10 * 1024 * 1024);
        assert_eq!(MediaKind::Video.max_size(), 50 * 1024 * 1024);
        assert_eq!(MediaKind::Document.max_size(), 50 * 1024 * 1024);
    }

    #[test]
    fn actor_display() {
        assert_eq!(Actor::Admin(7).to_string(), "admin:7");
        assert_eq!(Actor::Scheduler.to_string(), "scheduler");
    }
}
