#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tg_postbot::client::{ChannelClient, Keyboard, MemberRole, MessageRef, OutgoingMedia};
use tg_postbot::compose::{Composer, ForwardedChannel, Input};
use tg_postbot::db::{self, channels, Channel, Pool};
use tg_postbot::delivery::Delivery;
use tg_postbot::draft::DraftSessions;
use tg_postbot::error::ClientError;
use tg_postbot::model::{Actor, MediaKind};
use tokio::sync::Mutex;

pub const ADMIN: i64 = 7;
pub const CHAT: i64 = -100_555;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text {
        chat_id: i64,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Media {
        chat_id: i64,
        media: OutgoingMedia,
        keyboard: Option<Keyboard>,
    },
    Group {
        chat_id: i64,
        items: Vec<OutgoingMedia>,
    },
    Deleted {
        chat_id: i64,
        message_id: i32,
    },
}

/// Channel client that records every call. Queued failures are returned by
/// the next calls in order; afterwards calls succeed.
#[derive(Clone)]
pub struct RecordingClient {
    failures: Arc<Mutex<VecDeque<ClientError>>>,
    sent: Arc<Mutex<Vec<Sent>>>,
    next_id: Arc<Mutex<i32>>,
    role: Arc<Mutex<MemberRole>>,
}

impl Default for RecordingClient {
    fn default() -> Self {
        Self {
            failures: Default::default(),
            sent: Default::default(),
            next_id: Arc::new(Mutex::new(100)),
            role: Arc::new(Mutex::new(MemberRole::Administrator)),
        }
    }
}

impl RecordingClient {
    pub fn with_failures(failures: Vec<ClientError>) -> Self {
        Self {
            failures: Arc::new(Mutex::new(VecDeque::from(failures))),
            ..Default::default()
        }
    }

    pub async fn fail_next(&self, err: ClientError) {
        self.failures.lock().await.push_back(err);
    }

    pub async fn set_role(&self, role: MemberRole) {
        *self.role.lock().await = role;
    }

    pub async fn sent(&self) -> Vec<Sent> {
        self.sent.lock().await.clone()
    }

    async fn attempt(&self) -> Result<(), ClientError> {
        match self.failures.lock().await.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn next_ref(&self) -> MessageRef {
        let mut id = self.next_id.lock().await;
        *id += 1;
        MessageRef(*id)
    }
}

#[async_trait]
impl ChannelClient for RecordingClient {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, ClientError> {
        self.attempt().await?;
        self.sent.lock().await.push(Sent::Text {
            chat_id,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(self.next_ref().await)
    }

    async fn send_media(
        &self,
        chat_id: i64,
        media: &OutgoingMedia,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, ClientError> {
        self.attempt().await?;
        self.sent.lock().await.push(Sent::Media {
            chat_id,
            media: media.clone(),
            keyboard: keyboard.cloned(),
        });
        Ok(self.next_ref().await)
    }

    async fn send_media_group(
        &self,
        chat_id: i64,
        items: &[OutgoingMedia],
    ) -> Result<Vec<MessageRef>, ClientError> {
        self.attempt().await?;
        self.sent.lock().await.push(Sent::Group {
            chat_id,
            items: items.to_vec(),
        });
        let mut refs = Vec::with_capacity(items.len());
        for _ in items {
            refs.push(self.next_ref().await);
        }
        Ok(refs)
    }

    async fn self_id(&self) -> Result<u64, ClientError> {
        Ok(42)
    }

    async fn member_role(&self, _chat_id: i64, _user_id: u64) -> Result<MemberRole, ClientError> {
        Ok(*self.role.lock().await)
    }

    async fn delete_message(&self, chat_id: i64, message: MessageRef) -> Result<(), ClientError> {
        self.attempt().await?;
        self.sent.lock().await.push(Sent::Deleted {
            chat_id,
            message_id: message.0,
        });
        Ok(())
    }
}

pub struct Harness {
    pub pool: Pool,
    pub client: RecordingClient,
    pub delivery: Delivery,
    pub sessions: DraftSessions,
    pub composer: Composer,
}

pub async fn harness() -> Harness {
    harness_with(RecordingClient::default(), Duration::from_secs(3600)).await
}

pub async fn harness_with(client: RecordingClient, ttl: Duration) -> Harness {
    let pool = db::memory_pool().await.unwrap();
    let delivery = Delivery::new(pool.clone(), Arc::new(client.clone()));
    let sessions = DraftSessions::in_memory(ttl);
    let composer = Composer::new(
        pool.clone(),
        sessions.clone(),
        delivery.clone(),
        chrono::FixedOffset::east_opt(0).unwrap(),
    );
    Harness {
        pool,
        client,
        delivery,
        sessions,
        composer,
    }
}

pub async fn news_feed(pool: &Pool) -> Channel {
    channels::upsert(pool, CHAT, "NewsFeed", Some("newsfeed"), Actor::System)
        .await
        .unwrap()
}

pub fn forwarded() -> Input {
    Input::ForwardedChannel(ForwardedChannel {
        chat_id: CHAT,
        title: "NewsFeed".into(),
        username: Some("newsfeed".into()),
    })
}

pub fn photo(n: usize) -> db::NewMedia {
    db::NewMedia {
        file_id: format!("photo-{}", n),
        kind: MediaKind::Photo,
        file_size: Some(50_000),
        caption: None,
    }
}

pub async fn count(pool: &Pool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}
