mod common;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Utc};
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tg_postbot::action::{Action, PreviewChoice, TimeChoice};
use tg_postbot::commands::Command;
use tg_postbot::compose::{Composer, Input};
use tg_postbot::db::{posts, schedules, DueSchedule, Pool};
use tg_postbot::error::ClientError;
use tg_postbot::model::{Actor, PostStatus, ScheduleStatus};
use tg_postbot::scheduler::{DueSource, PollingDueSource, Scheduler, SchedulerSettings};

fn settings() -> SchedulerSettings {
    SchedulerSettings {
        interval: Duration::from_secs(60),
        max_attempts: 3,
        fail_fast_on_permanent: true,
    }
}

async fn scheduled_post(pool: &Pool, at: DateTime<Utc>) -> (i64, i64) {
    let channel = news_feed(pool).await;
    let post = posts::create(pool, channel.id, "on time", PostStatus::Draft, Actor::System)
        .await
        .unwrap();
    let schedule = schedules::create(pool, post.id, at, Actor::System)
        .await
        .unwrap();
    (post.id, schedule.id)
}

#[tokio::test]
async fn quick_schedule_is_published_by_the_next_tick_after_its_time() {
    let h = harness().await;
    let channel = news_feed(&h.pool).await;
    let now = Utc::now();
    let at = |input: Input| h.composer.handle_at(ADMIN, input, now);
    at(Input::Command(Command::NewPost)).await;
    at(Input::Action(Action::Channel(channel.id))).await;
    at(Input::Text("in two minutes".into())).await;
    at(Input::Action(Action::MediaDone)).await;
    at(Input::Action(Action::ButtonsDone)).await;
    at(Input::Action(Action::Time(TimeChoice::Quick))).await;
    at(Input::Action(Action::Preview(PreviewChoice::Confirm))).await;

    let post = posts::list_by_status(&h.pool, PostStatus::Scheduled, 10)
        .await
        .unwrap()
        .remove(0);
    let schedule = schedules::get_for_post(&h.pool, post.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Pending);
    assert_eq!(schedule.attempts, 0);
    assert!(schedule.scheduled_at > now);

    let scheduler = Scheduler::polling(h.pool.clone(), h.delivery.clone(), settings());
    let early = scheduler.tick(now + ChronoDuration::minutes(1)).await;
    assert_eq!(early.due, 0);

    let report = scheduler.tick(now + ChronoDuration::minutes(3)).await;
    assert_eq!(report.published, 1);
    let schedule = schedules::get_for_post(&h.pool, post.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Published);
    assert!(schedule.published_at.is_some());
    let post = posts::get_post(&h.pool, post.id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Published);
    assert!(post.remote_message_id.is_some());
    assert_eq!(h.client.sent().await.len(), 1);
}

#[tokio::test]
async fn three_transient_failures_exhaust_the_ceiling() {
    let transient = || ClientError::Transient("Too Many Requests: retry after 5".into());
    let h = harness_with(
        RecordingClient::with_failures(vec![transient(), transient(), transient()]),
        Duration::from_secs(3600),
    )
    .await;
    let now = Utc::now();
    let (post_id, _) = scheduled_post(&h.pool, now - ChronoDuration::minutes(1)).await;
    let scheduler = Scheduler::polling(h.pool.clone(), h.delivery.clone(), settings());

    let first = scheduler.tick(now).await;
    assert_eq!((first.due, first.retrying), (1, 1));
    scheduler.tick(now + ChronoDuration::minutes(1)).await;
    let third = scheduler.tick(now + ChronoDuration::minutes(2)).await;
    assert_eq!(third.failed, 1);

    let schedule = schedules::get_for_post(&h.pool, post_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Failed);
    assert_eq!(schedule.attempts, 3);
    assert!(schedule.last_error.is_some());
    let post = posts::get_post(&h.pool, post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Failed);

    let fourth = scheduler.tick(now + ChronoDuration::minutes(3)).await;
    assert_eq!(fourth.due, 0);
    assert!(h.client.sent().await.is_empty());
    let schedule = schedules::get_for_post(&h.pool, post_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(schedule.attempts, 3);
}

#[tokio::test]
async fn permanent_failure_short_circuits_the_retries() {
    let h = harness_with(
        RecordingClient::with_failures(vec![ClientError::Permanent(
            "Forbidden: bot was kicked from the channel chat".into(),
        )]),
        Duration::from_secs(3600),
    )
    .await;
    let now = Utc::now();
    let (post_id, _) = scheduled_post(&h.pool, now - ChronoDuration::seconds(5)).await;
    let scheduler = Scheduler::polling(h.pool.clone(), h.delivery.clone(), settings());

    let report = scheduler.tick(now).await;
    assert_eq!(report.failed, 1);
    let schedule = schedules::get_for_post(&h.pool, post_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Failed);
    assert_eq!(schedule.attempts, 1);
}

#[tokio::test]
async fn uniform_retries_when_fail_fast_is_off() {
    let h = harness_with(
        RecordingClient::with_failures(vec![ClientError::Permanent("Bad Request".into())]),
        Duration::from_secs(3600),
    )
    .await;
    let now = Utc::now();
    let (post_id, _) = scheduled_post(&h.pool, now - ChronoDuration::seconds(5)).await;
    let scheduler = Scheduler::polling(
        h.pool.clone(),
        h.delivery.clone(),
        SchedulerSettings {
            fail_fast_on_permanent: false,
            ..settings()
        },
    );

    let report = scheduler.tick(now).await;
    assert_eq!(report.retrying, 1);
    let report = scheduler.tick(now + ChronoDuration::minutes(1)).await;
    assert_eq!(report.published, 1);
    let schedule = schedules::get_for_post(&h.pool, post_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Published);
    assert_eq!(schedule.attempts, 1);
}

/// Polls the table but also hands out a schedule that does not exist.
struct WithPhantom {
    inner: PollingDueSource,
}

#[async_trait]
impl DueSource for WithPhantom {
    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<DueSchedule>> {
        let mut due = vec![DueSchedule {
            schedule_id: 9_999,
            post_id: 9_999,
            scheduled_at: now,
            attempts: 0,
        }];
        due.extend(self.inner.due(now).await?);
        Ok(due)
    }
}

#[tokio::test]
async fn one_broken_item_does_not_stop_the_tick() {
    let h = harness().await;
    let now = Utc::now();
    let (post_id, _) = scheduled_post(&h.pool, now - ChronoDuration::seconds(5)).await;
    let source = Arc::new(WithPhantom {
        inner: PollingDueSource::new(h.pool.clone()),
    });
    let scheduler = Scheduler::new(h.pool.clone(), h.delivery.clone(), source, settings());

    let report = scheduler.tick(now).await;
    assert_eq!(report.due, 2);
    assert_eq!(report.errors, 1);
    assert_eq!(report.published, 1);
    let post = posts::get_post(&h.pool, post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Published);
}

#[tokio::test]
async fn cancelled_schedules_are_never_delivered() {
    let h = harness().await;
    let now = Utc::now();
    let (post_id, _) = scheduled_post(&h.pool, now - ChronoDuration::seconds(5)).await;
    assert!(schedules::cancel(&h.pool, post_id, Actor::Admin(ADMIN))
        .await
        .unwrap());

    let scheduler = Scheduler::polling(h.pool.clone(), h.delivery.clone(), settings());
    assert_eq!(scheduler.tick(now).await.due, 0);
    assert!(h.client.sent().await.is_empty());
    let post = posts::get_post(&h.pool, post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Draft);
}

#[tokio::test]
async fn loop_starts_once_and_stops() {
    let h = harness().await;
    let scheduler = Scheduler::polling(h.pool.clone(), h.delivery.clone(), settings());
    assert!(!scheduler.is_running());
    assert!(scheduler.start());
    assert!(!scheduler.start());
    assert!(scheduler.is_running());

    scheduler.stop().await;
    assert!(!scheduler.is_running());
    assert!(scheduler.start());
    scheduler.stop().await;
}

#[tokio::test]
async fn running_loop_delivers_due_posts() {
    let h = harness().await;
    let (post_id, _) = scheduled_post(&h.pool, Utc::now() - ChronoDuration::seconds(5)).await;
    let scheduler = Scheduler::polling(
        h.pool.clone(),
        h.delivery.clone(),
        SchedulerSettings {
            interval: Duration::from_millis(20),
            ..settings()
        },
    );
    scheduler.start();

    let mut published = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let post = posts::get_post(&h.pool, post_id).await.unwrap().unwrap();
        if post.status == PostStatus::Published {
            published = true;
            break;
        }
    }
    scheduler.stop().await;
    assert!(published);
    assert_eq!(h.client.sent().await.len(), 1);
}

#[tokio::test]
async fn publishdue_command_runs_one_tick() {
    let h = harness().await;
    scheduled_post(&h.pool, Utc::now() - ChronoDuration::seconds(5)).await;
    let scheduler = Arc::new(Scheduler::polling(
        h.pool.clone(),
        h.delivery.clone(),
        settings(),
    ));
    let composer = Composer::new(
        h.pool.clone(),
        h.sessions.clone(),
        h.delivery.clone(),
        FixedOffset::east_opt(0).unwrap(),
    )
    .with_scheduler(scheduler);

    let reply = composer
        .handle(ADMIN, Input::Command(Command::PublishDue))
        .await;
    assert!(reply.messages[0].contains("published: 1"));

    let without = h
        .composer
        .handle(ADMIN, Input::Command(Command::PublishDue))
        .await;
    assert!(without.messages[0].contains("not available"));
}
