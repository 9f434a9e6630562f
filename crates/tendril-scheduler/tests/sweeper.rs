//! Due-task sweeper against the in-memory store and notification manager.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{utc, water_request, TestScheduler};
use tendril_core::Clock;
use tendril_scheduler::{DueSweeper, SweeperConfig, TaskStore};
use tokio_util::sync::CancellationToken;

fn sweeper(scheduler: &TestScheduler) -> DueSweeper {
    let store: Arc<dyn TaskStore> = scheduler.store.clone();
    DueSweeper::new(
        store,
        scheduler.notifications.clone(),
        scheduler.clock.clone() as Arc<dyn Clock>,
        &SweeperConfig {
            enabled: true,
            interval: Duration::from_secs(60),
            lookahead: Duration::from_secs(300),
        },
    )
}

#[tokio::test]
async fn recovery_requeues_overdue_and_upcoming_reminders() {
    let scheduler = TestScheduler::new();
    let task = scheduler
        .service
        .create_schedule(water_request())
        .await
        .unwrap();

    // Simulate a restart that lost the in-memory queue.
    assert_eq!(scheduler.notifications.cancel_task(&task.id), 1);
    scheduler.clock.set(utc(2025, 6, 2, 9, 30));

    let sweeper = sweeper(&scheduler);
    assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    assert_eq!(sweeper.recover().await.unwrap(), 1);

    let queued = scheduler.notifications.queued_jobs(&task.id);
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].occurrence, utc(2025, 6, 2, 9, 0));
}

#[tokio::test]
async fn sweep_enqueues_tasks_due_within_lookahead_once() {
    let scheduler = TestScheduler::new();
    let task = scheduler
        .service
        .create_schedule(water_request())
        .await
        .unwrap();
    scheduler.notifications.cancel_task(&task.id);

    let sweeper = sweeper(&scheduler);

    scheduler.clock.set(utc(2025, 6, 2, 8, 0));
    assert_eq!(sweeper.sweep_once().await.unwrap(), 0);

    scheduler.clock.set(utc(2025, 6, 2, 8, 57));
    assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
    assert_eq!(sweeper.sweep_once().await.unwrap(), 1);

    assert_eq!(scheduler.notifications.queued_jobs(&task.id).len(), 1);
}

#[tokio::test]
async fn inactive_tasks_are_skipped() {
    let scheduler = TestScheduler::new();
    let task = scheduler
        .service
        .create_schedule(water_request())
        .await
        .unwrap();
    scheduler.notifications.cancel_task(&task.id);
    assert!(scheduler.store.set_active(&task.id, false));

    scheduler.clock.set(utc(2025, 6, 2, 10, 0));
    assert_eq!(sweeper(&scheduler).recover().await.unwrap(), 0);
    assert!(scheduler.notifications.queued_jobs(&task.id).is_empty());
}

#[tokio::test(start_paused = true)]
async fn run_recovers_on_start_and_stops_on_cancel() {
    let scheduler = TestScheduler::new();
    let task = scheduler
        .service
        .create_schedule(water_request())
        .await
        .unwrap();
    scheduler.notifications.cancel_task(&task.id);
    scheduler.clock.set(utc(2025, 6, 2, 9, 30));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(sweeper(&scheduler).run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!scheduler.sink.is_empty() || !scheduler.notifications.queued_jobs(&task.id).is_empty());

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("sweeper stops on cancel")
        .unwrap();
}
