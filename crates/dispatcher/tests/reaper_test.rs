mod common;

use std::sync::Arc;
use std::time::Duration;

use common::Harness;
use orchestrator_core::ReaperConfig;
use orchestrator_dispatcher::Reaper;
use orchestrator_domain::{StatusState, TaskState};
use orchestrator_testing_utils::AnalysisTaskBuilder;
use tokio::sync::broadcast;

#[tokio::test]
async fn test_reap_fails_silent_tasks_with_worker_lost() {
    let h = Harness::new();
    let silent = AnalysisTaskBuilder::new()
        .with_target("g1")
        .with_state(TaskState::Progress)
        .with_progress(30)
        .aged(chrono::Duration::minutes(5))
        .build();
    let active = AnalysisTaskBuilder::new()
        .with_target("g2")
        .running()
        .build();
    h.registry.submit(silent.clone()).await.unwrap();
    h.registry.submit(active.clone()).await.unwrap();

    let reaper = Reaper::new(Arc::clone(&h.registry), ReaperConfig::default());
    assert_eq!(reaper.reap_once().await.unwrap(), 1);

    let status = h.registry.get_status(&silent.id).await.unwrap();
    assert_eq!(status.state, StatusState::Failure);
    assert_eq!(status.error.unwrap().code, "WORKER_LOST");
    assert_eq!(
        h.registry.get_status(&active.id).await.unwrap().state,
        StatusState::Progress
    );

    // 槽位已释放，可以重新提交
    assert!(h.registry.find_live("u1", "g1").await.unwrap().is_none());
    assert_eq!(reaper.reap_once().await.unwrap(), 0);
}

#[tokio::test]
async fn test_reap_abandoned_pending_task() {
    let h = Harness::new();
    let abandoned = AnalysisTaskBuilder::new()
        .aged(chrono::Duration::hours(2))
        .build();
    h.registry.submit(abandoned.clone()).await.unwrap();

    let reaper = Reaper::new(Arc::clone(&h.registry), ReaperConfig::default());
    assert_eq!(reaper.detect_stale_tasks().await.unwrap().len(), 1);
    assert_eq!(reaper.reap_once().await.unwrap(), 1);
    assert_eq!(
        h.registry.get_status(&abandoned.id).await.unwrap().state,
        StatusState::Failure
    );
}

#[tokio::test]
async fn test_heartbeat_after_detection_keeps_task_alive() {
    let h = Harness::new();
    let silent = AnalysisTaskBuilder::new()
        .with_target("g1")
        .with_state(TaskState::Progress)
        .with_progress(40)
        .aged(chrono::Duration::minutes(5))
        .build();
    h.registry.submit(silent.clone()).await.unwrap();

    let reaper = Reaper::new(Arc::clone(&h.registry), ReaperConfig::default());
    let stale = reaper.detect_stale_tasks().await.unwrap();
    assert_eq!(stale.len(), 1);

    // Worker在检测之后恢复了心跳
    h.registry.heartbeat(&silent.id).await.unwrap();

    assert_eq!(reaper.reap(stale).await, 0);
    let status = h.registry.get_status(&silent.id).await.unwrap();
    assert_eq!(status.state, StatusState::Progress);
    assert!(status.error.is_none());
    assert!(reaper.detect_stale_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let h = Harness::new();
    let reaper = Reaper::new(
        Arc::clone(&h.registry),
        ReaperConfig {
            scan_interval_seconds: 1,
            ..ReaperConfig::default()
        },
    );
    let (tx, rx) = broadcast::channel(1);

    let handle = tokio::spawn(async move { reaper.run(rx).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}
