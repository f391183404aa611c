use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use vigil_engine::queue::{TaskOutcome, TaskQueue, TaskState};

fn queue_in(dir: &TempDir) -> TaskQueue {
    TaskQueue::open(&dir.path().join("queue.json"), 3, 1).unwrap()
}

#[tokio::test]
async fn test_tasks_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.json");

    let queue = TaskQueue::open(&path, 3, 1).unwrap();
    let id = queue
        .enqueue("detect_impact", json!({"path": "src/main.rs"}), 0)
        .await
        .unwrap();
    drop(queue);

    let reopened = TaskQueue::open(&path, 3, 1).unwrap();
    let task = reopened.get(&id).await.unwrap();
    assert_eq!(task.state, TaskState::Pending);
    assert_eq!(task.kind, "detect_impact");
}

#[tokio::test]
async fn test_leased_tasks_return_to_pending_on_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.json");

    let queue = TaskQueue::open(&path, 3, 1).unwrap();
    let id = queue
        .enqueue("analyze_context", json!({"path": "a.rs"}), 0)
        .await
        .unwrap();
    let leased = queue
        .lease("w0", Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(leased.id, id);
    queue.mark_running(&id).await.unwrap();
    drop(queue);

    // Simulates a crash mid-task: the restarted engine must offer the
    // task again.
    let reopened = TaskQueue::open(&path, 3, 1).unwrap();
    let task = reopened.get(&id).await.unwrap();
    assert_eq!(task.state, TaskState::Pending);

    let again = reopened
        .lease("w1", Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.id, id);
    assert_eq!(again.attempts, 2);
}

#[tokio::test]
async fn test_priority_then_age_ordering() {
    let dir = TempDir::new().unwrap();
    let queue = queue_in(&dir);

    let low_old = queue.enqueue("analyze_context", json!({}), 1).await.unwrap();
    let high = queue.enqueue("detect_impact", json!({}), 0).await.unwrap();
    let low_new = queue.enqueue("analyze_context", json!({}), 1).await.unwrap();

    let first = queue.lease("w", Duration::from_secs(60)).await.unwrap().unwrap();
    let second = queue.lease("w", Duration::from_secs(60)).await.unwrap().unwrap();
    let third = queue.lease("w", Duration::from_secs(60)).await.unwrap().unwrap();

    assert_eq!(first.id, high);
    assert_eq!(second.id, low_old);
    assert_eq!(third.id, low_new);
}

#[tokio::test]
async fn test_retry_exhaustion_fails_task() {
    let dir = TempDir::new().unwrap();
    let queue = TaskQueue::open(&dir.path().join("queue.json"), 2, 0).unwrap();

    let id = queue.enqueue("detect_impact", json!({}), 0).await.unwrap();

    queue.lease("w", Duration::from_secs(60)).await.unwrap().unwrap();
    queue.complete(&id, TaskOutcome::Retry).await.unwrap();
    assert_eq!(queue.get(&id).await.unwrap().state, TaskState::Retrying);

    queue.lease("w", Duration::from_secs(60)).await.unwrap().unwrap();
    queue.complete(&id, TaskOutcome::Retry).await.unwrap();

    let task = queue.get(&id).await.unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.attempts, 2);
}

#[tokio::test]
async fn test_fatal_outcome_fails_immediately() {
    let dir = TempDir::new().unwrap();
    let queue = queue_in(&dir);

    let id = queue.enqueue("detect_impact", json!({}), 0).await.unwrap();
    queue.lease("w", Duration::from_secs(60)).await.unwrap().unwrap();
    queue.complete(&id, TaskOutcome::Fatal).await.unwrap();

    let task = queue.get(&id).await.unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.attempts, 1);
}

#[tokio::test]
async fn test_expired_lease_is_reclaimed_and_released() {
    let dir = TempDir::new().unwrap();
    let queue = TaskQueue::open(&dir.path().join("queue.json"), 3, 0).unwrap();

    let id = queue.enqueue("detect_impact", json!({}), 0).await.unwrap();
    queue
        .lease("w0", Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    let reaped = queue.reap_expired().await.unwrap();
    assert_eq!(reaped, vec![id.clone()]);

    let again = queue
        .lease("w1", Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.id, id);
    assert_eq!(again.leased_by.as_deref(), Some("w1"));
}

#[tokio::test]
async fn test_corrupt_state_file_starts_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.json");
    std::fs::write(&path, "{ not json").unwrap();

    let queue = TaskQueue::open(&path, 3, 1).unwrap();
    let stats = queue.stats().await;
    assert_eq!(stats.pending, 0);

    // New work still persists over the corrupt file.
    queue.enqueue("detect_impact", json!({}), 0).await.unwrap();
    drop(queue);
    let reopened = TaskQueue::open(&path, 3, 1).unwrap();
    assert_eq!(reopened.stats().await.pending, 1);
}

#[tokio::test]
async fn test_stats_from_file_matches_live_stats() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.json");
    let queue = TaskQueue::open(&path, 3, 1).unwrap();

    let id = queue.enqueue("detect_impact", json!({}), 0).await.unwrap();
    queue.enqueue("analyze_context", json!({}), 1).await.unwrap();
    queue.lease("w", Duration::from_secs(60)).await.unwrap().unwrap();
    queue.complete(&id, TaskOutcome::Success).await.unwrap();

    let from_file = TaskQueue::stats_from_file(&path).unwrap();
    assert_eq!(from_file.succeeded, 1);
    assert_eq!(from_file.pending, 1);
}
