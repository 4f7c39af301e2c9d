//! End-to-end scheduling scenarios across queue, dependencies and retries

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use task_manager::{
    Agent, AgentPool, Criticality, MemoryCache, TaskManager, TaskPriority, TaskStatus, TaskType,
};

fn pool_with_builder() -> Arc<AgentPool> {
    let pool = Arc::new(AgentPool::new());
    pool.register(Agent::new(
        "builder-1",
        "builder",
        ["compilation", "build_tools"],
        4,
    ))
    .unwrap();
    pool
}

#[tokio::test]
async fn poll_order_follows_priority_bands_then_fifo() {
    let manager = TaskManager::new(pool_with_builder());

    let t1 = manager
        .create_task(
            TaskType::Building,
            HashMap::new(),
            TaskPriority::Low,
            Criticality::Normal,
            vec![],
        )
        .await
        .unwrap();
    let t2 = manager
        .create_task(
            TaskType::Building,
            HashMap::new(),
            TaskPriority::Critical,
            Criticality::Critical,
            vec![],
        )
        .await
        .unwrap();
    let t3 = manager
        .create_task(
            TaskType::Building,
            HashMap::new(),
            TaskPriority::Normal,
            Criticality::Normal,
            vec![],
        )
        .await
        .unwrap();
    let t4 = manager
        .create_task(
            TaskType::Building,
            HashMap::new(),
            TaskPriority::High,
            Criticality::High,
            vec![],
        )
        .await
        .unwrap();

    // Submitted T1(low), T2(critical), T3(normal), T4(high):
    // drain order is T2, T4, T3, T1
    let order: Vec<_> = std::iter::from_fn(|| manager.next_ready_task())
        .map(|t| t.id)
        .collect();
    assert_eq!(order, vec![t2.id, t4.id, t3.id, t1.id]);
}

#[tokio::test]
async fn dependent_task_becomes_eligible_after_completion() {
    let manager = TaskManager::new(pool_with_builder());

    let upstream = manager
        .create_task(
            TaskType::Building,
            HashMap::new(),
            TaskPriority::Normal,
            Criticality::Normal,
            vec![],
        )
        .await
        .unwrap();
    let downstream = manager
        .create_task(
            TaskType::Building,
            HashMap::new(),
            TaskPriority::Critical,
            Criticality::Normal,
            vec![upstream.id],
        )
        .await
        .unwrap();

    // Downstream outranks upstream but stays blocked until it completes
    assert_eq!(manager.next_ready_task().unwrap().id, upstream.id);
    assert!(manager.next_ready_task().is_none());

    manager.assign_task(upstream.id, "builder-1").await.unwrap();
    manager.start_task(upstream.id).await.unwrap();
    manager.complete_task(upstream.id, json!(null)).await.unwrap();

    assert_eq!(manager.next_ready_task().unwrap().id, downstream.id);
}

#[tokio::test]
async fn full_retry_cycle_with_cached_manager() {
    let manager = TaskManager::with_cache(pool_with_builder(), Arc::new(MemoryCache::new()));

    let task = manager
        .create_task(
            TaskType::Building,
            HashMap::new(),
            TaskPriority::Normal,
            Criticality::Normal,
            vec![],
        )
        .await
        .unwrap();

    manager.next_ready_task().unwrap();
    for _ in 0..3 {
        manager.assign_task(task.id, "builder-1").await.unwrap();
        manager.fail_task(task.id, "transient").await.unwrap();
        manager.next_ready_task().unwrap();
    }

    manager.assign_task(task.id, "builder-1").await.unwrap();
    manager.fail_task(task.id, "fatal").await.unwrap();

    let record = manager.get_task(task.id).await.unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(record.retry_count, 3);
    assert_eq!(record.error_message.as_deref(), Some("fatal"));

    // Invariant: a released agent holds no phantom tasks
    assert_eq!(
        manager.agents().get("builder-1").unwrap().current_task_count,
        0
    );
}

#[tokio::test]
async fn stats_reflect_lifecycle() {
    let manager = TaskManager::new(pool_with_builder());

    let t1 = manager
        .create_task(
            TaskType::Building,
            HashMap::new(),
            TaskPriority::Normal,
            Criticality::Normal,
            vec![],
        )
        .await
        .unwrap();
    manager
        .create_task(
            TaskType::Testing,
            HashMap::new(),
            TaskPriority::Low,
            Criticality::Low,
            vec![],
        )
        .await
        .unwrap();

    manager.assign_task(t1.id, "builder-1").await.unwrap();
    manager.start_task(t1.id).await.unwrap();

    let stats = manager.task_stats().await;
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["running"], 1);
    assert_eq!(stats["pending"], 1);

    let queue = manager.queue_stats();
    assert_eq!(queue.total, 2);
}
