//! Three-band priority queue with FIFO order inside each band

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

use crate::task::{Task, TaskPriority};

/// Queue depth snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Tasks waiting in the high band
    pub high: usize,
    /// Tasks waiting in the normal band
    pub normal: usize,
    /// Tasks waiting in the low band
    pub low: usize,
    /// Total queued tasks
    pub total: usize,
}

/// The band a priority maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    High,
    Normal,
    Low,
}

fn band_for(priority: TaskPriority) -> Band {
    if priority >= TaskPriority::High {
        Band::High
    } else if priority == TaskPriority::Normal {
        Band::Normal
    } else {
        Band::Low
    }
}

/// Priority queue of task ids
///
/// Higher bands preempt lower ones indefinitely: there is no aging, so
/// low-priority tasks can starve under sustained high-priority pressure.
/// Safe for many producers and consumers.
pub struct TaskQueue {
    bands: Mutex<Bands>,
}

#[derive(Default)]
struct Bands {
    high: VecDeque<Uuid>,
    normal: VecDeque<Uuid>,
    low: VecDeque<Uuid>,
}

impl TaskQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            bands: Mutex::new(Bands::default()),
        }
    }

    /// Enqueue a task according to its priority
    pub fn add_task(&self, task: &Task) {
        self.add_id(task.id, task.priority);
    }

    /// Enqueue a task id with an explicit priority
    pub fn add_id(&self, id: Uuid, priority: TaskPriority) {
        let mut bands = self.bands.lock().unwrap();
        match band_for(priority) {
            Band::High => bands.high.push_back(id),
            Band::Normal => bands.normal.push_back(id),
            Band::Low => bands.low.push_back(id),
        }
    }

    /// Dequeue the next task id: high before normal before low, FIFO within
    pub fn next_task(&self) -> Option<Uuid> {
        let mut bands = self.bands.lock().unwrap();
        bands
            .high
            .pop_front()
            .or_else(|| bands.normal.pop_front())
            .or_else(|| bands.low.pop_front())
    }

    /// Current queue depths
    pub fn stats(&self) -> QueueStats {
        let bands = self.bands.lock().unwrap();
        QueueStats {
            high: bands.high.len(),
            normal: bands.normal.len(),
            low: bands.low.len(),
            total: bands.high.len() + bands.normal.len() + bands.low.len(),
        }
    }

    /// Whether no tasks are queued
    pub fn is_empty(&self) -> bool {
        self.stats().total == 0
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Criticality, TaskType};
    use std::collections::HashMap;

    fn task(priority: TaskPriority) -> Task {
        Task::new(
            TaskType::Testing,
            HashMap::new(),
            priority,
            Criticality::Normal,
            vec![],
        )
    }

    #[test]
    fn test_priority_band_drain_order() {
        let queue = TaskQueue::new();
        let t1 = task(TaskPriority::Low);
        let t2 = task(TaskPriority::Critical);
        let t3 = task(TaskPriority::Normal);
        let t4 = task(TaskPriority::High);

        for t in [&t1, &t2, &t3, &t4] {
            queue.add_task(t);
        }

        // Critical and High share the high band, FIFO between them
        assert_eq!(queue.next_task(), Some(t2.id));
        assert_eq!(queue.next_task(), Some(t4.id));
        assert_eq!(queue.next_task(), Some(t3.id));
        assert_eq!(queue.next_task(), Some(t1.id));
        assert_eq!(queue.next_task(), None);
    }

    #[test]
    fn test_fifo_within_band() {
        let queue = TaskQueue::new();
        let first = task(TaskPriority::Normal);
        let second = task(TaskPriority::Normal);
        let third = task(TaskPriority::Normal);

        queue.add_task(&first);
        queue.add_task(&second);
        queue.add_task(&third);

        assert_eq!(queue.next_task(), Some(first.id));
        assert_eq!(queue.next_task(), Some(second.id));
        assert_eq!(queue.next_task(), Some(third.id));
    }

    #[test]
    fn test_stats_track_bands() {
        let queue = TaskQueue::new();
        queue.add_task(&task(TaskPriority::Critical));
        queue.add_task(&task(TaskPriority::High));
        queue.add_task(&task(TaskPriority::Normal));
        queue.add_task(&task(TaskPriority::Low));
        queue.add_task(&task(TaskPriority::Low));

        let stats = queue.stats();
        assert_eq!(stats.high, 2);
        assert_eq!(stats.normal, 1);
        assert_eq!(stats.low, 2);
        assert_eq!(stats.total, 5);

        queue.next_task();
        assert_eq!(queue.stats().high, 1);
    }

    #[test]
    fn test_empty_queue() {
        let queue = TaskQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.next_task(), None);
    }

    #[test]
    fn test_concurrent_producers() {
        use std::sync::Arc;

        let queue = Arc::new(TaskQueue::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = queue.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    queue.add_id(Uuid::new_v4(), TaskPriority::Normal);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.stats().total, 800);
    }
}
