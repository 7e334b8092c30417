//! Status fan-out
//!
//! Splits a reference list into bounded chunks and enqueues one downstream
//! status task per chunk, keeping every message under the broker's payload
//! limit. Chunks are independent; no ordering between them is implied.

use crate::queue::{QueueError, TaskMessage, TaskQueue};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Default references per downstream task
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Contiguous sublists of at most `size` items, in order
///
/// The iterator is lazy and can be recreated at will; a `size` of zero is
/// treated as one.
pub fn chunk<T>(items: &[T], size: usize) -> std::slice::Chunks<'_, T> {
    items.chunks(size.max(1))
}

/// Enqueues chunked status updates on one queue
#[derive(Clone)]
pub struct StatusFanout {
    queue: Arc<dyn TaskQueue>,
    queue_name: String,
    chunk_size: usize,
}

impl StatusFanout {
    pub fn new(queue: Arc<dyn TaskQueue>, queue_name: impl Into<String>, chunk_size: usize) -> Self {
        StatusFanout {
            queue,
            queue_name: queue_name.into(),
            chunk_size,
        }
    }

    /// Enqueue `task_name` once per chunk of `references`
    ///
    /// Returns the number of tasks enqueued. An empty list enqueues nothing.
    pub async fn dispatch(&self, task_name: &str, references: &[String]) -> Result<usize, QueueError> {
        let mut sent = 0;
        for part in chunk(references, self.chunk_size) {
            let message = TaskMessage::new(task_name, self.queue_name.as_str(), vec![Value::from(part.to_vec())]);
            self.queue.send_task(message).await?;
            sent += 1;
        }
        debug!(task = task_name, references = references.len(), tasks = sent, "dispatched status updates");
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryTaskQueue;

    fn refs(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("REF{i:05}")).collect()
    }

    #[test]
    fn test_chunk_ten_thousand_by_thousand() {
        let items = refs(10_000);

        let chunks: Vec<&[String]> = chunk(&items, 1000).collect();

        assert_eq!(chunks.len(), 10);
        assert!(chunks.iter().all(|c| c.len() == 1000));
        assert_eq!(chunks.concat(), items);
    }

    #[test]
    fn test_chunk_last_shorter() {
        let items = refs(2500);
        let lens: Vec<usize> = chunk(&items, 1000).map(|c| c.len()).collect();
        assert_eq!(lens, vec![1000, 1000, 500]);
    }

    #[test]
    fn test_chunk_restartable() {
        let items = refs(7);
        let first: Vec<_> = chunk(&items, 3).collect();
        let second: Vec<_> = chunk(&items, 3).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_chunk_empty_and_zero_size() {
        let empty: Vec<String> = Vec::new();
        assert_eq!(chunk(&empty, 1000).count(), 0);
        assert_eq!(chunk(&refs(3), 0).count(), 3);
    }

    #[tokio::test]
    async fn test_dispatch_one_task_per_chunk() {
        let queue = InMemoryTaskQueue::new();
        let fanout = StatusFanout::new(Arc::new(queue.clone()), "notify-internal-tasks", 1000);
        let references = refs(2001);

        let sent = fanout
            .dispatch("update-letter-notifications-to-sent", &references)
            .await
            .unwrap();

        assert_eq!(sent, 3);
        let messages = queue.messages();
        assert!(messages.iter().all(|m| m.queue == "notify-internal-tasks"));
        assert!(messages.iter().all(|m| m.args.len() == 1));

        let mut rebuilt = Vec::new();
        for m in &messages {
            let part: Vec<String> = serde_json::from_value(m.args[0].clone()).unwrap();
            rebuilt.extend(part);
        }
        assert_eq!(rebuilt, references);
    }
}
