//! Task-queue boundary
//!
//! The courier only needs "enqueue named task with arguments on queue Q".
//! The broker itself lives elsewhere; `TaskQueue` is the seam.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::Write;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// A named task invocation with positional JSON arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub name: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    pub queue: String,
    /// Zero for the first execution, incremented by every retry
    #[serde(default)]
    pub attempt: u32,
    /// Delay before the task becomes runnable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub countdown_secs: Option<u64>,
}

impl TaskMessage {
    pub fn new(name: impl Into<String>, queue: impl Into<String>, args: Vec<serde_json::Value>) -> Self {
        TaskMessage {
            name: name.into(),
            args,
            queue: queue.into(),
            attempt: 0,
            countdown_secs: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to encode task {name}: {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to enqueue task {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Producer side of the task queue
pub trait TaskQueue: Send + Sync + 'static {
    fn send_task<'a>(
        &'a self,
        message: TaskMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + 'a>>;
}

/// Records every message in memory (for tests and DST)
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskQueue {
    sent: Arc<Mutex<Vec<TaskMessage>>>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<TaskMessage> {
        self.sent.lock().clone()
    }

    pub fn named(&self, name: &str) -> Vec<TaskMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.name == name)
            .cloned()
            .collect()
    }

    /// Remove and return everything sent so far
    pub fn drain(&self) -> Vec<TaskMessage> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl TaskQueue for InMemoryTaskQueue {
    fn send_task<'a>(
        &'a self,
        message: TaskMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + 'a>> {
        Box::pin(async move {
            self.sent.lock().push(message);
            Ok(())
        })
    }
}

/// Writes each message as one JSON line
pub struct JsonLinesTaskQueue<W: Write + Send + 'static> {
    out: Mutex<W>,
}

impl<W: Write + Send + 'static> JsonLinesTaskQueue<W> {
    pub fn new(out: W) -> Self {
        JsonLinesTaskQueue {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send + 'static> TaskQueue for JsonLinesTaskQueue<W> {
    fn send_task<'a>(
        &'a self,
        message: TaskMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + 'a>> {
        Box::pin(async move {
            let mut line = serde_json::to_vec(&message).map_err(|source| QueueError::Encode {
                name: message.name.clone(),
                source,
            })?;
            line.push(b'\n');

            let mut out = self.out.lock();
            out.write_all(&line)
                .and_then(|_| out.flush())
                .map_err(|source| QueueError::Io {
                    name: message.name.clone(),
                    source,
                })
        })
    }
}
