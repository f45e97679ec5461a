//! Collects photos that arrive as one album.
//!
//! Each arrival restarts the group's inactivity window. When a window runs
//! out without a newer arrival, the group is removed from the buffer and
//! handed to the handler exactly once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Callback run with a group id and its items once the group is complete.
pub type GroupHandler<T> = Arc<dyn Fn(String, Vec<T>) -> BoxFuture<'static, ()> + Send + Sync>;

struct Pending<T> {
    generation: u64,
    items: Vec<T>,
}

/// Buffer keyed by media-group id.
pub struct MediaGroupBuffer<T> {
    window: Duration,
    groups: Arc<Mutex<HashMap<String, Pending<T>>>>,
    handler: GroupHandler<T>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Send + 'static> MediaGroupBuffer<T> {
    /// Buffer that waits `window` after the last arrival before handling.
    #[must_use]
    pub fn new(window: Duration, handler: GroupHandler<T>) -> Self {
        Self {
            window,
            groups: Arc::new(Mutex::new(HashMap::new())),
            handler,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Add an item to a group and restart its window.
    ///
    /// Must be called from within a tokio runtime.
    pub fn push(&self, group_id: &str, item: T) {
        let generation = {
            let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
            let pending = groups
                .entry(group_id.to_string())
                .or_insert_with(|| Pending { generation: 0, items: Vec::new() });
            pending.generation += 1;
            pending.items.push(item);
            debug!(group_id, count = pending.items.len(), "media group item buffered");
            pending.generation
        };

        let groups = Arc::clone(&self.groups);
        let handler = Arc::clone(&self.handler);
        let window = self.window;
        let key = group_id.to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let items = {
                let mut groups = groups.lock().unwrap_or_else(PoisonError::into_inner);
                match groups.get(&key) {
                    Some(pending) if pending.generation == generation => {
                        groups.remove(&key).map(|p| p.items)
                    }
                    _ => None,
                }
            };
            if let Some(items) = items {
                debug!(group_id = %key, count = items.len(), "media group complete");
                handler(key, items).await;
            }
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    /// Number of groups still collecting.
    #[cfg(test)]
    #[must_use]
    pub fn pending_groups(&self) -> usize {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Wait until every scheduled window has run out and been handled.
    pub async fn settle(&self) {
        loop {
            let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    warn!(error = %e, "media group task failed");
                }
            }
        }
    }
}
