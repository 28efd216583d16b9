//! Temporarily hidden threads and their return.

use fw_config::BusyHours;
use fw_core::{ContentId, ForumClient, RecordStore, Result, WardenError};
use std::sync::Arc;

pub struct RestoreSchedule {
    client: Arc<dyn ForumClient>,
    store: Arc<dyn RecordStore>,
}

impl RestoreSchedule {
    pub fn new(client: Arc<dyn ForumClient>, store: Arc<dyn RecordStore>) -> Self {
        Self { client, store }
    }

    /// Hides a thread and queues it for restoration. The queue entry is
    /// written first so a hidden thread is never forgotten.
    pub async fn hide_temporarily(&self, forum: &str, thread_id: ContentId) -> Result<bool> {
        self.store.add_pending(forum, thread_id).await?;
        let hidden = self.client.hide_thread(forum, thread_id).await?;
        if !hidden {
            self.store.remove_pending(forum, thread_id).await?;
        }
        Ok(hidden)
    }

    /// Restores queued threads unless the forum is inside its busy window.
    /// Forums without a window only restore on request.
    pub async fn restore_due(&self, forum: &str, busy: Option<BusyHours>, hour: u8) -> Result<usize> {
        match busy {
            Some(window) if !window.contains(hour) => self.restore_all(forum).await,
            _ => Ok(0),
        }
    }

    /// Unhides every queued thread, dropping each entry once the forum has
    /// accepted or refused the unhide.
    pub async fn restore_all(&self, forum: &str) -> Result<usize> {
        let pending = self.store.pending_restores(forum).await?;
        let mut restored = 0;

        for thread_id in pending {
            match self.client.unhide_thread(forum, thread_id).await {
                Ok(true) => {
                    self.store.remove_pending(forum, thread_id).await?;
                    restored += 1;
                    tracing::info!(forum, thread_id = %thread_id, "Restored hidden thread");
                }
                Ok(false) => {
                    tracing::warn!(forum, thread_id = %thread_id, "Unhide not applied, keeping in queue");
                }
                Err(WardenError::ActionRejected(reason)) => {
                    tracing::warn!(forum, thread_id = %thread_id, %reason, "Unhide rejected, dropping from queue");
                    self.store.remove_pending(forum, thread_id).await?;
                }
                Err(e) => {
                    tracing::warn!(forum, thread_id = %thread_id, error = %e, "Unhide failed");
                }
            }
        }

        Ok(restored)
    }
}
