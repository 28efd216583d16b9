//! The mention polling loop.

use crate::cursor::MentionCursor;
use crate::dispatcher::{CommandOutcome, Dispatcher};
use chrono::Utc;
use fw_config::CommandConfig;
use fw_core::{ForumClient, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub struct CommandLoop {
    client: Arc<dyn ForumClient>,
    dispatcher: Arc<Dispatcher>,
    cursor: MentionCursor,
    interval: Duration,
    command_timeout: Duration,
}

impl CommandLoop {
    pub fn new(client: Arc<dyn ForumClient>, dispatcher: Arc<Dispatcher>, config: &CommandConfig) -> Self {
        Self {
            client,
            dispatcher,
            cursor: MentionCursor::new(Utc::now(), chrono::Duration::seconds(config.lookback_secs)),
            interval: Duration::from_secs(config.interval_secs),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!("Command loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll().await {
                        Ok(handled) => tracing::debug!(handled, "Command poll finished"),
                        Err(e) => tracing::error!(error = %e, "Command poll failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Command loop stopped");
    }

    /// Fetches mentions and runs every new one, oldest first and one at a
    /// time so later commands see the effects of earlier ones.
    pub async fn poll(&mut self) -> Result<usize> {
        let mentions = self.client.list_mentions().await?;
        let fresh = self.cursor.select(mentions);

        let mut done = Vec::with_capacity(fresh.len());
        let mut retry = Vec::new();

        for mention in fresh {
            match tokio::time::timeout(self.command_timeout, self.dispatcher.dispatch(&mention)).await {
                Ok(CommandOutcome::Retry(_)) => retry.push(mention),
                Ok(_) => done.push(mention),
                Err(_) => {
                    tracing::warn!(forum = %mention.forum, post_id = %mention.post_id, "Command timed out");
                    retry.push(mention);
                }
            }
        }

        self.cursor.commit(&done, &retry);
        Ok(done.len())
    }
}
