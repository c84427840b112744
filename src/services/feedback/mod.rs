use crate::config::FeedbackConfig;
use crate::error::{RecError, Result};
use crate::services::preference::PreferenceService;
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Producer side of the asynchronous preference feedback loop.
#[derive(Debug, Clone)]
pub struct FeedbackQueue {
    tx: mpsc::Sender<Uuid>,
}

impl FeedbackQueue {
    pub fn channel(config: &FeedbackConfig) -> (Self, mpsc::Receiver<Uuid>) {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        (Self { tx }, rx)
    }

    /// Schedules a preference recompute for `user_id`. Never waits for room.
    pub fn submit(&self, user_id: Uuid) -> Result<()> {
        self.tx.try_send(user_id).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RecError::dependency("feedback queue", "queue is full"),
            mpsc::error::TrySendError::Closed(_) => RecError::dependency("feedback queue", "worker stopped"),
        })
    }
}

pub fn spawn_feedback_worker(
    rx: mpsc::Receiver<Uuid>,
    preferences: Arc<PreferenceService>,
    config: FeedbackConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        feedback_worker(rx, preferences, config).await;
    })
}

/// Batches user ids, de-duplicates them and recomputes each user's
/// preference once per flush. Runs until every sender is dropped.
pub async fn feedback_worker(
    mut rx: mpsc::Receiver<Uuid>,
    preferences: Arc<PreferenceService>,
    config: FeedbackConfig,
) {
    let mut batch = BTreeSet::new();
    let flush_interval = Duration::from_millis(config.flush_interval_ms.max(1));
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            user_id = rx.recv() => {
                match user_id {
                    Some(user_id) => {
                        batch.insert(user_id);
                        if batch.len() >= config.batch_size.max(1) {
                            process_feedback_batch(&preferences, std::mem::take(&mut batch), config.concurrency).await;
                        }
                    }
                    None => {
                        warn!("Feedback channel closed");
                        process_feedback_batch(&preferences, std::mem::take(&mut batch), config.concurrency).await;
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    process_feedback_batch(&preferences, std::mem::take(&mut batch), config.concurrency).await;
                }
            }
        }
    }
}

async fn process_feedback_batch(preferences: &PreferenceService, users: BTreeSet<Uuid>, concurrency: usize) -> usize {
    if users.is_empty() {
        return 0;
    }

    let batch_size = users.len();
    let updated = stream::iter(users)
        .map(|user_id| async move {
            match preferences.update_user_embedding(user_id).await {
                Ok(updated) => updated,
                Err(e) => {
                    error!("Failed to update preference for user {}: {}", user_id, e);
                    false
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .filter(|updated| futures::future::ready(*updated))
        .count()
        .await;

    info!("Processed feedback batch: {} users, {} updated", batch_size, updated);
    updated
}
