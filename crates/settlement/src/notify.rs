//! Bounded background delivery of user and report notifications.
//!
//! Settlement never waits on the bot API: notices are pushed onto a bounded
//! queue and delivered by a single worker task. Delivery is best effort.

use crate::error::SettlementError;
use async_trait::async_trait;
use bot_client::BotClient;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Something to tell a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Message { chat_id: i64, text: String },
    DeleteMessage { chat_id: i64, message_id: i64 },
}

impl Notice {
    pub fn message(chat_id: i64, text: impl Into<String>) -> Self {
        Notice::Message {
            chat_id,
            text: text.into(),
        }
    }
}

/// Delivers a single notice.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notice: &Notice) -> Result<(), SettlementError>;
}

#[async_trait]
impl Notifier for BotClient {
    async fn deliver(&self, notice: &Notice) -> Result<(), SettlementError> {
        let result = match notice {
            Notice::Message { chat_id, text } => self.send_message(*chat_id, text).await.map(|_| ()),
            Notice::DeleteMessage {
                chat_id,
                message_id,
            } => self.delete_message(*chat_id, *message_id).await,
        };
        result.map_err(|e| SettlementError::Notification(e.to_string()))
    }
}

/// Producer side of the queue. Cheap to clone.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<Notice>,
}

/// Owner of the worker task.
///
/// Dropping the handle without calling [`QueueHandle::shutdown`] also stops
/// the worker after it drains.
pub struct QueueHandle {
    shutdown: oneshot::Sender<()>,
    worker: JoinHandle<usize>,
}

impl NotificationQueue {
    /// Start the worker. Must be called inside a tokio runtime.
    pub fn spawn(notifier: Arc<dyn Notifier>, capacity: usize) -> (Self, QueueHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let worker = tokio::spawn(run_worker(notifier, rx, shutdown_rx));

        (
            Self { tx },
            QueueHandle {
                shutdown: shutdown_tx,
                worker,
            },
        )
    }

    /// Queue a notice without waiting. Returns `false` if it was dropped.
    pub fn enqueue(&self, notice: Notice) -> bool {
        match self.tx.try_send(notice) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(notice)) => {
                warn!(?notice, "Notification queue full, dropping notice");
                false
            }
            Err(mpsc::error::TrySendError::Closed(notice)) => {
                warn!(?notice, "Notification queue closed, dropping notice");
                false
            }
        }
    }
}

impl QueueHandle {
    /// Stop accepting notices, deliver everything already queued, and return
    /// how many notices the worker delivered over its lifetime.
    pub async fn shutdown(self) -> usize {
        let _ = self.shutdown.send(());
        match self.worker.await {
            Ok(delivered) => {
                info!(delivered, "Notification queue drained");
                delivered
            }
            Err(e) => {
                error!("Notification worker failed: {}", e);
                0
            }
        }
    }
}

async fn run_worker(
    notifier: Arc<dyn Notifier>,
    mut rx: mpsc::Receiver<Notice>,
    mut shutdown: oneshot::Receiver<()>,
) -> usize {
    let mut delivered = 0;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            next = rx.recv() => match next {
                Some(notice) => delivered += deliver(notifier.as_ref(), &notice).await,
                None => return delivered,
            },
        }
    }

    rx.close();
    while let Some(notice) = rx.recv().await {
        delivered += deliver(notifier.as_ref(), &notice).await;
    }
    delivered
}

async fn deliver(notifier: &dyn Notifier, notice: &Notice) -> usize {
    match notifier.deliver(notice).await {
        Ok(()) => {
            debug!(?notice, "Notice delivered");
            1
        }
        Err(e) => {
            warn!(?notice, "Failed to deliver notice: {}", e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_drains_queued_notices() {
        let mut notifier = MockNotifier::new();
        notifier.expect_deliver().times(3).returning(|_| Ok(()));

        let (queue, handle) = NotificationQueue::spawn(Arc::new(notifier), 8);
        for i in 0..3 {
            assert!(queue.enqueue(Notice::message(i, "hello")));
        }

        assert_eq!(handle.shutdown().await, 3);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_not_counted() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_deliver()
            .withf(|notice| matches!(notice, Notice::DeleteMessage { .. }))
            .times(1)
            .returning(|_| Err(SettlementError::Notification("message not found".into())));
        notifier
            .expect_deliver()
            .withf(|notice| matches!(notice, Notice::Message { .. }))
            .times(1)
            .returning(|_| Ok(()));

        let (queue, handle) = NotificationQueue::spawn(Arc::new(notifier), 8);
        queue.enqueue(Notice::DeleteMessage {
            chat_id: 1,
            message_id: 7,
        });
        queue.enqueue(Notice::message(1, "done"));

        assert_eq!(handle.shutdown().await, 1);
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_is_dropped() {
        let mut notifier = MockNotifier::new();
        notifier.expect_deliver().never();

        let (queue, handle) = NotificationQueue::spawn(Arc::new(notifier), 1);
        assert_eq!(handle.shutdown().await, 0);
        assert!(!queue.enqueue(Notice::message(1, "late")));
    }
}
