use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notification {
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub is_urgent: bool,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: Notification) -> anyhow::Result<()>;
}

/// Writes notifications to the log. Used when no database is configured.
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn send(&self, notification: Notification) -> anyhow::Result<()> {
        info!(
            user_id = %notification.user_id,
            urgent = notification.is_urgent,
            "{}: {}",
            notification.title,
            notification.message
        );
        Ok(())
    }
}

/// Inserts into the `notifications` table, which clients subscribe to.
pub struct SupabaseNotificationSink {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseNotificationSink {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl NotificationSink for SupabaseNotificationSink {
    async fn send(&self, notification: Notification) -> anyhow::Result<()> {
        let row = serde_json::to_value(&notification)?;
        let _: serde_json::Value = self.supabase.insert("notifications", row).await?;
        Ok(())
    }
}

/// Fire-and-forget delivery. Each notification runs on its own task, and a
/// failed send is logged without touching the state change that caused it.
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    pub fn notify(&self, user_id: Uuid, title: &str, message: &str, is_urgent: bool) {
        let notification = Notification {
            user_id,
            title: title.to_string(),
            message: message.to_string(),
            is_urgent,
        };
        let sink = self.sink.clone();

        tokio::spawn(async move {
            let recipient = notification.user_id;
            match sink.send(notification).await {
                Ok(()) => debug!("Notification delivered to {}", recipient),
                Err(e) => warn!("Failed to notify {}: {}", recipient, e),
            }
        });
    }

    pub fn notify_all(&self, recipients: &[Uuid], title: &str, message: &str, is_urgent: bool) {
        for recipient in recipients {
            self.notify(*recipient, title, message, is_urgent);
        }
    }
}
