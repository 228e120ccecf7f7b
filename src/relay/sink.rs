use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

use super::TaskUpdate;

/// Where decoded progress ends up. Implementations must tolerate duplicate
/// terminal updates: the relay sends the last event twice on purpose.
#[async_trait]
pub trait ProgressSink: Send + Sync + 'static {
    async fn send(&self, update: &TaskUpdate) -> Result<()>;
}

/// Fans updates out to every connected WebSocket session. Consumers filter
/// by `task_id`; ordering within one task follows delivery order.
#[derive(Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<TaskUpdate>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskUpdate> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl ProgressSink for BroadcastSink {
    async fn send(&self, update: &TaskUpdate) -> Result<()> {
        // nobody listening is not a failure; the registry remains the
        // authoritative record for poll fallback
        if self.sender.receiver_count() == 0 {
            return Ok(());
        }
        self.sender
            .send(update.clone())
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("broadcast send failed: {}", e))
    }
}

/// POSTs every update to a fixed callback URL.
pub struct HttpSink {
    client: reqwest::Client,
    callback_url: String,
}

impl HttpSink {
    pub fn new(callback_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            callback_url,
        }
    }
}

#[async_trait]
impl ProgressSink for HttpSink {
    async fn send(&self, update: &TaskUpdate) -> Result<()> {
        let response = self
            .client
            .post(&self.callback_url)
            .json(update)
            .send()
            .await?;
        response.error_for_status()?;
        Ok(())
    }
}
