use std::sync::Arc;

use async_trait::async_trait;
use poise::serenity_prelude::{ChannelId, CreateMessage, Http};

use crate::services::report::Reporter;

/// Posts player messages into the text channel a command came from.
pub struct ChannelReporter {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl ChannelReporter {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self { http, channel_id }
    }
}

#[async_trait]
impl Reporter for ChannelReporter {
    async fn say(&self, text: String) {
        let message = CreateMessage::new().content(text);
        if let Err(e) = self.channel_id.send_message(&self.http, message).await {
            tracing::warn!("Failed to send message to {}: {e}", self.channel_id);
        }
    }
}
