use async_trait::async_trait;

/// Discord's per-message character limit.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Somewhere user-visible messages for a guild end up.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn say(&self, text: String);
}

/// Returns `full` unless it is over the message limit, in which case `summary`.
pub fn fit_message(full: String, summary: impl FnOnce() -> String) -> String {
    if full.chars().count() > MAX_MESSAGE_LEN {
        summary()
    } else {
        full
    }
}
