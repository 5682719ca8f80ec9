use std::sync::Arc;

use async_trait::async_trait;
use serenity::all::{CreateMessage, Http, UserId};
use stock::{Error, Notifier};
use tracing::debug;

/// Sends alerts as direct messages through the bot's HTTP client.
pub struct DiscordNotifier {
    http: Arc<Http>,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, user_id: &str, message: &str) -> stock::Result<()> {
        let id = parse_user_id(user_id)?;

        let channel = id
            .create_dm_channel(&self.http)
            .await
            .map_err(|e| Error::Notify(format!("open dm with {user_id}: {e}")))?;

        channel
            .send_message(&self.http, CreateMessage::new().content(message))
            .await
            .map_err(|e| Error::Notify(format!("send dm to {user_id}: {e}")))?;

        debug!(user_id, "alert dm sent");
        Ok(())
    }
}

fn parse_user_id(raw: &str) -> stock::Result<UserId> {
    match raw.parse::<u64>() {
        Ok(id) if id != 0 => Ok(UserId::new(id)),
        _ => Err(Error::Notify(format!("invalid user id {raw:?}"))),
    }
}
