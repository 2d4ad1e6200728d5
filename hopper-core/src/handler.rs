use crate::error::HopperError;
use async_trait::async_trait;

/// Business logic invoked per delivered message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, routing_key: &str, body: &[u8]) -> Result<(), HopperError>;
}
