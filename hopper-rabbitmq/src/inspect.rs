//! Non-destructive queue inspection over AMQP.

use lapin::options::{BasicGetOptions, BasicNackOptions};
use lapin::Channel;

use hopper_core::types::payload_preview;
use hopper_core::{HopperError, Result};

use crate::headers;

/// How much payload an inspected message shows.
pub const PREVIEW_LIMIT: usize = 200;

/// Routing metadata and decoded state of one inspected message.
#[derive(Debug, Clone)]
pub struct InspectedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub retry_count: u64,
    pub payload_preview: String,
}

/// Fetch up to `limit` messages without consuming them.
///
/// Each message is rejected-and-requeued immediately after inspection, so the
/// queue's contents are unchanged when this returns (the broker may reorder
/// requeued messages relative to new arrivals).
pub async fn peek(channel: &Channel, queue: &str, limit: usize) -> Result<Vec<InspectedMessage>> {
    let mut seen = Vec::new();

    while seen.len() < limit {
        let Some(message) = channel
            .basic_get(queue, BasicGetOptions { no_ack: false })
            .await
            .map_err(|e| HopperError::Connection(e.to_string()))?
        else {
            break;
        };
        let delivery = message.delivery;

        seen.push(InspectedMessage {
            exchange: delivery.exchange.to_string(),
            routing_key: delivery.routing_key.to_string(),
            redelivered: delivery.redelivered,
            retry_count: headers::retry_count(&delivery.properties),
            payload_preview: payload_preview(&String::from_utf8_lossy(&delivery.data), PREVIEW_LIMIT),
        });

        delivery
            .nack(BasicNackOptions {
                requeue: true,
                ..Default::default()
            })
            .await
            .map_err(|e| HopperError::Connection(e.to_string()))?;
    }

    Ok(seen)
}
