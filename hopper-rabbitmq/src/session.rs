//! One broker connection/channel per operator run.

use lapin::{Channel, Connection, ConnectionProperties};
use tracing::info;

use hopper_core::{BrokerConfig, HopperError, Result};

/// A connection plus its single channel, held for the duration of a run.
///
/// Dropping the session releases the connection on every exit path; `close`
/// exists for the polite shutdown at the end of a successful run.
pub struct BrokerSession {
    conn: Connection,
    channel: Channel,
}

impl BrokerSession {
    pub async fn open(config: &BrokerConfig) -> Result<Self> {
        let uri = config.amqp_uri();
        let conn = Connection::connect(&uri, ConnectionProperties::default())
            .await
            .map_err(|e| HopperError::Connection(e.to_string()))?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| HopperError::Connection(e.to_string()))?;

        info!(host = %config.host, port = config.port, vhost = %config.vhost, "connected to broker");
        Ok(Self { conn, channel })
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Open an additional channel on the same connection. Batch topology setup
    /// uses one channel per queue so a conflict on one queue does not poison
    /// the channel the rest of the batch runs on.
    pub async fn extra_channel(&self) -> Result<Channel> {
        self.conn
            .create_channel()
            .await
            .map_err(|e| HopperError::Connection(e.to_string()))
    }

    pub async fn close(self) -> Result<()> {
        self.conn
            .close(200, "bye")
            .await
            .map_err(|e| HopperError::Connection(e.to_string()))
    }
}
