//! Idempotent construction of the retry pipeline's broker objects.
//!
//! Declaring an object that already exists with identical arguments is a
//! broker-side no-op. Declaring it with different arguments fails the channel
//! with `precondition-failed`, which surfaces here as a `TopologyConflict`.

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, ExchangeKind};
use tracing::info;

use hopper_core::{naming, HopperError, Result, RetryConfig};

/// PRECONDITION_FAILED, the code the broker replies with on an argument
/// mismatch against an existing object.
const PRECONDITION_FAILED: u16 = 406;

/// Which of the two supported wirings to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyStyle {
    /// DLQ + fanout retry exchange; rejected messages go straight to the DLQ.
    Simple,
    /// Adds a wait stage: wait exchange -> wait queue (TTL) -> retry exchange.
    DelayedRetry,
}

pub struct TopologyBuilder<'a> {
    channel: &'a Channel,
    retry: &'a RetryConfig,
}

impl<'a> TopologyBuilder<'a> {
    pub fn new(channel: &'a Channel, retry: &'a RetryConfig) -> Self {
        Self { channel, retry }
    }

    /// Declare and wire every object the style needs, except the main queue.
    ///
    /// The main queue is left alone: redeclaring a live queue with different
    /// arguments is destructive and stays an explicit operator step
    /// ([`TopologyBuilder::recreate_main_queue`]).
    pub async fn ensure(&self, queue: &str, style: TopologyStyle) -> Result<()> {
        let dlq = naming::dlq_queue(queue);
        let retry_exchange = naming::retry_exchange(queue);

        match style {
            TopologyStyle::Simple => {
                self.declare_exchange(&retry_exchange, ExchangeKind::Fanout)
                    .await?;
            }
            TopologyStyle::DelayedRetry => {
                let wait_exchange = naming::wait_exchange(queue);
                let wait_queue = naming::wait_queue(queue);

                self.declare_exchange(&wait_exchange, ExchangeKind::Fanout)
                    .await?;
                // Routing by message metadata is reserved for later; the DLQ
                // binding below is a catch-all.
                self.declare_exchange(&retry_exchange, ExchangeKind::Headers)
                    .await?;
                self.declare_queue(
                    &wait_queue,
                    wait_queue_args(&retry_exchange, self.retry.wait_delay_ms),
                )
                .await?;
                self.bind(&wait_queue, &wait_exchange).await?;
            }
        }

        self.declare_queue(&dlq, dlq_queue_args(self.retry.dlq_message_ttl_ms))
            .await?;
        self.bind(&dlq, &retry_exchange).await?;

        info!(queue, ?style, "retry topology in place");
        Ok(())
    }

    /// Declare the main queue with its dead-letter-exchange argument.
    ///
    /// Only valid after the operator has drained and deleted the old queue
    /// out-of-band; the broker forbids changing queue arguments in place.
    pub async fn recreate_main_queue(&self, queue: &str, style: TopologyStyle) -> Result<()> {
        // The simple wiring has no wait stage, so the main queue itself
        // carries the message TTL that expires stale work into the DLX.
        let (dead_letter_exchange, message_ttl_ms) = match style {
            TopologyStyle::Simple => (
                naming::retry_exchange(queue),
                Some(self.retry.message_ttl_ms),
            ),
            TopologyStyle::DelayedRetry => (naming::wait_exchange(queue), None),
        };
        self.declare_queue(queue, main_queue_args(&dead_letter_exchange, message_ttl_ms))
            .await?;
        info!(queue, dlx = %dead_letter_exchange, "main queue recreated with dead-letter routing");
        Ok(())
    }

    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<()> {
        self.channel
            .exchange_declare(
                name,
                kind,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| declare_error(name, e))
    }

    async fn declare_queue(&self, name: &str, args: FieldTable) -> Result<()> {
        self.channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                args,
            )
            .await
            .map(|_| ())
            .map_err(|e| declare_error(name, e))
    }

    async fn bind(&self, queue: &str, exchange: &str) -> Result<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| declare_error(queue, e))
    }
}

/// Arguments for the dead-letter queue itself.
pub fn dlq_queue_args(dlq_ttl_ms: u64) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-message-ttl".into(),
        AMQPValue::LongLongInt(dlq_ttl_ms as i64),
    );
    args.insert("x-queue-type".into(), AMQPValue::LongString("classic".into()));
    args
}

/// Arguments for the wait queue: park for `delay_ms`, then dead-letter into
/// the retry exchange.
pub fn wait_queue_args(retry_exchange: &str, delay_ms: u64) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-message-ttl".into(),
        AMQPValue::LongLongInt(delay_ms as i64),
    );
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(retry_exchange.into()),
    );
    args.insert("x-queue-type".into(), AMQPValue::LongString("classic".into()));
    args
}

/// Arguments for a recreated main queue.
pub fn main_queue_args(dead_letter_exchange: &str, message_ttl_ms: Option<u64>) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(dead_letter_exchange.into()),
    );
    if let Some(ttl) = message_ttl_ms {
        args.insert("x-message-ttl".into(), AMQPValue::LongLongInt(ttl as i64));
    }
    args.insert("x-queue-type".into(), AMQPValue::LongString("quorum".into()));
    args
}

fn declare_error(object: &str, err: lapin::Error) -> HopperError {
    match err {
        lapin::Error::ProtocolError(ref amqp) if amqp.get_id() == PRECONDITION_FAILED => {
            HopperError::TopologyConflict {
                object: object.to_string(),
                detail: amqp.get_message().to_string(),
            }
        }
        other => HopperError::Connection(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::ShortString;

    fn get<'t>(table: &'t FieldTable, key: &str) -> Option<&'t AMQPValue> {
        table.inner().get(&ShortString::from(key))
    }

    #[test]
    fn dlq_args_carry_ttl_and_classic_type() {
        let args = dlq_queue_args(604_800_000);
        assert_eq!(
            get(&args, "x-message-ttl"),
            Some(&AMQPValue::LongLongInt(604_800_000))
        );
        assert_eq!(
            get(&args, "x-queue-type"),
            Some(&AMQPValue::LongString("classic".into()))
        );
        assert!(get(&args, "x-dead-letter-exchange").is_none());
    }

    #[test]
    fn wait_args_dead_letter_into_retry_exchange() {
        let args = wait_queue_args("orders.retry", 5_000);
        assert_eq!(
            get(&args, "x-message-ttl"),
            Some(&AMQPValue::LongLongInt(5_000))
        );
        assert_eq!(
            get(&args, "x-dead-letter-exchange"),
            Some(&AMQPValue::LongString("orders.retry".into()))
        );
    }

    #[test]
    fn main_queue_points_at_the_given_exchange() {
        let args = main_queue_args("orders.wait.exchange", None);
        assert_eq!(
            get(&args, "x-dead-letter-exchange"),
            Some(&AMQPValue::LongString("orders.wait.exchange".into()))
        );
        assert_eq!(
            get(&args, "x-queue-type"),
            Some(&AMQPValue::LongString("quorum".into()))
        );
        assert!(get(&args, "x-message-ttl").is_none());
    }

    #[test]
    fn main_queue_ttl_is_optional() {
        let args = main_queue_args("orders.retry", Some(86_400_000));
        assert_eq!(
            get(&args, "x-message-ttl"),
            Some(&AMQPValue::LongLongInt(86_400_000))
        );
        assert_eq!(
            get(&args, "x-dead-letter-exchange"),
            Some(&AMQPValue::LongString("orders.retry".into()))
        );
    }
}
