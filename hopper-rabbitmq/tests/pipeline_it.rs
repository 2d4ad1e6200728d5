//! End-to-end pipeline test against a live broker.
//!
//! Run with a local RabbitMQ (management plugin enabled) and:
//! `cargo test -p hopper-rabbitmq -- --ignored`

use std::time::Duration;

use lapin::options::BasicPublishOptions;
use lapin::BasicProperties;

use hopper_core::{naming, BrokerConfig, RetryConfig};
use hopper_rabbitmq::{peek, BrokerSession, Reprocessor, TopologyBuilder, TopologyStyle};

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn dead_letter_and_reprocess_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let broker = BrokerConfig::from_env()?;
    let retry = RetryConfig {
        wait_delay_ms: 200,
        ..RetryConfig::from_env()?
    };
    let queue = "it.hopper.orders";

    let session = BrokerSession::open(&broker).await?;
    let topology = TopologyBuilder::new(session.channel(), &retry);
    topology.ensure(queue, TopologyStyle::DelayedRetry).await?;
    topology
        .recreate_main_queue(queue, TopologyStyle::DelayedRetry)
        .await?;

    // Seed the DLQ directly: a payload that already burned its budget.
    let dlq = naming::dlq_queue(queue);
    session
        .channel()
        .basic_publish(
            "",
            &dlq,
            BasicPublishOptions::default(),
            br#"{"order":42}"#,
            BasicProperties::default()
                .with_content_type("application/json".into())
                .with_correlation_id("it-corr".into()),
        )
        .await?
        .await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Dry run walks the starting backlog exactly once and leaves the DLQ
    // untouched.
    let reprocessor = Reprocessor::new(session.channel()).await?;
    let dry = reprocessor.reprocess(queue, None, true).await?;
    assert_eq!(dry.succeeded, 1);
    assert_eq!(peek(session.channel(), &dlq, 10).await?.len(), 1);

    // Live run moves the message back with its history reset.
    let live = reprocessor.reprocess(queue, None, false).await?;
    assert_eq!(live.succeeded, 1);
    assert_eq!(live.failed, 0);
    assert!(peek(session.channel(), &dlq, 10).await?.is_empty());

    let main = peek(session.channel(), queue, 10).await?;
    assert_eq!(main.len(), 1);
    assert_eq!(main[0].retry_count, 0);

    // Drain what we left behind.
    reprocessor.purge(queue).await?;
    session.channel().queue_purge(queue, Default::default()).await?;
    session.close().await?;
    Ok(())
}
