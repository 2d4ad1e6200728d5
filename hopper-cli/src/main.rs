//! `hopper`: operator CLI for the retry/dead-letter pipeline.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use hopper_core::naming::{self, QueueRole};
use hopper_core::types::payload_preview;
use hopper_core::{
    group_queues, BrokerConfig, HopperError, MessageHandler, QueueGroup, QueueStat, Result,
    RetryConfig,
};
use hopper_rabbitmq::{
    consume, peek, BrokerSession, ManagementClient, Reprocessor, TopologyBuilder, TopologyStyle,
};

#[derive(Parser)]
#[command(name = "hopper", about = "Retry and dead-letter queue toolkit for RabbitMQ")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Declare the retry topology (wait stage, retry exchange, DLQ) for a queue
    Setup {
        /// Main queue name; omit with --all to configure every main queue
        queue: Option<String>,

        /// Configure every non-system main queue in the vhost
        #[arg(long, conflicts_with = "queue")]
        all: bool,

        /// Wiring style
        #[arg(long, value_enum, default_value_t = StyleArg::Delayed)]
        style: StyleArg,

        /// Show what would be declared without touching the broker
        #[arg(long)]
        dry_run: bool,

        /// Skip the confirmation prompt for --all
        #[arg(long)]
        yes: bool,
    },

    /// Recreate a main queue with its dead-letter-exchange argument.
    /// The old queue must have been drained and deleted first.
    Recreate {
        /// Main queue name
        queue: String,

        /// Wiring style
        #[arg(long, value_enum, default_value_t = StyleArg::Delayed)]
        style: StyleArg,
    },

    /// Move messages from a queue's DLQ back onto the queue
    Reprocess {
        /// Main queue name (not the DLQ name)
        queue: String,

        /// Maximum number of messages to move (default: all)
        #[arg(long)]
        max_messages: Option<u64>,

        /// Count and requeue instead of moving anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Permanently delete all messages in a queue's DLQ
    Purge {
        /// Main queue name (not the DLQ name)
        queue: String,

        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Show message counts for every DLQ in the vhost
    Stats,

    /// Peek at the first messages of a queue's DLQ
    Inspect {
        /// Main queue name (not the DLQ name)
        queue: String,

        /// Messages to show
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Show retry-pipeline status, grouped per queue
    Monitor {
        /// Focus on one queue's main/wait/DLQ triple
        queue: Option<String>,

        /// Refresh every 30 seconds until interrupted
        #[arg(long)]
        watch: bool,
    },

    /// Consume a queue with the retry gate applied (demonstration handler)
    Consume {
        /// Queue name
        queue: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StyleArg {
    /// DLQ and fanout retry exchange only
    Simple,
    /// Wait queue with TTL delay ahead of the retry exchange
    Delayed,
}

impl From<StyleArg> for TopologyStyle {
    fn from(style: StyleArg) -> Self {
        match style {
            StyleArg::Simple => TopologyStyle::Simple,
            StyleArg::Delayed => TopologyStyle::DelayedRetry,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(err) = run(cli.command).await {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

async fn run(command: Commands) -> Result<()> {
    let broker = BrokerConfig::from_env()?;
    let retry = RetryConfig::from_env()?;

    match command {
        Commands::Setup {
            queue,
            all,
            style,
            dry_run,
            yes,
        } => cmd_setup(&broker, &retry, queue, all, style.into(), dry_run, yes).await,
        Commands::Recreate { queue, style } => {
            cmd_recreate(&broker, &retry, &queue, style.into()).await
        }
        Commands::Reprocess {
            queue,
            max_messages,
            dry_run,
        } => cmd_reprocess(&broker, &queue, max_messages, dry_run).await,
        Commands::Purge { queue, yes } => cmd_purge(&broker, &queue, yes).await,
        Commands::Stats => cmd_stats(&broker).await,
        Commands::Inspect { queue, limit } => cmd_inspect(&broker, &queue, limit).await,
        Commands::Monitor { queue, watch } => cmd_monitor(&broker, queue, watch).await,
        Commands::Consume { queue } => cmd_consume(&broker, &retry, &queue).await,
    }
}

async fn cmd_setup(
    broker: &BrokerConfig,
    retry: &RetryConfig,
    queue: Option<String>,
    all: bool,
    style: TopologyStyle,
    dry_run: bool,
    yes: bool,
) -> Result<()> {
    let targets: Vec<String> = if all {
        let management = ManagementClient::new(broker)?;
        management
            .list_queues()
            .await?
            .into_iter()
            .filter(|q| q.role() == QueueRole::Main)
            .map(|q| q.name)
            .collect()
    } else {
        match queue {
            Some(name) => vec![name],
            None => {
                return Err(HopperError::Config(
                    "specify a queue name or pass --all".into(),
                ))
            }
        }
    };

    if targets.is_empty() {
        println!("No queues to configure.");
        return Ok(());
    }

    for target in &targets {
        describe_topology(target, style, retry, dry_run);
    }
    if dry_run {
        return Ok(());
    }

    if all && !yes {
        let answer = prompt(&format!(
            "\nConfigure retry topology for {} queue(s)? Type 'yes' to proceed: ",
            targets.len()
        ))?;
        if !confirm_yes(&answer) {
            println!("Setup cancelled.");
            return Ok(());
        }
    }

    let session = BrokerSession::open(broker).await?;
    let mut configured = 0usize;
    let mut conflicted = 0usize;

    for target in &targets {
        // One channel per queue: a topology conflict kills the channel it
        // happened on, not the rest of the batch.
        let channel = session.extra_channel().await?;
        let builder = TopologyBuilder::new(&channel, retry);
        match builder.ensure(target, style).await {
            Ok(()) => {
                println!("Configured \"{target}\"");
                configured += 1;
            }
            Err(err @ HopperError::TopologyConflict { .. }) => {
                eprintln!("Skipped \"{target}\": {err}");
                conflicted += 1;
            }
            Err(err) => return Err(err),
        }
    }

    println!("\nSetup complete: {configured} configured, {conflicted} conflicted.");
    if configured > 0 {
        println!(
            "Main queues still route nowhere: drain and delete each one, then run\n\
             `hopper recreate <queue>` to re-declare it with dead-letter routing."
        );
    }
    session.close().await
}

fn describe_topology(queue: &str, style: TopologyStyle, retry: &RetryConfig, dry_run: bool) {
    let prefix = if dry_run { "[dry run] " } else { "" };
    println!("{prefix}Topology for \"{queue}\":");
    if style == TopologyStyle::DelayedRetry {
        println!("  wait exchange:  {}", naming::wait_exchange(queue));
        println!(
            "  wait queue:     {} ({} ms delay)",
            naming::wait_queue(queue),
            retry.wait_delay_ms
        );
    }
    println!("  retry exchange: {}", naming::retry_exchange(queue));
    println!(
        "  DLQ:            {} ({} ms TTL)",
        naming::dlq_queue(queue),
        retry.dlq_message_ttl_ms
    );
}

async fn cmd_recreate(
    broker: &BrokerConfig,
    retry: &RetryConfig,
    queue: &str,
    style: TopologyStyle,
) -> Result<()> {
    let session = BrokerSession::open(broker).await?;
    let builder = TopologyBuilder::new(session.channel(), retry);
    builder.recreate_main_queue(queue, style).await?;
    println!("Recreated \"{queue}\" with dead-letter routing.");
    session.close().await
}

async fn cmd_reprocess(
    broker: &BrokerConfig,
    queue: &str,
    max_messages: Option<u64>,
    dry_run: bool,
) -> Result<()> {
    let dlq = naming::dlq_queue(queue);
    let prefix = if dry_run { "[dry run] " } else { "" };
    println!("{prefix}Reprocessing \"{dlq}\" -> \"{queue}\"");

    let session = BrokerSession::open(broker).await?;
    let reprocessor = Reprocessor::new(session.channel()).await?;
    let report = reprocessor.reprocess(queue, max_messages, dry_run).await?;

    if dry_run {
        println!("Would reprocess {} message(s).", report.succeeded);
    } else {
        println!(
            "Reprocessed {} message(s), {} failed (left in DLQ).",
            report.succeeded, report.failed
        );
    }
    session.close().await
}

async fn cmd_purge(broker: &BrokerConfig, queue: &str, yes: bool) -> Result<()> {
    let dlq = naming::dlq_queue(queue);

    if !yes {
        println!("WARNING: this permanently deletes ALL messages in \"{dlq}\".");
        println!("This action cannot be undone.");
        let answer = prompt("Type 'DELETE' to confirm: ")?;
        if !confirm_purge(&answer) {
            println!("Purge cancelled.");
            return Ok(());
        }
    }

    let session = BrokerSession::open(broker).await?;
    let reprocessor = Reprocessor::new(session.channel()).await?;
    let purged = reprocessor.purge(queue).await?;
    println!("Purged {purged} message(s) from \"{dlq}\".");
    session.close().await
}

async fn cmd_stats(broker: &BrokerConfig) -> Result<()> {
    let management = ManagementClient::new(broker)?;
    let queues = management.list_queues().await?;
    let dlqs: Vec<&QueueStat> = queues
        .iter()
        .filter(|q| q.role() == QueueRole::Dlq)
        .collect();

    println!(
        "Dead-letter queues at {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    if dlqs.is_empty() {
        println!("No dead-letter queues found.");
        return Ok(());
    }

    let name_width = dlqs.iter().map(|q| q.name.len()).max().unwrap_or(3).max(3);
    println!(
        "{:<name_width$}  {:>8}  {:>8}  {:>8}  {:>9}",
        "DLQ", "MESSAGES", "READY", "UNACKED", "CONSUMERS"
    );
    let mut total = 0u64;
    for q in &dlqs {
        total += q.messages;
        println!(
            "{:<name_width$}  {:>8}  {:>8}  {:>8}  {:>9}",
            q.name, q.messages, q.messages_ready, q.messages_unacked, q.consumers
        );
    }
    println!("\nTotal messages in DLQs: {total}");
    if total > 0 {
        println!("Use `hopper inspect <queue>` to view them, `hopper reprocess <queue>` to move them back.");
    }
    Ok(())
}

async fn cmd_inspect(broker: &BrokerConfig, queue: &str, limit: usize) -> Result<()> {
    let dlq = naming::dlq_queue(queue);
    let session = BrokerSession::open(broker).await?;
    let messages = peek(session.channel(), &dlq, limit).await?;

    println!("Inspecting \"{dlq}\"");
    if messages.is_empty() {
        println!("No messages found.");
    }
    for (i, msg) in messages.iter().enumerate() {
        println!("\nMessage #{}", i + 1);
        println!("  Exchange:    {}", msg.exchange);
        println!("  Routing key: {}", msg.routing_key);
        println!("  Redelivered: {}", msg.redelivered);
        println!("  Retries:     {}", msg.retry_count);
        println!("  Payload:     {}", msg.payload_preview);
    }
    if messages.len() == limit {
        println!("\nShowing first {limit} messages only; the DLQ may hold more.");
    }
    session.close().await
}

async fn cmd_monitor(broker: &BrokerConfig, queue: Option<String>, watch: bool) -> Result<()> {
    let management = ManagementClient::new(broker)?;

    loop {
        match &queue {
            Some(name) => show_queue_pipeline(&management, name).await?,
            None => show_all_groups(&management).await?,
        }

        if !watch {
            return Ok(());
        }
        println!("\nRefreshing in 30s (ctrl-c to stop)...");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Monitoring stopped.");
                return Ok(());
            }
            _ = tokio::time::sleep(Duration::from_secs(30)) => {}
        }
    }
}

async fn show_all_groups(management: &ManagementClient) -> Result<()> {
    let queues = management.list_queues().await?;
    let groups = group_queues(&queues);

    if groups.is_empty() {
        println!("No queues found.");
        return Ok(());
    }

    println!("Retry-pipeline status per queue\n");
    for group in &groups {
        print_group(group);
    }
    Ok(())
}

fn print_group(group: &QueueGroup) {
    let status = if group.is_configured() {
        "configured"
    } else {
        "incomplete"
    };
    println!("[{status}] {}", group.base);
    if let Some(main) = &group.main {
        println!(
            "  main: {} msgs | {} consumers",
            main.messages, main.consumers
        );
    }
    if let Some(wait) = &group.wait {
        println!("  wait: {} msgs (retrying)", wait.messages);
    }
    if let Some(dlq) = &group.dlq {
        println!("  dlq:  {} msgs (failed)", dlq.messages);
    }
}

async fn show_queue_pipeline(management: &ManagementClient, queue: &str) -> Result<()> {
    let main = lookup(management, queue).await;
    let wait = lookup(management, &naming::wait_queue(queue)).await;
    let dlq = lookup(management, &naming::dlq_queue(queue)).await;

    if main.is_none() {
        println!("Queue \"{queue}\" not found.");
        return Ok(());
    }

    println!("Pipeline for \"{queue}\"\n");
    let rows: Vec<(&str, &QueueStat)> = [
        ("main", main.as_ref()),
        ("wait", wait.as_ref()),
        ("dlq", dlq.as_ref()),
    ]
    .into_iter()
    .filter_map(|(label, stat)| stat.map(|s| (label, s)))
    .collect();

    let name_width = rows.iter().map(|(_, q)| q.name.len()).max().unwrap_or(4).max(4);
    println!(
        "{:<5} {:<name_width$}  {:>8}  {:>9}  {:<8}",
        "ROLE", "NAME", "MESSAGES", "CONSUMERS", "STATE"
    );
    for (label, q) in &rows {
        println!(
            "{:<5} {:<name_width$}  {:>8}  {:>9}  {:<8}",
            label, q.name, q.messages, q.consumers, q.state
        );
    }

    let active = main.as_ref().map_or(0, |q| q.messages);
    let retrying = wait.as_ref().map_or(0, |q| q.messages);
    let failed = dlq.as_ref().map_or(0, |q| q.messages);
    println!("\nActive: {active}  Retrying: {retrying}  Failed: {failed}");

    if failed > 0 {
        let dlq_name = naming::dlq_queue(queue);
        match management.peek(&dlq_name, 10).await {
            Ok(messages) if !messages.is_empty() => {
                println!("\nFirst {} DLQ message(s):", messages.len());
                println!("{:>3}  {:>7}  PAYLOAD", "#", "RETRIES");
                for (i, msg) in messages.iter().enumerate() {
                    let preview: String = payload_preview(&msg.payload, 50)
                        .replace('\n', " ");
                    println!("{:>3}  {:>7}  {}", i + 1, msg.retry_count(), preview);
                }
            }
            Ok(_) => {}
            Err(err) => warn!(%err, "could not peek DLQ messages"),
        }
    }
    Ok(())
}

/// Queue lookup that degrades to "no data" on management failure instead of
/// aborting the whole report.
async fn lookup(management: &ManagementClient, name: &str) -> Option<QueueStat> {
    match management.queue(name).await {
        Ok(stat) => stat,
        Err(err) => {
            warn!(queue = name, %err, "management lookup failed");
            None
        }
    }
}

async fn cmd_consume(broker: &BrokerConfig, retry: &RetryConfig, queue: &str) -> Result<()> {
    let session = BrokerSession::open(broker).await?;
    println!(
        "Consuming \"{queue}\" (max retries: {}). Ctrl-c to stop.",
        retry.max_retries
    );
    let report = consume(session.channel(), queue, retry, Arc::new(DemoHandler)).await?;
    println!(
        "\nProcessed: {}  Retried: {}  Dead-lettered: {}",
        report.processed, report.retried, report.dead_lettered
    );
    session.close().await
}

/// Demonstration handler: accepts any JSON payload unless it asks to fail
/// (`{"fail": true}`), which exercises the retry gate end to end.
struct DemoHandler;

#[async_trait]
impl MessageHandler for DemoHandler {
    async fn handle(&self, routing_key: &str, body: &[u8]) -> Result<()> {
        let data: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| HopperError::Serialization(format!("invalid JSON payload: {e}")))?;
        if data.get("fail").and_then(serde_json::Value::as_bool) == Some(true) {
            return Err(HopperError::Handler("payload requested failure".into()));
        }
        println!("processed message on {routing_key}: {data}");
        Ok(())
    }
}

fn prompt(message: &str) -> Result<String> {
    print!("{message}");
    io::stdout()
        .flush()
        .map_err(|e| HopperError::Config(e.to_string()))?;
    let mut answer = String::new();
    io::stdin()
        .read_line(&mut answer)
        .map_err(|e| HopperError::Config(e.to_string()))?;
    Ok(answer)
}

/// Purge requires the operator to type the exact token.
fn confirm_purge(answer: &str) -> bool {
    answer.trim() == "DELETE"
}

fn confirm_yes(answer: &str) -> bool {
    answer.trim().eq_ignore_ascii_case("yes")
}
