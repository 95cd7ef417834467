//! mqpipeline - Main Entry Point
//!
//! Runs as a publisher or a consumer depending on `PIPELINE_ROLE`.
//! The publisher reads envelope JSON lines from stdin and dual-publishes
//! them; the consumer subscribes to the configured queue and dispatches
//! to the default handler table.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mqpipeline::consumer::Consumer;
use mqpipeline::handlers::default_handlers;
use mqpipeline::policy::PolicyConfig;
use mqpipeline::publisher::Publisher;
use mqpipeline::supervisor::{BrokerLink, ConnectionSupervisor};
use mqpipeline::topology::TopologySpec;
use mqpipeline::transport::AmqpTransport;
use mqpipeline::types::{BrokerConfig, Envelope};

/// How long shutdown waits for the in-flight delivery.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "mqpipeline=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = BrokerConfig::from_env();
    let role = std::env::var("PIPELINE_ROLE").unwrap_or_else(|_| "consumer".to_string());

    info!("Starting mqpipeline v{} as {}", env!("CARGO_PKG_VERSION"), role);

    let transport = Arc::new(AmqpTransport::new());
    let supervisor = Arc::new(ConnectionSupervisor::new(
        transport,
        config.amqp_uri.clone(),
        PolicyConfig::from(&config.connect),
    ));

    // Startup connection is fatal on failure: stop, do not run
    // disconnected.
    let link = supervisor
        .acquire()
        .await
        .context("broker connection failed at startup")?;

    let topology = TopologySpec::from_config(&config);
    topology.ensure(link.channel.as_ref()).await?;

    match role.as_str() {
        "publisher" => run_publisher(supervisor, topology, &config, link).await,
        "consumer" => run_consumer(&config, link).await,
        other => anyhow::bail!("unknown PIPELINE_ROLE '{other}' (expected publisher or consumer)"),
    }
}

/// Read envelope JSON lines from stdin and dual-publish each one.
async fn run_publisher(
    supervisor: Arc<ConnectionSupervisor>,
    topology: TopologySpec,
    config: &BrokerConfig,
    link: BrokerLink,
) -> Result<()> {
    let publisher = Publisher::new(supervisor, topology, PolicyConfig::from(&config.publish), link);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("reading envelope JSON lines from stdin, EOF or Ctrl-C stops");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                None => break,
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    let envelope = match Envelope::from_bytes(line.as_bytes()) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            warn!(error = %e, "skipping malformed input line");
                            continue;
                        }
                    };
                    if let Err(e) = publisher.publish(&envelope).await {
                        error!(error = %e, "envelope undelivered");
                    }
                }
            }
        }
    }

    info!("publisher stopped");
    Ok(())
}

/// Consume the configured queue until Ctrl-C, then drain with a grace
/// period.
async fn run_consumer(config: &BrokerConfig, link: BrokerLink) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = Consumer::new(link, config.consume_queue.clone(), default_handlers(), shutdown_rx);
    let handle = tokio::spawn(consumer.run());

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
        Ok(result) => result??,
        Err(_) => warn!("in-flight delivery did not finish within grace period"),
    }

    info!("consumer stopped");
    Ok(())
}
