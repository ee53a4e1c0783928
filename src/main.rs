//! Command-line interface for cypher-pipeline
//!
//! Runs the resilient consumer or the service monitor, and offers one-shot
//! queries against the observability sink and the dead-letter file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cypher_pipeline::config::PipelineConfig;
use cypher_pipeline::consumer::FileDeadLetterStore;
use cypher_pipeline::monitor::{ServiceMonitor, ServiceRegistry};
use cypher_pipeline::sink::ObservabilitySink;
use cypher_pipeline::telemetry::{init_logging, shutdown_telemetry, LogFormat};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[cfg(feature = "kafka")]
use cypher_pipeline::consumer::{
    ConsumerLoop, DeadLetterStore, KafkaDeadLetterStore, KafkaEventLog, MessageProcessor,
    TopicRouter,
};
#[cfg(feature = "elasticsearch")]
use cypher_pipeline::sink::ElasticsearchSink;

/// Resilient event consumer and backing-service health monitor
#[derive(Parser, Debug)]
#[command(name = "cypher-pipeline")]
#[command(version)]
#[command(about = "Resilient event consumer and backing-service health monitor", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, value_name = "FILE", env = "CYPHER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long)]
    log_level: Option<String>,

    /// Enable JSON structured logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume the configured topics until Ctrl-C
    Consume,
    /// Check backing services periodically until Ctrl-C
    Monitor,
    /// Print recent lifecycle events from the sink
    Logs {
        /// Size of the time window, in minutes
        #[arg(long, default_value = "5")]
        minutes: u32,
    },
    /// Print the newest dead-letter records
    DeadLetters {
        /// Maximum number of records
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

/// Handles built from the sink section
struct SinkHandles {
    sink: Option<Arc<dyn ObservabilitySink>>,
    #[cfg(feature = "elasticsearch")]
    cluster: Option<Arc<ElasticsearchSink>>,
}

fn build_sink(config: &PipelineConfig) -> Result<SinkHandles> {
    #[cfg(feature = "elasticsearch")]
    {
        let cluster = ElasticsearchSink::from_config(&config.sink)
            .context("Failed to create Elasticsearch client")?
            .map(Arc::new);
        let sink = cluster
            .clone()
            .map(|es| es as Arc<dyn ObservabilitySink>);
        Ok(SinkHandles { sink, cluster })
    }

    #[cfg(not(feature = "elasticsearch"))]
    {
        if config.sink.url.is_some() {
            warn!("sink.url is set but the elasticsearch feature is disabled");
        }
        Ok(SinkHandles { sink: None })
    }
}

/// Flip the shutdown watch on Ctrl-C
fn spawn_shutdown_listener() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                let _ = tx.send(true);
            }
            Err(err) => {
                error!("Failed to listen for shutdown signal: {}", err);
            }
        }
        // Keep the sender alive so receivers never see a closed channel
        std::future::pending::<()>().await;
    });
    rx
}

#[cfg(feature = "kafka")]
async fn consume(config: PipelineConfig) -> Result<()> {
    let handles = build_sink(&config)?;
    let log = KafkaEventLog::new(config.kafka.clone(), config.consumer.max_poll_records)
        .context("Failed to create Kafka client")?;

    let dead_letters: Arc<dyn DeadLetterStore> = match &config.consumer.dead_letter_topic {
        Some(topic) => {
            info!(topic = %topic, "Dead letters go to Kafka");
            Arc::new(KafkaDeadLetterStore::new(log.producer(), topic.clone()))
        }
        None => {
            info!(path = %config.consumer.dead_letter_path.display(), "Dead letters go to file");
            Arc::new(FileDeadLetterStore::new(&config.consumer.dead_letter_path))
        }
    };

    let mut processor = MessageProcessor::new(
        TopicRouter::with_default_handlers(config.consumer.unknown_topic),
        dead_letters,
    )
    .with_retry_policy(config.consumer.retry_policy.clone())
    .with_buffer_capacity(config.consumer.dead_letter_buffer_capacity)
    .with_messages_index(config.sink.messages_index.clone());
    if let Some(sink) = handles.sink {
        processor = processor.with_sink(sink);
    }

    let shutdown = spawn_shutdown_listener();
    let mut consumer = ConsumerLoop::new(Arc::new(log), processor, config.consumer, shutdown);
    let result = consumer.run().await;

    let metrics = consumer.metrics().snapshot();
    info!(
        consumed = metrics.messages_consumed,
        committed = metrics.offsets_committed,
        dead_lettered = metrics.messages_dead_lettered,
        "Consumer finished"
    );
    result.context("Consumer stopped with an error")
}

#[cfg(not(feature = "kafka"))]
async fn consume(_config: PipelineConfig) -> Result<()> {
    anyhow::bail!("the consume command requires the kafka feature")
}

fn build_monitor(config: &PipelineConfig) -> Result<ServiceMonitor> {
    let handles = build_sink(config)?;

    #[allow(unused_mut)]
    let mut registry = ServiceRegistry::new();
    #[cfg(feature = "elasticsearch")]
    if let Some(cluster) = &handles.cluster {
        registry = registry.with_search(cluster.clone());
    }
    #[cfg(feature = "kafka")]
    {
        let admin = KafkaEventLog::new(config.kafka.clone(), config.consumer.max_poll_records)
            .context("Failed to create Kafka client")?;
        registry = registry.with_event_log(Arc::new(admin));
    }

    let mut monitor = ServiceMonitor::new(registry.into_services(), config.monitor.clone())
        .with_indices(
            config.sink.messages_index.clone(),
            config.sink.monitor_index.clone(),
        );
    if let Some(sink) = handles.sink {
        monitor = monitor.with_sink(sink);
    }
    Ok(monitor)
}

async fn monitor(config: PipelineConfig) -> Result<()> {
    let mut monitor = build_monitor(&config)?;
    let shutdown = spawn_shutdown_listener();
    monitor.run(shutdown).await;
    Ok(())
}

/// Monitor without backing-service clients, used only for sink queries
fn build_log_reader(config: &PipelineConfig) -> Result<ServiceMonitor> {
    let handles = build_sink(config)?;
    let mut monitor = ServiceMonitor::new(Vec::new(), config.monitor.clone())
        .with_indices(config.sink.messages_index.clone(), config.sink.monitor_index.clone());
    if let Some(sink) = handles.sink {
        monitor = monitor.with_sink(sink);
    }
    Ok(monitor)
}

async fn logs(config: PipelineConfig, minutes: u32) -> Result<()> {
    let monitor = build_log_reader(&config)?;
    let report = monitor.check_elasticsearch_logs(minutes).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to encode report")?
    );
    Ok(())
}

async fn dead_letters(config: PipelineConfig, limit: usize) -> Result<()> {
    let store = FileDeadLetterStore::new(&config.consumer.dead_letter_path);
    if !store.path().exists() {
        warn!(path = %store.path().display(), "No dead-letter file");
        return Ok(());
    }
    let records = store
        .read_all()
        .await
        .with_context(|| format!("Failed to read {}", store.path().display()))?;
    let skip = records.len().saturating_sub(limit);
    for record in records.iter().skip(skip).rev() {
        println!("{}", serde_json::to_string(record)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json_logs {
        config.logging.format = LogFormat::Json;
    }
    init_logging(&config.logging).context("Failed to initialize logging")?;

    let result = match cli.command {
        Command::Consume => consume(config).await,
        Command::Monitor => monitor(config).await,
        Command::Logs { minutes } => logs(config, minutes).await,
        Command::DeadLetters { limit } => dead_letters(config, limit).await,
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    shutdown_telemetry();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use cypher_pipeline::monitor::LogQueryStatus;

    #[test]
    fn test_log_reader_has_no_service_clients() {
        let config = PipelineConfig::default();
        let reader = build_log_reader(&config).unwrap();
        assert!(reader.services().is_empty());
    }

    #[tokio::test]
    async fn test_log_reader_without_sink_is_not_available() {
        let reader = build_log_reader(&PipelineConfig::default()).unwrap();
        let report = reader.check_elasticsearch_logs(5).await;
        assert_eq!(report.status, LogQueryStatus::NotAvailable);
    }
}
