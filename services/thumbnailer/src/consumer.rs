use crate::config::KafkaConfig;
use crate::event::{parse_events, ObjectFinalizedEvent};
use crate::worker::{ThumbnailOutcome, ThumbnailWorker};
use anyhow::{Context, Result};
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Kafka consumer for object-finalized events
pub struct ThumbnailConsumer {
    consumer: StreamConsumer,
    worker: Arc<ThumbnailWorker>,
}

impl ThumbnailConsumer {
    /// Create a consumer subscribed to the object events topic
    pub fn new(config: &KafkaConfig, worker: Arc<ThumbnailWorker>) -> Result<Self> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("max.poll.interval.ms", config.max_poll_interval_ms.to_string());

        if config.ssl_enabled {
            client_config.set("security.protocol", "SASL_SSL");
            if let Some(ref ca_location) = config.ssl_ca_location {
                client_config.set("ssl.ca.location", ca_location);
            }
        }

        if let (Some(ref username), Some(ref password)) =
            (&config.sasl_username, &config.sasl_password)
        {
            client_config
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);
        }

        let consumer: StreamConsumer = client_config
            .create()
            .context("Failed to create Kafka consumer")?;

        consumer
            .subscribe(&[&config.object_events_topic])
            .context("Failed to subscribe to object events topic")?;

        info!(
            topic = %config.object_events_topic,
            group = %config.consumer_group,
            "Subscribed to Kafka topic"
        );

        Ok(Self { consumer, worker })
    }

    /// Consume messages until the stream ends
    ///
    /// Offsets are committed only after a message is fully handled. A failed
    /// message is logged and counted but not retried: the next successful
    /// commit on its partition moves past it, so delivery is at most once.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<()> {
        info!("Starting thumbnail consumer");

        let mut message_stream = self.consumer.stream();

        while let Some(message_result) = message_stream.next().await {
            match message_result {
                Ok(message) => {
                    if let Err(e) = self.process_message(&message).await {
                        error!(
                            error = ?e,
                            partition = message.partition(),
                            offset = message.offset(),
                            "Failed to process message"
                        );
                        metrics::counter!("thumbnailer.messages.failed").increment(1);
                    } else {
                        if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                            warn!(error = %e, "Failed to commit offset");
                        }
                        metrics::counter!("thumbnailer.messages.processed").increment(1);
                    }
                }
                Err(e) => {
                    error!(error = %e, "Kafka consumer error");
                    metrics::counter!("thumbnailer.kafka.errors").increment(1);
                }
            }
        }

        Ok(())
    }

    #[instrument(skip(self, message), fields(partition = message.partition(), offset = message.offset()))]
    async fn process_message(&self, message: &BorrowedMessage<'_>) -> Result<()> {
        let events = parse_events(message.payload().unwrap_or_default())
            .context("Failed to decode object event")?;

        let failed = handle_all(&events, |event| self.process_event(event)).await;
        if !failed.is_empty() {
            anyhow::bail!(
                "{} of {} object events failed: {}",
                failed.len(),
                events.len(),
                failed.join(", ")
            );
        }

        Ok(())
    }

    async fn process_event(&self, event: &ObjectFinalizedEvent) -> Result<()> {
        match self.worker.handle(event).await? {
            ThumbnailOutcome::Skipped(reason) => {
                debug!(object_path = %event.object_path, reason = ?reason, "Event skipped");
                metrics::counter!("thumbnailer.events.skipped").increment(1);
            }
            ThumbnailOutcome::Generated(report) => {
                if !report.failed_sizes.is_empty() {
                    warn!(
                        object_path = %event.object_path,
                        failed_sizes = ?report.failed_sizes,
                        "Some thumbnail sizes failed"
                    );
                }
            }
        }
        Ok(())
    }
}

/// Run `handle` on every event, returning the paths of those that failed
async fn handle_all<'a, F, Fut>(events: &'a [ObjectFinalizedEvent], handle: F) -> Vec<String>
where
    F: Fn(&'a ObjectFinalizedEvent) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut failed = Vec::new();
    for event in events {
        if let Err(e) = handle(event).await {
            error!(object_path = %event.object_path, error = ?e, "Failed to handle object event");
            failed.push(event.object_path.clone());
        }
    }
    failed
}
