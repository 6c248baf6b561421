use photo_service::config::{DatabaseConfig, S3Config};
use serde::Deserialize;

/// Main configuration for the thumbnail worker
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Kafka configuration
    pub kafka: KafkaConfig,
    /// S3 configuration, same bucket the photo service writes to
    pub s3: S3Config,
    /// Document metadata store configuration
    pub documents: DatabaseConfig,
    /// Thumbnail rendering
    #[serde(default)]
    pub thumbnails: ThumbnailConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Kafka consumer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: String,
    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Topic carrying object-finalized notifications
    #[serde(default = "default_object_events_topic")]
    pub object_events_topic: String,
    /// Enable SSL
    #[serde(default)]
    pub ssl_enabled: bool,
    /// SSL CA certificate path
    pub ssl_ca_location: Option<String>,
    /// SASL username
    pub sasl_username: Option<String>,
    /// SASL password
    pub sasl_password: Option<String>,
    /// Auto offset reset policy
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,
    /// Max poll interval in milliseconds
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u32,
}

/// Thumbnail rendering configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailConfig {
    /// JPEG quality (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_service_name() -> String {
    "photo-thumbnailer".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

fn default_consumer_group() -> String {
    "photo-thumbnailer".to_string()
}

fn default_object_events_topic() -> String {
    "photos.objects.finalized".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout_ms() -> u32 {
    30000
}

fn default_max_poll_interval_ms() -> u32 {
    300000
}

fn default_jpeg_quality() -> u8 {
    85
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "photo-thumbnailer")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9091)?
            .add_source(config::File::with_name("config/thumbnailer").required(false))
            .add_source(config::File::with_name("/etc/photos/thumbnailer").required(false))
            // THUMBNAILER__KAFKA__BOOTSTRAP_SERVERS -> kafka.bootstrap_servers
            .add_source(
                config::Environment::with_prefix("THUMBNAILER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !(1..=100).contains(&self.thumbnails.jpeg_quality) {
            anyhow::bail!(
                "thumbnails.jpeg_quality must be between 1 and 100, got {}",
                self.thumbnails.jpeg_quality
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_consumer_group(), "photo-thumbnailer");
        assert_eq!(ThumbnailConfig::default().jpeg_quality, 85);
        assert_eq!(ServiceConfig::default().metrics_port, 9091);
    }

    #[test]
    fn test_deserialize_minimal() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "kafka": {"bootstrap_servers": "localhost:9092"},
            "s3": {"bucket": "photos"},
            "documents": {"url": "postgres://localhost/documents"}
        }))
        .unwrap();

        assert_eq!(config.kafka.object_events_topic, "photos.objects.finalized");
        assert_eq!(config.s3.bucket, "photos");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_quality() {
        let mut config: Config = serde_json::from_value(serde_json::json!({
            "kafka": {"bootstrap_servers": "localhost:9092"},
            "s3": {"bucket": "photos"},
            "documents": {"url": "postgres://localhost/documents"}
        }))
        .unwrap();
        config.thumbnails.jpeg_quality = 0;

        assert!(config.validate().is_err());
    }
}
