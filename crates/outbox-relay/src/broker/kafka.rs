//! Kafka producer backed by librdkafka.
//!
//! Each record carries its own report channel as the delivery opaque, and
//! [`DeliveryRouter`] forwards the librdkafka delivery callback to it.

use super::{BrokerProducer, BrokerRecord, DeliveryEvent, ProduceError};
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{
    BaseRecord, DeliveryResult, Producer, ProducerContext, PurgeConfig, ThreadedProducer,
};
use rdkafka::util::Timeout;
use rdkafka::{ClientContext, Message as _};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Routes delivery callbacks to the channel attached to each record.
pub struct DeliveryRouter;

impl ClientContext for DeliveryRouter {}

impl ProducerContext for DeliveryRouter {
    type DeliveryOpaque = Box<mpsc::Sender<DeliveryEvent>>;

    fn delivery(&self, result: &DeliveryResult<'_>, reports: Self::DeliveryOpaque) {
        let event = match result {
            Ok(message) => DeliveryEvent::Delivered {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
            },
            Err((KafkaError::MessageProduction(code), message)) => {
                classify(*code, message.topic(), message.partition())
            }
            Err((err, message)) => {
                DeliveryEvent::BrokerError(format!("{} (topic {})", err, message.topic()))
            }
        };

        // Reports for an abandoned batch (purged or timed out) have no reader.
        if reports.try_send(event).is_err() {
            debug!("Delivery report dropped, batch no longer waiting");
        }
    }
}

/// Maps a failed delivery report to an event.
///
/// librdkafka reports every failure as a produce error code. Codes that mean
/// the cluster could not be reached become [`DeliveryEvent::BrokerError`];
/// the rest are tied to the record's partition.
fn classify(code: RDKafkaErrorCode, topic: &str, partition: i32) -> DeliveryEvent {
    match code {
        RDKafkaErrorCode::BrokerTransportFailure
        | RDKafkaErrorCode::AllBrokersDown
        | RDKafkaErrorCode::Resolve
        | RDKafkaErrorCode::MessageTimedOut
        | RDKafkaErrorCode::OperationTimedOut
        | RDKafkaErrorCode::RequestTimedOut
        | RDKafkaErrorCode::NetworkException
        | RDKafkaErrorCode::BrokerNotAvailable => {
            DeliveryEvent::BrokerError(format!("{} (topic {})", code, topic))
        }
        _ => DeliveryEvent::PartitionError {
            topic: topic.to_string(),
            // -1 is librdkafka's unassigned partition.
            partition: (partition >= 0).then_some(partition),
            reason: code.to_string(),
        },
    }
}

/// Kafka client used by the relay.
pub struct KafkaProducer {
    producer: ThreadedProducer<DeliveryRouter>,
}

impl KafkaProducer {
    /// Create a producer for `bootstrap_servers` with `acks=all`.
    ///
    /// `properties` are applied last and may override any default.
    pub fn new<'a, I>(bootstrap_servers: &str, properties: I) -> KafkaResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", bootstrap_servers)
            .set("acks", "all");
        for (key, value) in properties {
            config.set(key, value);
        }
        Self::from_config(&config)
    }

    pub fn from_config(config: &ClientConfig) -> KafkaResult<Self> {
        let producer: ThreadedProducer<DeliveryRouter> = config.create_with_context(DeliveryRouter)?;
        info!("Kafka producer created");
        Ok(Self { producer })
    }

    /// Wait for queued records to be delivered. Called on shutdown.
    pub fn flush(&self, timeout: Duration) -> KafkaResult<()> {
        self.producer.flush(Timeout::After(timeout))
    }
}

impl BrokerProducer for KafkaProducer {
    fn produce(
        &self,
        record: BrokerRecord,
        reports: mpsc::Sender<DeliveryEvent>,
    ) -> Result<(), ProduceError> {
        let headers = record.headers.iter().fold(
            OwnedHeaders::new_with_capacity(record.headers.len()),
            |headers, (key, value)| {
                headers.insert(Header {
                    key,
                    value: Some(value),
                })
            },
        );

        let base = BaseRecord::with_opaque_to(&record.topic, Box::new(reports))
            .key(record.key.as_slice())
            .payload(record.payload.as_slice())
            .headers(headers);

        self.producer.send(base).map_err(|(err, _)| match err {
            KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull) => ProduceError::QueueFull,
            other => ProduceError::Other(other.to_string()),
        })
    }

    fn purge(&self) -> Result<(), ProduceError> {
        self.producer.purge(PurgeConfig::default().queue());
        Ok(())
    }
}
