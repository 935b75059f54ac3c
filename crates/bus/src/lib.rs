//! Event bus abstraction: a pub/sub **topic** (fan-out to N named
//! subscriptions) and a point-to-point **queue** (single consumer group),
//! both backed by Kafka — the donor crate's existing transport.
//!
//! `EventBus` is the seam business logic depends on (so it can be
//! exercised against the in-memory [`fake::FakeBus`] in tests); the
//! process binaries construct a single [`KafkaBus`], call [`KafkaBus::start`]
//! once, and pass it down by `Arc` reference. Nothing here is reached
//! through global/static state.

use async_trait::async_trait;
use events::{Envelope, VerifyOrderMessage};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Offset;
use std::time::Duration;
use thiserror::Error;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("decode error: {0}")]
    Decode(#[from] events::EventError),
    #[error("bus send timed out")]
    Timeout,
}

/// The seam business logic publishes through. Implemented by [`KafkaBus`]
/// for real traffic and by [`fake::FakeBus`] in tests.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), BusError>;
    async fn enqueue_verify_order(
        &self,
        queue: &str,
        message: &VerifyOrderMessage,
    ) -> Result<(), BusError>;
}

/// Lets a shared handle be passed anywhere a generic-over-`EventBus`
/// service expects one, so a single `Arc<KafkaBus>` can be handed to the
/// business-logic service, the outbox pumper, and a consumer's topic
/// subscription all at once.
#[async_trait]
impl<T: EventBus + ?Sized> EventBus for std::sync::Arc<T> {
    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), BusError> {
        (**self).publish(topic, envelope).await
    }

    async fn enqueue_verify_order(
        &self,
        queue: &str,
        message: &VerifyOrderMessage,
    ) -> Result<(), BusError> {
        (**self).enqueue_verify_order(queue, message).await
    }
}

/// Kafka-backed implementation. A Topic subscription is a Kafka consumer
/// group scoped to that subscription name; the single-consumer Queue is a
/// Kafka topic with one shared consumer group, which is all Kafka's own
/// partition-assignment semantics require to get point-to-point delivery.
pub struct KafkaBus {
    producer: FutureProducer,
    brokers: Vec<String>,
}

impl KafkaBus {
    pub fn new(brokers: &[String]) -> Result<Self, BusError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("message.timeout.ms", "5000")
            .create()?;
        Ok(Self {
            producer,
            brokers: brokers.to_vec(),
        })
    }

    /// Explicit lifecycle start — verifies the producer can reach the
    /// cluster's metadata before the caller starts accepting traffic.
    pub async fn start(&self) -> Result<(), BusError> {
        self.producer
            .client()
            .fetch_metadata(None, Duration::from_secs(5))?;
        info!(brokers = %self.brokers.join(","), "event bus connected");
        Ok(())
    }

    /// Explicit lifecycle stop — flushes any buffered producer records.
    pub async fn stop(&self) {
        if let Err(e) = self.producer.flush(Duration::from_secs(5)) {
            warn!(error = %e, "event bus flush on shutdown failed");
        }
        info!("event bus stopped");
    }

    /// Open a consumer for a Topic subscription. Each named subscription
    /// gets its own consumer group so every subscription sees every
    /// message (fan-out), per §4.6.
    pub fn topic_consumer(&self, topic: &str, subscription: &str) -> Result<TopicConsumer, BusError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", self.brokers.join(","))
            .set("group.id", subscription)
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .create()?;
        consumer.subscribe(&[topic])?;
        Ok(TopicConsumer { consumer })
    }

    /// Open a consumer for the single-consumer Queue. All instances share
    /// one consumer group so each message is handled exactly once among
    /// live consumers (point-to-point), with Kafka doing the rebalancing.
    pub fn queue_consumer(&self, queue: &str, group_id: &str) -> Result<QueueConsumer, BusError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", self.brokers.join(","))
            .set("group.id", group_id)
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .create()?;
        consumer.subscribe(&[queue])?;
        Ok(QueueConsumer { consumer })
    }
}

#[async_trait]
impl EventBus for KafkaBus {
    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), BusError> {
        let payload = serde_json::to_vec(envelope)?;
        let key = envelope
            .correlation_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| envelope.event_id.to_string());
        let record = FutureRecord::to(topic).key(&key).payload(&payload);
        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(err, _)| BusError::Kafka(err))?;
        debug!(topic, event_id = %envelope.event_id, "published event");
        Ok(())
    }

    async fn enqueue_verify_order(
        &self,
        queue: &str,
        message: &VerifyOrderMessage,
    ) -> Result<(), BusError> {
        let payload = serde_json::to_vec(message)?;
        let key = message.order_id.to_string();
        let record = FutureRecord::to(queue).key(&key).payload(&payload);
        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(err, _)| BusError::Kafka(err))?;
        debug!(queue, order_id = %message.order_id, "enqueued VerifyOrder");
        Ok(())
    }
}

/// A delivered message awaiting ack/nack. Dropping without acking is the
/// same as nacking — the consumer group never advances past it, so it is
/// redelivered to the next poll (or the next consumer, on rebalance).
pub struct TopicDelivery<'c> {
    pub envelope: Envelope,
    consumer: &'c StreamConsumer,
    topic: String,
    partition: i32,
    offset: i64,
}

impl<'c> TopicDelivery<'c> {
    pub fn ack(&self) -> Result<(), BusError> {
        self.consumer
            .store_offset(&self.topic, self.partition, self.offset)?;
        Ok(())
    }

    /// Negatively acknowledge: a no-op beyond logging, since not storing
    /// the offset is what causes redelivery on the next poll.
    pub fn nack(&self, reason: &str) {
        warn!(topic = %self.topic, offset = self.offset, reason, "message nacked, will redeliver");
    }
}

pub struct TopicConsumer {
    consumer: StreamConsumer,
}

impl TopicConsumer {
    pub async fn recv(&self) -> Option<Result<TopicDelivery<'_>, BusError>> {
        let msg = match self.consumer.stream().next().await? {
            Ok(msg) => msg,
            Err(e) => return Some(Err(BusError::Kafka(e))),
        };
        let payload = msg.payload().unwrap_or_default();
        let envelope = match events::decode_envelope(payload) {
            Ok(e) => e,
            Err(e) => {
                error!(error = %e, "dropping malformed bus message");
                return Some(Err(BusError::Decode(e)));
            }
        };
        Some(Ok(TopicDelivery {
            envelope,
            consumer: &self.consumer,
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
        }))
    }
}

pub struct QueueDelivery<'c> {
    pub message: VerifyOrderMessage,
    consumer: &'c StreamConsumer,
    topic: String,
    partition: i32,
    offset: i64,
}

impl<'c> QueueDelivery<'c> {
    pub fn ack(&self) -> Result<(), BusError> {
        self.consumer
            .store_offset(&self.topic, self.partition, self.offset)?;
        Ok(())
    }

    pub fn nack(&self, reason: &str) {
        warn!(queue = %self.topic, offset = self.offset, reason, "VerifyOrder nacked, will redeliver");
    }

    /// Rewind the assigned partition back to this message's offset, for a
    /// test harness or an operator tool that wants to force redelivery
    /// immediately rather than waiting for a restart/rebalance.
    pub fn seek_back(&self) -> Result<(), BusError> {
        self.consumer.seek(
            &self.topic,
            self.partition,
            Offset::Offset(self.offset),
            Duration::from_secs(5),
        )?;
        Ok(())
    }
}

pub struct QueueConsumer {
    consumer: StreamConsumer,
}

impl QueueConsumer {
    pub async fn recv(&self) -> Option<Result<QueueDelivery<'_>, BusError>> {
        let msg = match self.consumer.stream().next().await? {
            Ok(msg) => msg,
            Err(e) => return Some(Err(BusError::Kafka(e))),
        };
        let payload = msg.payload().unwrap_or_default();
        let message: VerifyOrderMessage = match serde_json::from_slice(payload) {
            Ok(m) => m,
            Err(e) => {
                error!(error = %e, "dropping malformed VerifyOrder message");
                return Some(Err(BusError::Serde(e)));
            }
        };
        Some(Ok(QueueDelivery {
            message,
            consumer: &self.consumer,
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
        }))
    }
}

/// In-memory [`EventBus`] for unit and integration-style tests, standing
/// in for Kafka the way the donor's generic-over-trait services stand in
/// fakes for repositories.
pub mod fake {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct FakeBus {
        pub published: Mutex<Vec<(String, Envelope)>>,
        pub enqueued: Mutex<Vec<(String, VerifyOrderMessage)>>,
    }

    impl FakeBus {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn published_types(&self) -> Vec<String> {
            self.published
                .lock()
                .await
                .iter()
                .map(|(_, env)| env.data.event_type_name().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl EventBus for FakeBus {
        async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), BusError> {
            self.published
                .lock()
                .await
                .push((topic.to_string(), envelope.clone()));
            Ok(())
        }

        async fn enqueue_verify_order(
            &self,
            queue: &str,
            message: &VerifyOrderMessage,
        ) -> Result<(), BusError> {
            self.enqueued
                .lock()
                .await
                .push((queue.to_string(), message.clone()));
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use chrono::Utc;
        use uuid::Uuid;

        #[tokio::test]
        async fn fake_bus_records_published_events() {
            let bus = FakeBus::new();
            let env = Envelope::new(
                Uuid::new_v4(),
                Utc::now(),
                events::BusEventData::OrderCreated {
                    order_id: Uuid::new_v4(),
                    customer_id: "C1".into(),
                    product_id: "SKU-002".into(),
                    quantity: 3,
                },
            );
            bus.publish(events::topics::ORDER_EVENTS, &env).await.unwrap();
            assert_eq!(bus.published_types().await, vec!["OrderCreated"]);
        }
    }
}
