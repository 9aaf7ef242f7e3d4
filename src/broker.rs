// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Capabilities
//!
//! The producer, consumer and connection supervisor only talk to the broker
//! through the traits in this module. `channel` implements them on top of
//! lapin; tests implement them with mocks.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties,
};
#[cfg(test)]
use mockall::automock;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::oneshot;

/// Stream of deliveries produced by a registered consumer.
pub type DeliveryStream = BoxStream<'static, lapin::Result<InboundDelivery>>;

/// Dials the broker.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn dial(
        &self,
        uri: &str,
        connection_name: &str,
    ) -> lapin::Result<Arc<dyn BrokerConnection>>;
}

/// An established broker connection.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn create_channel(&self) -> lapin::Result<Arc<dyn BrokerChannel>>;

    /// Returns a receiver that resolves once the broker reports the connection
    /// closed. Dropping the sender side also counts as a closure.
    fn notify_close(&self) -> oneshot::Receiver<lapin::Error>;
}

/// A channel opened on a `BrokerConnection`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: lapin::ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> lapin::Result<()>;

    /// Declares a queue and returns the name the broker assigned to it.
    async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> lapin::Result<String>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        options: QueueBindOptions,
        arguments: FieldTable,
    ) -> lapin::Result<()>;

    async fn basic_qos(
        &self,
        prefetch_count: u16,
        prefetch_size: u32,
        global: bool,
    ) -> lapin::Result<()>;

    /// Publishes a message and waits for the broker to take it.
    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> lapin::Result<()>;

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
        arguments: FieldTable,
    ) -> lapin::Result<DeliveryStream>;
}

/// Acknowledges a single delivery on the channel it arrived on.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, options: BasicAckOptions) -> lapin::Result<()>;
}

/// Acknowledgement handle attached to an `InboundDelivery`.
///
/// Once the broker accepted an `ack`, later calls are no-ops. A failed `ack`
/// can be retried.
pub struct AckHandle {
    acker: Arc<dyn Acknowledger>,
    acked: AtomicBool,
}

impl AckHandle {
    pub fn new(acker: Arc<dyn Acknowledger>) -> Self {
        AckHandle {
            acker,
            acked: AtomicBool::new(false),
        }
    }

    /// Acknowledges this delivery only, never the ones before it.
    pub async fn ack(&self) -> lapin::Result<()> {
        if self.acked.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let result = self.acker.ack(BasicAckOptions { multiple: false }).await;
        if result.is_err() {
            self.acked.store(false, Ordering::SeqCst);
        }

        result
    }
}

/// A message handed to a consumer.
pub struct InboundDelivery {
    pub body: Vec<u8>,
    pub headers: FieldTable,
    pub exchange: String,
    pub routing_key: String,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub acker: AckHandle,
}
