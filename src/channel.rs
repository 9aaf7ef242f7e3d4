// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! This module implements the broker capabilities on top of lapin. It handles
//! the creation of AMQP connections and channels, forwards broker-initiated
//! closures to the connection supervisor and adapts lapin deliveries into
//! `InboundDelivery` values.

use crate::broker::{
    AckHandle, Acknowledger, BrokerChannel, BrokerConnection, BrokerConnector, DeliveryStream,
    InboundDelivery,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    acker::Acker,
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::{FieldTable, LongString},
    BasicProperties, Channel, Connection, ConnectionProperties, ConnectionState,
};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// Dials RabbitMQ with lapin.
#[derive(Debug, Default, Clone, Copy)]
pub struct LapinConnector;

#[async_trait]
impl BrokerConnector for LapinConnector {
    /// Opens a new AMQP connection.
    ///
    /// # Parameters
    /// * `uri` - The AMQP connection string
    /// * `connection_name` - Name reported to the broker for this connection
    ///
    /// # Returns
    /// The connection, or the lapin error when the broker could not be reached
    async fn dial(
        &self,
        uri: &str,
        connection_name: &str,
    ) -> lapin::Result<Arc<dyn BrokerConnection>> {
        debug!("creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(connection_name.to_owned()));

        let conn = Connection::connect(uri, options).await?;
        debug!("amqp connected");

        Ok(Arc::new(LapinConnection::new(conn)))
    }
}

/// Senders waiting for the connection to close.
#[derive(Default, Clone)]
struct CloseListeners(Arc<Mutex<Vec<oneshot::Sender<lapin::Error>>>>);

impl CloseListeners {
    /// Adds a listener, or resolves it at once when `connected` reports the
    /// connection gone. `connected` runs under the lock `notify` drains with.
    fn register(&self, connected: impl FnOnce() -> bool) -> oneshot::Receiver<lapin::Error> {
        let (sender, receiver) = oneshot::channel();

        let Ok(mut guard) = self.0.lock() else {
            // The sender is dropped here, which wakes the receiver as a closure.
            error!("close listeners lock poisoned");
            return receiver;
        };

        if connected() {
            guard.push(sender);
        } else {
            let _ = sender.send(lapin::Error::InvalidConnectionState(
                ConnectionState::Closed,
            ));
        }

        receiver
    }

    fn notify(&self, err: &lapin::Error) {
        let Ok(mut guard) = self.0.lock() else {
            return;
        };
        for listener in guard.drain(..) {
            let _ = listener.send(err.clone());
        }
    }
}

/// A lapin connection that fans its error callback out to close listeners.
pub struct LapinConnection {
    inner: Connection,
    listeners: CloseListeners,
}

impl LapinConnection {
    fn new(inner: Connection) -> Self {
        let listeners = CloseListeners::default();

        let notified = listeners.clone();
        inner.on_error(move |err| {
            warn!(error = err.to_string(), "amqp connection closed by the broker");
            notified.notify(&err);
        });

        LapinConnection { inner, listeners }
    }
}

#[async_trait]
impl BrokerConnection for LapinConnection {
    async fn create_channel(&self) -> lapin::Result<Arc<dyn BrokerChannel>> {
        debug!("creating amqp channel...");
        let channel = self.inner.create_channel().await?;
        debug!("channel created");

        Ok(Arc::new(LapinChannel { inner: channel }))
    }

    fn notify_close(&self) -> oneshot::Receiver<lapin::Error> {
        self.listeners.register(|| self.inner.status().connected())
    }
}

/// A lapin channel.
pub struct LapinChannel {
    inner: Channel,
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: lapin::ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> lapin::Result<()> {
        self.inner
            .exchange_declare(name, kind, options, arguments)
            .await
    }

    async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> lapin::Result<String> {
        let queue = self.inner.queue_declare(name, options, arguments).await?;
        Ok(queue.name().to_string())
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        options: QueueBindOptions,
        arguments: FieldTable,
    ) -> lapin::Result<()> {
        self.inner
            .queue_bind(queue, exchange, routing_key, options, arguments)
            .await
    }

    async fn basic_qos(
        &self,
        prefetch_count: u16,
        prefetch_size: u32,
        global: bool,
    ) -> lapin::Result<()> {
        // lapin always sends a prefetch size of 0.
        if prefetch_size != 0 {
            warn!(prefetch_size, "prefetch size is not supported and was ignored");
        }

        self.inner
            .basic_qos(prefetch_count, BasicQosOptions { global })
            .await
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> lapin::Result<()> {
        let confirmation = self
            .inner
            .basic_publish(exchange, routing_key, options, payload, properties)
            .await?
            .await?;

        if let Confirmation::Nack(_) = confirmation {
            warn!(exchange, routing_key, "broker nacked the published message");
        }

        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
        arguments: FieldTable,
    ) -> lapin::Result<DeliveryStream> {
        let consumer = self
            .inner
            .basic_consume(queue, consumer_tag, options, arguments)
            .await?;

        Ok(consumer
            .map(|delivery| delivery.map(InboundDelivery::from))
            .boxed())
    }
}

#[async_trait]
impl Acknowledger for Acker {
    async fn ack(&self, options: BasicAckOptions) -> lapin::Result<()> {
        Acker::ack(self, options).await
    }
}

impl From<Delivery> for InboundDelivery {
    fn from(delivery: Delivery) -> Self {
        let properties = &delivery.properties;

        InboundDelivery {
            headers: properties.headers().clone().unwrap_or_default(),
            message_id: properties.message_id().as_ref().map(|id| id.to_string()),
            correlation_id: properties.correlation_id().as_ref().map(|id| id.to_string()),
            exchange: delivery.exchange.to_string(),
            routing_key: delivery.routing_key.to_string(),
            acker: AckHandle::new(Arc::new(delivery.acker)),
            body: delivery.data,
        }
    }
}
