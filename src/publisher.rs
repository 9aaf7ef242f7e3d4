// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Producer
//!
//! This module provides functionality for publishing messages to RabbitMQ.
//! Each publish declares the topology it was configured with, serializes the
//! payload to JSON and propagates the OpenTelemetry context of the caller in
//! the message headers.

use crate::{
    arguments::{self, FieldValue, Headers},
    broker::BrokerConnector,
    channel::LapinConnector,
    client::ClientCore,
    config::BrokerConfig,
    connection::{ClientRole, Session},
    errors::AmqpError,
    exchange::ExchangeConfig,
    network::{PeerResolver, SystemResolver},
    otel::{self, Operation, SpanDetails},
    producer_config::{ProducerConfig, ProducerConfigBuilder},
    queue::QueueConfig,
    topology,
};
use lapin::{
    options::BasicPublishOptions,
    types::{FieldTable, ShortString},
    BasicProperties,
};
use opentelemetry::{
    trace::{Status, TraceContextExt},
    Context,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// Delivery mode of persistent messages
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// A payload together with the headers it is published with.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub headers: Option<Headers>,
}

impl<T> MessageEnvelope<T> {
    pub fn new(payload: T) -> Self {
        MessageEnvelope {
            payload,
            headers: None,
        }
    }

    /// Adds a header. Headers override tracing headers with the same key.
    pub fn header(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .insert(key.to_owned(), value.into());
        self
    }
}

/// Publishes messages on a supervised connection.
pub struct Producer {
    core: ClientCore,
}

impl Producer {
    /// Connects a producer to the broker named by `config`.
    ///
    /// # Parameters
    /// * `config` - Connection settings and builder defaults
    ///
    /// # Returns
    /// The connected producer, or the error of the first connection attempt
    pub async fn connect(config: BrokerConfig) -> Result<Self, AmqpError> {
        Producer::with_connector(config, Arc::new(LapinConnector), Arc::new(SystemResolver)).await
    }

    /// Connects a producer with a custom connector and peer resolver.
    pub async fn with_connector(
        config: BrokerConfig,
        connector: Arc<dyn BrokerConnector>,
        resolver: Arc<dyn PeerResolver>,
    ) -> Result<Self, AmqpError> {
        let core = ClientCore::start(ClientRole::Producer, config, connector, resolver).await?;

        Ok(Producer { core })
    }

    /// Stops reconnecting after the next connection loss. Dropping the
    /// producer has the same effect.
    pub fn close(&self) {
        self.core.supervisor.shutdown();
    }

    /// Publishes `payload` as JSON.
    ///
    /// # Parameters
    /// * `ctx` - OpenTelemetry context the producer span is a child of
    /// * `payload` - The message body
    /// * `configure` - Declares the exchange and queue and sets the publish options
    ///
    /// # Returns
    /// Ok(()) once the broker took the message, or the first failing step
    pub async fn produce<T, F>(
        &self,
        ctx: &Context,
        payload: &T,
        configure: F,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized,
        F: FnOnce(&mut ProducerConfigBuilder),
    {
        self.publish(ctx, payload, None, self.configure(configure)).await
    }

    /// Publishes the payload of `envelope` as JSON together with its headers.
    pub async fn produce_with_envelope<T, F>(
        &self,
        ctx: &Context,
        envelope: &MessageEnvelope<T>,
        configure: F,
    ) -> Result<(), AmqpError>
    where
        T: Serialize,
        F: FnOnce(&mut ProducerConfigBuilder),
    {
        self.publish(
            ctx,
            &envelope.payload,
            envelope.headers.as_ref(),
            self.configure(configure),
        )
        .await
    }

    fn configure<F>(&self, configure: F) -> ProducerConfig
    where
        F: FnOnce(&mut ProducerConfigBuilder),
    {
        let mut builder = ProducerConfigBuilder::new(self.core.defaults());
        configure(&mut builder);
        builder.build()
    }

    async fn publish<T>(
        &self,
        ctx: &Context,
        payload: &T,
        headers: Option<&Headers>,
        config: ProducerConfig,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized,
    {
        let _guard = self.core.operation_lock.lock().await;
        let supervisor = &self.core.supervisor;
        let session = supervisor.session();

        let declared = topology::install(session.channel(), &config.topology())
            .await
            .map_err(|err| supervisor.classify(&session, err))?;

        let body = serde_json::to_vec(payload).map_err(|err| {
            error!(error = err.to_string(), "error serializing the payload");
            AmqpError::SerializePayloadError(err.to_string())
        })?;

        let routing_key = config.publish_routing_key(declared.queue_name.as_deref());
        let message_id = Uuid::new_v4().to_string();
        let destination = otel::build_destination(
            config.queue().map(QueueConfig::name),
            config.exchange().map(ExchangeConfig::name),
            &routing_key,
        );

        let span_ctx = self.core.telemetry.start_span(
            ctx,
            &SpanDetails {
                operation: Operation::Send,
                destination: &destination,
                message_id: &message_id,
                payload_size: body.len(),
                routing_key: config.routing_key(),
                correlation_id: None,
            },
        );

        let mut amqp_headers = otel::inject_context(&span_ctx);
        if let Some(headers) = headers {
            arguments::merge_headers(&mut amqp_headers, headers);
        }

        let properties = BasicProperties::default()
            .with_content_type(ShortString::from(config.content_type().as_str()))
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
            .with_message_id(ShortString::from(message_id))
            .with_headers(FieldTable::from(amqp_headers));

        let result = self
            .send(&session, &config, &routing_key, &body, properties)
            .await;

        let span = span_ctx.span();
        if let Err(err) = &result {
            span.record_error(err);
            span.set_status(Status::error(err.to_string()));
        }
        span.end();

        result
    }

    async fn send(
        &self,
        session: &Session,
        config: &ProducerConfig,
        routing_key: &str,
        body: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        let supervisor = &self.core.supervisor;
        supervisor.ensure_current(session)?;

        let exchange = config.publish_exchange();
        debug!(exchange, routing_key, "publishing message");

        let publishing = session.channel().basic_publish(
            exchange,
            routing_key,
            BasicPublishOptions {
                mandatory: config.mandatory(),
                immediate: config.immediate(),
            },
            body,
            properties,
        );

        match tokio::time::timeout(config.timeout(), publishing).await {
            Err(_) => {
                error!(timeout = ?config.timeout(), "publishing timed out");
                Err(AmqpError::PublishTimeout(config.timeout()))
            }
            Ok(Err(err)) => {
                error!(error = err.to_string(), "error publishing message");
                Err(supervisor.classify(session, AmqpError::PublishingError(err.to_string())))
            }
            Ok(Ok(())) => {
                debug!("message published");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        broker::{BrokerChannel, DeliveryStream, MockBrokerChannel},
        test_support::{self, NoResolver},
    };
    use async_trait::async_trait;
    use lapin::{
        options::{
            BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
        },
        types::AMQPValue,
    };
    use opentelemetry::trace::SpanKind;
    use std::{sync::Mutex, time::Duration};
    use tokio::sync::oneshot;

    #[derive(Serialize)]
    struct OrderCreated {
        id: u32,
    }

    fn closed() -> lapin::Error {
        lapin::Error::InvalidChannelState(lapin::ChannelState::Closed)
    }

    async fn producer(channel: Arc<dyn BrokerChannel>) -> (Producer, oneshot::Sender<lapin::Error>) {
        let (connector, closer) = test_support::single_channel_connector(channel);
        let producer = Producer::with_connector(
            test_support::broker_config(),
            connector,
            Arc::new(NoResolver),
        )
        .await
        .unwrap();

        (producer, closer)
    }

    #[tokio::test]
    async fn publishes_to_the_queue_through_the_default_exchange() {
        let exporter = test_support::init_tracing();
        let captured = Arc::new(Mutex::new(None::<(Vec<u8>, BasicProperties)>));

        let mut channel = MockBrokerChannel::new();
        channel
            .expect_queue_declare()
            .times(1)
            .returning(|name, _, _| Ok(name.to_owned()));
        channel.expect_queue_bind().never();
        channel
            .expect_basic_publish()
            .withf(|exchange, routing_key, options, _, _| {
                exchange.is_empty() && routing_key == "publisher-orders" && options.mandatory
            })
            .times(1)
            .returning({
                let captured = captured.clone();
                move |_, _, _, payload, properties| {
                    *captured.lock().unwrap() = Some((payload.to_vec(), properties));
                    Ok(())
                }
            });

        let (producer, _closer) = producer(Arc::new(channel)).await;
        producer
            .produce(&Context::new(), &OrderCreated { id: 7 }, |cfg| {
                cfg.queue("publisher-orders");
                cfg.mandatory(true);
            })
            .await
            .unwrap();

        let (payload, properties) = captured.lock().unwrap().take().unwrap();
        assert_eq!(payload, br#"{"id":7}"#.to_vec());
        assert_eq!(
            properties.content_type().as_ref().map(|ct| ct.as_str()),
            Some("application/json")
        );
        assert_eq!(*properties.delivery_mode(), Some(PERSISTENT_DELIVERY_MODE));
        assert!(properties.message_id().is_some());
        assert!(properties
            .headers()
            .as_ref()
            .is_some_and(|headers| headers.inner().contains_key("traceparent")));

        let span = test_support::finished_span(&exporter, "publisher-orders send");
        assert_eq!(span.span_kind, SpanKind::Producer);
    }

    #[tokio::test]
    async fn caller_headers_override_tracing_headers() {
        let _exporter = test_support::init_tracing();
        let captured = Arc::new(Mutex::new(None::<FieldTable>));

        let mut channel = MockBrokerChannel::new();
        channel
            .expect_exchange_declare()
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        channel
            .expect_basic_publish()
            .withf(|exchange, routing_key, _, _, _| {
                exchange == "publisher-headers" && routing_key == "rk"
            })
            .times(1)
            .returning({
                let captured = captured.clone();
                move |_, _, _, _, properties| {
                    *captured.lock().unwrap() = properties.headers().clone();
                    Ok(())
                }
            });

        let envelope = MessageEnvelope::new(OrderCreated { id: 1 })
            .header("traceparent", "caller")
            .header("retries", 2);

        let (producer, _closer) = producer(Arc::new(channel)).await;
        producer
            .produce_with_envelope(&Context::new(), &envelope, |cfg| {
                cfg.exchange("publisher-headers");
                cfg.routing_key("rk");
            })
            .await
            .unwrap();

        let headers = captured.lock().unwrap().take().unwrap();
        assert_eq!(
            headers.inner().get("traceparent"),
            Some(&AMQPValue::LongString("caller".into()))
        );
        assert_eq!(headers.inner().get("retries"), Some(&AMQPValue::LongInt(2)));
    }

    #[tokio::test]
    async fn declaration_failure_stops_before_publishing() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_exchange_declare()
            .returning(|_, _, _, _| Err(closed()));
        channel.expect_basic_publish().never();

        let (producer, _closer) = producer(Arc::new(channel)).await;
        let err = producer
            .produce(&Context::new(), "payload", |cfg| {
                cfg.exchange("publisher-broken");
            })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AmqpError::DeclareExchangeError("publisher-broken".to_owned())
        );
    }

    #[tokio::test]
    async fn serialization_failure_is_reported() {
        let mut channel = MockBrokerChannel::new();
        channel.expect_basic_publish().never();

        let mut payload = std::collections::HashMap::new();
        payload.insert(vec![1u8], "non-string keys cannot be encoded as JSON");

        let (producer, _closer) = producer(Arc::new(channel)).await;
        let err = producer
            .produce(&Context::new(), &payload, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, AmqpError::SerializePayloadError(_)));
    }

    #[tokio::test]
    async fn broker_failure_is_a_publishing_error() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_basic_publish()
            .times(1)
            .returning(|_, _, _, _, _| Err(closed()));

        let (producer, _closer) = producer(Arc::new(channel)).await;
        let err = producer
            .produce(&Context::new(), "payload", |cfg| {
                cfg.routing_key("publisher-failure");
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AmqpError::PublishingError(_)));
        assert!(err.is_retryable());
    }

    /// A channel whose publishes never complete.
    struct StalledChannel;

    #[async_trait]
    impl BrokerChannel for StalledChannel {
        async fn exchange_declare(
            &self,
            _name: &str,
            _kind: lapin::ExchangeKind,
            _options: ExchangeDeclareOptions,
            _arguments: FieldTable,
        ) -> lapin::Result<()> {
            Ok(())
        }

        async fn queue_declare(
            &self,
            name: &str,
            _options: QueueDeclareOptions,
            _arguments: FieldTable,
        ) -> lapin::Result<String> {
            Ok(name.to_owned())
        }

        async fn queue_bind(
            &self,
            _queue: &str,
            _exchange: &str,
            _routing_key: &str,
            _options: QueueBindOptions,
            _arguments: FieldTable,
        ) -> lapin::Result<()> {
            Ok(())
        }

        async fn basic_qos(
            &self,
            _prefetch_count: u16,
            _prefetch_size: u32,
            _global: bool,
        ) -> lapin::Result<()> {
            Ok(())
        }

        async fn basic_publish(
            &self,
            _exchange: &str,
            _routing_key: &str,
            _options: BasicPublishOptions,
            _payload: &[u8],
            _properties: BasicProperties,
        ) -> lapin::Result<()> {
            std::future::pending().await
        }

        async fn basic_consume(
            &self,
            _queue: &str,
            _consumer_tag: &str,
            _options: BasicConsumeOptions,
            _arguments: FieldTable,
        ) -> lapin::Result<DeliveryStream> {
            Err(closed())
        }
    }

    #[tokio::test]
    async fn stalled_publish_times_out() {
        let (producer, _closer) = producer(Arc::new(StalledChannel)).await;

        let err = producer
            .produce(&Context::new(), "payload", |cfg| {
                cfg.routing_key("publisher-stalled")
                    .timeout(Duration::from_millis(50));
            })
            .await
            .unwrap_err();

        assert_eq!(err, AmqpError::PublishTimeout(Duration::from_millis(50)));
    }
}
