// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! This module provides functionality for consuming messages from RabbitMQ.
//! A `consume` call declares the configured topology, applies the QoS settings,
//! registers the consumer and hands every delivery to a `MessageHandler` on a
//! background task. The remote trace context carried in the message headers
//! becomes the parent of the consumer span the handler runs in.

use crate::{
    arguments,
    broker::{BrokerConnector, DeliveryStream, InboundDelivery},
    channel::LapinConnector,
    client::ClientCore,
    config::BrokerConfig,
    connection::ClientRole,
    consumer_config::{ConsumerConfig, ConsumerConfigBuilder},
    errors::AmqpError,
    network::{PeerResolver, SystemResolver},
    otel::{self, MessagingTelemetry, Operation, SpanDetails},
    qos, topology,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::BasicConsumeOptions;
use opentelemetry::{
    trace::{Status, TraceContextExt},
    Context,
};
use std::{future::Future, sync::Arc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Processes the body of one delivery.
///
/// The context holds the consumer span, a child of the producer span when the
/// message carried trace headers.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: Context, body: Vec<u8>);
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Context, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, ctx: Context, body: Vec<u8>) {
        self(ctx, body).await
    }
}

/// Consumes messages on a supervised connection.
pub struct Consumer {
    core: ClientCore,
}

impl Consumer {
    /// Connects a consumer to the broker named by `config`.
    pub async fn connect(config: BrokerConfig) -> Result<Self, AmqpError> {
        Consumer::with_connector(config, Arc::new(LapinConnector), Arc::new(SystemResolver)).await
    }

    /// Connects a consumer with a custom connector and peer resolver.
    pub async fn with_connector(
        config: BrokerConfig,
        connector: Arc<dyn BrokerConnector>,
        resolver: Arc<dyn PeerResolver>,
    ) -> Result<Self, AmqpError> {
        let core = ClientCore::start(ClientRole::Consumer, config, connector, resolver).await?;

        Ok(Consumer { core })
    }

    /// Stops reconnecting after the next connection loss. Dropping the
    /// consumer has the same effect.
    pub fn close(&self) {
        self.core.supervisor.shutdown();
    }

    /// Starts consuming.
    ///
    /// The topology is declared in order (exchange, queue, binding), then the
    /// QoS settings are applied and the consumer is registered on the binding
    /// key: the declared queue name, or the configured routing key when no
    /// queue was declared.
    ///
    /// # Parameters
    /// * `configure` - Declares the exchange, queue and QoS and sets the consumer options
    /// * `handler` - Called once per delivery
    ///
    /// # Returns
    /// A handle on the task delivering messages to `handler`, or the first
    /// failing setup step
    pub async fn consume<F, H>(
        &self,
        configure: F,
        handler: H,
    ) -> Result<ConsumerHandle, AmqpError>
    where
        F: FnOnce(&mut ConsumerConfigBuilder),
        H: MessageHandler,
    {
        let mut builder = ConsumerConfigBuilder::new(self.core.defaults());
        configure(&mut builder);
        let config = builder.build();

        let (deliveries, binding_key) = self.register(&config).await?;

        let shutdown = CancellationToken::new();
        let dispatch = Dispatch {
            telemetry: self.core.telemetry.clone(),
            handler: Arc::new(handler),
            config,
            binding_key,
        };
        let task = tokio::spawn(drain(deliveries, dispatch, shutdown.clone()));

        Ok(ConsumerHandle { shutdown, task })
    }

    async fn register(
        &self,
        config: &ConsumerConfig,
    ) -> Result<(DeliveryStream, String), AmqpError> {
        let _guard = self.core.operation_lock.lock().await;
        let supervisor = &self.core.supervisor;
        let session = supervisor.session();
        let channel = session.channel();

        let declared = topology::install(channel, &config.topology())
            .await
            .map_err(|err| supervisor.classify(&session, err))?;

        qos::configure_qos(channel, config.qos())
            .await
            .map_err(|err| supervisor.classify(&session, err))?;

        let binding_key = config.binding_key(declared.queue_name.as_deref());
        supervisor.ensure_current(&session)?;

        debug!(queue = %binding_key, "registering consumer");
        let deliveries = match channel
            .basic_consume(
                &binding_key,
                config.consumer_identity(),
                BasicConsumeOptions {
                    no_local: config.no_local(),
                    no_ack: config.auto_ack(),
                    exclusive: config.exclusive(),
                    nowait: config.no_wait(),
                },
                arguments::to_field_table(config.arguments()),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "failure to declare consumer");
                return Err(supervisor.classify(
                    &session,
                    AmqpError::ConsumerDeclarationError(binding_key),
                ));
            }
            Ok(deliveries) => deliveries,
        };

        info!(queue = %binding_key, "waiting for messages");

        Ok((deliveries, binding_key))
    }
}

/// Handle on a running consumer.
///
/// The delivery task stops when `stop` is called, when the broker closes the
/// delivery stream or when the stream fails. Dropping the handle detaches the
/// task.
pub struct ConsumerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<Result<(), AmqpError>>,
}

impl ConsumerHandle {
    /// Asks the delivery task to stop once the current delivery is handled.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the delivery task to end.
    ///
    /// # Returns
    /// Ok(()) when the task was stopped or the stream closed, or the stream error
    pub async fn wait(self) -> Result<(), AmqpError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => {
                error!(error = err.to_string(), "consumer task failed");
                Err(AmqpError::ConsumerError(err.to_string()))
            }
        }
    }
}

/// What the delivery task needs to process one message.
struct Dispatch<H> {
    telemetry: MessagingTelemetry,
    handler: Arc<H>,
    config: ConsumerConfig,
    binding_key: String,
}

async fn drain<H: MessageHandler>(
    mut deliveries: DeliveryStream,
    dispatch: Dispatch<H>,
    shutdown: CancellationToken,
) -> Result<(), AmqpError> {
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("consumer stopped");
                return Ok(());
            }
            next = deliveries.next() => next,
        };

        match next {
            None => {
                warn!("delivery stream closed");
                return Ok(());
            }
            Some(Err(err)) => {
                error!(error = err.to_string(), "error receiving delivery");
                return Err(AmqpError::ConsumerError(err.to_string()));
            }
            Some(Ok(delivery)) => dispatch.process(delivery).await,
        }
    }
}

impl<H: MessageHandler> Dispatch<H> {
    async fn process(&self, delivery: InboundDelivery) {
        let parent = otel::extract_context(&delivery.headers);

        let exchange = self
            .config
            .exchange()
            .map(|_| delivery.exchange.as_str());
        let destination = otel::build_destination(
            self.config.queue().map(|queue| queue.name()),
            exchange,
            &self.binding_key,
        );

        let ctx = self.telemetry.start_span(
            &parent,
            &SpanDetails {
                operation: Operation::Receive,
                destination: &destination,
                message_id: delivery.message_id.as_deref().unwrap_or_default(),
                payload_size: delivery.body.len(),
                routing_key: self.config.routing_key(),
                correlation_id: delivery.correlation_id.as_deref(),
            },
        );

        debug!(
            exchange = %delivery.exchange,
            routing_key = %delivery.routing_key,
            "message received"
        );

        self.handler.handle(ctx.clone(), delivery.body).await;

        let acked = match self.config.auto_ack() {
            true => Ok(()),
            false => delivery.acker.ack().await,
        };

        let span = ctx.span();
        if let Err(err) = acked {
            error!(error = err.to_string(), "error whiling ack msg");
            let err = AmqpError::AckMessageError(err.to_string());
            span.record_error(&err);
            span.set_status(Status::error(err.to_string()));
        }
        span.end();
    }
}
