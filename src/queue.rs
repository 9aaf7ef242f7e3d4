// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Management for RabbitMQ
//!
//! This module provides the queue configuration used by producers and consumers.
//! A queue requested with an empty name is anonymous: the broker picks the name
//! and `declare_queue` hands it back so routing and binding use the real one.

use crate::{
    arguments::{self, Arguments, FieldValue},
    broker::BrokerChannel,
    config::Defaults,
    errors::AmqpError,
};
use lapin::options::QueueDeclareOptions;
use tracing::{debug, error};

/// Prefix RabbitMQ reserves for server-named queues
pub const ANONYMOUS_QUEUE_PREFIX: &str = "amq.";

/// Constant for the argument used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Constant for the argument used to specify a dead letter routing key
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Constant for the argument used to specify message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Constant for the argument used to specify maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";
/// Constant for the argument used to specify maximum queue size in bytes
pub const AMQP_HEADERS_MAX_LENGTH_BYTES: &str = "x-max-length-bytes";

/// Configuration of a RabbitMQ queue.
///
/// Besides the protocol flags it offers helpers for the broker arguments that
/// are commonly set on queues: message TTL, max length and dead-lettering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) auto_delete: bool,
    pub(crate) exclusive: bool,
    pub(crate) no_wait: bool,
    pub(crate) passive: bool,
    pub(crate) arguments: Option<Arguments>,
}

impl QueueConfig {
    /// Creates a new queue configuration with the given name.
    ///
    /// An empty name asks the broker to generate one.
    ///
    /// # Parameters
    /// * `name` - The name of the queue
    /// * `defaults` - The client defaults
    ///
    /// # Returns
    /// A new queue configuration
    pub fn new(name: &str, defaults: &Defaults) -> QueueConfig {
        QueueConfig {
            name: name.to_owned(),
            durable: defaults.durable,
            auto_delete: defaults.auto_delete,
            exclusive: defaults.exclusive,
            no_wait: defaults.no_wait,
            passive: defaults.passive,
            arguments: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(&mut self, durable: bool) -> &mut Self {
        self.durable = durable;
        self
    }

    /// Deletes the queue once its last consumer is cancelled.
    pub fn auto_delete(&mut self, auto_delete: bool) -> &mut Self {
        self.auto_delete = auto_delete;
        self
    }

    /// Makes the queue exclusive to the connection.
    ///
    /// Exclusive queues are deleted when the connection closes.
    pub fn exclusive(&mut self, exclusive: bool) -> &mut Self {
        self.exclusive = exclusive;
        self
    }

    pub fn no_wait(&mut self, no_wait: bool) -> &mut Self {
        self.no_wait = no_wait;
        self
    }

    /// Only checks that the queue exists instead of creating it.
    pub fn passive(&mut self, passive: bool) -> &mut Self {
        self.passive = passive;
        self
    }

    /// Replaces the declaration arguments.
    pub fn arguments(&mut self, arguments: Arguments) -> &mut Self {
        self.arguments = Some(arguments);
        self
    }

    /// Adds a single declaration argument.
    pub fn argument(&mut self, key: &str, value: impl Into<FieldValue>) -> &mut Self {
        self.arguments
            .get_or_insert_with(Arguments::new)
            .insert(key.to_owned(), value.into());
        self
    }

    /// Sets the message Time-To-Live (TTL) for the queue, in milliseconds.
    pub fn message_ttl(&mut self, ttl: i64) -> &mut Self {
        self.argument(AMQP_HEADERS_MESSAGE_TTL, ttl)
    }

    /// Sets the maximum number of messages the queue can hold.
    pub fn max_length(&mut self, max: i64) -> &mut Self {
        self.argument(AMQP_HEADERS_MAX_LENGTH, max)
    }

    /// Sets the maximum size in bytes the queue can hold.
    pub fn max_length_bytes(&mut self, max_bytes: i64) -> &mut Self {
        self.argument(AMQP_HEADERS_MAX_LENGTH_BYTES, max_bytes)
    }

    /// Routes rejected, expired and overflowing messages to `exchange`.
    ///
    /// # Parameters
    /// * `exchange` - Dead letter exchange, empty for the default exchange
    /// * `routing_key` - Routing key used when dead-lettering, if it should differ
    ///   from the original one
    pub fn dead_letter(&mut self, exchange: &str, routing_key: Option<&str>) -> &mut Self {
        self.argument(AMQP_HEADERS_DEAD_LETTER_EXCHANGE, exchange);
        if let Some(key) = routing_key {
            self.argument(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY, key);
        }
        self
    }
}

/// Declares the queue described by `config`.
///
/// # Parameters
/// * `channel` - The channel to declare the queue on
/// * `config` - The queue to declare, if any
///
/// # Returns
/// The name the broker assigned to the queue, `None` when no queue was
/// configured, or `AmqpError::DeclareQueueError` on failure
pub(crate) async fn declare_queue(
    channel: &dyn BrokerChannel,
    config: Option<&QueueConfig>,
) -> Result<Option<String>, AmqpError> {
    let Some(def) = config else {
        return Ok(None);
    };

    debug!("creating queue: {}", def.name);

    match channel
        .queue_declare(
            &def.name,
            QueueDeclareOptions {
                passive: def.passive,
                durable: def.durable,
                exclusive: def.exclusive,
                auto_delete: def.auto_delete,
                nowait: def.no_wait,
            },
            arguments::to_field_table(def.arguments.as_ref()),
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), name = def.name, "failure to declare queue");
            Err(AmqpError::DeclareQueueError(def.name.clone()))
        }
        Ok(name) => {
            debug!("queue: {} was created", name);
            Ok(Some(name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBrokerChannel;
    use lapin::types::AMQPValue;

    #[test]
    fn argument_helpers_fill_the_argument_table() {
        let mut config = QueueConfig::new("orders", &Defaults::default());
        config
            .message_ttl(60_000)
            .max_length(10)
            .max_length_bytes(1024)
            .dead_letter("", Some("orders-dlq"));

        let args = config.arguments.unwrap();
        assert_eq!(args.get(AMQP_HEADERS_MESSAGE_TTL), Some(&FieldValue::Int(60_000)));
        assert_eq!(args.get(AMQP_HEADERS_MAX_LENGTH), Some(&FieldValue::Int(10)));
        assert_eq!(args.get(AMQP_HEADERS_MAX_LENGTH_BYTES), Some(&FieldValue::Int(1024)));
        assert_eq!(
            args.get(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            Some(&FieldValue::String(String::new()))
        );
        assert_eq!(
            args.get(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            Some(&FieldValue::String("orders-dlq".to_owned()))
        );
    }

    #[tokio::test]
    async fn absent_config_declares_nothing() {
        let mut channel = MockBrokerChannel::new();
        channel.expect_queue_declare().never();

        assert_eq!(declare_queue(&channel, None).await, Ok(None));
    }

    #[tokio::test]
    async fn anonymous_queue_returns_the_broker_assigned_name() {
        let mut config = QueueConfig::new("", &Defaults::default());
        config.exclusive(true).max_length(5);

        let mut channel = MockBrokerChannel::new();
        channel
            .expect_queue_declare()
            .withf(|name, options, args| {
                name.is_empty()
                    && options.exclusive
                    && args.inner().get(AMQP_HEADERS_MAX_LENGTH) == Some(&AMQPValue::LongInt(5))
            })
            .times(1)
            .returning(|_, _, _| Ok("amq.gen-JzTY20BRgKO".to_owned()));

        assert_eq!(
            declare_queue(&channel, Some(&config)).await,
            Ok(Some("amq.gen-JzTY20BRgKO".to_owned()))
        );
    }

    #[tokio::test]
    async fn declare_failure_is_reported() {
        let config = QueueConfig::new("orders", &Defaults::default());

        let mut channel = MockBrokerChannel::new();
        channel.expect_queue_declare().times(1).returning(|_, _, _| {
            Err(lapin::Error::InvalidChannelState(lapin::ChannelState::Closed))
        });

        assert_eq!(
            declare_queue(&channel, Some(&config)).await,
            Err(AmqpError::DeclareQueueError("orders".to_owned()))
        );
    }
}
