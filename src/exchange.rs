// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Management for RabbitMQ
//!
//! This module provides the exchange configuration used by producers and
//! consumers. Exchanges are the routing mechanism in RabbitMQ that determine how
//! messages are distributed to queues. An `ExchangeConfig` is only declared when
//! the caller asked for one; an absent configuration never touches the broker.

use crate::{
    arguments::{self, Arguments, FieldValue},
    broker::BrokerChannel,
    config::Defaults,
    errors::AmqpError,
};
use lapin::options::ExchangeDeclareOptions;
use serde::Deserialize;
use tracing::{debug, error};

/// Constant for the argument used to specify the delayed exchange type
pub const AMQP_HEADERS_DELAYED_EXCHANGE_TYPE: &str = "x-delayed-type";

/// Represents the types of exchanges available in RabbitMQ.
///
/// Each exchange type has specific routing behavior:
/// - Direct: Routes messages to queues based on an exact match of routing keys
/// - Fanout: Broadcasts messages to all bound queues regardless of routing keys
/// - Topic: Routes messages based on wildcard pattern matching of routing keys
/// - Headers: Routes based on message header values instead of routing keys
/// - XMessageDelayed: Extension for delayed message delivery (plugin required)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Direct,
    #[default]
    Fanout,
    Topic,
    Headers,
    #[serde(rename = "x-delayed-message")]
    XMessageDelayed,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
            ExchangeKind::XMessageDelayed => "x-delayed-message",
        }
    }
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::XMessageDelayed => {
                lapin::ExchangeKind::Custom(ExchangeKind::XMessageDelayed.as_str().to_owned())
            }
        }
    }
}

/// Configuration of a RabbitMQ exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeConfig {
    pub(crate) name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) durable: bool,
    pub(crate) auto_delete: bool,
    pub(crate) internal: bool,
    pub(crate) no_wait: bool,
    pub(crate) passive: bool,
    pub(crate) arguments: Option<Arguments>,
}

impl ExchangeConfig {
    /// Creates a new exchange configuration with the given name.
    ///
    /// Kind and flags are taken from `defaults`.
    ///
    /// # Parameters
    /// * `name` - The name of the exchange
    /// * `defaults` - The client defaults
    ///
    /// # Returns
    /// A new exchange configuration
    pub fn new(name: &str, defaults: &Defaults) -> ExchangeConfig {
        ExchangeConfig {
            name: name.to_owned(),
            kind: defaults.exchange_kind,
            durable: defaults.durable,
            auto_delete: defaults.auto_delete,
            internal: defaults.internal,
            no_wait: defaults.no_wait,
            passive: defaults.passive,
            arguments: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the exchange type.
    pub fn kind(&mut self, kind: ExchangeKind) -> &mut Self {
        self.kind = kind;
        self
    }

    /// Turns the exchange into a delayed exchange routing like `kind`.
    ///
    /// This requires the x-delayed-message plugin to be installed on the RabbitMQ server.
    pub fn delayed(&mut self, kind: ExchangeKind) -> &mut Self {
        self.kind = ExchangeKind::XMessageDelayed;
        self.argument(AMQP_HEADERS_DELAYED_EXCHANGE_TYPE, kind.as_str())
    }

    /// Makes the exchange durable, persisting across broker restarts.
    pub fn durable(&mut self, durable: bool) -> &mut Self {
        self.durable = durable;
        self
    }

    /// Deletes the exchange once the last queue is unbound from it.
    pub fn auto_delete(&mut self, auto_delete: bool) -> &mut Self {
        self.auto_delete = auto_delete;
        self
    }

    /// Makes the exchange internal, preventing direct publishing.
    pub fn internal(&mut self, internal: bool) -> &mut Self {
        self.internal = internal;
        self
    }

    pub fn no_wait(&mut self, no_wait: bool) -> &mut Self {
        self.no_wait = no_wait;
        self
    }

    /// Only checks that the exchange exists instead of creating it.
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
}

/// Declares the exchange described by `config`.
///
/// A `None` configuration is a no-op.
///
/// # Parameters
/// * `channel` - The channel to declare the exchange on
/// * `config` - The exchange to declare, if any
///
/// # Returns
/// Ok(()) on success or `AmqpError::DeclareExchangeError` on failure
pub(crate) async fn declare_exchange(
    channel: &dyn BrokerChannel,
    config: Option<&ExchangeConfig>,
) -> Result<(), AmqpError> {
    let Some(exch) = config else {
        return Ok(());
    };

    debug!("creating exchange: {}", exch.name);

    match channel
        .exchange_declare(
            &exch.name,
            exch.kind.into(),
            ExchangeDeclareOptions {
                passive: exch.passive,
                durable: exch.durable,
                auto_delete: exch.auto_delete,
                internal: exch.internal,
                nowait: exch.no_wait,
            },
            arguments::to_field_table(exch.arguments.as_ref()),
        )
        .await
    {
        Err(err) => {
            error!(
                error = err.to_string(),
                name = exch.name,
                "error to declare the exchange"
            );
            Err(AmqpError::DeclareExchangeError(exch.name.clone()))
        }
        _ => {
            debug!("exchange: {} was created", exch.name);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBrokerChannel;
    use lapin::types::{AMQPValue, LongString};

    #[test]
    fn starts_from_defaults() {
        let defaults = Defaults {
            durable: true,
            ..Defaults::default()
        };
        let config = ExchangeConfig::new("orders", &defaults);

        assert_eq!(config.name(), "orders");
        assert_eq!(config.kind, ExchangeKind::Fanout);
        assert!(config.durable);
        assert!(config.arguments.is_none());
    }

    #[test]
    fn delayed_exchange_records_the_routing_kind() {
        let mut config = ExchangeConfig::new("later", &Defaults::default());
        config.delayed(ExchangeKind::Direct);

        assert_eq!(config.kind, ExchangeKind::XMessageDelayed);
        assert_eq!(
            config
                .arguments
                .as_ref()
                .and_then(|args| args.get(AMQP_HEADERS_DELAYED_EXCHANGE_TYPE)),
            Some(&FieldValue::String("direct".to_owned()))
        );
        assert_eq!(
            lapin::ExchangeKind::from(config.kind),
            lapin::ExchangeKind::Custom("x-delayed-message".to_owned())
        );
    }

    #[tokio::test]
    async fn absent_config_declares_nothing() {
        let mut channel = MockBrokerChannel::new();
        channel.expect_exchange_declare().never();

        declare_exchange(&channel, None).await.unwrap();
    }

    #[tokio::test]
    async fn declares_exactly_once_with_configured_flags() {
        let mut config = ExchangeConfig::new("orders", &Defaults::default());
        config
            .kind(ExchangeKind::Topic)
            .durable(true)
            .no_wait(true)
            .argument("alternate-exchange", "unrouted");

        let mut channel = MockBrokerChannel::new();
        channel
            .expect_exchange_declare()
            .withf(|name, kind, options, args| {
                name == "orders"
                    && *kind == lapin::ExchangeKind::Topic
                    && options.durable
                    && options.nowait
                    && !options.auto_delete
                    && args.inner().get("alternate-exchange")
                        == Some(&AMQPValue::LongString(LongString::from("unrouted")))
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        declare_exchange(&channel, Some(&config)).await.unwrap();
    }

    #[tokio::test]
    async fn declare_failure_is_reported() {
        let config = ExchangeConfig::new("orders", &Defaults::default());

        let mut channel = MockBrokerChannel::new();
        channel
            .expect_exchange_declare()
            .times(1)
            .returning(|_, _, _, _| {
                Err(lapin::Error::InvalidChannelState(lapin::ChannelState::Closed))
            });

        assert_eq!(
            declare_exchange(&channel, Some(&config)).await,
            Err(AmqpError::DeclareExchangeError("orders".to_owned()))
        );
    }
}
