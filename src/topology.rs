// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! This module declares the broker state an operation depends on. Producers and
//! consumers both install their topology in the same strict order:
//! 1. Declare the exchange, if one is configured
//! 2. Declare the queue, if one is configured
//! 3. Bind the queue to the exchange, when both are configured

use crate::{
    arguments::{self, Arguments},
    broker::BrokerChannel,
    errors::AmqpError,
    exchange::{self, ExchangeConfig},
    queue::{self, QueueConfig},
};
use lapin::options::QueueBindOptions;
use tracing::{debug, error};

/// The declarations an operation asks for.
pub(crate) struct TopologyPlan<'tp> {
    pub(crate) exchange: Option<&'tp ExchangeConfig>,
    pub(crate) queue: Option<&'tp QueueConfig>,
    pub(crate) routing_key: &'tp str,
    pub(crate) binding_arguments: Option<&'tp Arguments>,
}

/// What the broker reported back while installing a `TopologyPlan`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct DeclaredTopology {
    /// Name of the declared queue, broker-assigned for anonymous queues
    pub(crate) queue_name: Option<String>,
}

/// Installs the topology described by `plan`.
///
/// # Parameters
/// * `channel` - The channel every declaration is issued on
/// * `plan` - The exchange, queue and binding to declare
///
/// # Returns
/// The declared queue name, or the first declaration error
pub(crate) async fn install(
    channel: &dyn BrokerChannel,
    plan: &TopologyPlan<'_>,
) -> Result<DeclaredTopology, AmqpError> {
    exchange::declare_exchange(channel, plan.exchange).await?;

    let queue_name = queue::declare_queue(channel, plan.queue).await?;

    if let (Some(exch), Some(queue_name)) = (plan.exchange, queue_name.as_deref()) {
        bind_queue(channel, queue_name, exch, plan.routing_key, plan.binding_arguments).await?;
    }

    Ok(DeclaredTopology { queue_name })
}

async fn bind_queue(
    channel: &dyn BrokerChannel,
    queue_name: &str,
    exch: &ExchangeConfig,
    routing_key: &str,
    binding_arguments: Option<&Arguments>,
) -> Result<(), AmqpError> {
    debug!(
        "binding queue: {} to the exchange: {} with the key: {}",
        queue_name, exch.name, routing_key
    );

    match channel
        .queue_bind(
            queue_name,
            &exch.name,
            routing_key,
            QueueBindOptions {
                nowait: exch.no_wait,
            },
            arguments::to_field_table(binding_arguments),
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "error to bind queue to exchange");

            Err(AmqpError::BindingExchangeToQueueError(
                exch.name.clone(),
                queue_name.to_owned(),
            ))
        }
        _ => {
            debug!("queue was bounded");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{arguments::FieldValue, broker::MockBrokerChannel, config::Defaults};
    use lapin::types::AMQPValue;
    use mockall::Sequence;

    #[tokio::test]
    async fn declares_in_order_and_binds_once() {
        let defaults = Defaults::default();
        let mut exch = ExchangeConfig::new("orders", &defaults);
        exch.no_wait(true);
        let queue = QueueConfig::new("", &defaults);
        let mut binding_arguments = Arguments::new();
        binding_arguments.insert("x-match".to_owned(), FieldValue::from("all"));

        let mut seq = Sequence::new();
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_exchange_declare()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(()));
        channel
            .expect_queue_declare()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok("amq.gen-1".to_owned()));
        channel
            .expect_queue_bind()
            .withf(|queue, exchange, key, options, args| {
                queue == "amq.gen-1"
                    && exchange == "orders"
                    && key == "orders.created"
                    && options.nowait
                    && args.inner().get("x-match").is_some_and(|value| {
                        *value == AMQPValue::LongString("all".into())
                    })
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _, _| Ok(()));

        let declared = install(
            &channel,
            &TopologyPlan {
                exchange: Some(&exch),
                queue: Some(&queue),
                routing_key: "orders.created",
                binding_arguments: Some(&binding_arguments),
            },
        )
        .await
        .unwrap();

        assert_eq!(declared.queue_name.as_deref(), Some("amq.gen-1"));
    }

    #[tokio::test]
    async fn never_binds_without_an_exchange() {
        let queue = QueueConfig::new("orders", &Defaults::default());

        let mut channel = MockBrokerChannel::new();
        channel.expect_exchange_declare().never();
        channel
            .expect_queue_declare()
            .times(1)
            .returning(|name, _, _| Ok(name.to_owned()));
        channel.expect_queue_bind().never();

        let declared = install(
            &channel,
            &TopologyPlan {
                exchange: None,
                queue: Some(&queue),
                routing_key: "",
                binding_arguments: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(declared.queue_name.as_deref(), Some("orders"));
    }

    #[tokio::test]
    async fn never_binds_without_a_queue() {
        let exch = ExchangeConfig::new("orders", &Defaults::default());

        let mut channel = MockBrokerChannel::new();
        channel
            .expect_exchange_declare()
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        channel.expect_queue_declare().never();
        channel.expect_queue_bind().never();

        let declared = install(
            &channel,
            &TopologyPlan {
                exchange: Some(&exch),
                queue: None,
                routing_key: "rk",
                binding_arguments: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(declared, DeclaredTopology::default());
    }

    #[tokio::test]
    async fn nothing_configured_touches_nothing() {
        let mut channel = MockBrokerChannel::new();
        channel.expect_exchange_declare().never();
        channel.expect_queue_declare().never();
        channel.expect_queue_bind().never();

        let declared = install(
            &channel,
            &TopologyPlan {
                exchange: None,
                queue: None,
                routing_key: "rk",
                binding_arguments: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(declared.queue_name, None);
    }

    #[tokio::test]
    async fn bind_failure_stops_the_sequence() {
        let defaults = Defaults::default();
        let exch = ExchangeConfig::new("orders", &defaults);
        let queue = QueueConfig::new("created", &defaults);

        let mut channel = MockBrokerChannel::new();
        channel
            .expect_exchange_declare()
            .returning(|_, _, _, _| Ok(()));
        channel
            .expect_queue_declare()
            .returning(|name, _, _| Ok(name.to_owned()));
        channel.expect_queue_bind().times(1).returning(|_, _, _, _, _| {
            Err(lapin::Error::InvalidChannelState(lapin::ChannelState::Closed))
        });

        let err = install(
            &channel,
            &TopologyPlan {
                exchange: Some(&exch),
                queue: Some(&queue),
                routing_key: "",
                binding_arguments: None,
            },
        )
        .await
        .unwrap_err();

        assert_eq!(
            err,
            AmqpError::BindingExchangeToQueueError("orders".to_owned(), "created".to_owned())
        );
    }
}
