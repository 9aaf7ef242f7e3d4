// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Producer Configuration
//!
//! Every `produce` call builds a fresh `ProducerConfigBuilder` from the client
//! defaults, hands it to the caller's configuration closure and freezes the
//! result into a `ProducerConfig`. The frozen configuration owns the policy that
//! turns the declared topology into the exchange and routing key of the publish.

use crate::{
    config::{ContentType, Defaults},
    exchange::ExchangeConfig,
    queue::{QueueConfig, ANONYMOUS_QUEUE_PREFIX},
    topology::TopologyPlan,
};
use std::time::Duration;

/// Name of the default exchange
pub const DEFAULT_EXCHANGE: &str = "";

/// Mutable producer configuration handed to the configuration closure.
///
/// By default nothing is declared: no exchange and no queue.
#[derive(Debug, Clone)]
pub struct ProducerConfigBuilder {
    defaults: Defaults,
    config: ProducerConfig,
}

impl ProducerConfigBuilder {
    pub(crate) fn new(defaults: &Defaults) -> Self {
        ProducerConfigBuilder {
            defaults: defaults.clone(),
            config: ProducerConfig {
                exchange: None,
                queue: None,
                routing_key: defaults.routing_key.clone(),
                content_type: defaults.content_type,
                mandatory: defaults.mandatory,
                immediate: defaults.immediate,
                timeout: defaults.publish_timeout(),
            },
        }
    }

    /// Declares the exchange `name` before publishing and publishes to it.
    ///
    /// # Returns
    /// The exchange configuration, for further chaining
    pub fn exchange(&mut self, name: &str) -> &mut ExchangeConfig {
        self.config
            .exchange
            .insert(ExchangeConfig::new(name, &self.defaults))
    }

    /// Declares the queue `name` before publishing.
    ///
    /// # Returns
    /// The queue configuration, for further chaining
    pub fn queue(&mut self, name: &str) -> &mut QueueConfig {
        self.config
            .queue
            .insert(QueueConfig::new(name, &self.defaults))
    }

    pub fn routing_key(&mut self, routing_key: &str) -> &mut Self {
        self.config.routing_key = routing_key.to_owned();
        self
    }

    pub fn content_type(&mut self, content_type: ContentType) -> &mut Self {
        self.config.content_type = content_type;
        self
    }

    /// Asks the broker to return the message when it cannot be routed.
    pub fn mandatory(&mut self, mandatory: bool) -> &mut Self {
        self.config.mandatory = mandatory;
        self
    }

    pub fn immediate(&mut self, immediate: bool) -> &mut Self {
        self.config.immediate = immediate;
        self
    }

    /// Upper bound for the publish to complete.
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.timeout = timeout;
        self
    }

    pub(crate) fn build(self) -> ProducerConfig {
        self.config
    }
}

/// Immutable configuration of one publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerConfig {
    exchange: Option<ExchangeConfig>,
    queue: Option<QueueConfig>,
    routing_key: String,
    content_type: ContentType,
    mandatory: bool,
    immediate: bool,
    timeout: Duration,
}

impl ProducerConfig {
    pub fn exchange(&self) -> Option<&ExchangeConfig> {
        self.exchange.as_ref()
    }

    pub fn queue(&self) -> Option<&QueueConfig> {
        self.queue.as_ref()
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    pub fn mandatory(&self) -> bool {
        self.mandatory
    }

    pub fn immediate(&self) -> bool {
        self.immediate
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The binding uses the queue arguments.
    pub(crate) fn topology(&self) -> TopologyPlan<'_> {
        TopologyPlan {
            exchange: self.exchange.as_ref(),
            queue: self.queue.as_ref(),
            routing_key: &self.routing_key,
            binding_arguments: self.queue.as_ref().and_then(|queue| queue.arguments.as_ref()),
        }
    }

    /// Resolves the routing key of the publish.
    ///
    /// # Parameters
    /// * `queue_name` - The declared queue name, if a queue was declared
    ///
    /// # Returns
    /// - the configured routing key when no queue was declared
    /// - the configured routing key for server-named queues without an exchange
    /// - the queue name otherwise
    pub(crate) fn publish_routing_key(&self, queue_name: Option<&str>) -> String {
        match queue_name {
            None => self.routing_key.clone(),
            Some(name) if self.exchange.is_none() && name.starts_with(ANONYMOUS_QUEUE_PREFIX) => {
                self.routing_key.clone()
            }
            Some(name) => name.to_owned(),
        }
    }

    /// The configured exchange name or the default exchange.
    pub(crate) fn publish_exchange(&self) -> &str {
        self.exchange
            .as_ref()
            .map_or(DEFAULT_EXCHANGE, |exch| exch.name.as_str())
    }
}
