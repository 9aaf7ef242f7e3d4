// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Configuration
//!
//! A consumer starts from an anonymous queue with the default prefetch settings
//! and no exchange. The configuration closure can name the queue, add an
//! exchange to bind it to, or drop the queue and QoS steps entirely.

use crate::{
    arguments::{Arguments, FieldValue},
    config::Defaults,
    exchange::ExchangeConfig,
    qos::QosConfig,
    queue::QueueConfig,
    topology::TopologyPlan,
};

/// Mutable consumer configuration handed to the configuration closure.
#[derive(Debug, Clone)]
pub struct ConsumerConfigBuilder {
    defaults: Defaults,
    config: ConsumerConfig,
}

impl ConsumerConfigBuilder {
    pub(crate) fn new(defaults: &Defaults) -> Self {
        ConsumerConfigBuilder {
            defaults: defaults.clone(),
            config: ConsumerConfig {
                exchange: None,
                queue: Some(QueueConfig::new("", defaults)),
                qos: Some(QosConfig::new(defaults)),
                consumer_identity: defaults.consumer_identity.clone(),
                routing_key: defaults.routing_key.clone(),
                auto_ack: defaults.auto_ack,
                exclusive: defaults.exclusive,
                no_local: defaults.no_local,
                no_wait: defaults.no_wait,
                arguments: None,
            },
        }
    }

    /// Declares the exchange `name` and binds the queue to it.
    pub fn exchange(&mut self, name: &str) -> &mut ExchangeConfig {
        self.config
            .exchange
            .insert(ExchangeConfig::new(name, &self.defaults))
    }

    /// Replaces the default anonymous queue with the queue `name`.
    pub fn queue(&mut self, name: &str) -> &mut QueueConfig {
        self.config
            .queue
            .insert(QueueConfig::new(name, &self.defaults))
    }

    /// Consumes from the configured routing key without declaring a queue.
    pub fn without_queue(&mut self) -> &mut Self {
        self.config.queue = None;
        self
    }

    /// The prefetch settings, created from the defaults if they were removed.
    pub fn qos(&mut self) -> &mut QosConfig {
        let defaults = &self.defaults;
        self.config
            .qos
            .get_or_insert_with(|| QosConfig::new(defaults))
    }

    /// Skips the QoS call.
    pub fn without_qos(&mut self) -> &mut Self {
        self.config.qos = None;
        self
    }

    /// Consumer tag announced to the broker. Empty lets the broker pick one.
    pub fn consumer_identity(&mut self, identity: &str) -> &mut Self {
        self.config.consumer_identity = identity.to_owned();
        self
    }

    pub fn routing_key(&mut self, routing_key: &str) -> &mut Self {
        self.config.routing_key = routing_key.to_owned();
        self
    }

    /// With auto-ack disabled every delivery is acknowledged after the handler returns.
    pub fn auto_ack(&mut self, auto_ack: bool) -> &mut Self {
        self.config.auto_ack = auto_ack;
        self
    }

    pub fn exclusive(&mut self, exclusive: bool) -> &mut Self {
        self.config.exclusive = exclusive;
        self
    }

    pub fn no_local(&mut self, no_local: bool) -> &mut Self {
        self.config.no_local = no_local;
        self
    }

    pub fn no_wait(&mut self, no_wait: bool) -> &mut Self {
        self.config.no_wait = no_wait;
        self
    }

    /// Replaces the arguments used for the binding and the consumer registration.
    pub fn arguments(&mut self, arguments: Arguments) -> &mut Self {
        self.config.arguments = Some(arguments);
        self
    }

    pub fn argument(&mut self, key: &str, value: impl Into<FieldValue>) -> &mut Self {
        self.config
            .arguments
            .get_or_insert_with(Arguments::new)
            .insert(key.to_owned(), value.into());
        self
    }

    pub(crate) fn build(self) -> ConsumerConfig {
        self.config
    }
}

/// Immutable configuration of one consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    exchange: Option<ExchangeConfig>,
    queue: Option<QueueConfig>,
    qos: Option<QosConfig>,
    consumer_identity: String,
    routing_key: String,
    auto_ack: bool,
    exclusive: bool,
    no_local: bool,
    no_wait: bool,
    arguments: Option<Arguments>,
}

impl ConsumerConfig {
    pub fn exchange(&self) -> Option<&ExchangeConfig> {
        self.exchange.as_ref()
    }

    pub fn queue(&self) -> Option<&QueueConfig> {
        self.queue.as_ref()
    }

    pub fn qos(&self) -> Option<&QosConfig> {
        self.qos.as_ref()
    }

    pub fn consumer_identity(&self) -> &str {
        &self.consumer_identity
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn auto_ack(&self) -> bool {
        self.auto_ack
    }

    pub fn exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn no_local(&self) -> bool {
        self.no_local
    }

    pub fn no_wait(&self) -> bool {
        self.no_wait
    }

    pub fn arguments(&self) -> Option<&Arguments> {
        self.arguments.as_ref()
    }

    pub(crate) fn topology(&self) -> TopologyPlan<'_> {
        TopologyPlan {
            exchange: self.exchange.as_ref(),
            queue: self.queue.as_ref(),
            routing_key: &self.routing_key,
            binding_arguments: self.arguments.as_ref(),
        }
    }

    /// The queue name to consume from: the declared queue, or the configured
    /// routing key when no queue was declared.
    pub(crate) fn binding_key(&self, queue_name: Option<&str>) -> String {
        queue_name.map_or_else(|| self.routing_key.clone(), str::to_owned)
    }
}
