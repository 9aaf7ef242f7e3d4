// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Client Configuration
//!
//! `BrokerConfig` carries the connection string, the connection name shown in the
//! broker management UI and the `Defaults` every configuration builder starts
//! from. It can be deserialized from any serde source or loaded from the
//! environment.

use crate::{errors::AmqpError, exchange::ExchangeKind, network};
use serde::Deserialize;
use std::{env, fmt, time::Duration};

/// Environment variable holding the broker connection string
pub const ENV_CONNECTION_STRING: &str = "AMQP_CONNECTION_STRING";
/// Environment variable holding the connection name
pub const ENV_CONNECTION_NAME: &str = "AMQP_CONNECTION_NAME";

const DEFAULT_CONNECTION_NAME: &str = "rabbitmq-messaging";

/// Content type announced on published messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum ContentType {
    #[default]
    #[serde(rename = "application/json")]
    ApplicationJson,
    #[serde(rename = "text/plain")]
    TextPlain,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::ApplicationJson => "application/json",
            ContentType::TextPlain => "text/plain",
        }
    }
}

/// Values every exchange, queue, QoS, producer and consumer builder starts from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub durable: bool,
    pub exclusive: bool,
    pub no_wait: bool,
    pub no_local: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub passive: bool,
    pub mandatory: bool,
    pub immediate: bool,
    pub auto_ack: bool,
    pub consumer_identity: String,
    pub routing_key: String,
    pub prefetch_count: u16,
    pub prefetch_size: u32,
    pub global_qos: bool,
    pub exchange_kind: ExchangeKind,
    pub content_type: ContentType,
    pub publish_timeout_secs: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Defaults {
            durable: false,
            exclusive: false,
            no_wait: false,
            no_local: false,
            auto_delete: false,
            internal: false,
            passive: false,
            mandatory: false,
            immediate: false,
            auto_ack: true,
            consumer_identity: String::new(),
            routing_key: String::new(),
            prefetch_count: 1,
            prefetch_size: 0,
            global_qos: false,
            exchange_kind: ExchangeKind::Fanout,
            content_type: ContentType::ApplicationJson,
            publish_timeout_secs: 30,
        }
    }
}

impl Defaults {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }
}

/// Connection settings shared by a `Producer` or `Consumer`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub connection_string: String,
    pub connection_name: String,
    pub defaults: Defaults,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            connection_string: String::new(),
            connection_name: DEFAULT_CONNECTION_NAME.to_owned(),
            defaults: Defaults::default(),
        }
    }
}

impl BrokerConfig {
    /// Creates a configuration for the given connection string with default settings.
    pub fn new(connection_string: impl Into<String>) -> Self {
        BrokerConfig {
            connection_string: connection_string.into(),
            ..Default::default()
        }
    }

    pub fn connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = name.into();
        self
    }

    pub fn defaults(mut self, defaults: Defaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Loads the configuration from `AMQP_CONNECTION_STRING` and
    /// `AMQP_CONNECTION_NAME`.
    ///
    /// # Returns
    /// The configuration, or `AmqpError::MissingConfiguration` when the
    /// connection string is not set
    pub fn from_env() -> Result<Self, AmqpError> {
        let connection_string = match env::var(ENV_CONNECTION_STRING) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => Err(AmqpError::MissingConfiguration(
                ENV_CONNECTION_STRING.to_owned(),
            )),
        }?;

        let mut config = BrokerConfig::new(connection_string);
        if let Ok(name) = env::var(ENV_CONNECTION_NAME) {
            config.connection_name = name;
        }

        Ok(config)
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let connection_string = network::redact_password(&self.connection_string)
            .unwrap_or_else(|| "<unparsed>".to_owned());

        f.debug_struct("BrokerConfig")
            .field("connection_string", &connection_string)
            .field("connection_name", &self.connection_name)
            .field("defaults", &self.defaults)
            .finish()
    }
}
