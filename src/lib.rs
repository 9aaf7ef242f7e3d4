// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Messaging
//!
//! A RabbitMQ client runtime built on lapin. A `Producer` or `Consumer` owns a
//! supervised connection that is re-established after every broker-initiated
//! closure, declares the topology each operation is configured with and
//! propagates OpenTelemetry context through the message headers.

mod client;
mod connection;
mod otel;
mod topology;
#[cfg(test)]
mod test_support;

pub mod arguments;
pub mod broker;
pub mod channel;
pub mod config;
pub mod consumer;
pub mod consumer_config;
pub mod errors;
pub mod exchange;
pub mod network;
pub mod producer_config;
pub mod publisher;
pub mod qos;
pub mod queue;

pub use arguments::{Arguments, FieldValue, Headers};
pub use config::{BrokerConfig, ContentType, Defaults};
pub use consumer::{Consumer, ConsumerHandle, MessageHandler};
pub use errors::{AmqpError, ErrorKind};
pub use exchange::ExchangeKind;
pub use otel::{TEMPORARY_DESTINATION, TRACER_NAME};
pub use publisher::{MessageEnvelope, Producer};
