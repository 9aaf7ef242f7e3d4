// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration for RabbitMQ
//!
//! This module provides integration with OpenTelemetry for distributed tracing.
//! It includes utilities for propagating trace context through RabbitMQ message headers,
//! extracting context from incoming messages, and creating the producer and
//! consumer spans with their messaging and network attributes.

use crate::network::ConnectionAttributes;
use lapin::types::{AMQPValue, FieldTable, ShortString};
use opentelemetry::{
    global,
    propagation::{Extractor, Injector},
    trace::{SpanKind, TraceContextExt, Tracer},
    Context, KeyValue,
};
use std::collections::BTreeMap;
use tracing::error;

/// Name of the tracer every messaging span is created with
pub const TRACER_NAME: &str = "amqp";

/// Destination reported when no queue, exchange or key names the target
pub const TEMPORARY_DESTINATION: &str = "(temporary)";

const TAG_MESSAGING_SYSTEM: &str = "messaging.system";
const TAG_MESSAGING_OPERATION: &str = "messaging.operation";
const TAG_MESSAGING_DESTINATION: &str = "messaging.destination";
const TAG_MESSAGING_DESTINATION_KIND: &str = "messaging.destination_kind";
const TAG_MESSAGING_PROTOCOL: &str = "messaging.protocol";
const TAG_MESSAGING_PROTOCOL_VERSION: &str = "messaging.protocol_version";
const TAG_MESSAGING_MESSAGE_ID: &str = "messaging.message_id";
const TAG_MESSAGING_PAYLOAD_SIZE: &str = "messaging.message_payload_size_bytes";
const TAG_MESSAGING_CONVERSATION_ID: &str = "messaging.conversation_id";
const TAG_MESSAGING_ROUTING_KEY: &str = "messaging.rabbitmq.routing_key";

const MESSAGING_SYSTEM: &str = "rabbitmq";
const MESSAGING_DESTINATION_KIND: &str = "queue";
const MESSAGING_PROTOCOL: &str = "AMQP";
const MESSAGING_PROTOCOL_VERSION: &str = "0.9.1";

/// An adapter for injecting and extracting OpenTelemetry context from RabbitMQ headers.
///
/// This struct implements the OpenTelemetry `Injector` and `Extractor` traits,
/// allowing trace context to be propagated through RabbitMQ message headers.
pub(crate) struct RabbitMQTracePropagator<'a> {
    headers: &'a mut BTreeMap<ShortString, AMQPValue>,
}

impl<'a> RabbitMQTracePropagator<'a> {
    pub(crate) fn new(headers: &'a mut BTreeMap<ShortString, AMQPValue>) -> Self {
        Self { headers }
    }
}

impl Injector for RabbitMQTracePropagator<'_> {
    /// Sets a trace context key-value pair in RabbitMQ message headers.
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(
            key.to_lowercase().into(),
            AMQPValue::LongString(value.into()),
        );
    }
}

impl Extractor for RabbitMQTracePropagator<'_> {
    /// Gets a trace context value from RabbitMQ message headers.
    ///
    /// Only long-string headers holding valid UTF-8 are returned.
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|header_value| {
            if let AMQPValue::LongString(header_value) = header_value {
                std::str::from_utf8(header_value.as_bytes())
                    .map_err(|e| error!("Error decoding header value {:?}", e))
                    .ok()
            } else {
                None
            }
        })
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|header| header.as_str()).collect()
    }
}

/// Injects the trace context of `ctx` into a fresh header table.
pub(crate) fn inject_context(ctx: &Context) -> BTreeMap<ShortString, AMQPValue> {
    let mut headers = BTreeMap::new();

    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut RabbitMQTracePropagator::new(&mut headers))
    });

    headers
}

/// Extracts the remote trace context carried by inbound `headers`.
pub(crate) fn extract_context(headers: &FieldTable) -> Context {
    let mut headers = headers.inner().clone();

    global::get_text_map_propagator(|propagator| {
        propagator.extract(&RabbitMQTracePropagator::new(&mut headers))
    })
}

/// Picks the most specific name for the span destination.
///
/// Priority: queue name, exchange name, routing/binding key, then
/// `TEMPORARY_DESTINATION`. Empty names are skipped.
pub(crate) fn build_destination(queue: Option<&str>, exchange: Option<&str>, key: &str) -> String {
    [queue, exchange, Some(key)]
        .into_iter()
        .flatten()
        .find(|name| !name.is_empty())
        .unwrap_or(TEMPORARY_DESTINATION)
        .to_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    Send,
    Receive,
}

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Operation::Send => "send",
            Operation::Receive => "receive",
        }
    }

    fn span_kind(&self) -> SpanKind {
        match self {
            Operation::Send => SpanKind::Producer,
            Operation::Receive => SpanKind::Consumer,
        }
    }
}

/// What a messaging span describes.
pub(crate) struct SpanDetails<'a> {
    pub(crate) operation: Operation,
    pub(crate) destination: &'a str,
    pub(crate) message_id: &'a str,
    pub(crate) payload_size: usize,
    pub(crate) routing_key: &'a str,
    pub(crate) correlation_id: Option<&'a str>,
}

/// Creates messaging spans for one client.
#[derive(Debug, Clone, Default)]
pub(crate) struct MessagingTelemetry {
    connection: ConnectionAttributes,
}

impl MessagingTelemetry {
    pub(crate) fn new(connection: ConnectionAttributes) -> Self {
        MessagingTelemetry { connection }
    }

    /// Starts a span named `"{destination} {operation}"` as a child of `parent`.
    ///
    /// # Returns
    /// A context holding the new span; the caller ends it through
    /// `ctx.span().end()`
    pub(crate) fn start_span(&self, parent: &Context, details: &SpanDetails<'_>) -> Context {
        let tracer = global::tracer(TRACER_NAME);

        let span = tracer
            .span_builder(format!(
                "{} {}",
                details.destination,
                details.operation.as_str()
            ))
            .with_kind(details.operation.span_kind())
            .with_attributes(self.attributes(details))
            .start_with_context(&tracer, parent);

        parent.with_span(span)
    }

    fn attributes(&self, details: &SpanDetails<'_>) -> Vec<KeyValue> {
        let mut attributes = vec![
            KeyValue::new(TAG_MESSAGING_SYSTEM, MESSAGING_SYSTEM),
            KeyValue::new(TAG_MESSAGING_OPERATION, details.operation.as_str()),
            KeyValue::new(TAG_MESSAGING_DESTINATION, details.destination.to_owned()),
            KeyValue::new(TAG_MESSAGING_DESTINATION_KIND, MESSAGING_DESTINATION_KIND),
            KeyValue::new(TAG_MESSAGING_PROTOCOL, MESSAGING_PROTOCOL),
            KeyValue::new(TAG_MESSAGING_PROTOCOL_VERSION, MESSAGING_PROTOCOL_VERSION),
            KeyValue::new(TAG_MESSAGING_MESSAGE_ID, details.message_id.to_owned()),
            KeyValue::new(TAG_MESSAGING_PAYLOAD_SIZE, details.payload_size as i64),
        ];

        if !details.routing_key.is_empty() {
            attributes.push(KeyValue::new(
                TAG_MESSAGING_ROUTING_KEY,
                details.routing_key.to_owned(),
            ));
        }

        if let Some(correlation_id) = details.correlation_id {
            attributes.push(KeyValue::new(
                TAG_MESSAGING_CONVERSATION_ID,
                correlation_id.to_owned(),
            ));
        }

        attributes.extend(self.connection.key_values());
        attributes
    }
}
