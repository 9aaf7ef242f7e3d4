// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Runtime
//!
//! This module provides the error type returned by every producer, consumer and
//! connection operation. Each `AmqpError` variant belongs to one `ErrorKind`,
//! which tells the caller whether the failure is a configuration bug, a
//! transient connectivity condition or a payload that could not be encoded.

use std::time::Duration;
use thiserror::Error;

/// Broad classification of an `AmqpError`.
///
/// - Configuration: the declared topology or consumer registration was rejected by
///   the broker. Retrying the same call will fail the same way.
/// - Connectivity: the connection or channel was unusable while the call ran.
///   The call may succeed once the connection supervisor has reconnected.
/// - Serialization: the payload could not be encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Connectivity,
    Serialization,
}

/// Represents errors that can occur during AMQP/RabbitMQ operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// A required configuration value is missing or invalid
    #[error("missing configuration `{0}`")]
    MissingConfiguration(String),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// The channel captured by the operation was replaced by a reconnection
    #[error("channel generation `{captured}` was superseded by generation `{current}`")]
    StaleChannel { captured: u64, current: u64 },

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error registering a consumer on a queue
    #[error("failure to declare consumer `{0}`")]
    ConsumerDeclarationError(String),

    /// Error serializing a message payload
    #[error("failure to serialize payload: {0}")]
    SerializePayloadError(String),

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// The publish did not complete before the configured timeout
    #[error("publish timed out after {0:?}")]
    PublishTimeout(Duration),

    /// Error acknowledging a message
    #[error("failure to ack message: {0}")]
    AckMessageError(String),

    /// The delivery draining task failed
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),
}

impl AmqpError {
    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AmqpError::MissingConfiguration(_)
            | AmqpError::DeclareExchangeError(_)
            | AmqpError::DeclareQueueError(_)
            | AmqpError::BindingExchangeToQueueError(_, _)
            | AmqpError::QoSDeclarationError(_)
            | AmqpError::ConsumerDeclarationError(_) => ErrorKind::Configuration,
            AmqpError::SerializePayloadError(_) => ErrorKind::Serialization,
            AmqpError::ConnectionError(_)
            | AmqpError::ChannelError(_)
            | AmqpError::StaleChannel { .. }
            | AmqpError::PublishingError(_)
            | AmqpError::PublishTimeout(_)
            | AmqpError::AckMessageError(_)
            | AmqpError::ConsumerError(_) => ErrorKind::Connectivity,
        }
    }

    /// Whether repeating the same call after a reconnection may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Connectivity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_failures_are_not_retryable() {
        let err = AmqpError::DeclareQueueError("orders".to_owned());
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!err.is_retryable());

        let err = AmqpError::BindingExchangeToQueueError("ex".to_owned(), "q".to_owned());
        assert_eq!(err.to_string(), "failure to binding exchange `ex` to queue `q`");
    }

    #[test]
    fn stale_channel_and_timeouts_are_retryable() {
        assert!(AmqpError::StaleChannel {
            captured: 1,
            current: 2
        }
        .is_retryable());
        assert!(AmqpError::PublishTimeout(Duration::from_secs(30)).is_retryable());
    }

    #[test]
    fn serialization_is_its_own_kind() {
        let err = AmqpError::SerializePayloadError("bad".to_owned());
        assert_eq!(err.kind(), ErrorKind::Serialization);
        assert!(!err.is_retryable());
    }
}
