// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Client Core
//!
//! The state a `Producer` and a `Consumer` share: the broker configuration,
//! the supervised connection, the span factory tagged with the resolved
//! connection attributes and the lock that keeps one client's declare and
//! publish sequences from interleaving.

use crate::{
    broker::BrokerConnector,
    config::{BrokerConfig, Defaults},
    connection::{ClientRole, ConnectionSupervisor},
    errors::AmqpError,
    network::{ConnectionAttributes, PeerResolver},
    otel::MessagingTelemetry,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// State shared by the producer and the consumer.
pub(crate) struct ClientCore {
    pub(crate) config: BrokerConfig,
    pub(crate) supervisor: Arc<ConnectionSupervisor>,
    pub(crate) telemetry: MessagingTelemetry,
    /// Serializes the declare, bind, QoS and publish sequences of one client.
    pub(crate) operation_lock: Mutex<()>,
}

impl ClientCore {
    /// Connects to the broker and resolves the connection attributes spans
    /// are tagged with.
    pub(crate) async fn start(
        role: ClientRole,
        config: BrokerConfig,
        connector: Arc<dyn BrokerConnector>,
        resolver: Arc<dyn PeerResolver>,
    ) -> Result<Self, AmqpError> {
        let supervisor = ConnectionSupervisor::start(role, &config, connector).await?;

        let connection_string = config.connection_string.clone();
        let attributes = tokio::task::spawn_blocking(move || {
            ConnectionAttributes::resolve(&connection_string, resolver.as_ref())
        })
        .await
        .unwrap_or_else(|err| {
            warn!(error = err.to_string(), "failure to resolve the broker peer");
            ConnectionAttributes::default()
        });
        debug!(?attributes, "broker peer resolved");

        Ok(ClientCore {
            config,
            supervisor,
            telemetry: MessagingTelemetry::new(attributes),
            operation_lock: Mutex::new(()),
        })
    }

    pub(crate) fn defaults(&self) -> &Defaults {
        &self.config.defaults
    }
}
