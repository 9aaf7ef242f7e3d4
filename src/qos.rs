// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Prefetch (QoS) settings applied before a consumer is registered.

use crate::{broker::BrokerChannel, config::Defaults, errors::AmqpError};
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QosConfig {
    pub(crate) prefetch_count: u16,
    pub(crate) prefetch_size: u32,
    pub(crate) global: bool,
}

impl QosConfig {
    pub fn new(defaults: &Defaults) -> QosConfig {
        QosConfig {
            prefetch_count: defaults.prefetch_count,
            prefetch_size: defaults.prefetch_size,
            global: defaults.global_qos,
        }
    }

    /// Number of unacknowledged deliveries the broker may push to this consumer.
    pub fn prefetch_count(&mut self, count: u16) -> &mut Self {
        self.prefetch_count = count;
        self
    }

    /// Prefetch window in bytes, 0 means unlimited.
    pub fn prefetch_size(&mut self, size: u32) -> &mut Self {
        self.prefetch_size = size;
        self
    }

    /// Applies the limits to the whole channel instead of each consumer.
    pub fn global(&mut self, global: bool) -> &mut Self {
        self.global = global;
        self
    }
}

pub(crate) async fn configure_qos(
    channel: &dyn BrokerChannel,
    config: Option<&QosConfig>,
) -> Result<(), AmqpError> {
    let Some(qos) = config else {
        return Ok(());
    };

    debug!(
        prefetch_count = qos.prefetch_count,
        prefetch_size = qos.prefetch_size,
        global = qos.global,
        "configuring qos"
    );

    channel
        .basic_qos(qos.prefetch_count, qos.prefetch_size, qos.global)
        .await
        .map_err(|err| {
            error!(error = err.to_string(), "failure to configure qos");
            AmqpError::QoSDeclarationError(err.to_string())
        })
}
