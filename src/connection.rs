// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Supervision
//!
//! Every producer and consumer owns one broker connection and one channel on it.
//! The `ConnectionSupervisor` keeps that pair alive: a background observer waits
//! for the broker to close the connection, then dials again until it succeeds
//! and publishes the new pair as the next `Session` generation.
//!
//! Operations capture the current session once and run every protocol call on
//! it. When a reconnection happens in the middle of an operation, the captured
//! generation no longer matches and the operation fails with the retryable
//! `AmqpError::StaleChannel` instead of silently mixing two channels.

use crate::{
    broker::{BrokerChannel, BrokerConnection, BrokerConnector},
    config::{BrokerConfig, ENV_CONNECTION_STRING},
    errors::AmqpError,
};
use arc_swap::ArcSwap;
use std::{
    fmt,
    sync::{Arc, Weak},
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The kind of client a supervisor serves; only used to label logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    Producer,
    Consumer,
}

impl fmt::Display for ClientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientRole::Producer => write!(f, "producer"),
            ClientRole::Consumer => write!(f, "consumer"),
        }
    }
}

/// A connection and the channel opened on it.
pub(crate) struct Session {
    pub(crate) generation: u64,
    _connection: Arc<dyn BrokerConnection>,
    channel: Arc<dyn BrokerChannel>,
}

impl Session {
    pub(crate) fn channel(&self) -> &dyn BrokerChannel {
        self.channel.as_ref()
    }
}

/// Owns the broker connection of one client and replaces it after closures.
pub(crate) struct ConnectionSupervisor {
    role: ClientRole,
    connection_string: String,
    connection_name: String,
    connector: Arc<dyn BrokerConnector>,
    current: ArcSwap<Session>,
    shutdown: CancellationToken,
}

impl ConnectionSupervisor {
    /// Dials the broker and starts watching the connection.
    ///
    /// # Parameters
    /// * `role` - Whether the supervisor serves a producer or a consumer
    /// * `config` - Connection string and connection name
    /// * `connector` - Dials the broker, initially and on every reconnection
    ///
    /// # Returns
    /// The supervisor holding generation 1, or the error of the first attempt
    pub(crate) async fn start(
        role: ClientRole,
        config: &BrokerConfig,
        connector: Arc<dyn BrokerConnector>,
    ) -> Result<Arc<Self>, AmqpError> {
        if config.connection_string.is_empty() {
            error!("amqp connection string is empty");
            return Err(AmqpError::MissingConfiguration(
                ENV_CONNECTION_STRING.to_owned(),
            ));
        }

        let (session, closed) = dial(
            connector.as_ref(),
            &config.connection_string,
            &config.connection_name,
            1,
        )
        .await?;

        let supervisor = Arc::new(ConnectionSupervisor {
            role,
            connection_string: config.connection_string.clone(),
            connection_name: config.connection_name.clone(),
            connector,
            current: ArcSwap::from_pointee(session),
            shutdown: CancellationToken::new(),
        });

        info!(role = %role, "amqp client connected");
        observe(
            Arc::downgrade(&supervisor),
            supervisor.shutdown.clone(),
            closed,
        );

        Ok(supervisor)
    }

    /// The session every protocol call of one operation must use.
    pub(crate) fn session(&self) -> Arc<Session> {
        self.current.load_full()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.current.load().generation
    }

    /// Fails with `StaleChannel` when `session` was replaced by a reconnection.
    pub(crate) fn ensure_current(&self, session: &Session) -> Result<(), AmqpError> {
        let current = self.generation();

        if session.generation != current {
            warn!(
                captured = session.generation,
                current, "amqp channel was replaced while in use"
            );
            return Err(AmqpError::StaleChannel {
                captured: session.generation,
                current,
            });
        }

        Ok(())
    }

    /// Reports `err` as `StaleChannel` when it happened on a replaced session.
    pub(crate) fn classify(&self, session: &Session, err: AmqpError) -> AmqpError {
        match self.ensure_current(session) {
            Ok(()) => err,
            Err(stale) => stale,
        }
    }

    /// Stops reconnecting. The current session stays usable until dropped.
    pub(crate) fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn dial(
    connector: &dyn BrokerConnector,
    connection_string: &str,
    connection_name: &str,
    generation: u64,
) -> Result<(Session, oneshot::Receiver<lapin::Error>), AmqpError> {
    let connection = match connector.dial(connection_string, connection_name).await {
        Ok(connection) => connection,
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            return Err(AmqpError::ConnectionError(err.to_string()));
        }
    };

    let closed = connection.notify_close();

    let channel = match connection.create_channel().await {
        Ok(channel) => channel,
        Err(err) => {
            error!(error = err.to_string(), "failure to create a channel");
            return Err(AmqpError::ChannelError(err.to_string()));
        }
    };

    debug!(generation, "amqp session established");

    Ok((
        Session {
            generation,
            _connection: connection,
            channel,
        },
        closed,
    ))
}

/// Waits for `closed` on a background task, then reconnects.
fn observe(
    supervisor: Weak<ConnectionSupervisor>,
    shutdown: CancellationToken,
    closed: oneshot::Receiver<lapin::Error>,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("amqp connection observer stopped");
                return;
            }
            reason = closed => match reason {
                Ok(err) => warn!(error = err.to_string(), "amqp connection closed, reconnecting"),
                Err(_) => warn!("amqp connection dropped, reconnecting"),
            },
        }

        reconnect(supervisor, shutdown).await;
    });
}

/// Dials until a session is established, without delay between attempts.
async fn reconnect(supervisor: Weak<ConnectionSupervisor>, shutdown: CancellationToken) {
    loop {
        let Some(owner) = supervisor.upgrade() else {
            return;
        };

        let generation = owner.generation() + 1;

        let attempt = tokio::select! {
            _ = shutdown.cancelled() => return,
            attempt = dial(
                owner.connector.as_ref(),
                &owner.connection_string,
                &owner.connection_name,
                generation,
            ) => attempt,
        };

        match attempt {
            Ok((session, closed)) => {
                owner.current.store(Arc::new(session));
                info!(role = %owner.role, generation, "amqp client reconnected");
                observe(supervisor, shutdown, closed);
                return;
            }
            Err(err) => {
                error!(
                    role = %owner.role,
                    error = err.to_string(),
                    "failure to reconnect, retrying"
                );
            }
        }

        drop(owner);
        tokio::task::yield_now().await;
    }
}
