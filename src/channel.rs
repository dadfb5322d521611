// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Management
//!
//! A [`Broker`] owns the single AMQP connection of the process. It is created
//! once at startup, passed by reference to every publisher and subscriber,
//! and closed exactly once at shutdown. Every publisher and every
//! subscription gets its own channel from it, so flow control and
//! acknowledgment state never cross between callers.

use crate::{config::AmqpConfig, errors::AmqpError};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Reply code sent to the broker on a clean connection or channel close
pub(crate) const REPLY_SUCCESS: u16 = 200;

/// The process-wide connection to RabbitMQ.
pub struct Broker {
    conn: Connection,
}

impl Broker {
    /// Connects to RabbitMQ using the parameters in `cfg`.
    ///
    /// A failure here is fatal to the process: there is no reconnect loop.
    ///
    /// # Parameters
    /// * `cfg` - Broker address, credentials and connection name
    ///
    /// # Returns
    /// The connected broker, or ConnectionError when it cannot be reached
    pub async fn connect(cfg: &AmqpConfig) -> Result<Broker, AmqpError> {
        debug!("creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(cfg.app_name.clone()));

        let conn = match Connection::connect(&cfg.uri(), options).await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), host = cfg.host, "failure to connect");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
        }?;
        info!(host = cfg.host, port = cfg.port, "amqp connected");

        Ok(Broker { conn })
    }

    /// Opens a new channel on the shared connection.
    pub async fn open_channel(&self) -> Result<Arc<Channel>, AmqpError> {
        debug!("creating amqp channel...");
        match self.conn.create_channel().await {
            Ok(c) => {
                debug!(channel = c.id(), "channel created");
                Ok(Arc::new(c))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }
    }

    /// Returns true while the underlying connection is usable.
    pub fn is_connected(&self) -> bool {
        self.conn.status().connected()
    }

    /// Closes the connection, terminating every channel and delivery loop
    /// opened from it. Handlers still running are not waited for; shut
    /// subscriptions down first for a clean stop.
    pub async fn close(self) -> Result<(), AmqpError> {
        debug!("closing amqp connection...");
        self.conn
            .close(REPLY_SUCCESS, "bye")
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error closing the connection");
                AmqpError::CloseConnectionError(err.to_string())
            })?;
        info!("amqp connection closed");

        Ok(())
    }
}
