// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! This module declares exchanges, queues and the bindings between them.
//!
//! The main components are:
//! - `Topology` trait: interface for installing a topology on the broker
//! - `AmqpTopology`: builder collecting definitions, installed on one channel
//! - `declare_and_bind`: declares and binds a single queue on a fresh channel
//! - `peril_topology`: the exchanges and dead-letter queue shared by the game
//! - `install_peril_topology`: installs it on a short-lived channel

use crate::{
    channel::{Broker, REPLY_SUCCESS},
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{DeclaredQueue, DurabilityClass, QueueBinding, QueueDefinition},
    routing::{EXCHANGE_PERIL_DIRECT, EXCHANGE_PERIL_TOPIC, QUEUE_PERIL_DLQ},
};
use async_trait::async_trait;
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongInt, LongString, ShortString},
    Channel,
};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error, info};

/// Dead-letter exchange attached to every queue declared by this crate
pub const DEFAULT_DEAD_LETTER_EXCHANGE: &str = "peril_dlx";

/// Queue argument naming the dead-letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Queue argument for message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Queue argument for maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";
/// Queue argument for maximum queue size in bytes
pub const AMQP_HEADERS_MAX_LENGTH_BYTES: &str = "x-max-length-bytes";

/// Interface for installing a topology on the broker.
#[async_trait]
pub trait Topology {
    /// Adds an exchange definition to the topology.
    fn exchange(self, def: ExchangeDefinition) -> Self;

    /// Adds a queue definition to the topology.
    fn queue(self, def: QueueDefinition) -> Self;

    /// Adds a queue-to-exchange binding to the topology.
    fn queue_binding(self, binding: QueueBinding) -> Self;

    /// Declares exchanges, then queues, then bindings.
    ///
    /// Stops at the first declaration the broker refuses; what was declared
    /// before it stays on the broker.
    ///
    /// # Returns
    /// The queues as reported by the broker, in declaration order, or the
    /// AmqpError of the failing step
    async fn install(&self) -> Result<Vec<DeclaredQueue>, AmqpError>;
}

/// RabbitMQ implementation of the Topology trait.
pub struct AmqpTopology {
    channel: Arc<Channel>,
    pub(crate) queues: Vec<QueueDefinition>,
    pub(crate) queues_binding: Vec<QueueBinding>,
    pub(crate) exchanges: Vec<ExchangeDefinition>,
}

impl AmqpTopology {
    pub fn new(channel: Arc<Channel>) -> AmqpTopology {
        AmqpTopology {
            channel,
            queues: vec![],
            queues_binding: vec![],
            exchanges: vec![],
        }
    }
}

#[async_trait]
impl Topology for AmqpTopology {
    fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.queues_binding.push(binding);
        self
    }

    async fn install(&self) -> Result<Vec<DeclaredQueue>, AmqpError> {
        self.install_exchange().await?;
        let declared = self.install_queue().await?;
        self.binding_queues().await?;

        Ok(declared)
    }
}

impl AmqpTopology {
    async fn install_exchange(&self) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            debug!("creating exchange: {}", exch.name);

            match self
                .channel
                .exchange_declare(
                    &exch.name,
                    exch.kind.into(),
                    ExchangeDeclareOptions {
                        passive: exch.passive,
                        durable: exch.durable,
                        auto_delete: exch.delete,
                        internal: exch.internal,
                        nowait: false,
                    },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        name = exch.name,
                        "error to declare the exchange"
                    );
                    Err(AmqpError::DeclareExchangeError(exch.name.clone()))
                }
                _ => Ok(()),
            }?;

            debug!("exchange: {} was created", exch.name);
        }

        Ok(())
    }

    async fn install_queue(&self) -> Result<Vec<DeclaredQueue>, AmqpError> {
        let mut declared = Vec::with_capacity(self.queues.len());

        for def in &self.queues {
            debug!("creating queue: {}", def.name);

            let queue = match self
                .channel
                .queue_declare(
                    &def.name,
                    QueueDeclareOptions {
                        passive: def.passive,
                        durable: def.class.durable(),
                        exclusive: def.class.exclusive(),
                        auto_delete: def.class.auto_delete(),
                        nowait: false,
                    },
                    FieldTable::from(queue_arguments(def)),
                )
                .await
            {
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        name = def.name,
                        "error to declare the queue"
                    );
                    Err(AmqpError::DeclareQueueError(def.name.clone()))
                }
                Ok(queue) => {
                    debug!("queue: {} was created", def.name);
                    Ok(queue)
                }
            }?;

            declared.push(DeclaredQueue::from(&queue));
        }

        Ok(declared)
    }

    async fn binding_queues(&self) -> Result<(), AmqpError> {
        for binding in &self.queues_binding {
            match self
                .channel
                .queue_bind(
                    &binding.queue_name,
                    &binding.exchange_name,
                    &binding.routing_key,
                    QueueBindOptions { nowait: false },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(error = err.to_string(), "error to bind queue to exchange");

                    Err(AmqpError::BindingExchangeToQueueError(
                        binding.exchange_name.clone(),
                        binding.queue_name.clone(),
                    ))
                }
                _ => Ok(()),
            }?;

            info!(
                exchange = binding.exchange_name,
                key = binding.routing_key,
                queue = binding.queue_name,
                "queue bound to exchange"
            );
        }

        Ok(())
    }
}

/// Builds the `x-*` arguments sent with a queue declaration.
pub(crate) fn queue_arguments(def: &QueueDefinition) -> BTreeMap<ShortString, AMQPValue> {
    let mut args = BTreeMap::new();

    if let Some(dlx) = &def.dead_letter_exchange {
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(LongString::from(dlx.clone())),
        );
    }

    if let Some(ttl) = def.ttl {
        args.insert(
            ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
            AMQPValue::LongInt(LongInt::from(ttl)),
        );
    }

    if let Some(max) = def.max_length {
        args.insert(
            ShortString::from(AMQP_HEADERS_MAX_LENGTH),
            AMQPValue::LongInt(LongInt::from(max)),
        );
    }

    if let Some(max_bytes) = def.max_length_bytes {
        args.insert(
            ShortString::from(AMQP_HEADERS_MAX_LENGTH_BYTES),
            AMQPValue::LongInt(LongInt::from(max_bytes)),
        );
    }

    args
}

/// Opens a fresh channel, declares `queue_name` with the flags of `class`
/// and the default dead-letter exchange, and binds it to `exchange` with
/// `key`. No retry is attempted.
///
/// # Parameters
/// * `broker` - The process-wide connection
/// * `exchange` - Name of an already declared exchange
/// * `queue_name` - Name of the queue to declare
/// * `key` - Routing key or pattern of the binding
/// * `class` - Durability class of the queue
///
/// # Returns
/// The channel, so the caller can consume from it, and the queue as
/// reported by the broker
pub async fn declare_and_bind(
    broker: &Broker,
    exchange: &str,
    queue_name: &str,
    key: &str,
    class: DurabilityClass,
) -> Result<(Arc<Channel>, DeclaredQueue), AmqpError> {
    let channel = broker.open_channel().await?;

    let mut declared = AmqpTopology::new(channel.clone())
        .queue(QueueDefinition::new(queue_name, class))
        .queue_binding(
            QueueBinding::new(queue_name)
                .exchange(exchange)
                .routing_key(key),
        )
        .install()
        .await?;

    match declared.pop() {
        Some(queue) => Ok((channel, queue)),
        None => Err(AmqpError::DeclareQueueError(queue_name.to_owned())),
    }
}

/// The exchanges and dead-letter queue every Peril process relies on.
///
/// `peril_dlq` is declared without a dead-letter exchange of its own so a
/// rejected dead letter is dropped instead of cycling back.
pub fn peril_topology(channel: Arc<Channel>) -> AmqpTopology {
    AmqpTopology::new(channel)
        .exchange(ExchangeDefinition::new(EXCHANGE_PERIL_DIRECT).direct().durable())
        .exchange(ExchangeDefinition::new(EXCHANGE_PERIL_TOPIC).topic().durable())
        .exchange(
            ExchangeDefinition::new(DEFAULT_DEAD_LETTER_EXCHANGE)
                .fanout()
                .durable(),
        )
        .queue(
            QueueDefinition::new(QUEUE_PERIL_DLQ, DurabilityClass::Durable).without_dead_letter(),
        )
        .queue_binding(QueueBinding::new(QUEUE_PERIL_DLQ).exchange(DEFAULT_DEAD_LETTER_EXCHANGE))
}

/// Installs [`peril_topology`] on a channel of its own and closes that
/// channel once done.
pub async fn install_peril_topology(broker: &Broker) -> Result<Vec<DeclaredQueue>, AmqpError> {
    let channel = broker.open_channel().await?;
    let declared = peril_topology(channel.clone()).install().await?;

    channel
        .close(REPLY_SUCCESS, "topology installed")
        .await
        .map_err(|err| {
            error!(error = err.to_string(), "failure to close the topology channel");
            AmqpError::ChannelError(err.to_string())
        })?;
    debug!(queues = declared.len(), "peril topology installed");

    Ok(declared)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_always_name_the_dead_letter_exchange() {
        let def = QueueDefinition::new("pause.alice", DurabilityClass::Transient);
        let args = queue_arguments(&def);

        assert_eq!(args.len(), 1);
        assert_eq!(
            args.get(&ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE)),
            Some(&AMQPValue::LongString(LongString::from("peril_dlx")))
        );
    }

    #[test]
    fn optional_arguments() {
        let def = QueueDefinition::new("game_logs", DurabilityClass::Durable)
            .without_dead_letter()
            .ttl(60_000)
            .max_length(1_000);
        let args = queue_arguments(&def);

        assert!(!args.contains_key(&ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE)));
        assert_eq!(
            args.get(&ShortString::from(AMQP_HEADERS_MESSAGE_TTL)),
            Some(&AMQPValue::LongInt(60_000))
        );
        assert_eq!(
            args.get(&ShortString::from(AMQP_HEADERS_MAX_LENGTH)),
            Some(&AMQPValue::LongInt(1_000))
        );
        assert!(!args.contains_key(&ShortString::from(AMQP_HEADERS_MAX_LENGTH_BYTES)));
    }
}
