// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Management for RabbitMQ
//!
//! Queue definitions are built from a [`DurabilityClass`], which fixes the
//! durable/auto-delete/exclusive flags together, and always carry a
//! dead-letter exchange unless explicitly opted out (the dead-letter queue
//! itself must not dead-letter back into its own exchange).

use crate::topology::DEFAULT_DEAD_LETTER_EXCHANGE;

/// Lifetime class of a declared queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityClass {
    /// Survives broker restarts and is shared between connections
    Durable,
    /// Private to the declaring connection and deleted with it
    Transient,
}

impl DurabilityClass {
    pub fn durable(self) -> bool {
        matches!(self, DurabilityClass::Durable)
    }

    pub fn auto_delete(self) -> bool {
        matches!(self, DurabilityClass::Transient)
    }

    pub fn exclusive(self) -> bool {
        matches!(self, DurabilityClass::Transient)
    }
}

/// Definition of a RabbitMQ queue with its configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) class: DurabilityClass,
    pub(crate) passive: bool,
    pub(crate) dead_letter_exchange: Option<String>,
    pub(crate) ttl: Option<i32>,
    pub(crate) max_length: Option<i32>,
    pub(crate) max_length_bytes: Option<i32>,
}

impl QueueDefinition {
    /// Creates a queue definition wired to the default dead-letter exchange.
    pub fn new(name: &str, class: DurabilityClass) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            class,
            passive: false,
            dead_letter_exchange: Some(DEFAULT_DEAD_LETTER_EXCHANGE.to_owned()),
            ttl: None,
            max_length: None,
            max_length_bytes: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> DurabilityClass {
        self.class
    }

    pub fn dead_letter_exchange(&self) -> Option<&str> {
        self.dead_letter_exchange.as_deref()
    }

    /// Routes rejected messages to `exchange` instead of the default one.
    pub fn with_dead_letter_exchange(mut self, exchange: &str) -> Self {
        self.dead_letter_exchange = Some(exchange.to_owned());
        self
    }

    /// Declares the queue without a dead-letter exchange.
    pub fn without_dead_letter(mut self) -> Self {
        self.dead_letter_exchange = None;
        self
    }

    /// Only checks that the queue exists, without creating it.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Sets the message Time-To-Live (TTL), in milliseconds.
    pub fn ttl(mut self, ttl: i32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the maximum number of messages the queue can hold. Overflowing
    /// messages are dead-lettered when an exchange is configured.
    pub fn max_length(mut self, max: i32) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Sets the maximum size in bytes the queue can hold.
    pub fn max_length_bytes(mut self, max_bytes: i32) -> Self {
        self.max_length_bytes = Some(max_bytes);
        self
    }
}

/// Binding of a queue to an exchange under a routing key pattern.
///
/// Built once with the chained setters and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub(crate) queue_name: String,
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a binding for `queue`. The exchange and key default to empty
    /// strings (the default exchange).
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            exchange_name: String::new(),
            routing_key: String::new(),
        }
    }

    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    pub fn key(&self) -> &str {
        &self.routing_key
    }
}

/// Identity of a queue as reported by the broker after declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredQueue {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

impl From<&lapin::Queue> for DeclaredQueue {
    fn from(queue: &lapin::Queue) -> Self {
        DeclaredQueue {
            name: queue.name().as_str().to_owned(),
            message_count: queue.message_count(),
            consumer_count: queue.consumer_count(),
        }
    }
}
