// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Acknowledgment Disposition
//!
//! Every handler returns a [`Disposition`]; the delivery loop turns it into
//! exactly one broker call for the envelope:
//!
//! | disposition   | broker call                       | settlement   |
//! |---------------|-----------------------------------|--------------|
//! | `Ack`         | `basic.ack`                       | `Acked`      |
//! | `NackRequeue` | `basic.nack(requeue = true)`      | `Requeued`   |
//! | `NackDiscard` | `basic.nack(requeue = false)`     | `Discarded`  |
//!
//! A discarded envelope is routed to the queue's dead-letter exchange when
//! one is attached, and dropped otherwise.

use crate::errors::AmqpError;
use async_trait::async_trait;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions},
};
use tracing::error;

/// Outcome a handler reports for one decoded payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed; remove the envelope for good
    Ack,
    /// Not processed; put it back on the queue for redelivery
    NackRequeue,
    /// Not processable; remove it and dead-letter it when possible
    NackDiscard,
}

/// State of an envelope from the broker's point of view once the delivery
/// loop is done with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Delivered but never acked nor nacked. The broker redelivers it only
    /// when the channel closes.
    Pending,
    Acked,
    Requeued,
    Discarded,
}

impl Disposition {
    /// The settlement reached once the broker accepts this disposition.
    pub fn settlement(self) -> Settlement {
        match self {
            Disposition::Ack => Settlement::Acked,
            Disposition::NackRequeue => Settlement::Requeued,
            Disposition::NackDiscard => Settlement::Discarded,
        }
    }
}

/// Settles one delivered envelope with the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Acknowledge: Send + Sync {
    /// `basic.ack` for this envelope only.
    async fn acknowledge(&self) -> Result<(), AmqpError>;

    /// `basic.nack` for this envelope only.
    async fn reject(&self, requeue: bool) -> Result<(), AmqpError>;
}

#[async_trait]
impl Acknowledge for Delivery {
    async fn acknowledge(&self) -> Result<(), AmqpError> {
        self.acker
            .ack(BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), tag = self.delivery_tag, "error whiling ack msg");
                AmqpError::AckMessageError(self.delivery_tag)
            })
    }

    async fn reject(&self, requeue: bool) -> Result<(), AmqpError> {
        self.acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), tag = self.delivery_tag, "error whiling nack msg");
                AmqpError::NackMessageError(self.delivery_tag)
            })
    }
}

/// Issues the broker call matching `disposition`.
pub(crate) async fn settle<A>(acker: &A, disposition: Disposition) -> Result<Settlement, AmqpError>
where
    A: Acknowledge + ?Sized,
{
    match disposition {
        Disposition::Ack => acker.acknowledge().await?,
        Disposition::NackRequeue => acker.reject(true).await?,
        Disposition::NackDiscard => acker.reject(false).await?,
    }

    Ok(disposition.settlement())
}
