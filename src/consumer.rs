// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! This module holds the per-envelope consumption logic and the loop that
//! drives it for one subscription. For each envelope it decodes the payload
//! with the subscription's codec, awaits the handler, and settles the
//! envelope with the broker according to the returned disposition.

use crate::{
    codec::Codec,
    disposition::{settle, Acknowledge, Disposition, Settlement},
    errors::AmqpError,
    otel,
    subscriber::{DecodeFailurePolicy, Handler},
};
use futures_util::{Stream, StreamExt};
use lapin::{message::Delivery, types::FieldTable};
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Span, Status},
};
use serde::de::DeserializeOwned;
use std::{borrow::Cow, fmt::Display};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// One delivered message, detached from the lapin types except for the
/// acknowledger used to settle it.
pub struct Envelope<A> {
    pub content_type: Option<String>,
    pub exchange: String,
    pub routing_key: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub headers: Option<FieldTable>,
    pub data: Vec<u8>,
    pub acker: A,
}

impl From<Delivery> for Envelope<Delivery> {
    fn from(mut delivery: Delivery) -> Self {
        let data = std::mem::take(&mut delivery.data);

        Envelope {
            content_type: delivery
                .properties
                .content_type()
                .as_ref()
                .map(|c| c.as_str().to_owned()),
            exchange: delivery.exchange.as_str().to_owned(),
            routing_key: delivery.routing_key.as_str().to_owned(),
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
            headers: delivery.properties.headers().clone(),
            data,
            acker: delivery,
        }
    }
}

/// Terminal states reached by the envelopes of one delivery loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub acked: u64,
    pub requeued: u64,
    pub discarded: u64,
    /// Never settled; the payload could not be decoded
    pub pending: u64,
    /// The broker refused the ack or nack
    pub failed: u64,
}

impl DeliveryStats {
    fn record(&mut self, result: &Result<Settlement, AmqpError>) {
        match result {
            Ok(Settlement::Acked) => self.acked += 1,
            Ok(Settlement::Requeued) => self.requeued += 1,
            Ok(Settlement::Discarded) => self.discarded += 1,
            Ok(Settlement::Pending) => self.pending += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Consumes one envelope and reports the state it was left in.
///
/// A payload that fails to decode is never handed to the handler. Under
/// [`DecodeFailurePolicy::LeavePending`] it is not settled at all.
pub(crate) async fn consume<T, C, H, A>(
    tracer: &BoxedTracer,
    codec: &C,
    handler: &H,
    policy: DecodeFailurePolicy,
    envelope: Envelope<A>,
) -> Result<Settlement, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    C: Codec,
    H: Handler<T> + ?Sized,
    A: Acknowledge,
{
    let (_ctx, mut span) = otel::new_span(envelope.headers.as_ref(), tracer, &envelope.routing_key);

    debug!(
        "received: {} - exchange: {} - tag: {} - redelivered: {}",
        envelope.routing_key, envelope.exchange, envelope.delivery_tag, envelope.redelivered,
    );

    let payload = match codec.decode::<T>(&envelope.data) {
        Ok(payload) => payload,
        Err(err) => {
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("failure to decode payload"),
            });

            return match policy {
                DecodeFailurePolicy::LeavePending => {
                    error!(
                        error = err.to_string(),
                        tag = envelope.delivery_tag,
                        "failure to decode payload, leaving message unsettled"
                    );
                    Ok(Settlement::Pending)
                }
                DecodeFailurePolicy::Discard => {
                    warn!(
                        error = err.to_string(),
                        tag = envelope.delivery_tag,
                        "failure to decode payload, discarding message"
                    );
                    settle(&envelope.acker, Disposition::NackDiscard).await
                }
            };
        }
    };

    let disposition = handler.handle(payload).await;
    debug!(?disposition, tag = envelope.delivery_tag, "message handled");

    match settle(&envelope.acker, disposition).await {
        Ok(settlement) => {
            span.set_status(Status::Ok);
            Ok(settlement)
        }
        Err(err) => {
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("failure to settle message"),
            });
            Err(err)
        }
    }
}

/// Drives one subscription until its stream ends or it is cancelled.
///
/// Envelopes are consumed one at a time, in stream order. The cancellation
/// signal is checked before each envelope, never while a handler runs. When
/// the sender side of `shutdown` is dropped the loop keeps running detached.
pub(crate) async fn run_delivery_loop<S, E, A, T, C, H>(
    queue: String,
    stream: S,
    codec: C,
    handler: H,
    policy: DecodeFailurePolicy,
    mut shutdown: watch::Receiver<bool>,
) -> DeliveryStats
where
    S: Stream<Item = Result<Envelope<A>, E>>,
    E: Display,
    A: Acknowledge,
    T: DeserializeOwned + Send + 'static,
    C: Codec,
    H: Handler<T>,
{
    let tracer = global::tracer("amqp consumer");
    futures_util::pin_mut!(stream);
    let mut detached = false;
    let mut stats = DeliveryStats::default();

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed(), if !detached => {
                if *shutdown.borrow() {
                    info!(queue, "delivery loop cancelled");
                    break;
                }
                if changed.is_err() {
                    detached = true;
                }
            }

            next = stream.next() => match next {
                Some(Ok(envelope)) => {
                    let result = consume(&tracer, &codec, &handler, policy, envelope).await;
                    stats.record(&result);

                    match result {
                        Ok(Settlement::Pending) => {
                            warn!(queue, settlement = ?Settlement::Pending, "message left unsettled")
                        }
                        Ok(settlement) => debug!(queue, ?settlement, "message settled"),
                        Err(err) => error!(error = err.to_string(), queue, "error consume msg"),
                    }
                }
                Some(Err(err)) => error!(error = err.to_string(), queue, "errors consume msg"),
                None => {
                    info!(queue, "delivery stream closed");
                    break;
                }
            },
        }
    }

    info!(queue, ?stats, "delivery loop stopped");
    stats
}
