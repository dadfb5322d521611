// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Subscriber
//!
//! `subscribe` declares and binds the queue, limits the number of
//! unacknowledged deliveries with `basic.qos`, starts a consumer and spawns
//! one task that feeds every delivery to the handler. Setup errors are
//! returned before any task starts. Once running, failures are only logged.
//!
//! The returned [`Subscription`] can stop the loop between two deliveries.
//! Dropping it leaves the loop running until the connection closes.

use crate::{
    channel::{Broker, REPLY_SUCCESS},
    codec::{BincodeCodec, Codec, JsonCodec},
    consumer::{run_delivery_loop, DeliveryStats, Envelope},
    disposition::{Acknowledge, Disposition},
    errors::AmqpError,
    queue::{DurabilityClass, QueueBinding},
    topology::declare_and_bind,
};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use lapin::{
    options::{BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
    Channel,
};
use serde::de::DeserializeOwned;
use std::{fmt::Display, sync::Arc};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info};

/// Prefetch applied to every subscription unless overridden
pub const DEFAULT_PREFETCH_COUNT: u16 = 10;

/// Maps a decoded payload to a disposition.
///
/// Plain closures `Fn(T) -> Disposition` are handlers. Types that need to
/// await (to publish a follow-up message, for instance) implement the trait
/// directly.
#[async_trait]
pub trait Handler<T>: Send + Sync + 'static {
    async fn handle(&self, payload: T) -> Disposition;
}

#[async_trait]
impl<T, F> Handler<T> for F
where
    T: Send + 'static,
    F: Fn(T) -> Disposition + Send + Sync + 'static,
{
    async fn handle(&self, payload: T) -> Disposition {
        (self)(payload)
    }
}

/// What to do with an envelope whose payload cannot be decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodeFailurePolicy {
    /// Log and leave the envelope unsettled. The broker keeps it in the
    /// unacknowledged set of the channel, where it counts against the
    /// prefetch, until the channel closes and it is redelivered.
    #[default]
    LeavePending,
    /// Log and `nack` it without requeue, sending it to the dead-letter
    /// exchange.
    Discard,
}

/// Per-subscription consumer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub(crate) prefetch_count: u16,
    pub(crate) consumer_tag: String,
    pub(crate) decode_failure: DecodeFailurePolicy,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        SubscribeOptions {
            prefetch_count: DEFAULT_PREFETCH_COUNT,
            consumer_tag: String::new(),
            decode_failure: DecodeFailurePolicy::default(),
        }
    }
}

impl SubscribeOptions {
    /// Maximum number of unacknowledged deliveries held by the consumer.
    pub fn prefetch_count(mut self, count: u16) -> Self {
        self.prefetch_count = count;
        self
    }

    /// Consumer tag; left empty the broker generates one.
    pub fn consumer_tag(mut self, tag: &str) -> Self {
        self.consumer_tag = tag.to_owned();
        self
    }

    pub fn decode_failure(mut self, policy: DecodeFailurePolicy) -> Self {
        self.decode_failure = policy;
        self
    }
}

/// Handle on a running delivery loop.
pub struct Subscription {
    queue: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<DeliveryStats>,
}

impl Subscription {
    /// Name of the queue consumed by this subscription.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Asks the loop to stop before its next delivery.
    pub fn cancel(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels the loop and waits for the handler in flight, if any.
    ///
    /// Envelopes already buffered but not yet handled stay unsettled and go
    /// back to the queue when the channel closes.
    pub async fn shutdown(self) -> Result<DeliveryStats, AmqpError> {
        self.cancel();
        self.join().await
    }

    /// Waits for the loop to end on its own, once its delivery stream is
    /// closed, without cancelling it.
    pub async fn join(self) -> Result<DeliveryStats, AmqpError> {
        self.task.await.map_err(|err| {
            error!(error = err.to_string(), queue = self.queue, "delivery loop failed");
            AmqpError::InternalError(err.to_string())
        })
    }
}

/// Spawns the delivery loop over any stream of envelopes.
///
/// When `channel` is given it is kept open for as long as the loop runs and
/// closed afterwards, handing prefetched but unsettled deliveries back to
/// the queue.
pub(crate) fn spawn_delivery_loop<S, E, A, T, C, H>(
    queue: String,
    stream: S,
    codec: C,
    handler: H,
    policy: DecodeFailurePolicy,
    channel: Option<Arc<Channel>>,
) -> Subscription
where
    S: Stream<Item = Result<Envelope<A>, E>> + Send + 'static,
    E: Display + Send + 'static,
    A: Acknowledge + 'static,
    T: DeserializeOwned + Send + 'static,
    C: Codec,
    H: Handler<T>,
{
    let (shutdown, rx) = watch::channel(false);
    let name = queue.clone();

    let task = tokio::spawn(async move {
        let stats = run_delivery_loop(name.clone(), stream, codec, handler, policy, rx).await;

        if let Some(channel) = channel {
            if channel.status().connected() {
                if let Err(err) = channel.close(REPLY_SUCCESS, "subscription closed").await {
                    debug!(error = err.to_string(), queue = name, "channel already closed");
                }
            }
        }

        stats
    });

    Subscription {
        queue,
        shutdown,
        task,
    }
}

/// Declares and binds `binding`'s queue with the flags of `class`, then
/// consumes it with `handler`, decoding every payload with `codec`.
///
/// # Parameters
/// * `broker` - The process-wide connection; the subscription opens its own channel
/// * `binding` - Queue, exchange and routing key to consume from
/// * `class` - Durability class of the queue
/// * `codec` - Decoder for every payload of the queue
/// * `handler` - Called once per decoded payload
/// * `options` - Prefetch, consumer tag and decode failure policy
///
/// # Returns
/// A handle on the running loop, or the AmqpError of the first setup step
/// that failed, in which case no task is started
pub async fn subscribe<T, C, H>(
    broker: &Broker,
    binding: &QueueBinding,
    class: DurabilityClass,
    codec: C,
    handler: H,
    options: SubscribeOptions,
) -> Result<Subscription, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    C: Codec,
    H: Handler<T>,
{
    let (channel, queue) = declare_and_bind(
        broker,
        binding.exchange_name(),
        binding.queue_name(),
        binding.key(),
        class,
    )
    .await?;

    channel
        .basic_qos(options.prefetch_count, BasicQosOptions { global: false })
        .await
        .map_err(|err| {
            error!(error = err.to_string(), queue = queue.name, "failure to configure qos");
            AmqpError::QoSDeclarationError(queue.name.clone())
        })?;

    let consumer = channel
        .basic_consume(
            &queue.name,
            &options.consumer_tag,
            BasicConsumeOptions {
                no_local: false,
                no_ack: false,
                exclusive: false,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await
        .map_err(|err| {
            error!(error = err.to_string(), queue = queue.name, "error to create the consumer");
            AmqpError::ConsumerDeclarationError(queue.name.clone())
        })?;

    info!(
        queue = queue.name,
        consumer = consumer.tag().as_str(),
        prefetch = options.prefetch_count,
        content_type = codec.content_type(),
        "subscribed"
    );

    let stream = consumer.map(|delivery| delivery.map(Envelope::from));

    Ok(spawn_delivery_loop(
        queue.name,
        stream,
        codec,
        handler,
        options.decode_failure,
        Some(channel),
    ))
}

/// Subscribes with the JSON codec and default options.
pub async fn subscribe_json<T, H>(
    broker: &Broker,
    exchange: &str,
    queue_name: &str,
    key: &str,
    class: DurabilityClass,
    handler: H,
) -> Result<Subscription, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    let binding = QueueBinding::new(queue_name)
        .exchange(exchange)
        .routing_key(key);

    subscribe(broker, &binding, class, JsonCodec, handler, SubscribeOptions::default()).await
}

/// Subscribes with the bincode codec and default options.
pub async fn subscribe_binary<T, H>(
    broker: &Broker,
    exchange: &str,
    queue_name: &str,
    key: &str,
    class: DurabilityClass,
    handler: H,
) -> Result<Subscription, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    let binding = QueueBinding::new(queue_name)
        .exchange(exchange)
        .routing_key(key);

    subscribe(
        broker,
        &binding,
        class,
        BincodeCodec::new(),
        handler,
        SubscribeOptions::default(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codec::JsonCodec, disposition::Acknowledge};
    use futures_util::stream;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Ack(u64),
        Nack(u64, bool),
    }

    struct RecordingAcker {
        tag: u64,
        calls: Arc<Mutex<Vec<Call>>>,
    }

    #[async_trait]
    impl Acknowledge for RecordingAcker {
        async fn acknowledge(&self) -> Result<(), AmqpError> {
            self.calls.lock().unwrap().push(Call::Ack(self.tag));
            Ok(())
        }

        async fn reject(&self, requeue: bool) -> Result<(), AmqpError> {
            self.calls.lock().unwrap().push(Call::Nack(self.tag, requeue));
            Ok(())
        }
    }

    fn envelopes(
        payloads: Vec<Vec<u8>>,
        calls: &Arc<Mutex<Vec<Call>>>,
    ) -> Vec<Result<Envelope<RecordingAcker>, String>> {
        payloads
            .into_iter()
            .enumerate()
            .map(|(i, data)| {
                let tag = i as u64 + 1;
                Ok(Envelope {
                    content_type: Some("application/json".to_owned()),
                    exchange: "peril_topic".to_owned(),
                    routing_key: "army_moves.alice".to_owned(),
                    delivery_tag: tag,
                    redelivered: false,
                    headers: None,
                    data,
                    acker: RecordingAcker {
                        tag,
                        calls: calls.clone(),
                    },
                })
            })
            .collect()
    }

    #[test]
    fn default_options() {
        let options = SubscribeOptions::default();
        assert_eq!(options.prefetch_count, 10);
        assert_eq!(options.consumer_tag, "");
        assert_eq!(options.decode_failure, DecodeFailurePolicy::LeavePending);
    }

    #[tokio::test]
    async fn deliveries_are_handled_in_order_with_matching_settlements() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let payloads = (1..=4u32).map(|n| JsonCodec.encode(&n).unwrap()).collect();
        let handler = {
            let seen = seen.clone();
            move |n: u32| {
                seen.lock().unwrap().push(n);
                match n % 3 {
                    0 => Disposition::NackDiscard,
                    1 => Disposition::Ack,
                    _ => Disposition::NackRequeue,
                }
            }
        };

        let subscription = spawn_delivery_loop(
            "army_moves.alice".to_owned(),
            stream::iter(envelopes(payloads, &calls)),
            JsonCodec,
            handler,
            DecodeFailurePolicy::LeavePending,
            None,
        );
        let stats = subscription.join().await.unwrap();
        assert_eq!(
            stats,
            DeliveryStats {
                acked: 2,
                requeued: 1,
                discarded: 1,
                ..Default::default()
            }
        );

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                Call::Ack(1),
                Call::Nack(2, true),
                Call::Nack(3, false),
                Call::Ack(4),
            ]
        );
    }

    #[tokio::test]
    async fn undecodable_delivery_is_skipped_without_settlement() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let payloads = vec![
            JsonCodec.encode(&1u32).unwrap(),
            b"garbage".to_vec(),
            JsonCodec.encode(&3u32).unwrap(),
        ];

        let subscription = spawn_delivery_loop(
            "army_moves.alice".to_owned(),
            stream::iter(envelopes(payloads, &calls)),
            JsonCodec,
            |_: u32| Disposition::Ack,
            DecodeFailurePolicy::LeavePending,
            None,
        );
        let stats = subscription.join().await.unwrap();
        assert_eq!(stats.acked, 2);
        assert_eq!(stats.pending, 1);

        assert_eq!(*calls.lock().unwrap(), vec![Call::Ack(1), Call::Ack(3)]);
    }

    #[tokio::test]
    async fn stream_errors_do_not_stop_the_loop() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut items = envelopes(vec![JsonCodec.encode(&1u32).unwrap()], &calls);
        items.insert(0, Err("connection reset".to_owned()));

        let subscription = spawn_delivery_loop(
            "army_moves.alice".to_owned(),
            stream::iter(items),
            JsonCodec,
            |_: u32| Disposition::Ack,
            DecodeFailurePolicy::LeavePending,
            None,
        );
        let stats = subscription.join().await.unwrap();
        assert_eq!(stats.acked, 1);

        assert_eq!(*calls.lock().unwrap(), vec![Call::Ack(1)]);
    }

    #[tokio::test]
    async fn cancel_wins_over_buffered_deliveries() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let payloads = (1..=3u32).map(|n| JsonCodec.encode(&n).unwrap()).collect();

        let subscription = spawn_delivery_loop(
            "army_moves.alice".to_owned(),
            stream::iter(envelopes(payloads, &calls)),
            JsonCodec,
            |_: u32| Disposition::Ack,
            DecodeFailurePolicy::LeavePending,
            None,
        );
        let stats = subscription.shutdown().await.unwrap();
        assert_eq!(stats, DeliveryStats::default());

        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_stops_a_loop_waiting_for_deliveries() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let items = envelopes(vec![JsonCodec.encode(&1u32).unwrap()], &calls);

        let subscription = spawn_delivery_loop(
            "pause.alice".to_owned(),
            stream::iter(items).chain(stream::pending()),
            JsonCodec,
            |_: u32| Disposition::Ack,
            DecodeFailurePolicy::LeavePending,
            None,
        );

        while calls.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(!subscription.is_finished());
        assert_eq!(subscription.queue(), "pause.alice");

        subscription.shutdown().await.unwrap();
        assert_eq!(*calls.lock().unwrap(), vec![Call::Ack(1)]);
    }

    #[tokio::test]
    async fn dropped_handle_leaves_the_loop_running() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        let subscription = spawn_delivery_loop(
            "war".to_owned(),
            stream,
            JsonCodec,
            |_: u32| Disposition::Ack,
            DecodeFailurePolicy::LeavePending,
            None,
        );
        drop(subscription);

        for item in envelopes(vec![JsonCodec.encode(&9u32).unwrap()], &calls) {
            assert!(tx.send(item).is_ok());
        }

        while calls.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(*calls.lock().unwrap(), vec![Call::Ack(1)]);
    }
}
