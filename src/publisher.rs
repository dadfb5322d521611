// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! This module encodes typed values and publishes them to RabbitMQ
//! exchanges. Each message carries the codec's content type, a fresh
//! message id and the current OpenTelemetry trace context in its headers.
//!
//! Publishing is fire-and-forget: there are no publisher confirms and no
//! retry, so calling twice for one event produces two messages.

use crate::{
    codec::{BincodeCodec, Codec, JsonCodec},
    errors::AmqpError,
    otel,
};
use async_trait::async_trait;
use lapin::{
    options::BasicPublishOptions,
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties, Channel,
};
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error};
use uuid::Uuid;

/// An encoded payload addressed to an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishMessage {
    pub exchange: String,
    pub routing_key: String,
    pub content_type: &'static str,
    pub data: Vec<u8>,
}

impl PublishMessage {
    /// Encodes `value` with `codec` and addresses it to `exchange` with
    /// `routing_key`.
    pub fn encode<C, T>(
        codec: &C,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<PublishMessage, AmqpError>
    where
        C: Codec,
        T: Serialize + ?Sized,
    {
        Ok(PublishMessage {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            content_type: codec.content_type(),
            data: codec.encode(&value)?,
        })
    }
}

/// Sends encoded messages to the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Sends one message, non-mandatory and non-immediate.
    ///
    /// # Parameters
    /// * `msg` - Encoded payload with its exchange and routing key
    ///
    /// # Returns
    /// Ok(()) on success or PublishingError when the broker rejects it
    async fn publish(&self, msg: &PublishMessage) -> Result<(), AmqpError>;
}

/// RabbitMQ implementation of the Publisher trait.
///
/// Owns one channel; share the returned `Arc` rather than opening a
/// publisher per message.
pub struct RabbitMQPublisher {
    channel: Arc<Channel>,
}

impl RabbitMQPublisher {
    pub fn new(channel: Arc<Channel>) -> Arc<RabbitMQPublisher> {
        Arc::new(RabbitMQPublisher { channel })
    }
}

#[async_trait]
impl Publisher for RabbitMQPublisher {
    async fn publish(&self, msg: &PublishMessage) -> Result<(), AmqpError> {
        let mut headers = BTreeMap::<ShortString, AMQPValue>::default();
        otel::inject_current(&mut headers);

        let message_id = Uuid::new_v4().to_string();
        debug!(
            exchange = msg.exchange,
            key = msg.routing_key,
            message_id,
            "publishing message"
        );

        match self
            .channel
            .basic_publish(
                &msg.exchange,
                &msg.routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &msg.data,
                BasicProperties::default()
                    .with_content_type(ShortString::from(msg.content_type))
                    .with_message_id(ShortString::from(message_id))
                    .with_headers(FieldTable::from(headers)),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    exchange = msg.exchange,
                    key = msg.routing_key,
                    "error publishing message"
                );
                Err(AmqpError::PublishingError(err.to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Encodes `value` with `codec` and publishes it.
///
/// # Parameters
/// * `publisher` - Where the encoded message is sent
/// * `codec` - Encoder, also setting the content type
/// * `exchange` - Destination exchange
/// * `routing_key` - Routing key of the message
/// * `value` - Payload to encode
///
/// # Returns
/// Ok(()) once the broker took the message, SerializationError when
/// encoding fails, or PublishingError when the broker rejects it
pub async fn publish_with<P, C, T>(
    publisher: &P,
    codec: &C,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), AmqpError>
where
    P: Publisher + ?Sized,
    C: Codec,
    T: Serialize + ?Sized,
{
    let msg = PublishMessage::encode(codec, exchange, routing_key, value)?;
    publisher.publish(&msg).await
}

/// Publishes `value` as JSON.
pub async fn publish_json<P, T>(
    publisher: &P,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), AmqpError>
where
    P: Publisher + ?Sized,
    T: Serialize + ?Sized,
{
    publish_with(publisher, &JsonCodec, exchange, routing_key, value).await
}

/// Publishes `value` encoded with bincode.
pub async fn publish_binary<P, T>(
    publisher: &P,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), AmqpError>
where
    P: Publisher + ?Sized,
    T: Serialize + ?Sized,
{
    publish_with(publisher, &BincodeCodec::new(), exchange, routing_key, value).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{BINCODE_CONTENT_TYPE, JSON_CONTENT_TYPE},
        errors::CodecError,
        routing::{PlayingState, EXCHANGE_PERIL_DIRECT, PAUSE_KEY},
    };
    use std::collections::HashMap;

    #[test]
    fn encode_stamps_the_codec_content_type() {
        let state = PlayingState { is_paused: true };

        let json = PublishMessage::encode(&JsonCodec, EXCHANGE_PERIL_DIRECT, PAUSE_KEY, &state)
            .unwrap();
        assert_eq!(json.content_type, JSON_CONTENT_TYPE);
        assert_eq!(json.data, br#"{"IsPaused":true}"#.to_vec());

        let binary =
            PublishMessage::encode(&BincodeCodec::new(), EXCHANGE_PERIL_DIRECT, PAUSE_KEY, &state)
                .unwrap();
        assert_eq!(binary.content_type, BINCODE_CONTENT_TYPE);
        assert_eq!(binary.exchange, "peril_direct");
        assert_eq!(binary.routing_key, "pause");
    }

    #[tokio::test]
    async fn publish_json_sends_one_message() {
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish()
            .withf(|msg| {
                msg.exchange == "peril_direct"
                    && msg.routing_key == "pause"
                    && msg.content_type == JSON_CONTENT_TYPE
            })
            .times(1)
            .returning(|_| Ok(()));

        publish_json(
            &publisher,
            EXCHANGE_PERIL_DIRECT,
            PAUSE_KEY,
            &PlayingState { is_paused: false },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn encode_failure_never_reaches_the_broker() {
        let mut publisher = MockPublisher::new();
        publisher.expect_publish().never();

        let mut value = HashMap::new();
        value.insert((1, 2), "tuple keys are not valid json keys");

        let err = publish_json(&publisher, "peril_topic", "war.alice", &value)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AmqpError::SerializationError(CodecError::Encode { .. })
        ));
    }

    #[tokio::test]
    async fn broker_rejection_is_returned() {
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish()
            .times(1)
            .returning(|_| Err(AmqpError::PublishingError("channel closed".to_owned())));

        let err = publish_binary(&publisher, "peril_topic", "game_logs.alice", &3u8)
            .await
            .unwrap_err();

        assert_eq!(err, AmqpError::PublishingError("channel closed".to_owned()));
    }
}
