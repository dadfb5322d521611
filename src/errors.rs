// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Peril Transport
//!
//! This module provides the error types for every stage of the transport:
//! connecting to the broker, declaring topology, encoding and decoding
//! payloads, publishing, and settling deliveries.
//!
//! Setup-time errors (connection, topology, subscribe) are returned to the
//! caller. Per-envelope errors (decode, ack/nack) are logged by the delivery
//! loop and never stop the subscription.

use thiserror::Error;

/// Errors raised by a [`crate::codec::Codec`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The value could not be represented in the codec's encoding
    #[error("failure to encode `{content_type}` payload: {reason}")]
    Encode {
        content_type: &'static str,
        reason: String,
    },

    /// The bytes are malformed or do not match the expected shape
    #[error("failure to decode `{content_type}` payload: {reason}")]
    Decode {
        content_type: &'static str,
        reason: String,
    },
}

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Variants are grouped by the stage that produces them. The `String`
/// payloads carry the broker's own message or the name of the entity that
/// was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// The subscription task panicked or was aborted
    #[error("internal error `{0}`")]
    InternalError(String),

    /// Configuration could not be loaded or deserialized
    #[error("failure to load configuration `{0}`")]
    ConfigError(String),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect `{0}`")]
    ConnectionError(String),

    /// Error closing the connection to the RabbitMQ server
    #[error("failure to close the connection `{0}`")]
    CloseConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel `{0}`")]
    ChannelError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error starting a consumer on a queue
    #[error("failure to declare consumer `{0}`")]
    ConsumerDeclarationError(String),

    /// Error encoding or decoding a payload
    #[error(transparent)]
    SerializationError(#[from] CodecError),

    /// Error publishing a message
    #[error("failure to publish `{0}`")]
    PublishingError(String),

    /// Error acknowledging the delivery with the given tag
    #[error("failure to ack message `{0}`")]
    AckMessageError(u64),

    /// Error negative-acknowledging the delivery with the given tag
    #[error("failure to nack message `{0}`")]
    NackMessageError(u64),
}

impl AmqpError {
    /// Returns true when the error came from declaring exchanges, queues or
    /// bindings, or from opening the channel used to declare them.
    pub fn is_topology(&self) -> bool {
        matches!(
            self,
            AmqpError::ChannelError(_)
                | AmqpError::DeclareExchangeError(_)
                | AmqpError::DeclareQueueError(_)
                | AmqpError::BindingExchangeToQueueError(_, _)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_error_names_both_sides() {
        let err = AmqpError::BindingExchangeToQueueError("peril_topic".into(), "war".into());
        assert_eq!(
            err.to_string(),
            "failure to binding exchange `peril_topic` to queue `war`"
        );
    }

    #[test]
    fn codec_errors_convert_transparently() {
        let codec = CodecError::Decode {
            content_type: "application/json",
            reason: "expected value".into(),
        };
        let err: AmqpError = codec.clone().into();

        assert_eq!(err, AmqpError::SerializationError(codec.clone()));
        assert_eq!(err.to_string(), codec.to_string());
    }

    #[test]
    fn topology_classification() {
        assert!(AmqpError::DeclareQueueError("war".into()).is_topology());
        assert!(AmqpError::ChannelError("closed".into()).is_topology());
        assert!(!AmqpError::PublishingError("closed".into()).is_topology());
        assert!(!AmqpError::AckMessageError(7).is_topology());
    }
}
