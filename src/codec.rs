// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Payload Codecs
//!
//! A codec turns a typed payload into the bytes carried by an AMQP message
//! and back. Two encodings are provided:
//!
//! - [`JsonCodec`]: self-describing text, readable from any language and in
//!   the RabbitMQ management UI.
//! - [`BincodeCodec`]: compact binary tied to the payload's Rust shape. Only
//!   usable when producer and consumer share the same type definition.
//!
//! The codec is chosen statically by the caller. The content type it reports
//! is stamped on every published message, but subscribers never branch on it.

use crate::errors::CodecError;
use serde::{de::DeserializeOwned, Serialize};

/// Content type stamped on messages encoded by [`JsonCodec`]
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content type stamped on messages encoded by [`BincodeCodec`]
pub const BINCODE_CONTENT_TYPE: &str = "application/x-bincode";

/// Encodes and decodes payloads of any serde type.
pub trait Codec: Clone + Default + Send + Sync + 'static {
    /// The content type recorded on the envelope.
    fn content_type(&self) -> &'static str;

    /// Serializes a value into bytes.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Deserializes bytes into a value.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError>;
}

/// Structured text codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        JSON_CONTENT_TYPE
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|err| CodecError::Encode {
            content_type: JSON_CONTENT_TYPE,
            reason: err.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(data).map_err(|err| CodecError::Decode {
            content_type: JSON_CONTENT_TYPE,
            reason: err.to_string(),
        })
    }
}

/// Compact binary codec backed by `bincode`'s serde bridge.
///
/// Formats that need `deserialize_any` (untagged enums, `serde_json::Value`)
/// are rejected at decode time.
#[derive(Clone, Default)]
pub struct BincodeCodec {
    config: bincode::config::Configuration,
}

impl BincodeCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: bincode::config::Configuration) -> Self {
        Self { config }
    }
}

impl Codec for BincodeCodec {
    fn content_type(&self) -> &'static str {
        BINCODE_CONTENT_TYPE
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        bincode::serde::encode_to_vec(value, self.config).map_err(|err| CodecError::Encode {
            content_type: BINCODE_CONTENT_TYPE,
            reason: err.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        bincode::serde::decode_from_slice(data, self.config)
            .map(|(value, _)| value)
            .map_err(|err| CodecError::Decode {
                content_type: BINCODE_CONTENT_TYPE,
                reason: err.to_string(),
            })
    }
}
