// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod consumer;
mod otel;

pub mod channel;
pub mod codec;
pub mod config;
pub mod disposition;
pub mod errors;
pub mod exchange;
pub mod handlers;
pub mod logging;
pub mod publisher;
pub mod queue;
pub mod routing;
pub mod subscriber;
pub mod topology;

pub use consumer::{DeliveryStats, Envelope};
