// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Peril server: declares the shared exchanges and records every game log
//! published by the clients until interrupted.

use peril_pubsub::{
    channel::Broker,
    config::AmqpConfig,
    disposition::Disposition,
    errors::AmqpError,
    logging,
    queue::DurabilityClass,
    routing::{any_user_key, GameLog, EXCHANGE_PERIL_TOPIC, GAME_LOG_SLUG},
    subscriber::subscribe_binary,
    topology::install_peril_topology,
};
use std::process::ExitCode;
use tracing::{error, info};

fn record_game_log(log: GameLog) -> Disposition {
    info!(
        time = log.current_time.to_rfc3339(),
        username = log.username,
        "{}",
        log.message
    );
    Disposition::Ack
}

async fn run(broker: &Broker) -> Result<(), AmqpError> {
    install_peril_topology(broker).await?;

    let subscription = subscribe_binary(
        broker,
        EXCHANGE_PERIL_TOPIC,
        GAME_LOG_SLUG,
        &any_user_key(GAME_LOG_SLUG),
        DurabilityClass::Durable,
        record_game_log,
    )
    .await?;
    info!(queue = subscription.queue(), "peril server started");

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = err.to_string(), "failure to listen for shutdown signal");
    }

    info!("shutting down");
    let stats = subscription.shutdown().await?;
    info!(
        acked = stats.acked,
        pending = stats.pending,
        failed = stats.failed,
        "game log subscription stopped"
    );

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init("info");

    let cfg = match AmqpConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = err.to_string(), "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let broker = match Broker::connect(&cfg).await {
        Ok(broker) => broker,
        Err(err) => {
            error!(error = err.to_string(), "could not reach the broker");
            return ExitCode::FAILURE;
        }
    };

    let result = run(&broker).await;
    let closed = broker.close().await;

    match result.and(closed) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = err.to_string(), "peril server stopped");
            ExitCode::FAILURE
        }
    }
}
