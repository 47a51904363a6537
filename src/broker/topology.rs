use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, ExchangeKind};

use crate::contracts;
use crate::error::AppError;

const EXCHANGES: &[(&str, ExchangeKind)] = &[
    (contracts::EXCHANGE_RIDE_TOPIC, ExchangeKind::Topic),
    (contracts::EXCHANGE_DRIVER_TOPIC, ExchangeKind::Topic),
    (contracts::EXCHANGE_LOCATION_FANOUT, ExchangeKind::Fanout),
];

const QUEUES: &[&str] = &[
    contracts::QUEUE_RIDE_REQUESTS,
    contracts::QUEUE_RIDE_STATUS,
    contracts::QUEUE_DRIVER_MATCHING,
    contracts::QUEUE_DRIVER_RESPONSES,
    contracts::QUEUE_DRIVER_STATUS,
    contracts::QUEUE_LOCATION_UPDATES_RIDE,
];

const BINDINGS: &[(&str, &str, &str)] = &[
    (contracts::QUEUE_RIDE_REQUESTS, contracts::EXCHANGE_RIDE_TOPIC, "ride.request.*"),
    (contracts::QUEUE_RIDE_STATUS, contracts::EXCHANGE_RIDE_TOPIC, "ride.status.*"),
    (contracts::QUEUE_DRIVER_MATCHING, contracts::EXCHANGE_RIDE_TOPIC, "ride.request.*"),
    (contracts::QUEUE_DRIVER_RESPONSES, contracts::EXCHANGE_DRIVER_TOPIC, "driver.response.*"),
    (contracts::QUEUE_DRIVER_STATUS, contracts::EXCHANGE_DRIVER_TOPIC, "driver.status.*"),
    (contracts::QUEUE_LOCATION_UPDATES_RIDE, contracts::EXCHANGE_LOCATION_FANOUT, ""),
];

/// Declares the fixed exchange/queue/binding topology. Idempotent; runs on
/// every (re)connect.
pub async fn declare(channel: &Channel) -> Result<(), AppError> {
    for (name, kind) in EXCHANGES {
        channel
            .exchange_declare(
                name,
                kind.clone(),
                ExchangeDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await?;
    }

    for queue in QUEUES {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await?;
    }

    for (queue, exchange, routing_key) in BINDINGS {
        channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
    }

    Ok(())
}
