//! Message Listener (C6): the AMQP consumer that turns a bus delivery into
//! a pipeline run (spec.md §4.7, §6).
//!
//! Moves through a fixed state sequence on every connection attempt:
//! `Disconnected -> Configuring -> Consuming -> (Dispatching -> Consuming)*`.
//! Topology declaration is idempotent (`declare` not `declare-or-die`), so a
//! reconnect after a transient broker blip doesn't fail just because the
//! exchange already exists from the previous connection's setup.
//!
//! A message whose body can't be decoded, or that is implausibly short, is
//! nacked without requeue: redelivering it would only fail the same way
//! forever, and the point of manual ack is to make that an explicit
//! decision rather than a silent retry loop. Everything else — the
//! connection breaking, the channel closing — is surfaced as an error and
//! left to the caller's reconnect loop (spec.md §9 Design Note); this
//! crate never sleeps or retries on its own.

use std::sync::Arc;

use futures_lite::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::{info, warn};

use pipefire_config::BusConfig;
use pipefire_domain::{PipelineError, TransferFilesPayload};
use pipefire_plugins::Pipeline;

const CONSUMER_TAG: &str = "pipefire";
/// A body shorter than this cannot possibly contain a well-formed
/// `TransferFilesPayload` and is rejected before even attempting to decode
/// it (spec.md §6).
const MIN_PLAUSIBLE_BODY_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerState {
    Disconnected,
    Configuring,
    Consuming,
    Dispatching,
}

/// Connects once, declares topology, and consumes from the first queue
/// named in `bus.queues` until the connection or channel closes. Returns on
/// any such closure so the caller can apply its own backoff and call
/// `listen` again.
pub async fn listen(bus: &BusConfig, pipeline: Arc<dyn Pipeline>) -> Result<(), PipelineError> {
    let mut state = ListenerState::Disconnected;

    let queue_name = bus
        .queues
        .first()
        .map(|q| q.name.clone())
        .ok_or_else(|| PipelineError::Config("bus config names no queues to consume from".to_string()))?;

    let connection = Connection::connect(
        &bus.amqp_url(),
        ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio),
    )
    .await
    .map_err(|e| PipelineError::TransientInfra(format!("connecting to bus: {e}")))?;

    let channel = connection
        .create_channel()
        .await
        .map_err(|e| PipelineError::TransientInfra(format!("opening channel: {e}")))?;

    state = ListenerState::Configuring;
    declare_topology(&channel, bus).await?;

    let mut consumer = channel
        .basic_consume(
            &queue_name,
            CONSUMER_TAG,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| PipelineError::TransientInfra(format!("consuming from {queue_name}: {e}")))?;

    state = ListenerState::Consuming;
    info!(queue = queue_name, ?state, "listening");

    while let Some(delivery) = consumer.next().await {
        let delivery = delivery.map_err(|e| PipelineError::TransientInfra(format!("delivery error: {e}")))?;

        state = ListenerState::Dispatching;
        let payload = match decode_payload(&delivery.data) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "rejecting message body, nacking");
                nack(&delivery).await?;
                state = ListenerState::Consuming;
                continue;
            }
        };

        let outcome = pipeline.execute(payload.message).await;
        if outcome.is_success() {
            delivery
                .ack(BasicAckOptions::default())
                .await
                .map_err(|e| PipelineError::TransientInfra(format!("acking delivery: {e}")))?;
        } else {
            for failure in &outcome.failures {
                warn!(task = %failure.task, error = %failure.source, "task failure in run");
            }
            nack(&delivery).await?;
        }
        state = ListenerState::Consuming;
    }

    warn!(?state, "consumer stream ended");
    Err(PipelineError::TransientInfra("consumer stream ended".to_string()))
}

/// Rejects a body too short to be a real payload before even attempting to
/// decode it, and otherwise decodes as JSON.
fn decode_payload(data: &[u8]) -> Result<TransferFilesPayload, String> {
    if data.len() < MIN_PLAUSIBLE_BODY_LEN {
        return Err(format!("body is implausibly short ({} bytes)", data.len()));
    }
    serde_json::from_slice(data).map_err(|e| e.to_string())
}

async fn nack(delivery: &lapin::message::Delivery) -> Result<(), PipelineError> {
    delivery
        .nack(BasicNackOptions {
            requeue: false,
            ..Default::default()
        })
        .await
        .map_err(|e| PipelineError::TransientInfra(format!("nacking delivery: {e}")))
}

/// Declares every configured exchange, then every configured queue, then
/// every binding tying a queue to one of those exchanges — idempotently,
/// so a reconnect after a transient broker blip doesn't fail just because
/// the previous connection already declared this topology (spec.md §4.7).
async fn declare_topology(channel: &Channel, bus: &BusConfig) -> Result<(), PipelineError> {
    for exchange in &bus.exchanges {
        channel
            .exchange_declare(
                &exchange.name,
                ExchangeKind::Custom(exchange.kind.clone()),
                ExchangeDeclareOptions {
                    durable: exchange.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| PipelineError::TransientInfra(format!("declaring exchange {}: {e}", exchange.name)))?;
    }

    for queue in &bus.queues {
        channel
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    durable: queue.durable,
                    auto_delete: queue.auto_delete,
                    exclusive: queue.exclusive,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| PipelineError::TransientInfra(format!("declaring queue {}: {e}", queue.name)))?;

        for binding in &queue.bindings {
            channel
                .queue_bind(
                    &queue.name,
                    &binding.exchange,
                    &binding.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    PipelineError::TransientInfra(format!(
                        "binding {} to {} ({}): {e}",
                        queue.name, binding.exchange, binding.routing_key
                    ))
                })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_implausibly_short_body() {
        assert!(decode_payload(b"{").is_err());
        assert!(decode_payload(b"").is_err());
    }

    #[test]
    fn rejects_undecodable_json() {
        assert!(decode_payload(b"not json at all").is_err());
    }

    #[test]
    fn decodes_well_formed_payload() {
        let body = br#"{
            "MessageType": ["TransferFiles"],
            "Message": {
                "task": "directdebit",
                "start_date": "2026-07-28",
                "correlationId": "00000000-0000-0000-0000-000000000000",
                "files": ["a.csv"]
            }
        }"#;
        let payload = decode_payload(body).unwrap();
        assert_eq!(payload.message.task, "directdebit");
        assert_eq!(payload.message.files.len(), 1);
    }
}
