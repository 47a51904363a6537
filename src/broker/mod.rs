//! Resilient AMQP client: topology setup, confirmed publishes, and consumer
//! loops that re-enter on their own after a broker outage.

pub mod topology;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{error, info, warn};

use crate::error::AppError;

const CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);
const HANDLER_TIMEOUT: Duration = Duration::from_secs(30);
const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

struct Inner {
    connection: Connection,
    publish_channel: Channel,
}

/// Broker connection with auto-reconnect. Consumers are NOT resumed on
/// reconnect; each consumer loop re-enters when a channel becomes available.
pub struct Broker {
    url: String,
    inner: RwLock<Option<Inner>>,
    publish_lock: Mutex<()>,
    reconnect_tx: mpsc::Sender<()>,
}

impl Broker {
    /// Dials once (failing fast on a bad URL) and starts the reconnect
    /// watcher.
    pub async fn connect(url: &str) -> Result<Arc<Self>, AppError> {
        let (reconnect_tx, reconnect_rx) = mpsc::channel(1);

        let broker = Arc::new(Self {
            url: url.to_string(),
            inner: RwLock::new(None),
            publish_lock: Mutex::new(()),
            reconnect_tx,
        });

        let inner = broker.dial().await?;
        *broker.inner.write().await = Some(inner);
        info!("broker connected");

        tokio::spawn(Arc::clone(&broker).watch(reconnect_rx));

        Ok(broker)
    }

    async fn dial(&self) -> Result<Inner, AppError> {
        let connection =
            Connection::connect(&self.url, ConnectionProperties::default()).await?;

        let publish_channel = connection.create_channel().await?;
        topology::declare(&publish_channel).await?;
        publish_channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        let tx = self.reconnect_tx.clone();
        connection.on_error(move |err| {
            warn!(error = %err, "broker connection error");
            let _ = tx.try_send(());
        });

        Ok(Inner { connection, publish_channel })
    }

    /// Reconnect loop with exponential backoff; re-declares topology and
    /// re-enables confirms on every new connection.
    async fn watch(self: Arc<Self>, mut reconnect_rx: mpsc::Receiver<()>) {
        while reconnect_rx.recv().await.is_some() {
            self.inner.write().await.take();

            let mut backoff = BACKOFF_INITIAL;
            loop {
                match self.dial().await {
                    Ok(inner) => {
                        *self.inner.write().await = Some(inner);
                        info!("broker reconnected, topology re-declared");
                        break;
                    }
                    Err(err) => {
                        error!(error = %err, backoff_secs = backoff.as_secs(), "broker reconnect failed");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(BACKOFF_CAP);
                    }
                }
            }
        }
    }

    /// Publishes a persistent JSON message with `mandatory` routing and waits
    /// for the publisher confirm.
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), AppError> {
        let channel = {
            let guard = self.inner.read().await;
            let inner = guard
                .as_ref()
                .ok_or_else(|| AppError::PublishFailed("broker is not connected".to_string()))?;
            inner.publish_channel.clone()
        };

        // one confirm in flight at a time keeps confirms aligned with publishes
        let _publishing = self.publish_lock.lock().await;

        let confirm = tokio::time::timeout(CONFIRM_TIMEOUT, async {
            let promise = channel
                .basic_publish(
                    exchange,
                    routing_key,
                    BasicPublishOptions { mandatory: true, ..Default::default() },
                    body,
                    BasicProperties::default()
                        .with_content_type("application/json".into())
                        .with_delivery_mode(2),
                )
                .await?;
            promise.await
        })
        .await
        .map_err(|_| AppError::PublishFailed(format!("confirm timeout on {exchange}/{routing_key}")))??;

        match confirm {
            Confirmation::Ack(None) => Ok(()),
            Confirmation::Ack(Some(_returned)) => Err(AppError::PublishFailed(format!(
                "message returned as unroutable: {exchange}/{routing_key}"
            ))),
            Confirmation::Nack(_) => Err(AppError::PublishFailed(format!(
                "publish not acknowledged on {exchange}/{routing_key}"
            ))),
            Confirmation::NotRequested => Err(AppError::PublishFailed(
                "publisher confirms are not enabled".to_string(),
            )),
        }
    }

    /// Opens a fresh channel with QoS applied and starts a consumer on it.
    pub async fn consumer(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> Result<QueueConsumer, AppError> {
        let channel = {
            let guard = self.inner.read().await;
            let inner = guard
                .as_ref()
                .ok_or_else(|| AppError::Internal("broker is not connected".to_string()))?;
            inner.connection.create_channel().await?
        };

        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;

        let consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        Ok(QueueConsumer { channel, consumer, tag: consumer_tag.to_string() })
    }

    /// Long-lived consumer loop: manual acks, nack(requeue=false) on handler
    /// error, 30 s handler timeout, and re-entry with backoff when the stream
    /// or the broker goes away.
    pub async fn run_consumer<F, Fut>(
        self: Arc<Self>,
        queue: &'static str,
        consumer_tag: &'static str,
        prefetch: u16,
        handler: F,
    ) where
        F: Fn(DeliveryPayload) -> Fut + Send + Sync,
        Fut: Future<Output = Result<(), AppError>> + Send,
    {
        loop {
            let mut queue_consumer = match self.consumer(queue, consumer_tag, prefetch).await {
                Ok(queue_consumer) => queue_consumer,
                Err(err) => {
                    warn!(queue, error = %err, "consumer start failed, retrying");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            info!(queue, consumer_tag, "consumer started");

            while let Some(delivery) = queue_consumer.next().await {
                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(err) => {
                        warn!(queue, error = %err, "consumer stream error");
                        break;
                    }
                };

                let payload = DeliveryPayload {
                    routing_key: delivery.routing_key.to_string(),
                    data: delivery.data.clone(),
                };

                let outcome = tokio::time::timeout(HANDLER_TIMEOUT, handler(payload)).await;
                match outcome {
                    Ok(Ok(())) => {
                        if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
                            warn!(queue, error = %err, "ack failed");
                            break;
                        }
                    }
                    Ok(Err(err)) => {
                        error!(queue, error = %err, "handler failed, dropping delivery");
                        let _ = delivery
                            .nack(BasicNackOptions { requeue: false, ..Default::default() })
                            .await;
                    }
                    Err(_) => {
                        error!(queue, "handler timed out, dropping delivery");
                        let _ = delivery
                            .nack(BasicNackOptions { requeue: false, ..Default::default() })
                            .await;
                    }
                }
            }

            queue_consumer.cancel().await;
            warn!(queue, "consumer stream ended, re-entering");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

/// What a consumer handler sees of a delivery; acking stays with the loop.
#[derive(Debug, Clone)]
pub struct DeliveryPayload {
    pub routing_key: String,
    pub data: Vec<u8>,
}

/// A running consumer plus the channel that keeps it alive. Dropping the
/// handle without [`QueueConsumer::cancel`] leaves the server-side consumer
/// to die with the channel.
pub struct QueueConsumer {
    channel: Channel,
    consumer: Consumer,
    tag: String,
}

impl QueueConsumer {
    pub async fn next(&mut self) -> Option<lapin::Result<lapin::message::Delivery>> {
        self.consumer.next().await
    }

    /// Cancels the consumer tag and closes its channel.
    pub async fn cancel(self) {
        let _ = self
            .channel
            .basic_cancel(&self.tag, lapin::options::BasicCancelOptions::default())
            .await;
        let _ = self.channel.close(200, "consumer done").await;
    }
}
