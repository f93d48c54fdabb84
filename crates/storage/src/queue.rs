use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};
use tssbridge_types::{queues::BACKUP_SUFFIX, WorkMessage, WorkQueue};

use crate::storage_trait::{Delivery, QueueBroker, StorageError};

/// Typed handle on one named queue of a broker.
#[derive(Clone)]
pub struct Queue {
    broker: Arc<dyn QueueBroker>,
    kind: WorkQueue,
    name: String,
}

pub fn declare(broker: Arc<dyn QueueBroker>, kind: WorkQueue) -> Result<Queue, StorageError> {
    declare_named(broker, kind, kind.name().to_string())
}

fn declare_named(
    broker: Arc<dyn QueueBroker>,
    kind: WorkQueue,
    name: String,
) -> Result<Queue, StorageError> {
    broker.declare(&name)?;
    Ok(Queue { broker, kind, name })
}

impl Queue {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> WorkQueue {
        self.kind
    }

    /// Temporary sibling queue holding messages of the same kind.
    pub fn backup(&self) -> Result<Queue, StorageError> {
        declare_named(
            self.broker.clone(),
            self.kind,
            format!("{}{}", self.name, BACKUP_SUFFIX),
        )
    }

    pub fn send(&self, message: &WorkMessage) -> Result<(), StorageError> {
        debug_assert_eq!(message.queue(), self.kind);
        let payload = message
            .to_vec()
            .map_err(|e| StorageError::SerializationFailed(e.to_string()))?;
        self.broker.publish(&self.name, &payload)?;
        debug!(queue = %self.name, block = message.block_number(), "message sent");
        Ok(())
    }

    /// Takes the oldest ready message without waiting. The delivery must be
    /// acked or rejected.
    pub fn get(&self) -> Result<Option<Delivery>, StorageError> {
        self.broker.fetch(&self.name)
    }

    pub fn decode(&self, delivery: &Delivery) -> Result<WorkMessage, StorageError> {
        WorkMessage::from_slice(self.kind, &delivery.payload)
            .map_err(|e| StorageError::DeserializationFailed(e.to_string()))
    }

    pub fn ack(&self, delivery: &Delivery) -> Result<(), StorageError> {
        self.broker.ack(delivery)
    }

    pub fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<(), StorageError> {
        self.broker.reject(delivery, requeue)
    }

    pub fn len(&self) -> Result<usize, StorageError> {
        self.broker.len(&self.name)
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    /// Handles at most one message. The message is acknowledged once the
    /// handler finishes, whether it succeeded or not: a failed job is retried
    /// by a fresh request from the chain, not by redelivery.
    pub async fn consume_one<F, Fut, E>(&self, handler: &mut F) -> Result<bool, StorageError>
    where
        F: FnMut(WorkMessage) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let Some(delivery) = self.get()? else {
            return Ok(false);
        };

        match self.decode(&delivery) {
            Ok(message) => {
                let block = message.block_number();
                if let Err(e) = handler(message).await {
                    error!(queue = %self.name, block, "job failed: {}", e);
                }
            }
            Err(e) => warn!(queue = %self.name, "dropping unreadable message: {}", e),
        }

        self.ack(&delivery)?;
        Ok(true)
    }

    /// Push-style consumption with prefetch 1: one job at a time, polling the
    /// broker every `idle` when the queue is empty. Returns only on broker
    /// failure.
    pub async fn consume<F, Fut, E>(&self, idle: Duration, mut handler: F) -> Result<(), StorageError>
    where
        F: FnMut(WorkMessage) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        loop {
            if !self.consume_one(&mut handler).await? {
                tokio::time::sleep(idle).await;
            }
        }
    }
}
