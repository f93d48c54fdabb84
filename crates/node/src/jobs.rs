use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, warn};
use tssbridge_storage::{declare, Delivery, Queue, QueueBroker, StorageError};
use tssbridge_types::{WorkMessage, WorkQueue};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("unknown queue {0}")]
    UnknownQueue(String),
    #[error("delivery {tag} is not in flight on {queue}")]
    NotInFlight { queue: String, tag: u64 },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A message handed to a downstream worker, acked by `tag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub queue: String,
    pub tag: u64,
    pub message: WorkMessage,
}

/// Pull access to the work queues for the signing workers, with prefetch 1:
/// a queue hands out its next message only after the previous one is acked.
pub struct JobQueues {
    queues: HashMap<WorkQueue, Queue>,
    in_flight: Mutex<HashMap<WorkQueue, (Job, Delivery)>>,
}

impl JobQueues {
    pub fn declare(broker: Arc<dyn QueueBroker>) -> Result<Self, StorageError> {
        let mut queues = HashMap::new();
        for kind in WorkQueue::ALL {
            queues.insert(kind, declare(broker.clone(), kind)?);
        }
        Ok(Self {
            queues,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    fn queue(&self, name: &str) -> Result<(WorkQueue, &Queue), JobError> {
        WorkQueue::from_name(name)
            .and_then(|kind| self.queues.get(&kind).map(|queue| (kind, queue)))
            .ok_or_else(|| JobError::UnknownQueue(name.to_string()))
    }

    /// The job in flight on `name`, or the next ready one. `None` when the
    /// queue is empty.
    pub fn next(&self, name: &str) -> Result<Option<Job>, JobError> {
        let (kind, queue) = self.queue(name)?;
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((job, _)) = in_flight.get(&kind) {
            return Ok(Some(job.clone()));
        }

        while let Some(delivery) = queue.get()? {
            match queue.decode(&delivery) {
                Ok(message) => {
                    let job = Job {
                        queue: delivery.queue.clone(),
                        tag: delivery.tag,
                        message,
                    };
                    debug!(queue = %job.queue, tag = job.tag, "job handed out");
                    in_flight.insert(kind, (job.clone(), delivery));
                    return Ok(Some(job));
                }
                Err(e) => {
                    warn!(queue = %queue.name(), tag = delivery.tag, "dropping unreadable message: {}", e);
                    queue.ack(&delivery)?;
                }
            }
        }
        Ok(None)
    }

    /// Removes the in-flight job `tag` from `name`.
    pub fn ack(&self, name: &str, tag: u64) -> Result<(), JobError> {
        let (kind, queue) = self.queue(name)?;
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        let Some((_, delivery)) = in_flight.get(&kind).filter(|(job, _)| job.tag == tag) else {
            return Err(JobError::NotInFlight {
                queue: name.to_string(),
                tag,
            });
        };
        queue.ack(delivery)?;
        in_flight.remove(&kind);
        debug!(queue = %name, tag, "job acked");
        Ok(())
    }
}
