use tracing::{info, warn};
use tssbridge_storage::{keys, read_u64, write_u64, CheckpointStore, Queue, StorageError};
use tssbridge_types::BlockNumber;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterReport {
    pub kept: usize,
    pub dropped: usize,
}

/// Moves every message of `from` to `to`, keeping those produced before
/// `resume_block`. Each message is acked only after it has been re-published.
fn transfer(from: &Queue, to: &Queue, resume_block: BlockNumber) -> Result<FilterReport, StorageError> {
    let mut report = FilterReport::default();
    while let Some(delivery) = from.get()? {
        match from.decode(&delivery) {
            Ok(message) if message.block_number() < resume_block => {
                to.send(&message)?;
                report.kept += 1;
            }
            Ok(message) => {
                report.dropped += 1;
                info!(
                    queue = from.name(),
                    block = message.block_number(),
                    "dropping message from a block that will be scanned again"
                );
            }
            Err(e) => {
                report.dropped += 1;
                warn!(queue = from.name(), "dropping unreadable message: {}", e);
            }
        }
        from.ack(&delivery)?;
    }
    Ok(report)
}

const DRAINING: u64 = 1;
const REPLAYING: u64 = 2;
const IDLE: u64 = 0;

/// Removes queued messages that rescanning from `resume_block` will produce
/// again, keeping older unconsumed work in its original order.
///
/// The step reached is recorded in `store`, so a pass interrupted by a crash
/// is completed in the right direction on the next start: while draining,
/// `.backup` holds the head of the queue; while replaying, it holds the tail.
pub fn reset_future_messages(
    store: &dyn CheckpointStore,
    queue: &Queue,
    resume_block: BlockNumber,
) -> Result<FilterReport, StorageError> {
    let backup = queue.backup()?;
    let marker = keys::queue_filter(queue.name());

    let mut dropped = 0;
    if read_u64(store, &marker)?.unwrap_or(IDLE) != DRAINING && !backup.is_empty()? {
        let finished = transfer(&backup, queue, resume_block)?;
        dropped += finished.dropped;
        warn!(
            queue = queue.name(),
            moved = finished.kept,
            "finished a replay interrupted on the previous run"
        );
    }

    write_u64(store, &marker, DRAINING)?;
    let drained = transfer(queue, &backup, resume_block)?;
    write_u64(store, &marker, REPLAYING)?;
    let replayed = transfer(&backup, queue, resume_block)?;
    write_u64(store, &marker, IDLE)?;

    let report = FilterReport {
        kept: replayed.kept,
        dropped: dropped + drained.dropped + replayed.dropped,
    };
    info!(
        queue = queue.name(),
        resume_block,
        kept = report.kept,
        dropped = report.dropped,
        "queue filtered"
    );
    Ok(report)
}
