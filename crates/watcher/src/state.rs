use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;
use tssbridge_types::{Address, BlockNumber, ChainId, Epoch, EpochId, EpochPhase};

use crate::range::RangeAlignment;

/// Everything the home watcher derives from the chain. A batch works on a
/// copy that replaces the live value only once the batch is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherState {
    /// Next unprocessed block.
    pub cursor: BlockNumber,
    pub epoch: Epoch,
    /// Epoch being voted on or generated, if any.
    pub next_epoch: Option<EpochId>,
    pub phase: EpochPhase,
    pub range: RangeAlignment,
    pub is_current_validator: bool,
    /// Block of the last exchange not yet covered by a signing request, 0 if none.
    pub last_transaction_block: BlockNumber,
    pub foreign_nonce: BTreeMap<EpochId, u64>,
}

fn allowed(from: EpochPhase, to: EpochPhase) -> bool {
    use EpochPhase::*;
    matches!(
        (from, to),
        (Ready, ClosingEpoch)
            | (Ready, Voting)
            | (ClosingEpoch, Voting)
            | (Voting, Keygen)
            | (Voting, FundsTransfer)
            | (Voting, Ready)
            | (Keygen, Voting)
            | (Keygen, FundsTransfer)
            | (Keygen, Ready)
            | (FundsTransfer, Ready)
    )
}

impl WatcherState {
    pub fn new(cursor: BlockNumber, epoch: Epoch, range: RangeAlignment, own: &Address) -> Self {
        let is_current_validator = epoch.contains(own);
        let phase = if epoch.active {
            EpochPhase::Ready
        } else {
            EpochPhase::Voting
        };
        let mut foreign_nonce = BTreeMap::new();
        foreign_nonce.insert(epoch.id, 0);
        Self {
            cursor,
            epoch,
            next_epoch: None,
            phase,
            range,
            is_current_validator,
            last_transaction_block: 0,
            foreign_nonce,
        }
    }

    /// Nonce the next signing request of `epoch` will use.
    pub fn pending_nonce(&self, epoch: EpochId) -> u64 {
        self.foreign_nonce.get(&epoch).copied().unwrap_or(0)
    }

    /// Hands out the pending nonce of `epoch` and advances the counter.
    pub fn take_nonce(&mut self, epoch: EpochId) -> u64 {
        let counter = self.foreign_nonce.entry(epoch).or_insert(0);
        let nonce = *counter;
        *counter += 1;
        nonce
    }

    /// Moves to `to`, warning when the chain took a path the local view did
    /// not expect. The chain always wins.
    fn transition(&mut self, to: EpochPhase, block: BlockNumber) {
        if !allowed(self.phase, to) {
            warn!(
                block,
                epoch = self.epoch.id,
                from = ?self.phase,
                to = ?to,
                "unexpected epoch phase transition"
            );
        }
        self.phase = to;
    }

    pub fn start_epoch(&mut self, block: BlockNumber, mut epoch: Epoch, own: &Address) {
        self.transition(EpochPhase::Ready, block);
        epoch.active = true;
        epoch.start_block = block;
        if epoch.range_size == 0 {
            epoch.range_size = self.range.size;
        }
        self.range = RangeAlignment::new(epoch.range_size, block);
        self.is_current_validator = epoch.contains(own);
        self.foreign_nonce.entry(epoch.id).or_insert(0);
        self.next_epoch = None;
        self.epoch = epoch;
    }

    pub fn close_epoch(&mut self, block: BlockNumber) {
        self.transition(EpochPhase::ClosingEpoch, block);
    }

    pub fn end_epoch(&mut self, block: BlockNumber) {
        self.transition(EpochPhase::Voting, block);
        self.epoch.active = false;
    }

    pub fn begin_keygen(&mut self, block: BlockNumber, new_epoch: EpochId) {
        self.transition(EpochPhase::Keygen, block);
        self.next_epoch = Some(new_epoch);
    }

    pub fn cancel_keygen(&mut self, block: BlockNumber) {
        if self.phase != EpochPhase::Keygen {
            warn!(block, phase = ?self.phase, "keygen cancelled while no keygen is running");
        }
        self.transition(EpochPhase::Voting, block);
        self.next_epoch = None;
    }

    pub fn begin_funds_transfer(&mut self, block: BlockNumber, new_epoch: EpochId) {
        self.transition(EpochPhase::FundsTransfer, block);
        self.next_epoch = Some(new_epoch);
    }

    pub fn change_range_size(&mut self, block: BlockNumber, size: u16) {
        self.range = RangeAlignment::new(size, block);
        self.epoch.range_size = size;
    }

    pub fn status(&self, chain: ChainId) -> WatcherStatus {
        WatcherStatus {
            chain,
            cursor: self.cursor,
            epoch: self.epoch.id,
            next_epoch: self.next_epoch,
            phase: self.phase,
            active: self.epoch.active,
            is_current_validator: self.is_current_validator,
            threshold: self.epoch.threshold,
            parties: self.epoch.parties(),
            range: self.range,
            foreign_nonce: self.pending_nonce(self.epoch.id),
            last_transaction_block: self.last_transaction_block,
        }
    }
}

/// Snapshot published to the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherStatus {
    pub chain: ChainId,
    pub cursor: BlockNumber,
    pub epoch: EpochId,
    pub next_epoch: Option<EpochId>,
    pub phase: EpochPhase,
    pub active: bool,
    pub is_current_validator: bool,
    pub threshold: u16,
    pub parties: u16,
    pub range: RangeAlignment,
    pub foreign_nonce: u64,
    pub last_transaction_block: BlockNumber,
}
