use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use tssbridge_storage::{declare, Checkpoint, CheckpointBatch, CheckpointStore, Queue};
use tssbridge_types::{
    Address, BlockNumber, ChainId, EpochId, RelayRequest, WorkMessage, WorkQueue, H256,
};

use crate::backoff::retry_forever;
use crate::chain_client::{ChainClient, LogFilter};
use crate::config::ChainConfig;
use crate::contract::{BridgeReader, SharedDbReader};
use crate::events::{signatures, topic_of, SharedDbEvent};
use crate::range::next_range;
use crate::recovery::reset_future_messages;
use crate::relay::responsible_sender;
use crate::Stores;

/// Validator set that signs relayed messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Committee {
    pub epoch: EpochId,
    #[serde(with = "tssbridge_types::serde_hex::address_vec")]
    pub validators: Vec<Address>,
    pub threshold: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideState {
    pub cursor: BlockNumber,
    /// Committee of the last relayed message.
    pub committee: Option<Committee>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SideStatus {
    pub chain: ChainId,
    pub cursor: BlockNumber,
    pub committee: Option<Committee>,
}

#[derive(Debug, Clone)]
pub struct SideBatch {
    pub from: BlockNumber,
    pub to: BlockNumber,
    pub state: SideState,
    pub messages: Vec<WorkMessage>,
}

/// Tails the side chain signature storage and relays messages that reach
/// their signature quorum.
pub struct SideWatcher {
    config: ChainConfig,
    shared_db_address: Address,
    own: Address,
    client: Arc<dyn ChainClient>,
    shared_db: Arc<dyn SharedDbReader>,
    bridge: Arc<dyn BridgeReader>,
    checkpoints: Arc<dyn CheckpointStore>,
    queue: Queue,
    status: Option<watch::Sender<SideStatus>>,
}

impl SideWatcher {
    pub fn new(
        config: ChainConfig,
        own: Address,
        client: Arc<dyn ChainClient>,
        shared_db: Arc<dyn SharedDbReader>,
        bridge: Arc<dyn BridgeReader>,
        stores: &Stores,
    ) -> Result<Self> {
        Ok(Self {
            shared_db_address: config.contract()?,
            config,
            own,
            client,
            shared_db,
            bridge,
            checkpoints: stores.checkpoints.clone(),
            queue: declare(stores.broker.clone(), WorkQueue::Relay)?,
            status: None,
        })
    }

    pub fn with_status(mut self, status: watch::Sender<SideStatus>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    fn publish_status(&self, state: &SideState) {
        if let Some(status) = &self.status {
            status.send_replace(SideStatus {
                chain: ChainId::Side,
                cursor: state.cursor,
                committee: state.committee.clone(),
            });
        }
    }

    pub async fn initialize(&self) -> Result<SideState> {
        let checkpoint = Checkpoint::load(self.checkpoints.as_ref(), ChainId::Side, &[])?;
        let state = SideState {
            cursor: checkpoint
                .last_block
                .map(|b| b + 1)
                .unwrap_or(self.config.start_block),
            committee: None,
        };
        reset_future_messages(self.checkpoints.as_ref(), &self.queue, state.cursor)?;
        info!(cursor = state.cursor, "side watcher state restored");
        self.publish_status(&state);
        Ok(state)
    }

    /// Committee of `epoch`, read from the home bridge once per batch.
    async fn committee(
        &self,
        epoch: EpochId,
        cache: &mut HashMap<EpochId, Committee>,
    ) -> Result<Committee> {
        if let Some(committee) = cache.get(&epoch) {
            return Ok(committee.clone());
        }
        let committee = Committee {
            epoch,
            validators: self.bridge.validators(epoch).await?,
            threshold: self.bridge.threshold(epoch).await?,
        };
        debug!(
            epoch,
            parties = committee.validators.len(),
            threshold = committee.threshold,
            "relay committee loaded"
        );
        cache.insert(epoch, committee.clone());
        Ok(committee)
    }

    /// Builds the relay request for `msg_hash` if its quorum was reached in
    /// `block` and this validator is the one to send it. The committee is the
    /// one of the epoch stored with the message, so every validator picks the
    /// same sender however late it scans.
    async fn check_quorum(
        &self,
        cache: &mut HashMap<EpochId, Committee>,
        msg_hash: &H256,
        block: BlockNumber,
    ) -> Result<Option<(Committee, RelayRequest)>> {
        let count = self.shared_db.signature_count(msg_hash, block).await?;
        if count == 0 {
            return Ok(None);
        }
        let epoch = self.shared_db.message_epoch(msg_hash, block).await?;
        let committee = self.committee(epoch, cache).await?;
        let threshold = committee.threshold as u64;
        if threshold == 0 || count < threshold {
            return Ok(None);
        }
        let before = match block.checked_sub(1) {
            Some(previous) => self.shared_db.signature_count(msg_hash, previous).await?,
            None => 0,
        };
        if before >= threshold {
            debug!(block, msg = %hex::encode(msg_hash), "quorum reached earlier");
            return Ok(None);
        }

        let sender = responsible_sender(msg_hash, &committee.validators, committee.threshold);
        if sender != Some(self.own) {
            debug!(block, epoch, msg = %hex::encode(msg_hash), "another validator relays");
            return Ok(None);
        }

        let request = RelayRequest {
            epoch,
            block_number: block,
            msg_hash: *msg_hash,
            message: self.shared_db.message(msg_hash, block).await?,
            signatures: self.shared_db.signatures(msg_hash, block).await?,
        };
        Ok(Some((committee, request)))
    }

    pub async fn scan(&self, state: &SideState, from: BlockNumber, to: BlockNumber) -> Result<SideBatch> {
        let logs = self
            .client
            .get_logs(&LogFilter {
                address: self.shared_db_address,
                from_block: from,
                to_block: to,
                topic0: Some(vec![topic_of(signatures::NEW_SIGNATURE)]),
            })
            .await?;

        let mut cache = HashMap::new();
        let mut committee = state.committee.clone();
        let mut messages = Vec::new();
        let mut seen: HashSet<(BlockNumber, H256)> = HashSet::new();

        for log in &logs {
            let block = log.block_number;
            let msg_hash = match SharedDbEvent::decode(log) {
                Ok(SharedDbEvent::NewSignature { signer, msg_hash }) => {
                    debug!(block, signer = %hex::encode(signer), msg = %hex::encode(msg_hash), "new signature");
                    msg_hash
                }
                Ok(SharedDbEvent::Unknown { .. }) => continue,
                Err(e) => {
                    warn!(block, log_index = log.log_index, "skipping malformed log: {}", e);
                    continue;
                }
            };
            if !seen.insert((block, msg_hash)) {
                continue;
            }
            if let Some((used, request)) = self.check_quorum(&mut cache, &msg_hash, block).await? {
                info!(block, epoch = used.epoch, msg = %hex::encode(msg_hash), "relay request");
                committee = Some(used);
                messages.push(WorkMessage::Relay(request));
            }
        }

        Ok(SideBatch {
            from,
            to,
            state: SideState {
                cursor: to + 1,
                committee,
            },
            messages,
        })
    }

    pub async fn commit(&self, batch: SideBatch) -> SideState {
        let backoff = self.config.backoff();
        let queue = &self.queue;
        for message in &batch.messages {
            retry_forever(backoff, queue.name(), || async move { queue.send(message) }).await;
        }

        let checkpoint = CheckpointBatch::new(ChainId::Side).last_block(batch.to);
        let store = self.checkpoints.as_ref();
        retry_forever(backoff, "checkpoint", || {
            let checkpoint = checkpoint.clone();
            async move { checkpoint.commit(store) }
        })
        .await;

        debug!(
            from = batch.from,
            to = batch.to,
            messages = batch.messages.len(),
            "side batch committed"
        );
        self.publish_status(&batch.state);
        batch.state
    }

    pub async fn poll_once(&self, state: &SideState) -> Result<Option<SideState>> {
        let head = self.client.block_number().await?;
        let Some((from, to)) = next_range(state.cursor, head, self.config.max_fetch_range_size)
        else {
            return Ok(None);
        };
        let batch = self.scan(state, from, to).await?;
        Ok(Some(self.commit(batch).await))
    }

    pub async fn watch(&self) -> Result<()> {
        info!(
            chain = %self.config.chain,
            rpc = %self.config.rpc_url,
            "starting side watcher"
        );
        let backoff = self.config.backoff();
        let mut state = retry_forever(backoff, "side initialize", || self.initialize()).await;

        loop {
            match self.poll_once(&state).await {
                Ok(Some(next)) => state = next,
                Ok(None) => sleep(self.config.poll_interval()).await,
                Err(e) => {
                    error!(cursor = state.cursor, "side batch failed, retrying: {:#}", e);
                    sleep(backoff.delay(0)).await;
                }
            }
        }
    }
}
