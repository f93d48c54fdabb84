use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use tssbridge_storage::{declare, Checkpoint, CheckpointBatch, CheckpointStore, Queue};
use tssbridge_types::{Address, BlockNumber, ChainId, WorkMessage, WorkQueue};

use crate::backoff::retry_forever;
use crate::chain_client::{ChainClient, Log, LogFilter};
use crate::config::ChainConfig;
use crate::contract::BridgeReader;
use crate::dispatcher::Dispatcher;
use crate::downstream::signal_ready;
use crate::event_processor::EventProcessor;
use crate::events::{signatures, topic_of, BridgeEvent};
use crate::range::{next_range, RangeAlignment};
use crate::recovery::reset_future_messages;
use crate::state::{WatcherState, WatcherStatus};
use crate::tx_recovery::{CompressedKeyHex, ForeignAddressEncoder};
use crate::Stores;

/// Messages produced by one scanned block range and the state after it.
#[derive(Debug, Clone)]
pub struct Batch {
    pub from: BlockNumber,
    pub to: BlockNumber,
    pub state: WatcherState,
    pub messages: Vec<WorkMessage>,
}

/// Tails the home bridge contract and turns its events into work.
pub struct ChainWatcher {
    config: ChainConfig,
    bridge_address: Address,
    client: Arc<dyn ChainClient>,
    bridge: Arc<dyn BridgeReader>,
    checkpoints: Arc<dyn CheckpointStore>,
    queues: HashMap<WorkQueue, Queue>,
    processor: EventProcessor,
    dispatcher: Dispatcher,
    http: reqwest::Client,
    downstream_urls: Vec<String>,
    status: Option<watch::Sender<WatcherStatus>>,
}

impl ChainWatcher {
    pub fn new(
        config: ChainConfig,
        client: Arc<dyn ChainClient>,
        bridge: Arc<dyn BridgeReader>,
        stores: &Stores,
        dispatcher: Dispatcher,
    ) -> Result<Self> {
        let mut queues = HashMap::new();
        for kind in WorkQueue::HOME {
            queues.insert(kind, declare(stores.broker.clone(), kind)?);
        }
        let processor =
            EventProcessor::new(client.clone(), bridge.clone(), Arc::new(CompressedKeyHex));

        Ok(Self {
            bridge_address: config.contract()?,
            config,
            client,
            bridge,
            checkpoints: stores.checkpoints.clone(),
            queues,
            processor,
            dispatcher,
            http: reqwest::Client::new(),
            downstream_urls: Vec::new(),
            status: None,
        })
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn ForeignAddressEncoder>) -> Self {
        self.processor = EventProcessor::new(self.client.clone(), self.bridge.clone(), encoder);
        self
    }

    pub fn with_downstream(mut self, urls: Vec<String>) -> Self {
        self.downstream_urls = urls;
        self
    }

    pub fn with_status(mut self, status: watch::Sender<WatcherStatus>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn queue(&self, kind: WorkQueue) -> Result<&Queue> {
        self.queues
            .get(&kind)
            .ok_or_else(|| anyhow!("{} is not a home chain queue", kind.name()))
    }

    fn publish_status(&self, state: &WatcherState) {
        if let Some(status) = &self.status {
            status.send_replace(state.status(ChainId::Home));
        }
    }

    async fn last_log(&self, signature: &str, from: BlockNumber, to: BlockNumber) -> Result<Option<Log>> {
        if from > to {
            return Ok(None);
        }
        let logs = self
            .client
            .get_logs(&LogFilter {
                address: self.bridge_address,
                from_block: from,
                to_block: to,
                topic0: Some(vec![topic_of(signature)]),
            })
            .await?;
        Ok(logs.into_iter().last())
    }

    /// Rebuilds the replicated state from the latest epoch start and the
    /// persisted checkpoint.
    pub async fn bootstrap_state(&self) -> Result<WatcherState> {
        let head = self.client.block_number().await?;
        let start = self.config.start_block;
        let own = *self.dispatcher.own_address();

        let epoch_start = self.last_log(signatures::EPOCH_START, start, head).await?;
        let (mut epoch, epoch_start_block) = match &epoch_start {
            Some(log) => {
                let BridgeEvent::EpochStart { epoch, .. } = BridgeEvent::decode(log)? else {
                    bail!("EpochStart query returned another event");
                };
                (self.processor.epoch(epoch).await?, log.block_number)
            }
            None => (self.processor.epoch(0).await?, start),
        };
        epoch.start_block = epoch_start_block;

        let checkpoint = Checkpoint::load(self.checkpoints.as_ref(), ChainId::Home, &[epoch.id])?;
        let saved_cursor = checkpoint.last_block.map(|b| b + 1).unwrap_or(start);
        let rebase = epoch_start.is_some() && epoch_start_block > saved_cursor;

        let cursor = if rebase {
            info!(
                epoch = epoch.id,
                epoch_start_block, saved_cursor, "checkpoint predates the current epoch, rebasing"
            );
            // the epoch start block is scanned again and activates the epoch
            epoch.active = false;
            let mut batch = CheckpointBatch::new(ChainId::Home)
                .foreign_nonce(epoch.id, 0)
                .last_transaction_block(0)
                .active_epoch(false);
            if epoch_start_block > 0 {
                batch = batch.last_block(epoch_start_block - 1);
            }
            batch.commit(self.checkpoints.as_ref())?;
            epoch_start_block
        } else {
            // an epoch start at or after the cursor is replayed and activates the epoch then
            epoch.active = if epoch_start.is_some() && saved_cursor <= epoch_start_block {
                false
            } else if checkpoint.last_block.is_some() {
                checkpoint.active_epoch
            } else {
                epoch_start.is_some()
            };
            saved_cursor
        };

        let resize = match cursor.checked_sub(1) {
            Some(last) => self.last_log(signatures::RANGE_SIZE_CHANGED, start, last).await?,
            None => None,
        };
        let range = match resize {
            Some(log) => {
                let BridgeEvent::RangeSizeChanged { range_size } = BridgeEvent::decode(&log)? else {
                    bail!("RangeSizeChanged query returned another event");
                };
                RangeAlignment::new(range_size, log.block_number.max(epoch_start_block))
            }
            None => RangeAlignment::new(self.bridge.range_size().await?, epoch_start_block),
        };
        epoch.range_size = range.size;

        let mut state = WatcherState::new(cursor, epoch, range, &own);
        if !rebase {
            state.foreign_nonce.extend(checkpoint.foreign_nonce);
            state.last_transaction_block = checkpoint.last_transaction_block;
        }

        info!(
            cursor = state.cursor,
            epoch = state.epoch.id,
            active = state.epoch.active,
            validator = state.is_current_validator,
            range_size = state.range.size,
            range_anchor = state.range.anchor,
            nonce = state.pending_nonce(state.epoch.id),
            "home watcher state restored"
        );
        Ok(state)
    }

    /// Restores state, filters queued work against the resume cursor and
    /// unblocks downstream workers.
    pub async fn initialize(&self) -> Result<WatcherState> {
        let state = self.bootstrap_state().await?;
        for kind in WorkQueue::HOME {
            reset_future_messages(self.checkpoints.as_ref(), self.queue(kind)?, state.cursor)?;
        }
        signal_ready(&self.http, &self.downstream_urls, self.config.backoff()).await;
        self.publish_status(&state);
        Ok(state)
    }

    /// Replays `[from, to]` on a copy of `state`. Nothing is sent or persisted.
    pub async fn scan(&self, state: &WatcherState, from: BlockNumber, to: BlockNumber) -> Result<Batch> {
        let logs = self
            .client
            .get_logs(&LogFilter {
                address: self.bridge_address,
                from_block: from,
                to_block: to,
                topic0: None,
            })
            .await?;

        let mut next = state.clone();
        let mut messages = Vec::new();
        let mut epoch_boundary = false;
        let mut logs = logs.into_iter().peekable();

        for block in from..=to {
            while let Some(log) = logs.next_if(|log| log.block_number <= block) {
                if log.block_number < block {
                    warn!(block = log.block_number, from, "log outside the requested range");
                    continue;
                }
                let event = match BridgeEvent::decode(&log) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(block, log_index = log.log_index, "skipping malformed log: {}", e);
                        continue;
                    }
                };
                if matches!(
                    event,
                    BridgeEvent::EpochStart { .. } | BridgeEvent::EpochEnd { .. }
                ) {
                    epoch_boundary = true;
                }
                debug!(block, log_index = log.log_index, event = event.name(), "replaying");
                let resolved = self.processor.resolve(&next, &log, event).await?;
                messages.extend(self.dispatcher.dispatch(&mut next, block, resolved));
            }
            messages.extend(self.dispatcher.close_range(&mut next, block));
        }

        if !epoch_boundary && self.dispatcher.heartbeat_due(&next) {
            let timestamp_ms = self.processor.block_time_ms(to).await?;
            messages.extend(self.dispatcher.heartbeat(&next, to, timestamp_ms));
        }

        next.cursor = to + 1;
        Ok(Batch {
            from,
            to,
            state: next,
            messages,
        })
    }

    /// Sends the batch's messages, then persists the cursor and counters in
    /// one write. Returns the state to continue from.
    pub async fn commit(&self, batch: Batch) -> Result<WatcherState> {
        let backoff = self.config.backoff();
        for message in &batch.messages {
            let queue = self.queue(message.queue())?;
            retry_forever(backoff, queue.name(), || async move { queue.send(message) }).await;
        }

        let state = batch.state;
        let mut checkpoint = CheckpointBatch::new(ChainId::Home)
            .last_block(batch.to)
            .last_transaction_block(state.last_transaction_block)
            .active_epoch(state.epoch.active);
        for (&epoch, &nonce) in &state.foreign_nonce {
            checkpoint = checkpoint.foreign_nonce(epoch, nonce);
        }
        let store = self.checkpoints.as_ref();
        retry_forever(backoff, "checkpoint", || {
            let checkpoint = checkpoint.clone();
            async move { checkpoint.commit(store) }
        })
        .await;

        info!(
            from = batch.from,
            to = batch.to,
            messages = batch.messages.len(),
            "home batch committed"
        );
        self.publish_status(&state);
        Ok(state)
    }

    /// Processes the next range if the chain has one. `None` means the
    /// watcher is caught up.
    pub async fn poll_once(&self, state: &WatcherState) -> Result<Option<WatcherState>> {
        let head = self.client.block_number().await?;
        let Some((from, to)) = next_range(state.cursor, head, self.config.max_fetch_range_size)
        else {
            return Ok(None);
        };
        let batch = self.scan(state, from, to).await?;
        Ok(Some(self.commit(batch).await?))
    }

    pub async fn watch(&self) -> Result<()> {
        info!(
            chain = %self.config.chain,
            rpc = %self.config.rpc_url,
            "starting home watcher"
        );
        let backoff = self.config.backoff();
        let mut state = retry_forever(backoff, "home initialize", || self.initialize()).await;

        loop {
            match self.poll_once(&state).await {
                Ok(Some(next)) => state = next,
                Ok(None) => sleep(self.config.poll_interval()).await,
                Err(e) => {
                    error!(cursor = state.cursor, "home batch failed, retrying: {:#}", e);
                    sleep(backoff.delay(0)).await;
                }
            }
        }
    }
}
