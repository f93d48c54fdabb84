pub mod abi;
mod backoff;
mod chain_client;
mod chain_watcher;
mod config;
mod contract;
mod dispatcher;
mod downstream;
mod event_processor;
pub mod events;
mod range;
mod recovery;
mod relay;
mod rpc_client;
mod side_watcher;
mod state;
mod tx_recovery;

pub use backoff::{retry_forever, BackoffPolicy};
pub use chain_client::{AccessListItem, ChainClient, Log, LogFilter, TransactionInfo};
pub use chain_watcher::{Batch, ChainWatcher};
pub use config::{ChainConfig, WatcherConfig};
pub use contract::{split_signatures, BridgeContract, BridgeReader, SharedDbContract, SharedDbReader};
pub use dispatcher::Dispatcher;
pub use downstream::signal_ready;
pub use event_processor::{EventProcessor, ResolvedEvent};
pub use events::{BridgeEvent, SharedDbEvent};
pub use range::{next_range, RangeAlignment};
pub use recovery::{reset_future_messages, FilterReport};
pub use relay::responsible_sender;
pub use rpc_client::RpcClient;
pub use side_watcher::{Committee, SideBatch, SideState, SideStatus, SideWatcher};
pub use state::{WatcherState, WatcherStatus};
pub use tx_recovery::{
    convert_value, key_from_coordinates, recover_sender_key, signing_hash, CompressedKeyHex,
    ForeignAddressEncoder,
};

use std::sync::Arc;

use tokio::sync::watch;
use tracing::error;
use tssbridge_storage::{CheckpointStore, QueueBroker};
use tssbridge_types::ChainId;

/// Storage backends shared by both watchers.
#[derive(Clone)]
pub struct Stores {
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub broker: Arc<dyn QueueBroker>,
}

/// Both watchers of one validator, wired to JSON-RPC endpoints.
pub struct Watcher {
    home: ChainWatcher,
    side: SideWatcher,
    home_status: watch::Receiver<WatcherStatus>,
    side_status: watch::Receiver<SideStatus>,
}

impl Watcher {
    pub fn new(config: WatcherConfig, stores: Stores) -> anyhow::Result<Self> {
        let own = config.validator()?;

        let home_client: Arc<dyn ChainClient> = Arc::new(RpcClient::new(&config.home)?);
        let side_client: Arc<dyn ChainClient> = Arc::new(RpcClient::new(&config.side)?);
        let bridge: Arc<dyn BridgeReader> =
            Arc::new(BridgeContract::new(home_client.clone(), config.home.contract()?));
        let shared_db: Arc<dyn SharedDbReader> =
            Arc::new(SharedDbContract::new(side_client.clone(), config.side.contract()?));

        let (home_tx, home_status) = watch::channel(WatcherStatus {
            chain: ChainId::Home,
            cursor: config.home.start_block,
            epoch: 0,
            next_epoch: None,
            phase: tssbridge_types::EpochPhase::Voting,
            active: false,
            is_current_validator: false,
            threshold: 0,
            parties: 0,
            range: RangeAlignment::new(0, config.home.start_block),
            foreign_nonce: 0,
            last_transaction_block: 0,
        });
        let (side_tx, side_status) = watch::channel(SideStatus {
            chain: ChainId::Side,
            cursor: config.side.start_block,
            committee: None,
        });

        let dispatcher = Dispatcher::new(own, config.home_token_decimals, config.foreign_decimals);
        let home = ChainWatcher::new(config.home.clone(), home_client, bridge.clone(), &stores, dispatcher)?
            .with_downstream(config.downstream_start_urls.clone())
            .with_status(home_tx);
        let side = SideWatcher::new(config.side.clone(), own, side_client, shared_db, bridge, &stores)?
            .with_status(side_tx);

        Ok(Self {
            home,
            side,
            home_status,
            side_status,
        })
    }

    pub fn home_status(&self) -> watch::Receiver<WatcherStatus> {
        self.home_status.clone()
    }

    pub fn side_status(&self) -> watch::Receiver<SideStatus> {
        self.side_status.clone()
    }

    /// Runs both watchers until one of them stops.
    pub async fn start(self) -> anyhow::Result<()> {
        let home = Arc::new(self.home);
        let side = Arc::new(self.side);

        let home_task = tokio::spawn(async move { home.watch().await });
        let side_task = tokio::spawn(async move { side.watch().await });

        tokio::select! {
            result = home_task => {
                error!("home watcher stopped");
                result??;
            }
            result = side_task => {
                error!("side watcher stopped");
                result??;
            }
        }
        Ok(())
    }
}
