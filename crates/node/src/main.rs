mod handlers;
mod jobs;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{error, info};
#[cfg(not(feature = "rocksdb"))]
use tssbridge_storage::InMemoryStorage;
#[cfg(feature = "rocksdb")]
use tssbridge_storage::RocksDBStorage;
use tssbridge_watcher::{Stores, Watcher, WatcherConfig};

use crate::handlers::NodeState;
use crate::jobs::JobQueues;
use crate::routes::create_router;

fn get_storage_path() -> PathBuf {
    std::env::var("STORAGE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./data"))
}

fn get_http_bind() -> String {
    std::env::var("HTTP_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
}

fn init_storage() -> Result<Stores> {
    #[cfg(feature = "rocksdb")]
    {
        let path = get_storage_path();
        std::fs::create_dir_all(&path)?;
        info!(path = %path.display(), "opening RocksDB storage");
        let storage = Arc::new(RocksDBStorage::open(&path)?);
        Ok(Stores {
            checkpoints: storage.clone(),
            broker: storage,
        })
    }

    #[cfg(not(feature = "rocksdb"))]
    {
        info!(path = %get_storage_path().display(), "RocksDB not enabled, state is kept in memory");
        let storage = Arc::new(InMemoryStorage::new());
        Ok(Stores {
            checkpoints: storage.clone(),
            broker: storage,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let stores = init_storage()?;
    let jobs = JobQueues::declare(stores.broker.clone())?;
    let watcher = Watcher::new(WatcherConfig::default(), stores)?;

    let state = Arc::new(NodeState::new(watcher.home_status(), watcher.side_status(), jobs));
    let app = create_router(state);

    let bind = get_http_bind();
    let listener = TcpListener::bind(&bind).await?;
    info!(%bind, "status and job server listening");

    let server_handle = tokio::spawn(async move { axum::serve(listener, app).await });
    let watcher_handle = tokio::spawn(watcher.start());

    tokio::select! {
        result = server_handle => {
            error!("status server stopped");
            result??;
        }
        result = watcher_handle => {
            error!("watchers stopped");
            result??;
        }
    }

    Ok(())
}
