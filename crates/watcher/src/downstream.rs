use anyhow::Result;
use tracing::info;

use crate::backoff::{retry_forever, BackoffPolicy};

/// Tells each downstream worker it may start consuming, via `GET <url>/start`.
/// Blocks until every worker has answered with a success status.
pub async fn signal_ready(client: &reqwest::Client, urls: &[String], backoff: BackoffPolicy) {
    for base in urls {
        let url = format!("{}/start", base.trim_end_matches('/'));
        retry_forever(backoff, "downstream start", || ping(client, &url)).await;
        info!(url = %url, "downstream worker started");
    }
}

async fn ping(client: &reqwest::Client, url: &str) -> Result<()> {
    client.get(url).send().await?.error_for_status()?;
    Ok(())
}
