use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tssbridge_types::{defaults, parse_address, Address, ChainId};

use crate::backoff::BackoffPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain: ChainId,
    pub rpc_url: String,
    /// Bridge contract on the home chain, shared signature storage on the side chain.
    pub contract_address: String,
    /// First block to scan when no checkpoint exists.
    pub start_block: u64,
    pub max_fetch_range_size: u64,
    pub poll_interval_ms: u64,
    pub rpc_timeout_seconds: u64,
    pub retry_delay_ms: u64,
    /// Upper bound for exponential back-off; equal to `retry_delay_ms` means fixed.
    pub retry_max_delay_ms: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl ChainConfig {
    fn from_env(chain: ChainId, prefix: &str, contract_var: &str, default_rpc: &str) -> Self {
        let retry_delay_ms = env_or("RETRY_DELAY_MS", defaults::RETRY_DELAY_MS);
        Self {
            chain,
            rpc_url: env_string(&format!("{}_RPC_URL", prefix), default_rpc),
            contract_address: env_string(
                contract_var,
                "0x0000000000000000000000000000000000000000",
            ),
            start_block: env_or(&format!("{}_START_BLOCK", prefix), 0),
            max_fetch_range_size: env_or("MAX_FETCH_RANGE_SIZE", defaults::MAX_FETCH_RANGE_SIZE),
            poll_interval_ms: env_or("POLL_INTERVAL_MS", defaults::POLL_INTERVAL_MS),
            rpc_timeout_seconds: env_or("RPC_TIMEOUT_SECONDS", 30),
            retry_delay_ms,
            retry_max_delay_ms: env_or("RETRY_MAX_DELAY_MS", retry_delay_ms),
        }
    }

    pub fn home_from_env() -> Self {
        Self::from_env(
            ChainId::Home,
            "HOME",
            "HOME_BRIDGE_ADDRESS",
            "http://127.0.0.1:8545",
        )
    }

    pub fn side_from_env() -> Self {
        Self::from_env(
            ChainId::Side,
            "SIDE",
            "SIDE_SHARED_DB_ADDRESS",
            "http://127.0.0.1:7545",
        )
    }

    pub fn backoff(&self) -> BackoffPolicy {
        let initial = Duration::from_millis(self.retry_delay_ms);
        if self.retry_max_delay_ms > self.retry_delay_ms {
            BackoffPolicy::CappedExponential {
                initial,
                max: Duration::from_millis(self.retry_max_delay_ms),
            }
        } else {
            BackoffPolicy::Fixed(initial)
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn contract(&self) -> Result<Address> {
        parse_address(&self.contract_address)
            .with_context(|| format!("invalid {} contract address", self.chain))
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::home_from_env()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    pub home: ChainConfig,
    pub side: ChainConfig,
    pub validator_address: String,
    /// Base URLs of workers that wait for `GET /start` before consuming.
    pub downstream_start_urls: Vec<String>,
    pub home_token_decimals: u32,
    pub foreign_decimals: u32,
}

impl WatcherConfig {
    pub fn validator(&self) -> Result<Address> {
        parse_address(&self.validator_address).context("invalid VALIDATOR_ADDRESS")
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            home: ChainConfig::home_from_env(),
            side: ChainConfig::side_from_env(),
            validator_address: env_string(
                "VALIDATOR_ADDRESS",
                "0x0000000000000000000000000000000000000000",
            ),
            downstream_start_urls: std::env::var("DOWNSTREAM_START_URLS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            home_token_decimals: env_or("HOME_TOKEN_DECIMALS", defaults::HOME_TOKEN_DECIMALS),
            foreign_decimals: env_or("FOREIGN_DECIMALS", defaults::FOREIGN_DECIMALS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(retry_delay_ms: u64, retry_max_delay_ms: u64) -> ChainConfig {
        ChainConfig {
            chain: ChainId::Home,
            rpc_url: "http://localhost:8545".to_string(),
            contract_address: "0x00000000000000000000000000000000000000aa".to_string(),
            start_block: 0,
            max_fetch_range_size: 10,
            poll_interval_ms: 2000,
            rpc_timeout_seconds: 30,
            retry_delay_ms,
            retry_max_delay_ms,
        }
    }

    #[test]
    fn test_backoff_selection() {
        assert_eq!(
            config(1000, 1000).backoff(),
            BackoffPolicy::Fixed(Duration::from_secs(1))
        );
        assert_eq!(
            config(500, 8000).backoff(),
            BackoffPolicy::CappedExponential {
                initial: Duration::from_millis(500),
                max: Duration::from_secs(8),
            }
        );
    }

    #[test]
    fn test_contract_address() {
        assert_eq!(config(1, 1).contract().unwrap()[19], 0xaa);
        let mut bad = config(1, 1);
        bad.contract_address = "0xzz".to_string();
        assert!(bad.contract().is_err());
    }
}
