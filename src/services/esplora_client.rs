//! # Esplora Chain Client
//!
//! HTTP client for an Esplora-style chain indexer implementing the
//! [`ChainQuery`] collaborator. Every failure except a node-level
//! broadcast rejection surfaces as `ChainUnavailable`; the lifecycle
//! poll loop treats those as unknown facts and retries next cycle.

use crate::config;
use crate::config::network::REQUEST_TIMEOUT;
use crate::error::{EscrowError, EscrowResult};
use crate::escrow::detector::{ChainQuery, UtxoFact};
use bitcoin::Txid;
use reqwest::Client;
use serde::Deserialize;
use std::str::FromStr;

/// Unspent output entry from the indexer API
#[derive(Debug, Deserialize)]
struct UtxoEntry {
    txid: String,
    vout: u32,
    value: u64,
    status: TxStatus,
}

/// Confirmation status from the indexer API
#[derive(Debug, Deserialize)]
struct TxStatus {
    confirmed: bool,
    block_height: Option<u32>,
}

/// Client for an Esplora-compatible block explorer API
#[derive(Debug, Clone)]
pub struct EsploraClient {
    client: Client,
    api_base: String,
}

impl EsploraClient {
    /// Create a new client against `api_base`
    pub fn new(api_base: impl Into<String>) -> EscrowResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EscrowError::operation("client_creation", e.to_string()))?;

        Ok(Self {
            client,
            api_base: api_base.into(),
        })
    }

    /// Create a client from the configured API base URL
    pub fn from_env() -> EscrowResult<Self> {
        Self::new(config::configured_api_base())
    }

    async fn get_text(&self, path: &str) -> EscrowResult<String> {
        let url = format!("{}{}", self.api_base, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EscrowError::chain(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EscrowError::chain(format!(
                "HTTP {} for {}",
                response.status(),
                path
            )));
        }

        response
            .text()
            .await
            .map_err(|e| EscrowError::chain(e.to_string()))
    }
}

impl ChainQuery for EsploraClient {
    async fn get_utxos(&self, address: &str) -> EscrowResult<Vec<UtxoFact>> {
        let body = self.get_text(&format!("/address/{address}/utxo")).await?;
        let entries: Vec<UtxoEntry> =
            serde_json::from_str(&body).map_err(|e| EscrowError::chain(e.to_string()))?;

        entries
            .into_iter()
            .map(|entry| {
                let txid = Txid::from_str(&entry.txid)
                    .map_err(|e| EscrowError::chain(format!("bad txid from indexer: {e}")))?;
                Ok(UtxoFact {
                    txid,
                    vout: entry.vout,
                    value_sats: entry.value,
                    confirmed: entry.status.confirmed,
                    block_height: entry.status.block_height,
                })
            })
            .collect()
    }

    async fn get_tip_height(&self) -> EscrowResult<u32> {
        let body = self.get_text("/blocks/tip/height").await?;
        body.trim()
            .parse::<u32>()
            .map_err(|e| EscrowError::chain(format!("bad tip height from indexer: {e}")))
    }

    async fn get_raw_transaction(&self, txid: &str) -> EscrowResult<Vec<u8>> {
        let body = self.get_text(&format!("/tx/{txid}/hex")).await?;
        hex::decode(body.trim())
            .map_err(|e| EscrowError::chain(format!("bad raw transaction from indexer: {e}")))
    }

    async fn is_confirmed(&self, txid: &str) -> EscrowResult<bool> {
        let url = format!("{}/tx/{txid}/status", self.api_base);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EscrowError::chain(e.to_string()))?;

        // An unknown transaction simply has zero confirmations
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(EscrowError::chain(format!(
                "HTTP {} for /tx/{txid}/status",
                response.status()
            )));
        }

        let status: TxStatus = response
            .json()
            .await
            .map_err(|e| EscrowError::chain(e.to_string()))?;
        Ok(status.confirmed)
    }

    async fn broadcast(&self, raw_tx: &[u8]) -> EscrowResult<String> {
        let url = format!("{}/tx", self.api_base);
        let response = self
            .client
            .post(&url)
            .body(hex::encode(raw_tx))
            .send()
            .await
            .map_err(|e| EscrowError::chain(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EscrowError::chain(e.to_string()))?;

        if !status.is_success() {
            // Node-level rejection reason comes back verbatim in the body
            return Err(EscrowError::BroadcastRejected {
                reason: body.trim().to_string(),
            });
        }

        Ok(body.trim().to_string())
    }
}
