//! # Chain-State Detector
//!
//! Translates raw chain-API responses into the facts the lifecycle
//! machine needs. All derived-fact computation is pure; the only I/O
//! entry point is [`gather_poll_facts`], which absorbs chain failures
//! into "unknown" facts so the poll loop stays resilient.

use crate::error::EscrowResult;
use bitcoin::Txid;

/// Read-only projection of one unspent output at the escrow address.
/// Recomputed on every poll, never stored on the escrow record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoFact {
    pub txid: Txid,
    pub vout: u32,
    pub value_sats: u64,
    pub confirmed: bool,
    pub block_height: Option<u32>,
}

/// Abstract chain-indexer collaborator. Implementations surface every
/// failure as [`crate::error::EscrowError::ChainUnavailable`] except
/// node-level broadcast rejections.
#[allow(async_fn_in_trait)]
pub trait ChainQuery {
    /// All unspent outputs currently at `address`
    async fn get_utxos(&self, address: &str) -> EscrowResult<Vec<UtxoFact>>;

    /// Current chain tip height
    async fn get_tip_height(&self) -> EscrowResult<u32>;

    /// Full raw bytes of the transaction `txid`
    async fn get_raw_transaction(&self, txid: &str) -> EscrowResult<Vec<u8>>;

    /// Whether `txid` is confirmed in a block
    async fn is_confirmed(&self, txid: &str) -> EscrowResult<bool>;

    /// Broadcast a raw transaction, returning its txid
    async fn broadcast(&self, raw_tx: &[u8]) -> EscrowResult<String>;
}

/// Facts consumed by one lifecycle poll cycle. `None` means the chain
/// API could not answer this cycle; unknown facts never advance state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollFacts {
    pub funding_confirmed: Option<bool>,
    pub tip_height: Option<u32>,
}

/// Query the chain for one poll cycle's facts, mapping every failure to
/// an unknown rather than an error.
pub async fn gather_poll_facts<C: ChainQuery>(
    chain: &C,
    funding_txid: Option<&str>,
) -> PollFacts {
    let funding_confirmed = match funding_txid {
        Some(txid) => chain.is_confirmed(txid).await.ok(),
        None => Some(false),
    };
    let tip_height = chain.get_tip_height().await.ok();
    PollFacts {
        funding_confirmed,
        tip_height,
    }
}

/// Find the UTXO at the escrow address belonging to this escrow.
///
/// Matching is by exact amount: the first output whose value equals
/// `expected_amount` wins. Partial funding, overfunding and colliding
/// candidates at the same address are not recognized.
pub fn find_matching_utxo(utxos: &[UtxoFact], expected_amount: u64) -> Option<&UtxoFact> {
    utxos.iter().find(|utxo| utxo.value_sats == expected_amount)
}

/// Confirmation count for `utxo` given the current tip height
pub fn confirmations(utxo: &UtxoFact, tip_height: u32) -> u32 {
    match (utxo.confirmed, utxo.block_height) {
        (true, Some(height)) if tip_height >= height => tip_height - height + 1,
        _ => 0,
    }
}

/// Whether `utxo` is confirmed deeply enough to spend
pub fn is_spendable(utxo: &UtxoFact, tip_height: u32) -> bool {
    utxo.confirmed && confirmations(utxo, tip_height) >= 1
}

/// Blocks remaining until a timelock height becomes satisfiable.
///
/// Returns 0 once the height is reached and -1 when the tip height is
/// unknown, so callers can distinguish "not yet time" from "no answer".
pub fn blocks_until_unlock(unlock_height: u32, tip_height: Option<u32>) -> i64 {
    match tip_height {
        Some(tip) => (i64::from(unlock_height) - i64::from(tip)).max(0),
        None => -1,
    }
}

/// Whether the chain has reached a timelock's unlock height
pub fn is_timelock_expired(unlock_height: u32, tip_height: u32) -> bool {
    tip_height >= unlock_height
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn fact(value_sats: u64, confirmed: bool, block_height: Option<u32>) -> UtxoFact {
        UtxoFact {
            txid: Txid::from_str(
                "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
            )
            .unwrap(),
            vout: 0,
            value_sats,
            confirmed,
            block_height,
        }
    }

    #[test]
    fn test_exact_amount_matching() {
        let utxos = vec![fact(50_000, true, Some(10)), fact(100_000, true, Some(11))];
        assert_eq!(find_matching_utxo(&utxos, 100_000), Some(&utxos[1]));
        assert_eq!(find_matching_utxo(&utxos, 99_999), None);
        assert_eq!(find_matching_utxo(&[], 100_000), None);
    }

    #[test]
    fn test_confirmations() {
        assert_eq!(confirmations(&fact(1, true, Some(100)), 100), 1);
        assert_eq!(confirmations(&fact(1, true, Some(100)), 105), 6);
        assert_eq!(confirmations(&fact(1, false, None), 105), 0);
        // Stale tip below the inclusion height never underflows
        assert_eq!(confirmations(&fact(1, true, Some(100)), 99), 0);
    }

    #[test]
    fn test_spendability() {
        assert!(is_spendable(&fact(1, true, Some(100)), 100));
        assert!(!is_spendable(&fact(1, false, None), 100));
    }

    #[test]
    fn test_blocks_until_unlock() {
        assert_eq!(blocks_until_unlock(100, Some(99)), 1);
        assert_eq!(blocks_until_unlock(100, Some(100)), 0);
        assert_eq!(blocks_until_unlock(100, Some(150)), 0);
        assert_eq!(blocks_until_unlock(100, None), -1);
    }

    #[test]
    fn test_timelock_expiry() {
        assert!(!is_timelock_expired(100, 99));
        assert!(is_timelock_expired(100, 100));
        assert!(is_timelock_expired(100, 101));
    }
}
