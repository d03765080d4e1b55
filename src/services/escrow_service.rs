//! # Escrow Service
//!
//! Orchestration glue between the pure escrow core and the external
//! collaborators: creates records, runs poll cycles against the chain
//! indexer, and drives the unlock flow from UTXO discovery through
//! signing, finalization, broadcast and release recording.

use crate::error::{EscrowError, EscrowResult};
use crate::escrow::detector::{self, ChainQuery};
use crate::escrow::fee::FeePolicy;
use crate::escrow::lifecycle::{Counterparties, EscrowRecord, Party};
use crate::escrow::script::ScriptSpec;
use crate::escrow::spend::{build_unlock_draft, UnlockDraft};
use crate::services::signer::SigningCapability;
use crate::services::store::EscrowStore;
use bitcoin::consensus::encode;
use bitcoin::{Address, Network, Transaction};
use log::{debug, info, warn};
use std::str::FromStr;

/// Service wiring the escrow core to a chain indexer and a record store
pub struct EscrowService<C: ChainQuery, St: EscrowStore> {
    chain: C,
    store: St,
    network: Network,
}

impl<C: ChainQuery, St: EscrowStore> EscrowService<C, St> {
    pub fn new(chain: C, store: St, network: Network) -> Self {
        Self {
            chain,
            store,
            network,
        }
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    /// Create a timelock escrow: compile the script, derive the P2SH
    /// address and persist the pending record.
    pub fn create_timelock(
        &self,
        unlock_height: u32,
        owner_pubkey: impl Into<String>,
        receiver_address: impl Into<String>,
        amount_sats: u64,
    ) -> EscrowResult<EscrowRecord> {
        let spec = ScriptSpec::Timelock {
            unlock_height,
            owner_pubkey: owner_pubkey.into(),
        };
        self.create(spec, amount_sats, Counterparties::receiver_only(receiver_address))
    }

    /// Create a dual-approval escrow
    pub fn create_dual_approval(
        &self,
        pubkey_a: impl Into<String>,
        pubkey_b: impl Into<String>,
        receiver_address: impl Into<String>,
        buyer_address: impl Into<String>,
        seller_address: impl Into<String>,
        amount_sats: u64,
    ) -> EscrowResult<EscrowRecord> {
        let spec = ScriptSpec::DualApproval {
            pubkey_a: pubkey_a.into(),
            pubkey_b: pubkey_b.into(),
        };
        self.create(
            spec,
            amount_sats,
            Counterparties::dual(receiver_address, buyer_address, seller_address),
        )
    }

    fn create(
        &self,
        spec: ScriptSpec,
        amount_sats: u64,
        counterparties: Counterparties,
    ) -> EscrowResult<EscrowRecord> {
        self.validate_address(&counterparties.receiver_address)?;
        let record = EscrowRecord::new(spec, amount_sats, counterparties, self.network)?;
        self.store.save(&record)?;
        info!(
            "created escrow {} at {} for {} sats",
            record.id, record.escrow_address, record.amount_sats
        );
        Ok(record)
    }

    /// Record the funding transaction the owner broadcast
    pub fn record_funding(&self, id: &str, txid: &str) -> EscrowResult<EscrowRecord> {
        self.store.update(id, &mut |record| record.record_funding(txid))
    }

    /// Record a party's off-chain sign-off on a dual-approval escrow
    pub fn mark_signed(&self, id: &str, party: Party) -> EscrowResult<EscrowRecord> {
        self.store.update(id, &mut |record| record.mark_signed(party))
    }

    /// Run one poll cycle: gather chain facts, then apply the status
    /// transition under the store's write lock. Chain failures become
    /// unknown facts and the record is left unchanged.
    pub async fn poll_once(&self, id: &str) -> EscrowResult<EscrowRecord> {
        let record = self
            .store
            .load(id)?
            .ok_or_else(|| EscrowError::operation("poll", format!("no escrow with id {id}")))?;

        let facts =
            detector::gather_poll_facts(&self.chain, record.funding_txid.as_deref()).await;
        debug!("escrow {id} poll facts: {facts:?}");

        self.store.update(id, &mut |record| {
            record.poll(&facts);
            Ok(())
        })
    }

    /// Build the unsigned unlock draft for a ready escrow: find the
    /// funding UTXO by exact amount, fetch its containing transaction
    /// and assemble the PSBT.
    pub async fn prepare_unlock(&self, id: &str, policy: FeePolicy) -> EscrowResult<UnlockDraft> {
        let record = self
            .store
            .load(id)?
            .ok_or_else(|| EscrowError::operation("unlock", format!("no escrow with id {id}")))?;

        if record.status != crate::escrow::lifecycle::EscrowStatus::ReadyToUnlock {
            return Err(EscrowError::InvalidStateTransition {
                current: record.status.to_string(),
                requested: "released".to_string(),
            });
        }

        let utxos = self.chain.get_utxos(&record.escrow_address).await?;
        let utxo = detector::find_matching_utxo(&utxos, record.amount_sats)
            .ok_or_else(|| {
                EscrowError::operation(
                    "unlock",
                    format!(
                        "no utxo of exactly {} sats at {}",
                        record.amount_sats, record.escrow_address
                    ),
                )
            })?
            .clone();

        let raw_prev = self.chain.get_raw_transaction(&utxo.txid.to_string()).await?;
        let prev_tx: Transaction = encode::deserialize(&raw_prev)
            .map_err(|e| EscrowError::chain(format!("undecodable previous transaction: {e}")))?;

        let destination = self.validate_address(&record.counterparties.receiver_address)?;
        let script = record.redeem_script_buf()?;

        build_unlock_draft(
            &record.unlock_spec,
            &script,
            &utxo,
            prev_tx,
            &destination,
            policy,
        )
    }

    /// Full unlock flow: prepare the draft, collect every required
    /// signature from the external wallet capability, finalize,
    /// broadcast, and record the release. Any failure before broadcast
    /// (including a user decline) leaves the record untouched.
    pub async fn unlock<S: SigningCapability>(
        &self,
        id: &str,
        signer: &S,
        policy: FeePolicy,
    ) -> EscrowResult<EscrowRecord> {
        let mut draft = self.prepare_unlock(id, policy).await?;

        // There is always exactly one input; every signer signs index 0
        let spec = draft.spec.clone();
        for pubkey_hex in spec.signer_pubkeys() {
            let signature = signer.sign_input(&draft.psbt, pubkey_hex, 0).await?;
            let pubkey = hex::decode(pubkey_hex)
                .map_err(|e| EscrowError::invalid_script(format!("signer pubkey not hex: {e}")))?;
            draft.add_signature(&pubkey, signature);
        }

        self.broadcast_finalized(id, &draft).await
    }

    /// Unlock with pre-collected signatures (pubkey hex, signature
    /// bytes), for callers that coordinate signing out of band.
    pub async fn unlock_with_signatures(
        &self,
        id: &str,
        signatures: &[(String, Vec<u8>)],
        policy: FeePolicy,
    ) -> EscrowResult<EscrowRecord> {
        let mut draft = self.prepare_unlock(id, policy).await?;
        for (pubkey_hex, signature) in signatures {
            let pubkey = hex::decode(pubkey_hex)
                .map_err(|e| EscrowError::invalid_script(format!("signer pubkey not hex: {e}")))?;
            draft.add_signature(&pubkey, signature.clone());
        }
        self.broadcast_finalized(id, &draft).await
    }

    async fn broadcast_finalized(&self, id: &str, draft: &UnlockDraft) -> EscrowResult<EscrowRecord> {
        let finalized = draft.finalize()?;
        info!(
            "broadcasting unlock transaction {} ({} bytes, fee {} sats)",
            finalized.txid,
            finalized.raw.len(),
            draft.fee_sats
        );

        let txid = match self.chain.broadcast(&finalized.raw).await {
            Ok(txid) => txid,
            Err(e) => {
                warn!("unlock broadcast for escrow {id} failed: {e}");
                return Err(e);
            }
        };

        self.store.update(id, &mut |record| record.record_release(txid.as_str()))
    }

    fn validate_address(&self, address_str: &str) -> EscrowResult<Address> {
        Address::from_str(address_str)
            .map_err(|_| EscrowError::InvalidAddress {
                address: address_str.to_string(),
            })?
            .require_network(self.network)
            .map_err(|_| EscrowError::InvalidAddress {
                address: address_str.to_string(),
            })
    }
}
