//! # Escrow Lifecycle State Machine
//!
//! Holds the escrow record and applies status transitions from chain
//! facts and caller intents. Transitions are forward-only:
//!
//! ```text
//! Pending -> Active -> ReadyToUnlock -> Released
//! ```
//!
//! `Pending -> Active` fires once the recorded funding transaction is
//! observed confirmed. `Active -> ReadyToUnlock` fires when the unlock
//! condition holds (timelock height reached, or both parties signed
//! off). `ReadyToUnlock -> Released` is driven by a successful unlock
//! broadcast, never by polling. Nothing ever fires out of Released.

use crate::error::{EscrowError, EscrowResult};
use crate::escrow::detector::{is_timelock_expired, PollFacts};
use crate::escrow::script::{derive_p2sh_address, ScriptSpec};
use bitcoin::{Network, ScriptBuf};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Escrow lifecycle status.
///
/// `Expired` is declared for record compatibility but no transition
/// rule produces it; escrows neither auto-expire when unfunded nor
/// when a timelock goes unclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Pending,
    Active,
    ReadyToUnlock,
    Released,
    Expired,
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EscrowStatus::Pending => "pending",
            EscrowStatus::Active => "active",
            EscrowStatus::ReadyToUnlock => "ready_to_unlock",
            EscrowStatus::Released => "released",
            EscrowStatus::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// A party to a dual-approval escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Buyer,
    Seller,
}

/// Where redeemed funds go, plus the dual-approval sign-off state.
/// The signed flags are set by the off-chain signing coordination step,
/// not computed from chain state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterparties {
    pub receiver_address: String,
    pub buyer_address: Option<String>,
    pub seller_address: Option<String>,
    pub buyer_signed: bool,
    pub seller_signed: bool,
}

impl Counterparties {
    /// Counterparties for a timelock escrow: just the receiver
    pub fn receiver_only(receiver_address: impl Into<String>) -> Self {
        Self {
            receiver_address: receiver_address.into(),
            buyer_address: None,
            seller_address: None,
            buyer_signed: false,
            seller_signed: false,
        }
    }

    /// Counterparties for a dual-approval escrow
    pub fn dual(
        receiver_address: impl Into<String>,
        buyer_address: impl Into<String>,
        seller_address: impl Into<String>,
    ) -> Self {
        Self {
            receiver_address: receiver_address.into(),
            buyer_address: Some(buyer_address.into()),
            seller_address: Some(seller_address.into()),
            buyer_signed: false,
            seller_signed: false,
        }
    }
}

/// The central escrow entity. Script bytes are hex-encoded for
/// serialization compatibility; the derived P2SH address is cached at
/// creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub id: String,
    pub redeem_script: String,
    pub escrow_address: String,
    pub amount_sats: u64,
    pub unlock_spec: ScriptSpec,
    pub counterparties: Counterparties,
    pub funding_txid: Option<String>,
    pub redeem_txid: Option<String>,
    pub status: EscrowStatus,
    pub network: Network,
    pub created_at: i64,
    pub unlocked_at: Option<i64>,
}

impl EscrowRecord {
    /// Create a new escrow: compile the redeem script, derive the P2SH
    /// address and start the record in `Pending` with no funding.
    pub fn new(
        unlock_spec: ScriptSpec,
        amount_sats: u64,
        counterparties: Counterparties,
        network: Network,
    ) -> EscrowResult<Self> {
        let script = unlock_spec.compile()?;
        let address = derive_p2sh_address(&script, network)?;
        let created_at = chrono::Utc::now().timestamp();

        Ok(Self {
            id: format!("{:08x}{:08x}", created_at as u32, rand::random::<u32>()),
            redeem_script: hex::encode(script.as_bytes()),
            escrow_address: address.to_string(),
            amount_sats,
            unlock_spec,
            counterparties,
            funding_txid: None,
            redeem_txid: None,
            status: EscrowStatus::Pending,
            network,
            created_at,
            unlocked_at: None,
        })
    }

    /// Decode the cached redeem script bytes
    pub fn redeem_script_buf(&self) -> EscrowResult<ScriptBuf> {
        ScriptBuf::from_hex(&self.redeem_script)
            .map_err(|e| EscrowError::invalid_script(format!("stored script is not hex: {e}")))
    }

    /// Record the funding transaction the owner broadcast. The txid is
    /// write-once; the record stays `Pending` until the transaction is
    /// observed confirmed.
    pub fn record_funding(&mut self, txid: impl Into<String>) -> EscrowResult<()> {
        if self.funding_txid.is_some() {
            return Err(EscrowError::operation(
                "record_funding",
                "funding txid already recorded",
            ));
        }
        self.funding_txid = Some(txid.into());
        Ok(())
    }

    /// Record a party's off-chain sign-off on a dual-approval escrow
    pub fn mark_signed(&mut self, party: Party) -> EscrowResult<()> {
        match self.unlock_spec {
            ScriptSpec::DualApproval { .. } => {
                match party {
                    Party::Buyer => self.counterparties.buyer_signed = true,
                    Party::Seller => self.counterparties.seller_signed = true,
                }
                Ok(())
            }
            ScriptSpec::Timelock { .. } => Err(EscrowError::operation(
                "mark_signed",
                "timelock escrows have no sign-off step",
            )),
        }
    }

    /// Apply one poll cycle's facts, advancing status forward where the
    /// transition rules allow. Idempotent: repeated calls with unchanged
    /// facts leave the record unchanged, and already-set fields are
    /// never cleared or rewritten. Unknown facts never advance state.
    pub fn poll(&mut self, facts: &PollFacts) -> EscrowStatus {
        if self.status == EscrowStatus::Pending
            && self.funding_txid.is_some()
            && facts.funding_confirmed == Some(true)
        {
            self.status = EscrowStatus::Active;
        }

        if self.status == EscrowStatus::Active && self.unlock_condition_holds(facts) {
            self.status = EscrowStatus::ReadyToUnlock;
        }

        self.status
    }

    /// Record a successfully broadcast unlock transaction, moving the
    /// escrow to its terminal status. The txid and unlock timestamp are
    /// set atomically with the transition.
    pub fn record_release(&mut self, txid: impl Into<String>) -> EscrowResult<()> {
        if self.status != EscrowStatus::ReadyToUnlock {
            return Err(EscrowError::InvalidStateTransition {
                current: self.status.to_string(),
                requested: EscrowStatus::Released.to_string(),
            });
        }
        self.redeem_txid = Some(txid.into());
        self.unlocked_at = Some(chrono::Utc::now().timestamp());
        self.status = EscrowStatus::Released;
        Ok(())
    }

    fn unlock_condition_holds(&self, facts: &PollFacts) -> bool {
        match &self.unlock_spec {
            ScriptSpec::Timelock { unlock_height, .. } => facts
                .tip_height
                .map(|tip| is_timelock_expired(*unlock_height, tip))
                .unwrap_or(false),
            ScriptSpec::DualApproval { .. } => {
                self.counterparties.buyer_signed && self.counterparties.seller_signed
            }
        }
    }
}
