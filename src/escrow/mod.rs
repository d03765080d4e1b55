//! # Escrow Core
//!
//! The pure escrow machinery: redeem-script compilation and P2SH
//! address derivation, fee estimation, unlock transaction build and
//! finalization, chain-fact detection, and the lifecycle state machine.

pub mod detector;
pub mod fee;
pub mod lifecycle;
pub mod script;
pub mod spend;


pub use detector::{ChainQuery, PollFacts, UtxoFact};
pub use fee::FeePolicy;
pub use lifecycle::{Counterparties, EscrowRecord, EscrowStatus, Party};
pub use script::ScriptSpec;
pub use spend::{build_unlock_draft, FinalizedUnlock, UnlockDraft};
