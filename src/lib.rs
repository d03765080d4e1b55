//! # Satlock: Script-Locked Two-Party Bitcoin Escrow
//!
//! Core library for locking bitcoin behind a script-enforced spending
//! condition (a future block height, or a 2-of-2 signature requirement)
//! and redeeming it once the condition is satisfiable, with no
//! custodian holding funds.

pub mod config;
pub mod error;
pub mod escrow;
pub mod services;

// Re-export commonly used types
pub use error::{EscrowError, EscrowResult};
pub use escrow::{EscrowRecord, EscrowStatus, FeePolicy, ScriptSpec};
pub use services::{EscrowService, EsploraClient, JsonFileStore, MemoryStore};
