//! # External Collaborator Services
//!
//! Concrete implementations and traits for the collaborators the
//! escrow core depends on: the chain indexer, the signing capability,
//! record persistence, and the orchestration service tying them
//! together.

pub mod escrow_service;
pub mod esplora_client;
pub mod signer;
pub mod store;

pub use escrow_service::EscrowService;
pub use esplora_client::EsploraClient;
pub use signer::SigningCapability;
pub use store::{EscrowStore, JsonFileStore, MemoryStore};
