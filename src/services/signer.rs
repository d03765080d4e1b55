//! # External Signing Capability
//!
//! Abstraction over the wallet that actually holds keys (a browser
//! extension popup, hardware device, or similar). The core never
//! produces signatures itself; it hands a PSBT and an input index to
//! the capability and receives opaque signature bytes back, or a
//! decline it must surface without touching escrow state.

use crate::error::EscrowResult;
use bitcoin::psbt::Psbt;

/// Wallet collaborator that signs one input of a PSBT.
///
/// Implementations return the DER-encoded ECDSA signature with the
/// sighash byte appended. Failures are either
/// [`crate::error::EscrowError::UserDeclined`] (the human cancelled;
/// retryable, escrow status untouched) or
/// [`crate::error::EscrowError::SignerUnavailable`].
#[allow(async_fn_in_trait)]
pub trait SigningCapability {
    /// Sign `input_index` of `psbt` with the key identified by the
    /// hex-encoded `signer_pubkey`
    async fn sign_input(
        &self,
        psbt: &Psbt,
        signer_pubkey: &str,
        input_index: usize,
    ) -> EscrowResult<Vec<u8>>;
}
