//! # Redeem Script Compilation and P2SH Address Derivation
//!
//! Pure, deterministic compilation of an escrow spending condition into
//! canonical Bitcoin Script bytes, plus derivation of the corresponding
//! P2SH address. No I/O happens here.
//!
//! Two script variants are supported:
//!
//! ```text
//! Timelock:      <height> OP_CHECKLOCKTIMEVERIFY OP_DROP <owner_pk> OP_CHECKSIG
//! DualApproval:  OP_2 <pk_a> <pk_b> OP_2 OP_CHECKMULTISIG
//! ```

use crate::error::{EscrowError, EscrowResult};
use bitcoin::opcodes::all::{OP_CHECKMULTISIG, OP_CHECKSIG, OP_CLTV, OP_DROP, OP_PUSHNUM_2};
use bitcoin::opcodes::{Opcode, OP_0};
use bitcoin::script::{Builder, Instruction, PushBytesBuf};
use bitcoin::{Address, Network, Script, ScriptBuf};
use serde::{Deserialize, Serialize};

/// Block heights at or above this value are interpreted by consensus as
/// unix timestamps, so they are rejected as escrow unlock heights.
pub const MAX_BLOCK_HEIGHT: u32 = 500_000_000;

/// Spending condition for an escrow, chosen at creation time.
///
/// Public keys are stored hex-encoded for serialization compatibility
/// and are shape-checked (33 or 65 bytes), never cryptographically
/// validated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptSpec {
    /// Funds unlock for the owner key once the chain reaches a height
    Timelock {
        unlock_height: u32,
        owner_pubkey: String,
    },
    /// Funds unlock only with signatures from both parties.
    /// Key order is preserved as supplied; spend-time signature order
    /// must match it.
    DualApproval { pubkey_a: String, pubkey_b: String },
}

impl ScriptSpec {
    /// Compile this spec into redeem script bytes
    pub fn compile(&self) -> EscrowResult<ScriptBuf> {
        match self {
            ScriptSpec::Timelock {
                unlock_height,
                owner_pubkey,
            } => compile_timelock(*unlock_height, &decode_pubkey_hex(owner_pubkey)?),
            ScriptSpec::DualApproval { pubkey_a, pubkey_b } => compile_dual_approval(
                &decode_pubkey_hex(pubkey_a)?,
                &decode_pubkey_hex(pubkey_b)?,
            ),
        }
    }

    /// Number of signatures a spend of this script requires
    pub fn required_signatures(&self) -> usize {
        match self {
            ScriptSpec::Timelock { .. } => 1,
            ScriptSpec::DualApproval { .. } => 2,
        }
    }

    /// Hex-encoded public keys whose signatures a spend requires, in
    /// script order
    pub fn signer_pubkeys(&self) -> Vec<&str> {
        match self {
            ScriptSpec::Timelock { owner_pubkey, .. } => vec![owner_pubkey],
            ScriptSpec::DualApproval { pubkey_a, pubkey_b } => vec![pubkey_a, pubkey_b],
        }
    }
}

/// One decoded element of a compiled script (diagnostic use)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptElement {
    Op(Opcode),
    Push(Vec<u8>),
}

/// Compile a CLTV timelock redeem script:
/// `<unlock_height> OP_CLTV OP_DROP <owner_pubkey> OP_CHECKSIG`
///
/// The height is pushed with minimal script-number encoding: height 0
/// becomes OP_0, everything else little-endian bytes with a zero sign
/// byte appended when the top bit of the most significant byte is set.
pub fn compile_timelock(unlock_height: u32, owner_pubkey: &[u8]) -> EscrowResult<ScriptBuf> {
    check_pubkey_shape(owner_pubkey)?;
    if unlock_height >= MAX_BLOCK_HEIGHT {
        return Err(EscrowError::invalid_script(format!(
            "unlock height {unlock_height} is not a block height (max {})",
            MAX_BLOCK_HEIGHT - 1
        )));
    }

    let builder = push_script_num(Builder::new(), unlock_height)
        .push_opcode(OP_CLTV)
        .push_opcode(OP_DROP);
    let builder = push_data(builder, owner_pubkey)?;
    Ok(builder.push_opcode(OP_CHECKSIG).into_script())
}

/// Compile a 2-of-2 multisig redeem script:
/// `OP_2 <pubkey_a> <pubkey_b> OP_2 OP_CHECKMULTISIG`
///
/// No ordering canonicalization is applied; the caller-supplied key
/// order is preserved and spend-time signatures must match it.
pub fn compile_dual_approval(pubkey_a: &[u8], pubkey_b: &[u8]) -> EscrowResult<ScriptBuf> {
    check_pubkey_shape(pubkey_a)?;
    check_pubkey_shape(pubkey_b)?;

    let builder = Builder::new().push_opcode(OP_PUSHNUM_2);
    let builder = push_data(builder, pubkey_a)?;
    let builder = push_data(builder, pubkey_b)?;
    Ok(builder
        .push_opcode(OP_PUSHNUM_2)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script())
}

/// Derive the P2SH address committing to `script` on `network`.
///
/// Deterministic: the same script and network always produce the same
/// address (HASH160 of the script behind the network's P2SH version).
pub fn derive_p2sh_address(script: &Script, network: Network) -> EscrowResult<Address> {
    Address::p2sh(script, network)
        .map_err(|_| EscrowError::invalid_script("redeem script exceeds the 520-byte P2SH limit"))
}

/// Decompile a script into its opcode/push sequence.
///
/// Diagnostic only; the output of [`compile_timelock`] and
/// [`compile_dual_approval`] round-trips losslessly. Note that OP_0
/// decodes as an empty push, which is its script semantics.
pub fn decompile(script: &Script) -> EscrowResult<Vec<ScriptElement>> {
    script
        .instructions()
        .map(|instruction| match instruction {
            Ok(Instruction::Op(op)) => Ok(ScriptElement::Op(op)),
            Ok(Instruction::PushBytes(bytes)) => {
                Ok(ScriptElement::Push(bytes.as_bytes().to_vec()))
            }
            Err(e) => Err(EscrowError::invalid_script(format!(
                "undecodable script: {e}"
            ))),
        })
        .collect()
}

/// Minimal CScriptNum encoding of a non-negative integer.
///
/// Little-endian, no leading zero bytes, with a trailing zero appended
/// when the high bit of the most significant byte is set so the number
/// stays non-negative.
pub fn script_num_bytes(mut value: u32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(5);
    while value > 0 {
        bytes.push((value & 0xff) as u8);
        value >>= 8;
    }
    if let Some(&msb) = bytes.last() {
        if msb & 0x80 != 0 {
            bytes.push(0x00);
        }
    }
    bytes
}

fn push_script_num(builder: Builder, value: u32) -> Builder {
    if value == 0 {
        // OP_0, not an empty data push opcode pair
        return builder.push_opcode(OP_0);
    }
    let bytes = script_num_bytes(value);
    // At most 5 bytes for a u32 script number, always pushable
    let buf = PushBytesBuf::try_from(bytes).expect("script number fits a push");
    builder.push_slice(buf)
}

fn push_data(builder: Builder, data: &[u8]) -> EscrowResult<Builder> {
    let buf = PushBytesBuf::try_from(data.to_vec())
        .map_err(|_| EscrowError::invalid_script("push data exceeds script limits"))?;
    Ok(builder.push_slice(buf))
}

fn check_pubkey_shape(pubkey: &[u8]) -> EscrowResult<()> {
    match pubkey.len() {
        33 | 65 => Ok(()),
        n => Err(EscrowError::invalid_script(format!(
            "public key must be 33 or 65 bytes, got {n}"
        ))),
    }
}

pub(crate) fn decode_pubkey_hex(pubkey_hex: &str) -> EscrowResult<Vec<u8>> {
    let bytes = hex::decode(pubkey_hex)
        .map_err(|e| EscrowError::invalid_script(format!("public key is not hex: {e}")))?;
    check_pubkey_shape(&bytes)?;
    Ok(bytes)
}
