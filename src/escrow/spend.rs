//! # Unlock Transaction Builder and Finalizer
//!
//! Turns an escrow's redeem script plus its funding UTXO into a legacy
//! P2SH spend: an unsigned PSBT first, then, once the external wallet
//! capability has produced signatures, a finalized raw transaction
//! ready for broadcast.
//!
//! Script-sig layout is the bit-exact contract of this module:
//!
//! ```text
//! Timelock:      <sig> <redeem script>
//! DualApproval:  OP_0 <sig_a> <sig_b> <redeem script>
//! ```
//!
//! For the timelock spend the public key is never pushed separately; it
//! already lives inside the redeem script. For the multisig spend the
//! leading OP_0 feeds CHECKMULTISIG's extra stack pop, and signatures
//! are ordered to match the key order embedded in the script.

use crate::config::escrow::DUST_LIMIT_SATS;
use crate::error::{EscrowError, EscrowResult};
use crate::escrow::detector::UtxoFact;
use crate::escrow::fee::{compute_fee, FeePolicy};
use crate::escrow::script::{decode_pubkey_hex, ScriptSpec};
use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode;
use bitcoin::opcodes::OP_0;
use bitcoin::psbt::{Psbt, PsbtSighashType};
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, EcdsaSighashType, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut,
    Txid, Witness,
};
use std::collections::BTreeMap;

/// Sequence that keeps locktime enforcement active on the spending input
const TIMELOCK_SEQUENCE: Sequence = Sequence(0xFFFF_FFFE);

/// An in-progress unlock spend: the unsigned PSBT plus signatures
/// collected so far, keyed by signer public key bytes. Transient; it
/// becomes a [`FinalizedUnlock`] and is discarded.
#[derive(Debug, Clone)]
pub struct UnlockDraft {
    pub psbt: Psbt,
    pub spec: ScriptSpec,
    pub redeem_script: ScriptBuf,
    pub fee_sats: u64,
    signatures: BTreeMap<Vec<u8>, Vec<u8>>,
}

/// A fully finalized unlock transaction
#[derive(Debug, Clone)]
pub struct FinalizedUnlock {
    pub tx: Transaction,
    pub raw: Vec<u8>,
    pub txid: Txid,
}

/// Build the unsigned unlock PSBT spending the escrow UTXO to
/// `destination`.
///
/// `prev_tx` must be the complete transaction containing the UTXO:
/// P2SH is a legacy output type and must be proven with the whole
/// previous transaction rather than a witness-utxo shortcut.
pub fn build_unlock_draft(
    spec: &ScriptSpec,
    redeem_script: &ScriptBuf,
    utxo: &UtxoFact,
    prev_tx: Transaction,
    destination: &Address,
    policy: FeePolicy,
) -> EscrowResult<UnlockDraft> {
    if prev_tx.compute_txid() != utxo.txid {
        return Err(EscrowError::operation(
            "build_unlock",
            "previous transaction does not contain the escrow utxo",
        ));
    }

    let fee_sats = compute_fee(spec, policy);
    let output_value = utxo
        .value_sats
        .checked_sub(fee_sats)
        .filter(|value| *value >= DUST_LIMIT_SATS)
        .ok_or(EscrowError::InsufficientFunds {
            required: fee_sats + DUST_LIMIT_SATS,
            available: utxo.value_sats,
        })?;

    // Timelock spends must carry the unlock height in the transaction
    // locktime, activated by a sequence below the maximum. Multisig
    // spends need neither.
    let (lock_time, sequence) = match spec {
        ScriptSpec::Timelock { unlock_height, .. } => {
            let lock_time = LockTime::from_height(*unlock_height).map_err(|e| {
                EscrowError::invalid_script(format!("unlock height out of range: {e}"))
            })?;
            (lock_time, TIMELOCK_SEQUENCE)
        }
        ScriptSpec::DualApproval { .. } => (LockTime::ZERO, Sequence::MAX),
    };

    let unsigned_tx = Transaction {
        version: Version::TWO,
        lock_time,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: utxo.txid,
                vout: utxo.vout,
            },
            script_sig: ScriptBuf::new(),
            sequence,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(output_value),
            script_pubkey: destination.script_pubkey(),
        }],
    };

    let mut psbt = Psbt::from_unsigned_tx(unsigned_tx)?;
    psbt.inputs[0].non_witness_utxo = Some(prev_tx);
    psbt.inputs[0].redeem_script = Some(redeem_script.clone());
    psbt.inputs[0].sighash_type = Some(PsbtSighashType::from(EcdsaSighashType::All));

    Ok(UnlockDraft {
        psbt,
        spec: spec.clone(),
        redeem_script: redeem_script.clone(),
        fee_sats,
        signatures: BTreeMap::new(),
    })
}

impl UnlockDraft {
    /// Record a signature produced by the external wallet capability.
    /// `signature` is the DER encoding with the sighash byte appended,
    /// treated as opaque bytes here.
    pub fn add_signature(&mut self, signer_pubkey: &[u8], signature: Vec<u8>) {
        self.signatures.insert(signer_pubkey.to_vec(), signature);
    }

    /// Number of signatures collected so far
    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    /// Assemble the final script-sig and extract the raw transaction.
    ///
    /// Fails with [`EscrowError::MissingSignature`] while the required
    /// signer(s) have not completed; callers retry once more signatures
    /// arrive.
    pub fn finalize(&self) -> EscrowResult<FinalizedUnlock> {
        let script_sig = match &self.spec {
            ScriptSpec::Timelock { .. } => {
                let signature =
                    self.signatures
                        .values()
                        .next()
                        .ok_or(EscrowError::MissingSignature {
                            have: 0,
                            need: 1,
                        })?;
                // <sig> <redeem script> -- the pubkey stays inside the script
                let builder = push_bytes(Builder::new(), signature)?;
                push_bytes(builder, self.redeem_script.as_bytes())?.into_script()
            }
            ScriptSpec::DualApproval { pubkey_a, pubkey_b } => {
                let sig_a = self.signature_for(pubkey_a)?;
                let sig_b = self.signature_for(pubkey_b)?;
                // OP_0 soaks up CHECKMULTISIG's extra stack pop;
                // signature order must match the script's key order
                let builder = Builder::new().push_opcode(OP_0);
                let builder = push_bytes(builder, sig_a)?;
                let builder = push_bytes(builder, sig_b)?;
                push_bytes(builder, self.redeem_script.as_bytes())?.into_script()
            }
        };

        let mut tx = self.psbt.unsigned_tx.clone();
        tx.input[0].script_sig = script_sig;

        let raw = encode::serialize(&tx);
        let txid = tx.compute_txid();
        Ok(FinalizedUnlock { tx, raw, txid })
    }

    fn signature_for(&self, pubkey_hex: &str) -> EscrowResult<&Vec<u8>> {
        let pubkey = decode_pubkey_hex(pubkey_hex)?;
        self.signatures
            .get(&pubkey)
            .ok_or(EscrowError::MissingSignature {
                have: self.signatures.len(),
                need: self.spec.required_signatures(),
            })
    }
}

fn push_bytes(builder: Builder, data: &[u8]) -> EscrowResult<Builder> {
    let buf = PushBytesBuf::try_from(data.to_vec())
        .map_err(|_| EscrowError::invalid_script("script-sig element exceeds push limits"))?;
    Ok(builder.push_slice(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::script::{
        compile_dual_approval, compile_timelock, decompile, derive_p2sh_address, ScriptElement,
    };
    use bitcoin::Network;

    fn owner_pubkey() -> Vec<u8> {
        let mut pk = vec![0x02];
        pk.extend_from_slice(&[0xaa; 32]);
        pk
    }

    fn destination() -> Address {
        // Any well-formed script works as a destination commitment here
        let mut pk = vec![0x03];
        pk.extend_from_slice(&[0xcc; 32]);
        let script = compile_timelock(1, &pk).unwrap();
        derive_p2sh_address(&script, Network::Signet).unwrap()
    }

    /// Fake funding transaction paying `value` sats into the script's
    /// P2SH address at output 0
    fn funding_tx(script: &ScriptBuf, value: u64) -> (Transaction, UtxoFact) {
        let address = derive_p2sh_address(script, Network::Signet).unwrap();
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(value),
                script_pubkey: address.script_pubkey(),
            }],
        };
        let utxo = UtxoFact {
            txid: tx.compute_txid(),
            vout: 0,
            value_sats: value,
            confirmed: true,
            block_height: Some(100),
        };
        (tx, utxo)
    }

    fn timelock_setup(value: u64) -> (ScriptSpec, ScriptBuf, Transaction, UtxoFact) {
        let spec = ScriptSpec::Timelock {
            unlock_height: 100,
            owner_pubkey: hex::encode(owner_pubkey()),
        };
        let script = spec.compile().unwrap();
        let (tx, utxo) = funding_tx(&script, value);
        (spec, script, tx, utxo)
    }

    #[test]
    fn test_timelock_build_sets_locktime_and_sequence() {
        let (spec, script, prev, utxo) = timelock_setup(100_000);
        let draft = build_unlock_draft(
            &spec,
            &script,
            &utxo,
            prev,
            &destination(),
            FeePolicy::Fixed(1_000),
        )
        .unwrap();

        let tx = &draft.psbt.unsigned_tx;
        assert_eq!(tx.lock_time, LockTime::from_height(100).unwrap());
        assert_eq!(tx.input[0].sequence, Sequence(0xFFFF_FFFE));
        assert_eq!(tx.output[0].value.to_sat(), 99_000);
        assert!(draft.psbt.inputs[0].non_witness_utxo.is_some());
        assert_eq!(
            draft.psbt.inputs[0].redeem_script.as_ref().unwrap(),
            &script
        );
    }

    #[test]
    fn test_dual_build_disables_locktime() {
        let mut pk_a = vec![0x02];
        pk_a.extend_from_slice(&[0x01; 32]);
        let mut pk_b = vec![0x03];
        pk_b.extend_from_slice(&[0x02; 32]);
        let spec = ScriptSpec::DualApproval {
            pubkey_a: hex::encode(&pk_a),
            pubkey_b: hex::encode(&pk_b),
        };
        let script = spec.compile().unwrap();
        let (prev, utxo) = funding_tx(&script, 50_000);

        let draft =
            build_unlock_draft(&spec, &script, &utxo, prev, &destination(), FeePolicy::Rate(2))
                .unwrap();
        let tx = &draft.psbt.unsigned_tx;
        assert_eq!(tx.lock_time, LockTime::ZERO);
        assert_eq!(tx.input[0].sequence, Sequence::MAX);
    }

    #[test]
    fn test_dust_rejection() {
        let (spec, script, prev, utxo) = timelock_setup(1_500);
        let err = build_unlock_draft(
            &spec,
            &script,
            &utxo,
            prev,
            &destination(),
            FeePolicy::Fixed(1_000),
        )
        .unwrap_err();
        assert!(matches!(err, EscrowError::InsufficientFunds { .. }));
    }

    #[test]
    fn test_fee_larger_than_value_rejected() {
        let (spec, script, prev, utxo) = timelock_setup(500);
        let err = build_unlock_draft(
            &spec,
            &script,
            &utxo,
            prev,
            &destination(),
            FeePolicy::Fixed(1_000),
        )
        .unwrap_err();
        assert!(matches!(err, EscrowError::InsufficientFunds { .. }));
    }

    #[test]
    fn test_timelock_finalize_layout() {
        let (spec, script, prev, utxo) = timelock_setup(100_000);
        let mut draft = build_unlock_draft(
            &spec,
            &script,
            &utxo,
            prev,
            &destination(),
            FeePolicy::Fixed(1_000),
        )
        .unwrap();

        let signature = vec![0x30, 0x44, 0x02, 0x20, 0x01];
        draft.add_signature(&owner_pubkey(), signature.clone());
        let finalized = draft.finalize().unwrap();

        let elements = decompile(&finalized.tx.input[0].script_sig).unwrap();
        // Exactly [sig, full redeem script]; the pubkey is never pushed
        // as a separate element
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0], ScriptElement::Push(signature));
        assert_eq!(
            elements[1],
            ScriptElement::Push(script.as_bytes().to_vec())
        );
        assert_eq!(finalized.txid, finalized.tx.compute_txid());
        assert_eq!(finalized.raw, encode::serialize(&finalized.tx));
    }

    #[test]
    fn test_timelock_finalize_requires_signature() {
        let (spec, script, prev, utxo) = timelock_setup(100_000);
        let draft = build_unlock_draft(
            &spec,
            &script,
            &utxo,
            prev,
            &destination(),
            FeePolicy::Fixed(1_000),
        )
        .unwrap();
        assert!(matches!(
            draft.finalize().unwrap_err(),
            EscrowError::MissingSignature { have: 0, need: 1 }
        ));
    }

    #[test]
    fn test_dual_finalize_orders_signatures_by_script_key_order() {
        let mut pk_a = vec![0x02];
        pk_a.extend_from_slice(&[0x01; 32]);
        let mut pk_b = vec![0x03];
        pk_b.extend_from_slice(&[0x02; 32]);
        assert!(pk_a < pk_b);

        let spec = ScriptSpec::DualApproval {
            pubkey_a: hex::encode(&pk_a),
            pubkey_b: hex::encode(&pk_b),
        };
        let script = compile_dual_approval(&pk_a, &pk_b).unwrap();
        let (prev, utxo) = funding_tx(&script, 80_000);

        let mut draft = build_unlock_draft(
            &spec,
            &script,
            &utxo,
            prev,
            &destination(),
            FeePolicy::Fixed(1_000),
        )
        .unwrap();

        let sig_a = vec![0x30, 0x0a];
        let sig_b = vec![0x30, 0x0b];
        // Collected in reverse order; finalize must still emit sig_a first
        draft.add_signature(&pk_b, sig_b.clone());
        draft.add_signature(&pk_a, sig_a.clone());

        let finalized = draft.finalize().unwrap();
        let elements = decompile(&finalized.tx.input[0].script_sig).unwrap();

        assert_eq!(elements.len(), 4);
        // OP_0 decodes as an empty push
        assert_eq!(elements[0], ScriptElement::Push(vec![]));
        assert_eq!(elements[1], ScriptElement::Push(sig_a));
        assert_eq!(elements[2], ScriptElement::Push(sig_b));
        assert_eq!(
            elements[3],
            ScriptElement::Push(script.as_bytes().to_vec())
        );
    }

    #[test]
    fn test_dual_finalize_requires_both_signatures() {
        let mut pk_a = vec![0x02];
        pk_a.extend_from_slice(&[0x01; 32]);
        let mut pk_b = vec![0x03];
        pk_b.extend_from_slice(&[0x02; 32]);
        let spec = ScriptSpec::DualApproval {
            pubkey_a: hex::encode(&pk_a),
            pubkey_b: hex::encode(&pk_b),
        };
        let script = spec.compile().unwrap();
        let (prev, utxo) = funding_tx(&script, 80_000);

        let mut draft = build_unlock_draft(
            &spec,
            &script,
            &utxo,
            prev,
            &destination(),
            FeePolicy::Fixed(1_000),
        )
        .unwrap();
        draft.add_signature(&pk_a, vec![0x30, 0x0a]);

        assert!(matches!(
            draft.finalize().unwrap_err(),
            EscrowError::MissingSignature { have: 1, need: 2 }
        ));
    }

    #[test]
    fn test_build_rejects_mismatched_prev_tx() {
        let (spec, script, _, utxo) = timelock_setup(100_000);
        // A different funding transaction whose txid does not match
        let (other_prev, _) = funding_tx(&script, 42_000);
        let err = build_unlock_draft(
            &spec,
            &script,
            &utxo,
            other_prev,
            &destination(),
            FeePolicy::Fixed(1_000),
        )
        .unwrap_err();
        assert!(matches!(err, EscrowError::OperationFailed { .. }));
    }
}
