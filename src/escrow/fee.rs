//! # Fee Estimation
//!
//! Deterministic size-based fee calculation for escrow unlock
//! transactions. Every unlock spend has exactly one input and one
//! output, so the estimate reduces to a fixed per-condition-type size.

use crate::escrow::script::ScriptSpec;

/// Serialized size of the version/locktime/counts framing
pub const TX_OVERHEAD_BYTES: u64 = 10;

/// Serialized size of the single destination output
pub const OUTPUT_BYTES: u64 = 34;

/// Input size for a timelock spend: outpoint + sequence + script-sig
/// carrying one signature and the redeem script
pub const TIMELOCK_INPUT_BYTES: u64 = 200;

/// Input size for a dual-approval spend: two signatures plus the
/// larger multisig redeem script
pub const DUAL_APPROVAL_INPUT_BYTES: u64 = 260;

/// Fee policy for an unlock transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeePolicy {
    /// Fixed fee in satoshis, used as-is
    Fixed(u64),
    /// Fee rate in sat/vB applied to the estimated size
    Rate(u64),
}

/// Estimated serialized size of an unlock transaction for `spec`
pub fn estimate_vsize(spec: &ScriptSpec) -> u64 {
    let input = match spec {
        ScriptSpec::Timelock { .. } => TIMELOCK_INPUT_BYTES,
        ScriptSpec::DualApproval { .. } => DUAL_APPROVAL_INPUT_BYTES,
    };
    input + OUTPUT_BYTES + TX_OVERHEAD_BYTES
}

/// Compute the fee in satoshis for `spec` under `policy`
pub fn compute_fee(spec: &ScriptSpec, policy: FeePolicy) -> u64 {
    match policy {
        FeePolicy::Fixed(sats) => sats,
        FeePolicy::Rate(rate) => estimate_vsize(spec) * rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timelock_spec() -> ScriptSpec {
        ScriptSpec::Timelock {
            unlock_height: 100,
            owner_pubkey: "02".repeat(33),
        }
    }

    fn dual_spec() -> ScriptSpec {
        ScriptSpec::DualApproval {
            pubkey_a: "02".repeat(33),
            pubkey_b: "03".repeat(33),
        }
    }

    #[test]
    fn test_vsize_estimates() {
        assert_eq!(estimate_vsize(&timelock_spec()), 244);
        assert_eq!(estimate_vsize(&dual_spec()), 304);
    }

    #[test]
    fn test_fee_policies() {
        assert_eq!(compute_fee(&timelock_spec(), FeePolicy::Fixed(1_000)), 1_000);
        assert_eq!(compute_fee(&timelock_spec(), FeePolicy::Rate(2)), 488);
        assert_eq!(compute_fee(&dual_spec(), FeePolicy::Rate(3)), 912);
    }
}
