//! Fee policy and size estimates.
//!
//! Funding-split sizes are estimated with fixed per-input/per-output byte
//! counts rather than exact serialization; the verifier's 1 sat/byte floor
//! is calibrated against these figures.

use serde::{Deserialize, Serialize};

/// Estimated bytes of one signed pay-to-key input.
pub const BYTES_PER_INPUT: u64 = 148;
/// Estimated bytes of one pay-to-key output.
pub const BYTES_PER_OUTPUT: u64 = 34;
/// Version, lock time and counts.
pub const BYTES_TX_FRAME: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeePolicy {
    /// Rate used to reserve value for task payloads (satoshis per 1000 bytes)
    pub fee_per_kb: u64,
    /// Rate used to compute funding-split change
    pub split_fee_per_kb: u64,
    /// Minimum economically spendable output
    pub dust_limit: u64,
    /// Flat value added to every task reservation for its own framing
    pub base_overhead: u64,
    /// Per-task allowance for the funding split's own output bytes
    pub per_output_overhead: u64,
    /// Maximum serialized transaction size accepted by the network
    pub max_tx_size: usize,
    /// Byte budget for one funding split (estimated)
    pub max_split_bytes: u64,
    /// Hard cap on task outputs in one funding split
    pub max_split_outputs: usize,
    /// Surplus (after the per-input/output allowance) below which no change output is made
    pub change_threshold: u64,
    /// Per-input and per-output allowance used by the change decision
    pub change_allowance_per_io: u64,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            fee_per_kb: 1000,
            split_fee_per_kb: 1536,
            dust_limit: 546,
            base_overhead: 400,
            per_output_overhead: 100,
            max_tx_size: 1_000_000,
            max_split_bytes: 100_000,
            max_split_outputs: 1000,
            change_threshold: 1000,
            change_allowance_per_io: 150,
        }
    }
}

impl FeePolicy {
    /// Fee for `bytes` at `rate` satoshis per 1000 bytes, rounded up.
    pub fn fee_for(bytes: u64, rate: u64) -> u64 {
        (bytes.saturating_mul(rate) + 999) / 1000
    }

    /// Value reserved for a task whose cost basis is `payload_size` bytes.
    ///
    /// # Property
    /// `reserve(n) >= dust_limit`
    pub fn reserve(&self, payload_size: u64) -> u64 {
        let payload_cost = Self::fee_for(payload_size, self.fee_per_kb);
        self.dust_limit
            .max(payload_cost.saturating_add(self.base_overhead))
    }

    /// Estimated size of a funding split.
    pub fn split_size(inputs: usize, outputs: usize) -> u64 {
        BYTES_TX_FRAME + inputs as u64 * BYTES_PER_INPUT + outputs as u64 * BYTES_PER_OUTPUT
    }

    /// Fee for a funding split with the given shape.
    pub fn split_fee(&self, inputs: usize, outputs: usize) -> u64 {
        Self::fee_for(Self::split_size(inputs, outputs), self.split_fee_per_kb)
    }

    /// Whether a split with `surplus = inputs - outputs` warrants a change output.
    pub fn wants_change(&self, surplus: u64, inputs: usize, outputs: usize) -> bool {
        let allowance = (inputs + outputs) as u64 * self.change_allowance_per_io;
        surplus.saturating_sub(allowance) > self.change_threshold
    }
}
