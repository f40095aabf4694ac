//! Pre-release verification of a resolved transaction set.
//!
//! # Design Principles
//! - Pure: never mutates tasks or transactions
//! - Fail-closed: the first violation aborts the whole set
//! - Checks run per transaction in list order: fee, signatures, size

use super::set::SignedTransaction;
use crate::error::VerificationError;
use crate::funding::FeePolicy;
use crate::tx::Signer;

pub struct Verifier<'a> {
    signer: &'a dyn Signer,
    max_tx_size: usize,
}

impl<'a> Verifier<'a> {
    pub fn new(signer: &'a dyn Signer, policy: &FeePolicy) -> Self {
        Self {
            signer,
            max_tx_size: policy.max_tx_size,
        }
    }

    /// Verify every transaction, stopping at the first violation.
    pub fn verify_all(&self, txs: &[SignedTransaction]) -> Result<(), VerificationError> {
        txs.iter().try_for_each(|tx| self.verify(tx))
    }

    /// Verify one transaction.
    ///
    /// # Errors
    /// - `InsufficientFee` if `inputs - outputs < serialized length` (1 sat/byte floor)
    /// - `NotFullySigned` if any input lacks an authorization
    /// - `OversizedTransaction` if larger than the network maximum
    pub fn verify(&self, signed: &SignedTransaction) -> Result<(), VerificationError> {
        let size = signed.tx.serialized_len();
        let fee = signed.tx.fee().unwrap_or(0);
        if fee < size as u64 {
            return Err(VerificationError::InsufficientFee {
                txid: signed.txid.clone(),
                fee,
                size,
            });
        }
        if !self.signer.is_fully_signed(&signed.tx) {
            return Err(VerificationError::NotFullySigned {
                txid: signed.txid.clone(),
            });
        }
        if size > self.max_tx_size {
            return Err(VerificationError::OversizedTransaction {
                txid: signed.txid.clone(),
                size,
                max: self.max_tx_size,
            });
        }
        Ok(())
    }
}
