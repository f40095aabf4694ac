//! Signing capabilities consumed by the allocator and resolver.
//!
//! Key handling and signature scripts belong to an external transaction
//! library; the engine only needs an address, a locking script to pay
//! itself, and a way to authorize every input of a transaction it built.

use async_trait::async_trait;

use super::Transaction;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SignError {
    #[error("Signer rejected transaction: {0}")]
    Rejected(String),

    #[error("Signer returned a transaction with {returned} inputs, expected {expected}")]
    InputMismatch { expected: usize, returned: usize },

    #[error("Signing incomplete: input {0} carries no authorization")]
    Incomplete(usize),
}

/// Key owned by this process. Task outputs (and funding-split outputs) are
/// locked to it, and it authorizes every task transaction.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Address coins are listed for and pointer records are scoped to.
    fn address(&self) -> String;

    /// Locking script paying this key.
    fn locking_script(&self) -> Vec<u8>;

    /// Fill in the authorization of every input.
    async fn sign(&self, tx: &mut Transaction) -> Result<(), SignError>;

    /// Whether every input carries a complete authorization.
    fn is_fully_signed(&self, tx: &Transaction) -> bool {
        tx.is_fully_signed()
    }
}

/// Custodian of externally held funds. Receives an unsigned funding split
/// and returns a signed copy; only input authorizations are taken from it.
#[async_trait]
pub trait ExternalSigner: Send + Sync {
    /// Address whose coins fund the upload.
    fn address(&self) -> String;

    /// Locking script that receives funding-split change.
    fn change_script(&self) -> Vec<u8>;

    async fn authorize(&self, unsigned: &Transaction) -> Result<Transaction, SignError>;
}
