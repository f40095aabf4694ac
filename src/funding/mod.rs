//! Funding module - fee policy and coin allocation.
//!
//! # Key Concepts
//! - Reservation: value set aside for one task's own transaction fee
//! - Funding split: a transaction creating one correctly sized output per task
//! - Batch: the tasks one split funds, bounded by byte budget and output cap

mod allocation;
mod fees;

pub use allocation::{Batch, FundingAllocator, FundingSource, FundingSummary};
pub use fees::{FeePolicy, BYTES_PER_INPUT, BYTES_PER_OUTPUT, BYTES_TX_FRAME};
