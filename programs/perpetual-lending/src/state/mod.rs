pub mod borrow;
pub mod terms;

pub use borrow::*;
pub use terms::*;

use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::pubkey::Pubkey;

/// Complete persisted state surface of the protocol: terms-by-fingerprint,
/// consumed-amount-by-fingerprint, nonce-by-lender, and borrow commitments.
/// Constructed once and mutated only through the engine entry points.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone)]
pub struct ProtocolState {
    /// Identity that holds collateral units while a borrow is open.
    pub custodian: Pubkey,
    pub terms: TermsRegistry,
    pub borrows: BorrowLedger,
}

impl ProtocolState {
    pub fn new(custodian: Pubkey) -> Self {
        Self {
            custodian,
            terms: TermsRegistry::new(),
            borrows: BorrowLedger::new(),
        }
    }
}
