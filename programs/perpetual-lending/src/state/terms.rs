use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};
use sha3::{Digest, Keccak256};
use solana_program::{program_error::ProgramError, pubkey::Pubkey};

use crate::curve::LIQUIDATION_THRESHOLD_BIPS;
use crate::error::LendingError;

/// Lender-chosen economic parameters of an offer. Content-addressed: the
/// Keccak-256 of the Borsh encoding is the key for capacity accounting, so
/// byte-identical terms share one capacity bucket.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct LoanTerms {
    pub lender: Pubkey,
    /// Collateral-class identifier: any unit of this class is acceptable.
    pub collection: Pubkey,
    /// Per-borrow principal bounds.
    pub min_amount: u128,
    pub max_amount: u128,
    /// Aggregate capacity across all borrows referencing these terms.
    pub total_amount: u128,
    /// Length of the refinancing auction in blocks.
    pub liquidation_duration_blocks: u64,
    /// Annualized continuously-compounded rate in basis points.
    pub interest_rate_bips: u32,
}

#[derive(
    BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct TermsFingerprint(pub [u8; 32]);

impl LoanTerms {
    pub fn fingerprint(&self) -> TermsFingerprint {
        let encoded = self.try_to_vec().expect("terms serialization");
        let mut hasher = Keccak256::new();
        hasher.update(&encoded);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(digest.as_slice());
        TermsFingerprint(bytes)
    }

    /// Parameter sanity: the auction curve takes ln of the rate and pins its
    /// endpoint at the liquidation threshold, so both must be positive and
    /// the rate strictly below the threshold.
    pub fn validate(&self) -> Result<(), ProgramError> {
        if self.interest_rate_bips == 0
            || self.interest_rate_bips >= LIQUIDATION_THRESHOLD_BIPS
            || self.liquidation_duration_blocks == 0
            || self.min_amount > self.max_amount
            || self.total_amount == 0
        {
            return Err(LendingError::InvalidTerms.into());
        }
        Ok(())
    }
}

/// Accepted terms plus the liveness window of the offer that introduced
/// them, and the aggregate principal currently drawn against them.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone)]
pub struct TermsEntry {
    pub terms: LoanTerms,
    pub deadline: i64,
    pub nonce: u64,
    pub consumed: u128,
}

/// Terms content store, capacity ledger, and per-lender nonce registry.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Default)]
pub struct TermsRegistry {
    entries: BTreeMap<TermsFingerprint, TermsEntry>,
    nonces: BTreeMap<Pubkey, u64>,
}

impl TermsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store validated terms under their fingerprint. Duplicate submission
    /// of identical terms is rejected.
    pub fn submit(
        &mut self,
        terms: LoanTerms,
        deadline: i64,
        nonce: u64,
    ) -> Result<TermsFingerprint, ProgramError> {
        terms.validate()?;
        let fingerprint = terms.fingerprint();
        if self.entries.contains_key(&fingerprint) {
            return Err(LendingError::TermsAlreadyExists.into());
        }
        self.entries.insert(
            fingerprint,
            TermsEntry {
                terms,
                deadline,
                nonce,
                consumed: 0,
            },
        );
        Ok(fingerprint)
    }

    /// Store terms if their fingerprint is new; otherwise keep the stored
    /// entry. Refinance paths accept offers over terms the registry has
    /// never seen, and the first submission wins.
    pub fn ensure(
        &mut self,
        terms: &LoanTerms,
        deadline: i64,
        nonce: u64,
    ) -> Result<TermsFingerprint, ProgramError> {
        terms.validate()?;
        let fingerprint = terms.fingerprint();
        self.entries.entry(fingerprint).or_insert_with(|| TermsEntry {
            terms: terms.clone(),
            deadline,
            nonce,
            consumed: 0,
        });
        Ok(fingerprint)
    }

    pub fn get(&self, fingerprint: &TermsFingerprint) -> Result<&TermsEntry, ProgramError> {
        self.entries
            .get(fingerprint)
            .ok_or_else(|| LendingError::UnknownTerms.into())
    }

    /// Check that `amount` more principal fits under the capacity cap,
    /// without mutating. Entry points call this before moving assets so a
    /// failed call leaves no partial effect.
    pub fn check_capacity(
        &self,
        fingerprint: &TermsFingerprint,
        amount: u128,
    ) -> Result<(), ProgramError> {
        let entry = self.get(fingerprint)?;
        let consumed = entry
            .consumed
            .checked_add(amount)
            .ok_or(LendingError::ArithmeticOverflow)?;
        if consumed > entry.terms.total_amount {
            return Err(LendingError::AtCapacity.into());
        }
        Ok(())
    }

    /// Add drawn principal to the fingerprint's bucket, enforcing the cap.
    pub fn reserve(
        &mut self,
        fingerprint: &TermsFingerprint,
        amount: u128,
    ) -> Result<(), ProgramError> {
        let entry = self
            .entries
            .get_mut(fingerprint)
            .ok_or(LendingError::UnknownTerms)?;
        let consumed = entry
            .consumed
            .checked_add(amount)
            .ok_or(LendingError::ArithmeticOverflow)?;
        if consumed > entry.terms.total_amount {
            return Err(LendingError::AtCapacity.into());
        }
        entry.consumed = consumed;
        Ok(())
    }

    /// Return repaid principal to the bucket. Saturates at zero: repayments
    /// include accrued interest, which was never reserved.
    pub fn release(
        &mut self,
        fingerprint: &TermsFingerprint,
        amount: u128,
    ) -> Result<(), ProgramError> {
        let entry = self
            .entries
            .get_mut(fingerprint)
            .ok_or(LendingError::UnknownTerms)?;
        entry.consumed = entry.consumed.saturating_sub(amount);
        Ok(())
    }

    pub fn consumed(&self, fingerprint: &TermsFingerprint) -> u128 {
        self.entries
            .get(fingerprint)
            .map(|entry| entry.consumed)
            .unwrap_or(0)
    }

    pub fn nonce_of(&self, lender: &Pubkey) -> u64 {
        self.nonces.get(lender).copied().unwrap_or(0)
    }

    /// Invalidate every outstanding offer the lender signed with a nonce
    /// below the returned value.
    pub fn bump_nonce(&mut self, lender: &Pubkey) -> u64 {
        let nonce = self.nonces.entry(*lender).or_insert(0);
        *nonce += 1;
        *nonce
    }
}
