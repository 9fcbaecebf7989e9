use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};
use sha3::{Digest, Keccak256};
use solana_program::{program_error::ProgramError, pubkey::Pubkey};

use crate::error::LendingError;
use crate::math::{bips_to_wad, mul_div, wad_exp, wad_mul, MathError, WAD};
use crate::state::terms::{LoanTerms, TermsFingerprint};

pub const SECONDS_PER_YEAR: i64 = 365 * 24 * 60 * 60;

/// Opaque handle for an open borrow.
#[derive(
    BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct BorrowId(pub u64);

/// An open loan position. The ledger persists only the Keccak-256
/// commitment of this record; every mutating call must present the full
/// current value, which is re-hashed and checked before anything changes.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct Borrow {
    /// Snapshot of the terms in effect (replaced wholesale on refinance).
    pub terms: LoanTerms,
    pub terms_fingerprint: TermsFingerprint,
    pub borrower: Pubkey,
    pub collateral_id: u64,
    /// Principal plus accrued interest as of `last_touched_time`.
    pub last_computed_debt: u128,
    pub last_touched_time: i64,
    /// 0 = no auction; otherwise the block the refinancing auction began.
    pub auction_start_block: u64,
}

impl Borrow {
    pub fn commitment(&self) -> [u8; 32] {
        let encoded = self.try_to_vec().expect("borrow serialization");
        let mut hasher = Keccak256::new();
        hasher.update(&encoded);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(digest.as_slice());
        bytes
    }

    pub fn is_auction_active(&self) -> bool {
        self.auction_start_block > 0
    }

    /// Debt at `now` under continuous compounding:
    /// last_computed_debt * e^(rate * elapsed_years). Pure; the stored debt
    /// is only refreshed by the entry points that touch the position.
    pub fn accrued_debt(&self, now: i64) -> Result<u128, ProgramError> {
        let elapsed = now.saturating_sub(self.last_touched_time).max(0);
        if elapsed == 0 {
            return Ok(self.last_computed_debt);
        }
        let elapsed_years = (elapsed as i128)
            .checked_mul(WAD)
            .ok_or(MathError::Overflow)?
            / SECONDS_PER_YEAR as i128;
        let rate = bips_to_wad(self.terms.interest_rate_bips);
        let growth = wad_exp(wad_mul(rate, elapsed_years)?)?;
        let debt = mul_div(self.last_computed_debt, growth as u128, WAD as u128)?;
        Ok(debt)
    }
}

/// Commitment store for open borrows, keyed by opaque sequential id.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Default)]
pub struct BorrowLedger {
    commitments: BTreeMap<BorrowId, [u8; 32]>,
    next_id: u64,
}

impl BorrowLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, borrow: &Borrow) -> BorrowId {
        let id = BorrowId(self.next_id);
        self.next_id += 1;
        self.commitments.insert(id, borrow.commitment());
        id
    }

    /// Require that the supplied record is the current state of `id`.
    pub fn authenticate(&self, id: BorrowId, borrow: &Borrow) -> Result<(), ProgramError> {
        let stored = self
            .commitments
            .get(&id)
            .ok_or(LendingError::UnknownBorrow)?;
        if *stored != borrow.commitment() {
            return Err(LendingError::StateMismatch.into());
        }
        Ok(())
    }

    /// Replace the stored commitment after a mutation.
    pub fn commit(&mut self, id: BorrowId, borrow: &Borrow) -> Result<(), ProgramError> {
        let stored = self
            .commitments
            .get_mut(&id)
            .ok_or(LendingError::UnknownBorrow)?;
        *stored = borrow.commitment();
        Ok(())
    }

    /// Close the position (full repayment or liquidation).
    pub fn remove(&mut self, id: BorrowId) -> Result<(), ProgramError> {
        self.commitments
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| LendingError::UnknownBorrow.into())
    }

    pub fn open_count(&self) -> usize {
        self.commitments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_borrow() -> Borrow {
        let terms = LoanTerms {
            lender: Pubkey::new_unique(),
            collection: Pubkey::new_unique(),
            min_amount: 1,
            max_amount: u128::MAX,
            total_amount: u128::MAX,
            liquidation_duration_blocks: 100,
            interest_rate_bips: 5_000,
        };
        let terms_fingerprint = terms.fingerprint();
        Borrow {
            terms,
            terms_fingerprint,
            borrower: Pubkey::new_unique(),
            collateral_id: 7,
            last_computed_debt: 10_000_000_000_000_000_000,
            last_touched_time: 0,
            auction_start_block: 0,
        }
    }

    #[test]
    fn test_accrual_one_year_at_fifty_percent() {
        let borrow = sample_borrow();
        let debt = borrow.accrued_debt(SECONDS_PER_YEAR).unwrap();
        // 10e18 * e^0.5 = 16.487212707001281468e18
        let expected = 16_487_212_707_001_281_468u128;
        let diff = debt.abs_diff(expected);
        assert!(diff < 100_000_000, "debt {} expected {}", debt, expected);
    }

    #[test]
    fn test_accrual_no_elapsed_time() {
        let borrow = sample_borrow();
        assert_eq!(
            borrow.accrued_debt(0).unwrap(),
            borrow.last_computed_debt
        );
        // A clock reading before the last touch does not shrink debt
        assert_eq!(
            borrow.accrued_debt(-100).unwrap(),
            borrow.last_computed_debt
        );
    }

    #[test]
    fn test_commitment_tracks_content() {
        let mut ledger = BorrowLedger::new();
        let mut borrow = sample_borrow();
        let id = ledger.insert(&borrow);

        ledger.authenticate(id, &borrow).unwrap();

        let stale = borrow.clone();
        borrow.last_computed_debt += 1;
        ledger.commit(id, &borrow).unwrap();

        ledger.authenticate(id, &borrow).unwrap();
        assert_eq!(
            ledger.authenticate(id, &stale),
            Err(LendingError::StateMismatch.into())
        );
    }

    #[test]
    fn test_removed_borrow_is_unknown() {
        let mut ledger = BorrowLedger::new();
        let borrow = sample_borrow();
        let id = ledger.insert(&borrow);
        ledger.remove(id).unwrap();
        assert_eq!(
            ledger.authenticate(id, &borrow),
            Err(LendingError::UnknownBorrow.into())
        );
        assert_eq!(ledger.remove(id), Err(LendingError::UnknownBorrow.into()));
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut ledger = BorrowLedger::new();
        let borrow = sample_borrow();
        let first = ledger.insert(&borrow);
        ledger.remove(first).unwrap();
        let second = ledger.insert(&borrow);
        assert_ne!(first, second);
    }
}
