// Protocol entry points. Every function is a synchronous check-then-mutate
// pass over the ledgers: all validation and asset transfers happen before
// the first ledger write, so a failing call leaves the state untouched.

use solana_program::{clock::Clock, msg, program_error::ProgramError, pubkey::Pubkey};

use crate::assets::AssetBackend;
use crate::curve::{auction_rate, LIQUIDATION_THRESHOLD_BIPS};
use crate::error::LendingError;
use crate::offer::{validate_offer, OfferVerifier, SignedOffer, SigningDomain};
use crate::state::{Borrow, BorrowId, LoanTerms, ProtocolState, TermsFingerprint};

/// Sentinel repayment amount meaning "pay exactly the full current debt".
pub const REPAY_MAX: u128 = u128::MAX;

pub struct LendingEngine;

impl LendingEngine {
    /// Accept a signed offer's terms into the registry. The fingerprint
    /// returned is the capacity bucket all borrows against these terms
    /// share. Duplicate terms and expired or revoked offers are rejected.
    pub fn submit_terms(
        state: &mut ProtocolState,
        domain: &SigningDomain,
        verifier: &dyn OfferVerifier,
        clock: &Clock,
        offer: &SignedOffer,
    ) -> Result<TermsFingerprint, ProgramError> {
        let current_nonce = state.terms.nonce_of(&offer.terms.lender);
        validate_offer(offer, domain, verifier, current_nonce, clock.unix_timestamp)?;
        let fingerprint = state
            .terms
            .submit(offer.terms.clone(), offer.deadline, offer.nonce)?;
        msg!("Terms accepted, capacity {}", offer.terms.total_amount);
        Ok(fingerprint)
    }

    /// Open a borrow against previously submitted terms: collateral moves
    /// borrower -> custodian, principal moves lender -> borrower.
    pub fn new_borrow(
        state: &mut ProtocolState,
        assets: &mut dyn AssetBackend,
        clock: &Clock,
        borrower: Pubkey,
        fingerprint: TermsFingerprint,
        collateral_id: u64,
        amount: u128,
    ) -> Result<(BorrowId, Borrow), ProgramError> {
        let entry = state.terms.get(&fingerprint)?;
        let terms = entry.terms.clone();
        if entry.deadline < clock.unix_timestamp
            || entry.nonce < state.terms.nonce_of(&terms.lender)
        {
            return Err(LendingError::OfferExpired.into());
        }
        if amount < terms.min_amount || amount > terms.max_amount {
            return Err(LendingError::InvalidAmount.into());
        }
        state.terms.check_capacity(&fingerprint, amount)?;

        assets.transfer_non_fungible(
            &terms.collection,
            &borrower,
            &state.custodian,
            collateral_id,
        )?;
        assets.transfer_fungible(&terms.lender, &borrower, amount)?;

        state.terms.reserve(&fingerprint, amount)?;
        let borrow = Borrow {
            terms,
            terms_fingerprint: fingerprint,
            borrower,
            collateral_id,
            last_computed_debt: amount,
            last_touched_time: clock.unix_timestamp,
            auction_start_block: 0,
        };
        let id = state.borrows.insert(&borrow);
        msg!("Borrow {} opened, principal {}", id.0, amount);
        Ok((id, borrow))
    }

    /// Submit fresh terms and open a borrow against them in one atomic
    /// call, so a borrower can consume an offer the registry has not seen.
    pub fn submit_terms_and_borrow(
        state: &mut ProtocolState,
        domain: &SigningDomain,
        verifier: &dyn OfferVerifier,
        assets: &mut dyn AssetBackend,
        clock: &Clock,
        borrower: Pubkey,
        offer: &SignedOffer,
        collateral_id: u64,
        amount: u128,
    ) -> Result<(BorrowId, Borrow), ProgramError> {
        let terms = &offer.terms;
        let current_nonce = state.terms.nonce_of(&terms.lender);
        validate_offer(offer, domain, verifier, current_nonce, clock.unix_timestamp)?;
        terms.validate()?;
        let fingerprint = terms.fingerprint();
        if state.terms.get(&fingerprint).is_ok() {
            return Err(LendingError::TermsAlreadyExists.into());
        }
        if amount < terms.min_amount || amount > terms.max_amount {
            return Err(LendingError::InvalidAmount.into());
        }
        if amount > terms.total_amount {
            return Err(LendingError::AtCapacity.into());
        }

        assets.transfer_non_fungible(
            &terms.collection,
            &borrower,
            &state.custodian,
            collateral_id,
        )?;
        assets.transfer_fungible(&terms.lender, &borrower, amount)?;

        state
            .terms
            .submit(terms.clone(), offer.deadline, offer.nonce)?;
        state.terms.reserve(&fingerprint, amount)?;
        let borrow = Borrow {
            terms: terms.clone(),
            terms_fingerprint: fingerprint,
            borrower,
            collateral_id,
            last_computed_debt: amount,
            last_touched_time: clock.unix_timestamp,
            auction_start_block: 0,
        };
        let id = state.borrows.insert(&borrow);
        msg!("Borrow {} opened, principal {}", id.0, amount);
        Ok((id, borrow))
    }

    /// Draw additional principal against an open borrow. Only the recorded
    /// borrower may call; the accrued debt plus the new draw must stay
    /// within the per-borrow ceiling.
    pub fn further_borrow(
        state: &mut ProtocolState,
        assets: &mut dyn AssetBackend,
        clock: &Clock,
        caller: Pubkey,
        id: BorrowId,
        borrow: &Borrow,
        amount: u128,
    ) -> Result<Borrow, ProgramError> {
        state.borrows.authenticate(id, borrow)?;
        if caller != borrow.borrower {
            return Err(LendingError::Unauthorized.into());
        }
        let debt = borrow.accrued_debt(clock.unix_timestamp)?;
        let new_debt = debt
            .checked_add(amount)
            .ok_or(LendingError::ArithmeticOverflow)?;
        if new_debt > borrow.terms.max_amount {
            return Err(LendingError::InvalidAmount.into());
        }
        state.terms.check_capacity(&borrow.terms_fingerprint, amount)?;

        assets.transfer_fungible(&borrow.terms.lender, &borrow.borrower, amount)?;

        state.terms.reserve(&borrow.terms_fingerprint, amount)?;
        let updated = Borrow {
            last_computed_debt: new_debt,
            last_touched_time: clock.unix_timestamp,
            ..borrow.clone()
        };
        state.borrows.commit(id, &updated)?;
        msg!("Borrow {} drew {}, debt {}", id.0, amount, new_debt);
        Ok(updated)
    }

    /// Pay down a borrow. Anyone may repay on the borrower's behalf.
    /// `REPAY_MAX` means the full current debt; an amount above the debt
    /// fails rather than being capped. Full repayment returns the
    /// collateral and closes the record, yielding `None`.
    pub fn repay(
        state: &mut ProtocolState,
        assets: &mut dyn AssetBackend,
        clock: &Clock,
        caller: Pubkey,
        id: BorrowId,
        borrow: &Borrow,
        amount: u128,
    ) -> Result<Option<Borrow>, ProgramError> {
        state.borrows.authenticate(id, borrow)?;
        let debt = borrow.accrued_debt(clock.unix_timestamp)?;
        let pay = if amount == REPAY_MAX { debt } else { amount };
        let new_debt = debt
            .checked_sub(pay)
            .ok_or(LendingError::RepayExceedsDebt)?;

        assets.transfer_fungible(&caller, &borrow.terms.lender, pay)?;
        if new_debt == 0 {
            assets.transfer_non_fungible(
                &borrow.terms.collection,
                &state.custodian,
                &borrow.borrower,
                borrow.collateral_id,
            )?;
        }

        state.terms.release(&borrow.terms_fingerprint, pay)?;
        if new_debt == 0 {
            state.borrows.remove(id)?;
            msg!("Borrow {} repaid in full ({})", id.0, pay);
            return Ok(None);
        }
        let updated = Borrow {
            last_computed_debt: new_debt,
            last_touched_time: clock.unix_timestamp,
            ..borrow.clone()
        };
        state.borrows.commit(id, &updated)?;
        msg!("Borrow {} repaid {}, debt {}", id.0, pay, new_debt);
        Ok(Some(updated))
    }

    /// Swap the position to a new lender's offer without an auction. Only
    /// the current lender may call, and only into terms at least as good
    /// for the borrower; the new lender buys the old one out at the full
    /// accrued debt. A pending auction is carried over untouched.
    pub fn instant_lender_refinance(
        state: &mut ProtocolState,
        domain: &SigningDomain,
        verifier: &dyn OfferVerifier,
        assets: &mut dyn AssetBackend,
        clock: &Clock,
        caller: Pubkey,
        id: BorrowId,
        borrow: &Borrow,
        new_offer: &SignedOffer,
    ) -> Result<Borrow, ProgramError> {
        state.borrows.authenticate(id, borrow)?;
        if caller != borrow.terms.lender {
            return Err(LendingError::Unauthorized.into());
        }
        let new_terms = &new_offer.terms;
        let current_nonce = state.terms.nonce_of(&new_terms.lender);
        validate_offer(new_offer, domain, verifier, current_nonce, clock.unix_timestamp)?;
        new_terms.validate()?;
        Self::check_favorable(&borrow.terms, new_terms)?;
        if new_terms.interest_rate_bips > borrow.terms.interest_rate_bips {
            return Err(LendingError::TermsNotReasonable.into());
        }
        let debt = borrow.accrued_debt(clock.unix_timestamp)?;
        if debt < new_terms.min_amount || debt > new_terms.max_amount {
            return Err(LendingError::InvalidDebtAmount.into());
        }
        let new_fingerprint = new_terms.fingerprint();
        Self::check_refinance_capacity(state, &borrow.terms_fingerprint, &new_fingerprint, new_terms, debt)?;

        assets.transfer_fungible(&new_terms.lender, &borrow.terms.lender, debt)?;

        state
            .terms
            .ensure(new_terms, new_offer.deadline, new_offer.nonce)?;
        state.terms.release(&borrow.terms_fingerprint, debt)?;
        state.terms.reserve(&new_fingerprint, debt)?;
        let updated = Borrow {
            terms: new_terms.clone(),
            terms_fingerprint: new_fingerprint,
            last_computed_debt: debt,
            last_touched_time: clock.unix_timestamp,
            ..borrow.clone()
        };
        state.borrows.commit(id, &updated)?;
        msg!("Borrow {} refinanced at debt {}", id.0, debt);
        Ok(updated)
    }

    /// Start the Dutch auction that discovers a replacement lender. Only
    /// the current lender may kick off, and only one auction at a time.
    pub fn kickoff_refinancing_auction(
        state: &mut ProtocolState,
        clock: &Clock,
        caller: Pubkey,
        id: BorrowId,
        borrow: &Borrow,
    ) -> Result<Borrow, ProgramError> {
        state.borrows.authenticate(id, borrow)?;
        if caller != borrow.terms.lender {
            return Err(LendingError::Unauthorized.into());
        }
        if borrow.is_auction_active() {
            return Err(LendingError::AuctionAlreadyStarted.into());
        }
        // Zero marks "no auction", so a kickoff in the genesis block still
        // has to record a positive start.
        let updated = Borrow {
            auction_start_block: clock.slot.max(1),
            ..borrow.clone()
        };
        state.borrows.commit(id, &updated)?;
        msg!("Borrow {} auction started at block {}", id.0, updated.auction_start_block);
        Ok(updated)
    }

    /// Resolve an active auction with a replacement offer. The offer's
    /// rate must not exceed the auction's current clearing rate, and the
    /// auction must not have crossed the liquidation threshold.
    pub fn settle_refinancing_auction(
        state: &mut ProtocolState,
        domain: &SigningDomain,
        verifier: &dyn OfferVerifier,
        assets: &mut dyn AssetBackend,
        clock: &Clock,
        id: BorrowId,
        borrow: &Borrow,
        new_offer: &SignedOffer,
    ) -> Result<Borrow, ProgramError> {
        state.borrows.authenticate(id, borrow)?;
        if !borrow.is_auction_active() {
            return Err(LendingError::AuctionNotStarted.into());
        }
        let rate = auction_rate(
            borrow.auction_start_block,
            borrow.terms.liquidation_duration_blocks,
            borrow.terms.interest_rate_bips,
            clock.slot,
        )?;
        msg!("Auction clearing rate {} bips", rate);
        if rate >= LIQUIDATION_THRESHOLD_BIPS {
            return Err(LendingError::Insolvent.into());
        }
        let new_terms = &new_offer.terms;
        let current_nonce = state.terms.nonce_of(&new_terms.lender);
        validate_offer(new_offer, domain, verifier, current_nonce, clock.unix_timestamp)?;
        new_terms.validate()?;
        Self::check_favorable(&borrow.terms, new_terms)?;
        // The ceiling is the current clearing rate, not the original rate.
        if new_terms.interest_rate_bips > rate {
            return Err(LendingError::TermsNotReasonable.into());
        }
        let debt = borrow.accrued_debt(clock.unix_timestamp)?;
        if debt < new_terms.min_amount || debt > new_terms.max_amount {
            return Err(LendingError::InvalidAmount.into());
        }
        let new_fingerprint = new_terms.fingerprint();
        Self::check_refinance_capacity(state, &borrow.terms_fingerprint, &new_fingerprint, new_terms, debt)?;

        assets.transfer_fungible(&new_terms.lender, &borrow.terms.lender, debt)?;

        state
            .terms
            .ensure(new_terms, new_offer.deadline, new_offer.nonce)?;
        state.terms.release(&borrow.terms_fingerprint, debt)?;
        state.terms.reserve(&new_fingerprint, debt)?;
        let updated = Borrow {
            terms: new_terms.clone(),
            terms_fingerprint: new_fingerprint,
            last_computed_debt: debt,
            last_touched_time: clock.unix_timestamp,
            auction_start_block: 0,
            ..borrow.clone()
        };
        state.borrows.commit(id, &updated)?;
        msg!("Borrow {} auction settled at debt {}", id.0, debt);
        Ok(updated)
    }

    /// Seize the collateral after a failed auction: the clearing rate has
    /// reached the liquidation threshold without a replacement lender.
    pub fn liquidate(
        state: &mut ProtocolState,
        assets: &mut dyn AssetBackend,
        clock: &Clock,
        id: BorrowId,
        borrow: &Borrow,
    ) -> Result<(), ProgramError> {
        state.borrows.authenticate(id, borrow)?;
        if !borrow.is_auction_active() {
            return Err(LendingError::AuctionNotStarted.into());
        }
        let rate = auction_rate(
            borrow.auction_start_block,
            borrow.terms.liquidation_duration_blocks,
            borrow.terms.interest_rate_bips,
            clock.slot,
        )?;
        if rate < LIQUIDATION_THRESHOLD_BIPS {
            return Err(LendingError::NotInsolvent.into());
        }
        let debt = borrow.accrued_debt(clock.unix_timestamp)?;

        assets.transfer_non_fungible(
            &borrow.terms.collection,
            &state.custodian,
            &borrow.terms.lender,
            borrow.collateral_id,
        )?;

        state.terms.release(&borrow.terms_fingerprint, debt)?;
        state.borrows.remove(id)?;
        msg!("Borrow {} liquidated, debt written off {}", id.0, debt);
        Ok(())
    }

    /// Invalidate every outstanding offer the caller signed with a nonce
    /// below the returned value. Coarse-grained revocation.
    pub fn bump_nonce(state: &mut ProtocolState, caller: Pubkey) -> u64 {
        let nonce = state.terms.bump_nonce(&caller);
        msg!("Nonce bumped to {}", nonce);
        nonce
    }

    /// Accrued debt right now. Read-only.
    pub fn current_debt(
        state: &ProtocolState,
        clock: &Clock,
        id: BorrowId,
        borrow: &Borrow,
    ) -> Result<u128, ProgramError> {
        state.borrows.authenticate(id, borrow)?;
        borrow.accrued_debt(clock.unix_timestamp)
    }

    /// Current auction clearing rate in bips. Read-only; fails when no
    /// auction is running.
    pub fn current_auction_rate(
        state: &ProtocolState,
        clock: &Clock,
        id: BorrowId,
        borrow: &Borrow,
    ) -> Result<u32, ProgramError> {
        state.borrows.authenticate(id, borrow)?;
        if !borrow.is_auction_active() {
            return Err(LendingError::AuctionNotStarted.into());
        }
        auction_rate(
            borrow.auction_start_block,
            borrow.terms.liquidation_duration_blocks,
            borrow.terms.interest_rate_bips,
            clock.slot,
        )
    }

    /// Non-rate favorability: a replacement offer must cover the same
    /// collateral class with a no-worse minimum and a no-shorter auction.
    fn check_favorable(old: &LoanTerms, new: &LoanTerms) -> Result<(), ProgramError> {
        if new.collection != old.collection
            || new.min_amount > old.min_amount
            || new.liquidation_duration_blocks < old.liquidation_duration_blocks
        {
            return Err(LendingError::TermsNotReasonable.into());
        }
        Ok(())
    }

    /// Pre-flight for moving `debt` from the old capacity bucket to the
    /// new one, so the post-transfer release + reserve pair cannot fail.
    /// When both fingerprints coincide, the release lands first and only
    /// the net effect must fit.
    fn check_refinance_capacity(
        state: &ProtocolState,
        old_fingerprint: &TermsFingerprint,
        new_fingerprint: &TermsFingerprint,
        new_terms: &LoanTerms,
        debt: u128,
    ) -> Result<(), ProgramError> {
        if new_fingerprint == old_fingerprint {
            let entry = state.terms.get(new_fingerprint)?;
            let projected = entry
                .consumed
                .saturating_sub(debt)
                .checked_add(debt)
                .ok_or(LendingError::ArithmeticOverflow)?;
            if projected > entry.terms.total_amount {
                return Err(LendingError::AtCapacity.into());
            }
            return Ok(());
        }
        match state.terms.get(new_fingerprint) {
            Ok(_) => state.terms.check_capacity(new_fingerprint, debt),
            Err(_) => {
                if debt > new_terms.total_amount {
                    return Err(LendingError::AtCapacity.into());
                }
                Ok(())
            }
        }
    }
}
