use num_derive::FromPrimitive;
use solana_program::{
    decode_error::DecodeError,
    program_error::{PrintProgramError, ProgramError},
};
use thiserror::Error;

#[derive(Error, Debug, Copy, Clone, FromPrimitive, PartialEq)]
pub enum LendingError {
    #[error("Signature does not recover to the offer's lender")]
    InvalidSignature = 0,

    #[error("Offer deadline passed or nonce revoked")]
    OfferExpired = 1,

    #[error("Terms fingerprint already submitted")]
    TermsAlreadyExists = 2,

    #[error("Unknown terms fingerprint")]
    UnknownTerms = 3,

    #[error("Terms parameters out of range")]
    InvalidTerms = 4,

    #[error("Amount outside the terms bounds")]
    InvalidAmount = 5,

    #[error("Debt outside the new terms bounds")]
    InvalidDebtAmount = 6,

    #[error("Terms capacity exhausted")]
    AtCapacity = 7,

    #[error("Caller is not authorized for this action")]
    Unauthorized = 8,

    #[error("Unknown borrow id")]
    UnknownBorrow = 9,

    #[error("Supplied borrow does not match the stored commitment")]
    StateMismatch = 10,

    #[error("Refinancing auction already started")]
    AuctionAlreadyStarted = 11,

    #[error("No refinancing auction in progress")]
    AuctionNotStarted = 12,

    #[error("New terms are not favorable to the borrower")]
    TermsNotReasonable = 13,

    #[error("Auction rate at or above the liquidation threshold")]
    Insolvent = 14,

    #[error("Auction rate below the liquidation threshold")]
    NotInsolvent = 15,

    #[error("Repayment exceeds current debt")]
    RepayExceedsDebt = 16,

    #[error("Arithmetic overflow")]
    ArithmeticOverflow = 17,

    #[error("Asset transfer failed")]
    TransferFailed = 18,
}

impl PrintProgramError for LendingError {
    fn print<E>(&self) {
        use solana_program::msg;
        msg!("LendingError: {}", self);
    }
}

impl From<LendingError> for ProgramError {
    fn from(e: LendingError) -> Self {
        ProgramError::Custom(e as u32)
    }
}

impl<T> DecodeError<T> for LendingError {
    fn type_of() -> &'static str {
        "LendingError"
    }
}
