use solana_program::{program_error::ProgramError, pubkey::Pubkey};

/// Transfer primitives for the two asset kinds the protocol moves:
/// fungible principal and non-fungible collateral units. Implemented by
/// whichever token backends a deployment wires in.
///
/// Calls are assumed transactional with the surrounding entry point: a
/// failed transfer leaves the backend unchanged, and the entry points
/// perform no ledger mutation after a transfer failure, so every failure
/// is all-or-nothing for the caller.
pub trait AssetBackend {
    /// Move `amount` of the principal asset. Fails with `TransferFailed`
    /// on insufficient balance or allowance.
    fn transfer_fungible(
        &mut self,
        from: &Pubkey,
        to: &Pubkey,
        amount: u128,
    ) -> Result<(), ProgramError>;

    /// Move one unit of the given collateral class. Fails with
    /// `TransferFailed` when `from` does not own the unit or has not
    /// approved it.
    fn transfer_non_fungible(
        &mut self,
        collection: &Pubkey,
        from: &Pubkey,
        to: &Pubkey,
        unit_id: u64,
    ) -> Result<(), ProgramError>;
}
