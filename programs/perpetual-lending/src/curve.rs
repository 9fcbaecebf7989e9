// Dutch-auction clearing-rate curve for lender refinancing.

use solana_program::program_error::ProgramError;

use crate::error::LendingError;
use crate::math::{bips_to_wad, wad_exp, wad_ln, wad_to_bips};

/// Rate at which an auction is deemed failed and the position insolvent:
/// 100_000 bips, i.e. 1000% annualized.
pub const LIQUIDATION_THRESHOLD_BIPS: u32 = 100_000;

/// Current clearing rate of a refinancing auction, in bips, evaluated at
/// `elapsed = current_block - start_block`.
///
/// With T the liquidation threshold, L = ln(T) and o = ln(old_rate):
///
///     rate = exp(2 * elapsed * (L - o) / duration - (L - 2o))
///
/// which pins three points: elapsed = 0 gives old^2/T (near zero for
/// realistic rates), elapsed = duration/2 gives exactly the old rate, and
/// elapsed = duration gives exactly T. Non-decreasing in `elapsed` whenever
/// old_rate < T, which terms validation guarantees. Recomputed on demand,
/// never stored.
pub fn auction_rate(
    start_block: u64,
    duration_blocks: u64,
    old_rate_bips: u32,
    current_block: u64,
) -> Result<u32, ProgramError> {
    if duration_blocks == 0 || old_rate_bips == 0 {
        return Err(LendingError::InvalidTerms.into());
    }
    let elapsed = current_block.saturating_sub(start_block);
    // Pin the endpoint in integer arithmetic: past the scheduled end the
    // insolvency signal must not depend on exp/ln round-trip error.
    if elapsed >= duration_blocks {
        return Ok(LIQUIDATION_THRESHOLD_BIPS);
    }

    let threshold_log = wad_ln(bips_to_wad(LIQUIDATION_THRESHOLD_BIPS))?;
    let old_log = wad_ln(bips_to_wad(old_rate_bips))?;

    // Single division keeps the midpoint exact for even durations.
    let slope_numerator = (elapsed as i128)
        .checked_mul(2)
        .and_then(|doubled| doubled.checked_mul(threshold_log - old_log))
        .ok_or(LendingError::ArithmeticOverflow)?;
    let exponent = slope_numerator / duration_blocks as i128 - (threshold_log - 2 * old_log);

    let rate = wad_exp(exponent)?;
    Ok(wad_to_bips(rate)?)
}
