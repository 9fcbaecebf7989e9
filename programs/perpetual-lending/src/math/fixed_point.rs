// Signed 18-decimal fixed-point ("wad") arithmetic for interest math.
// Rates below 1.0 have negative logarithms, so everything here is i128.

use solana_program::{msg, program_error::ProgramError};

/// One whole unit in wad representation.
pub const WAD: i128 = 1_000_000_000_000_000_000;

/// ln(2) in wad representation.
pub const LN2_WAD: i128 = 693_147_180_559_945_309;

/// Wad units per basis point (1e18 / 10_000).
pub const WAD_PER_BIP: i128 = 100_000_000_000_000;

/// Inputs above this overflow `wad_exp` (e^46 * 1e18 is near i128::MAX).
pub const EXP_INPUT_MAX: i128 = 46 * WAD;

/// Inputs below this round `wad_exp` to zero.
pub const EXP_INPUT_MIN: i128 = -42 * WAD;

const U64_MASK: u128 = (1u128 << 64) - 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MathError {
    Overflow,
    Underflow,
    DivisionByZero,
    InvalidInput,
}

impl From<MathError> for ProgramError {
    fn from(e: MathError) -> Self {
        msg!("Math error: {:?}", e);
        ProgramError::Custom(match e {
            MathError::Overflow => 1001,
            MathError::Underflow => 1002,
            MathError::DivisionByZero => 1003,
            MathError::InvalidInput => 1004,
        })
    }
}

/// a * b / 1e18, truncated toward zero.
pub fn wad_mul(a: i128, b: i128) -> Result<i128, MathError> {
    let product = a.checked_mul(b).ok_or(MathError::Overflow)?;
    Ok(product / WAD)
}

/// a * 1e18 / b, truncated toward zero.
pub fn wad_div(a: i128, b: i128) -> Result<i128, MathError> {
    if b == 0 {
        return Err(MathError::DivisionByZero);
    }
    let scaled = a.checked_mul(WAD).ok_or(MathError::Overflow)?;
    Ok(scaled / b)
}

/// e^x for a wad operand.
///
/// Range-reduced as x = k*ln2 + r with |r| <= ln2/2, then e^r by Taylor
/// series and a final shift by 2^k. Relative error stays well under 1e-12
/// across the accepted input range.
pub fn wad_exp(x: i128) -> Result<i128, MathError> {
    if x > EXP_INPUT_MAX {
        return Err(MathError::Overflow);
    }
    if x < EXP_INPUT_MIN {
        return Ok(0);
    }
    if x == 0 {
        return Ok(WAD);
    }

    let k = div_round_nearest(x, LN2_WAD);
    let r = x - k * LN2_WAD;

    // e^r = 1 + r + r^2/2! + r^3/3! + ...
    let mut term = WAD;
    let mut sum = WAD;
    for n in 1..=20i128 {
        term = wad_mul(term, r)? / n;
        sum += term;
        if term.abs() < 2 {
            break;
        }
    }

    if k >= 0 {
        sum.checked_mul(1i128 << k as u32).ok_or(MathError::Overflow)
    } else {
        Ok(sum >> (-k) as u32)
    }
}

/// ln(x) for a positive wad operand. ln of zero or a negative value is
/// undefined; callers guarantee positive rates and thresholds.
///
/// The operand is normalized into [1, 2) by powers of two, the mantissa
/// handled with the atanh series ln(m) = 2*(z + z^3/3 + z^5/5 + ...) where
/// z = (m-1)/(m+1), and k*ln2 added back.
pub fn wad_ln(x: i128) -> Result<i128, MathError> {
    if x <= 0 {
        return Err(MathError::InvalidInput);
    }
    if x == WAD {
        return Ok(0);
    }

    let mut m = x;
    let mut k: i32 = 0;
    while m >= 2 * WAD {
        m >>= 1;
        k += 1;
    }
    while m < WAD {
        m <<= 1;
        k -= 1;
    }

    // m in [1, 2) puts z in [0, 1/3), so the series converges quickly.
    let z = wad_div(m - WAD, m + WAD)?;
    let z_squared = wad_mul(z, z)?;
    let mut term = z;
    let mut sum = z;
    let mut n = 3i128;
    while n <= 41 {
        term = wad_mul(term, z_squared)?;
        let contribution = term / n;
        sum += contribution;
        if contribution < 2 {
            break;
        }
        n += 2;
    }

    Ok(2 * sum + k as i128 * LN2_WAD)
}

/// Annualized basis points to a wad rate (5_000 bips -> 0.5).
pub fn bips_to_wad(bips: u32) -> i128 {
    bips as i128 * WAD_PER_BIP
}

/// Wad rate to basis points, rounded to nearest.
pub fn wad_to_bips(wad: i128) -> Result<u32, MathError> {
    if wad < 0 {
        return Err(MathError::InvalidInput);
    }
    let bips = (wad + WAD_PER_BIP / 2) / WAD_PER_BIP;
    u32::try_from(bips).map_err(|_| MathError::Overflow)
}

/// a * b / denom over u128 with a 256-bit intermediate product, so wad
/// growth factors can be applied to full-range token amounts.
pub fn mul_div(a: u128, b: u128, denom: u128) -> Result<u128, MathError> {
    if denom == 0 {
        return Err(MathError::DivisionByZero);
    }
    let (hi, lo) = mul_wide(a, b);
    if hi == 0 {
        return Ok(lo / denom);
    }
    if hi >= denom {
        return Err(MathError::Overflow);
    }
    Ok(div_wide(hi, lo, denom))
}

fn div_round_nearest(a: i128, b: i128) -> i128 {
    if a >= 0 {
        (a + b / 2) / b
    } else {
        (a - b / 2) / b
    }
}

/// Full 256-bit product of two u128 values as (hi, lo) limbs.
fn mul_wide(a: u128, b: u128) -> (u128, u128) {
    let a_hi = a >> 64;
    let a_lo = a & U64_MASK;
    let b_hi = b >> 64;
    let b_lo = b & U64_MASK;

    let lo_lo = a_lo * b_lo;
    let lo_hi = a_lo * b_hi;
    let hi_lo = a_hi * b_lo;
    let hi_hi = a_hi * b_hi;

    let mid = (lo_lo >> 64) + (lo_hi & U64_MASK) + (hi_lo & U64_MASK);
    let lo = (lo_lo & U64_MASK) | ((mid & U64_MASK) << 64);
    let hi = hi_hi + (lo_hi >> 64) + (hi_lo >> 64) + (mid >> 64);
    (hi, lo)
}

/// Restoring division of a 256-bit value (hi, lo) by denom.
/// Requires hi < denom so the quotient fits in u128.
fn div_wide(hi: u128, lo: u128, denom: u128) -> u128 {
    let mut rem = hi;
    let mut low = lo;
    let mut quotient = 0u128;
    for _ in 0..128 {
        let carry = rem >> 127;
        rem = (rem << 1) | (low >> 127);
        low <<= 1;
        quotient <<= 1;
        if carry != 0 || rem >= denom {
            rem = rem.wrapping_sub(denom);
            quotient |= 1;
        }
    }
    quotient
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: i128 = 1_000_000; // 1e-12 relative at 1.0

    fn assert_close(actual: i128, expected: i128) {
        let diff = (actual - expected).abs();
        assert!(
            diff <= TOLERANCE,
            "actual {} expected {} diff {}",
            actual,
            expected,
            diff
        );
    }

    #[test]
    fn test_wad_mul_div() {
        assert_eq!(wad_mul(WAD, WAD).unwrap(), WAD);
        assert_eq!(wad_mul(2 * WAD, 3 * WAD).unwrap(), 6 * WAD);
        assert_eq!(wad_mul(-2 * WAD, 3 * WAD).unwrap(), -6 * WAD);
        assert_eq!(wad_div(WAD, 2 * WAD).unwrap(), WAD / 2);
        assert_eq!(wad_div(-WAD, 2 * WAD).unwrap(), -WAD / 2);
        assert_eq!(wad_div(WAD, 0), Err(MathError::DivisionByZero));
    }

    #[test]
    fn test_exp_known_values() {
        assert_eq!(wad_exp(0).unwrap(), WAD);
        // e = 2.718281828459045235
        assert_close(wad_exp(WAD).unwrap(), 2_718_281_828_459_045_235);
        // e^0.5 = 1.648721270700128146
        assert_close(wad_exp(WAD / 2).unwrap(), 1_648_721_270_700_128_146);
        // e^-1 = 0.367879441171442321
        assert_close(wad_exp(-WAD).unwrap(), 367_879_441_171_442_321);
    }

    #[test]
    fn test_exp_bounds() {
        assert_eq!(wad_exp(EXP_INPUT_MAX + 1), Err(MathError::Overflow));
        assert_eq!(wad_exp(EXP_INPUT_MIN - 1).unwrap(), 0);
        // Large but in-range input stays finite
        assert!(wad_exp(40 * WAD).unwrap() > 0);
    }

    #[test]
    fn test_ln_known_values() {
        assert_eq!(wad_ln(WAD).unwrap(), 0);
        // ln(10) = 2.302585092994045684
        assert_close(wad_ln(10 * WAD).unwrap(), 2_302_585_092_994_045_684);
        // ln(0.5) = -0.693147180559945309
        assert_close(wad_ln(WAD / 2).unwrap(), -LN2_WAD);
        assert_eq!(wad_ln(0), Err(MathError::InvalidInput));
        assert_eq!(wad_ln(-WAD), Err(MathError::InvalidInput));
    }

    #[test]
    fn test_exp_ln_round_trip() {
        for value in [WAD / 4, WAD / 2, WAD, 3 * WAD, 10 * WAD, 250 * WAD] {
            assert_close(wad_exp(wad_ln(value).unwrap()).unwrap(), value);
        }
    }

    #[test]
    fn test_bips_conversions() {
        assert_eq!(bips_to_wad(10_000), WAD);
        assert_eq!(bips_to_wad(5_000), WAD / 2);
        assert_eq!(wad_to_bips(WAD).unwrap(), 10_000);
        assert_eq!(wad_to_bips(WAD / 2).unwrap(), 5_000);
        // Rounds to nearest, so a truncated wad still lands on the bip
        assert_eq!(wad_to_bips(WAD / 2 - 1).unwrap(), 5_000);
        assert_eq!(wad_to_bips(-1), Err(MathError::InvalidInput));
    }

    #[test]
    fn test_mul_div_wide() {
        // 10e18 principal times an e^0.5 growth factor
        let grown = mul_div(
            10_000_000_000_000_000_000u128,
            1_648_721_270_700_128_146u128,
            WAD as u128,
        )
        .unwrap();
        assert_eq!(grown, 16_487_212_707_001_281_460);

        // Needs the full 256-bit intermediate
        let huge = u128::MAX / 2;
        assert_eq!(mul_div(huge, 4, 2).unwrap(), u128::MAX - 1);
        assert_eq!(mul_div(huge, 4, 1), Err(MathError::Overflow));
        assert_eq!(mul_div(1, 1, 0), Err(MathError::DivisionByZero));
    }
}
