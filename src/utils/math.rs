//! Fixed-point arithmetic with overflow protection.
//!
//! All protocol amounts are u128 at 1e18 scale. Products of two scaled
//! values exceed 128 bits, so `mul_div` routes through a 256-bit
//! intermediate built from two u128 limbs.

use crate::error::{Error, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// SAFE ARITHMETIC OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Safe addition with overflow check
pub fn safe_add(a: u128, b: u128) -> Result<u128> {
    a.checked_add(b).ok_or(Error::Overflow {
        operation: format!("{} + {}", a, b),
    })
}

/// Safe subtraction with underflow check
pub fn safe_sub(a: u128, b: u128) -> Result<u128> {
    a.checked_sub(b).ok_or(Error::Underflow {
        operation: format!("{} - {}", a, b),
    })
}

/// Safe multiplication with overflow check
pub fn safe_mul(a: u128, b: u128) -> Result<u128> {
    a.checked_mul(b).ok_or(Error::Overflow {
        operation: format!("{} * {}", a, b),
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// 256-BIT INTERMEDIATE MUL-DIV
// ═══════════════════════════════════════════════════════════════════════════════

/// Full 256-bit product of two u128 values as (hi, lo) limbs
fn mul_wide(a: u128, b: u128) -> (u128, u128) {
    const MASK: u128 = (1u128 << 64) - 1;
    let (a_hi, a_lo) = (a >> 64, a & MASK);
    let (b_hi, b_lo) = (b >> 64, b & MASK);

    let ll = a_lo * b_lo;
    let lh = a_lo * b_hi;
    let hl = a_hi * b_lo;
    let hh = a_hi * b_hi;

    // Sum of the two middle partial products, tracking the carry out
    let (mid, mid_carry) = lh.overflowing_add(hl);

    let (lo, lo_carry) = ll.overflowing_add(mid << 64);
    let hi = hh
        + (mid >> 64)
        + ((mid_carry as u128) << 64)
        + (lo_carry as u128);

    (hi, lo)
}

/// Divide a 256-bit value (hi, lo) by a u128 divisor via shift-subtract,
/// returning quotient and remainder. Requires hi < divisor so the quotient
/// fits in 128 bits.
fn div_wide(hi: u128, lo: u128, divisor: u128) -> (u128, u128) {
    debug_assert!(divisor != 0 && hi < divisor);

    let mut rem = hi;
    let mut quot = 0u128;
    for i in (0..128).rev() {
        let carry = rem >> 127;
        rem = (rem << 1) | ((lo >> i) & 1);
        if carry == 1 || rem >= divisor {
            // carry set means the true remainder is rem + 2^128
            rem = rem.wrapping_sub(divisor);
            quot |= 1u128 << i;
        }
    }
    (quot, rem)
}

/// Computes (a * b) / divisor with a 256-bit intermediate, rounding down
pub fn mul_div(a: u128, b: u128, divisor: u128) -> Result<u128> {
    if divisor == 0 {
        return Err(Error::DivisionByZero {
            operation: format!("({} * {}) / 0", a, b),
        });
    }
    let (hi, lo) = mul_wide(a, b);
    if hi >= divisor {
        return Err(Error::Overflow {
            operation: format!("({} * {}) / {}", a, b, divisor),
        });
    }
    let (quot, _) = div_wide(hi, lo, divisor);
    Ok(quot)
}

/// Computes (a * b) / divisor with a 256-bit intermediate, rounding up
pub fn mul_div_up(a: u128, b: u128, divisor: u128) -> Result<u128> {
    if divisor == 0 {
        return Err(Error::DivisionByZero {
            operation: format!("ceil(({} * {}) / 0)", a, b),
        });
    }
    let (hi, lo) = mul_wide(a, b);
    if hi >= divisor {
        return Err(Error::Overflow {
            operation: format!("ceil(({} * {}) / {})", a, b, divisor),
        });
    }
    let (quot, rem) = div_wide(hi, lo, divisor);
    if rem > 0 {
        safe_add(quot, 1)
    } else {
        Ok(quot)
    }
}
