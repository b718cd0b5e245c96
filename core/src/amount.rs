//! Monetary arithmetic. All amounts are integer nano units (nine
//! fractional digits, the chain's smallest denomination); rates are
//! integer basis points relative to 1.0. No floating point anywhere.

use crate::error::{Error, Result};

pub type Amount = u64;

/// One whole unit of any supported currency.
pub const NANO: Amount = 1_000_000_000;

/// Basis-point scale: `10_000` represents a rate of 1.0.
pub const BPS_SCALE: u32 = 10_000;

/// Multiply an amount by a basis-point rate, rounding down.
pub fn mul_bps(amount: Amount, bps: u32) -> Result<Amount> {
    let wide = (amount as u128) * (bps as u128) / (BPS_SCALE as u128);
    u64::try_from(wide).map_err(|_| Error::MathOverflow)
}

/// Parse a decimal string like `"10.5"` into nano units.
pub fn parse_amount(s: &str) -> Result<Amount> {
    let s = s.trim();
    if s.is_empty() || s.starts_with('-') {
        return Err(Error::InvalidAmount);
    }
    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };
    if frac_part.len() > 9 || (int_part.is_empty() && frac_part.is_empty()) {
        return Err(Error::InvalidAmount);
    }
    let int: u64 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| Error::InvalidAmount)?
    };
    let mut frac: u64 = 0;
    if !frac_part.is_empty() {
        frac = frac_part.parse().map_err(|_| Error::InvalidAmount)?;
        for _ in frac_part.len()..9 {
            frac *= 10;
        }
    }
    int.checked_mul(NANO)
        .and_then(|n| n.checked_add(frac))
        .ok_or(Error::MathOverflow)
}

/// Render nano units as a decimal string, trimming trailing zeros.
pub fn format_amount(amount: Amount) -> String {
    let int = amount / NANO;
    let frac = amount % NANO;
    if frac == 0 {
        return int.to_string();
    }
    let frac = format!("{:09}", frac);
    format!("{}.{}", int, frac.trim_end_matches('0'))
}
