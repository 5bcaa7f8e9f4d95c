//! Price and valuation figures derived from bonding-curve reserves.
//!
//! Reserves are raw integers: SOL in lamports (9 decimals) and tokens in
//! base units (6 decimals). Prices are quoted in SOL per whole token.

pub const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;
pub const TOKEN_UNITS_PER_TOKEN: f64 = 1_000_000.0;

/// Scaled spot price, `None` when the token reserve is zero or the
/// result is not a finite non-negative number.
pub fn scaled_price(sol_reserve: u128, token_reserve: u128) -> Option<f64> {
    if token_reserve == 0 {
        return None;
    }
    let sol = sol_reserve as f64 / LAMPORTS_PER_SOL;
    let tokens = token_reserve as f64 / TOKEN_UNITS_PER_TOKEN;
    let price = sol / tokens;

    if price.is_finite() && price >= 0.0 {
        Some(price)
    } else {
        None
    }
}

/// Price times total supply in whole tokens
pub fn market_cap(price: f64, total_supply: u64) -> f64 {
    price * total_supply as f64
}

/// Real SOL collected by the curve, in whole SOL
pub fn real_sol(real_sol_reserve: u64) -> f64 {
    real_sol_reserve as f64 / LAMPORTS_PER_SOL
}

/// Display volume. There is no trade history on the ledger, so this is
/// a scaled view of the real SOL held by the curve.
pub fn volume(real_sol_reserve: u64) -> f64 {
    real_sol(real_sol_reserve) * 1000.0
}

/// Placeholder yield: 2% floor plus a tenth of the real SOL held.
pub fn heuristic_apy(real_sol_reserve: u64) -> f64 {
    real_sol(real_sol_reserve) * 0.1 + 2.0
}
