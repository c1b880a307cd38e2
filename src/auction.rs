//! Dutch auction price calculation
//!
//! Pure fixed-point arithmetic over `U256` smallest-denomination units.
//! Floating point is never used for prices: integer rounding here is part of
//! the settlement contract, not a style choice.

use ethers::types::{U256, U512};

/// Compute the current clearing price of a descending-price auction.
///
/// Linear interpolation from `start` at announcement down to `end` at
/// `duration_secs`, floor-rounded:
/// `price = (start * (duration - elapsed) + end * elapsed) / duration`.
/// Elapsed time is clamped to `[0, duration]`, so a late tick can never push
/// the price below `end`. The weighted sum is computed in 512-bit space:
/// any admitted price times a u64 second count fits there, so an extreme
/// `start` can never panic a tick.
pub fn current_price(start: U256, end: U256, elapsed_secs: u64, duration_secs: u64) -> U256 {
    debug_assert!(start >= end);

    if duration_secs == 0 || elapsed_secs == 0 {
        return start;
    }

    if elapsed_secs >= duration_secs {
        return end;
    }

    let duration = U256::from(duration_secs);
    let elapsed = U256::from(elapsed_secs);
    let remaining = duration - elapsed;

    let weighted = start.full_mul(remaining) + end.full_mul(elapsed);
    // The quotient is at most `start`, so the narrowing cannot fail
    U256::try_from(weighted / U512::from(duration_secs)).unwrap_or(start)
}

/// Apply a bounded gas-cost adjustment to an auction price.
///
/// The shift is proportional to the relative change in base fee since
/// announcement (`coefficient_bps` per unit of relative change) and hard
/// capped at `max_bps` of the current price. A rising base fee shifts the
/// price up, a falling one down; the result is clamped to `[end, start]`.
///
/// `current_base_fee` is `None` when the gateway could not be reached; the
/// tick then falls back to the unadjusted price instead of aborting.
pub fn gas_adjusted_price(
    price: U256,
    start: U256,
    end: U256,
    announcement_base_fee: U256,
    current_base_fee: Option<U256>,
    coefficient_bps: u64,
    max_bps: u64,
) -> U256 {
    let current = match current_base_fee {
        Some(fee) => fee,
        None => return price,
    };

    if announcement_base_fee.is_zero() || coefficient_bps == 0 {
        return price;
    }

    let (delta, rising) = if current >= announcement_base_fee {
        (current - announcement_base_fee, true)
    } else {
        (announcement_base_fee - current, false)
    };

    // bps = coefficient * delta / fee_at_announcement, capped at max_bps.
    // Widened like the price path: a large fee delta must cap, not panic.
    let raw_bps = delta.full_mul(U256::from(coefficient_bps)) / U512::from(announcement_base_fee);
    let bps = std::cmp::min(raw_bps, U512::from(max_bps)).low_u64();
    let shift = U256::try_from(price.full_mul(U256::from(bps)) / U512::from(10_000u64))
        .unwrap_or(price);

    let adjusted = if rising {
        price.saturating_add(shift)
    } else {
        price.saturating_sub(shift)
    };

    // Never leave the auction's price band
    adjusted.clamp(end, start)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(v: u64) -> U256 {
        U256::from(v)
    }

    #[test]
    fn test_price_at_announcement_is_start() {
        assert_eq!(current_price(u(100), u(95), 0, 10), u(100));
    }

    #[test]
    fn test_linear_midpoint_integer_rounded() {
        // 100 -> 95 over 10s, at 5s elapsed: floor(97.5) = 97
        assert_eq!(current_price(u(100), u(95), 5, 10), u(97));
    }

    #[test]
    fn test_price_clamps_at_end_on_late_tick() {
        assert_eq!(current_price(u(100), u(95), 10, 10), u(95));
        assert_eq!(current_price(u(100), u(95), 4000, 10), u(95));
    }

    #[test]
    fn test_price_monotonically_non_increasing() {
        let (start, end) = (u(1_000_000_000), u(990_000_000));
        let mut last = start;
        for t in 0..=400 {
            let p = current_price(start, end, t, 300);
            assert!(p <= last, "price increased at t={}", t);
            assert!(p >= end, "price fell below floor at t={}", t);
            last = p;
        }
        assert_eq!(last, end);
    }

    #[test]
    fn test_zero_duration_returns_start() {
        assert_eq!(current_price(u(100), u(95), 50, 0), u(100));
    }

    #[test]
    fn test_extreme_prices_stay_in_band_without_overflow() {
        let start = U256::MAX / U256::from(2u64);
        let end = U256::from(1u64);

        let mid = current_price(start, end, 3, 10);
        assert!(mid <= start && mid >= end);

        // Pathological base-fee spike on an order that large must cap too
        let adjusted =
            gas_adjusted_price(mid, start, end, u(100), Some(U256::MAX), 50, 200);
        assert!(adjusted <= start && adjusted >= end);
    }

    #[test]
    fn test_gas_adjustment_rises_with_base_fee() {
        // Base fee doubled: 50 bps coefficient -> +0.5% of price, capped at 200
        let adjusted = gas_adjusted_price(
            u(10_000),
            u(10_000),
            u(9_000),
            u(100),
            Some(u(200)),
            50,
            200,
        );
        assert_eq!(adjusted, u(10_000)); // clamped at start
        let adjusted = gas_adjusted_price(
            u(9_500),
            u(10_000),
            u(9_000),
            u(100),
            Some(u(200)),
            50,
            200,
        );
        assert_eq!(adjusted, u(9_547)); // +50 bps of 9500, floor
    }

    #[test]
    fn test_gas_adjustment_capped() {
        // 100x fee increase would be 4950 bps raw, cap at 200
        let adjusted = gas_adjusted_price(
            u(9_500),
            u(10_000),
            u(9_000),
            u(100),
            Some(u(10_000)),
            50,
            200,
        );
        assert_eq!(adjusted, u(9_690)); // +2% of 9500
    }

    #[test]
    fn test_gas_adjustment_falls_and_clamps_at_floor() {
        let adjusted = gas_adjusted_price(
            u(9_010),
            u(10_000),
            u(9_000),
            u(200),
            Some(u(100)),
            400,
            10_000,
        );
        assert_eq!(adjusted, u(9_000));
    }

    #[test]
    fn test_unreachable_gateway_falls_back_to_unadjusted() {
        let adjusted =
            gas_adjusted_price(u(9_500), u(10_000), u(9_000), u(100), None, 50, 200);
        assert_eq!(adjusted, u(9_500));
    }
}
