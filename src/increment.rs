//! Bid increment tiers
//!
//! The tier table is what clients use to render the "next minimum bid"
//! hint, so it must match what the server enforces bit-exactly.

use crate::auction::Amount;

/// Minimum legal raise at a given price, evaluated against the price
/// *before* the candidate bid is applied.
pub fn increment(price: Amount) -> Amount {
    match price {
        0..=99 => 10,
        100..=499 => 50,
        500..=999 => 100,
        1000..=4999 => 200,
        _ => 500,
    }
}

/// Smallest amount that outbids `price`. Saturates at the integer
/// ceiling; the resolver's amount cap keeps real prices well below it.
pub fn next_valid_amount(price: Amount) -> Amount {
    price.saturating_add(increment(price))
}
