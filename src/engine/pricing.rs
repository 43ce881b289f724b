use rust_decimal::{Decimal, RoundingStrategy};

use crate::limits::PRICE_SCALE;
use crate::model::{DateRange, Room};

/// Total for a stay: nights × nightly rate, kept to currency precision.
pub fn compute_total(room: &Room, range: &DateRange) -> Decimal {
    let nights = Decimal::from(range.nights());
    (nights * room.price).round_dp_with_strategy(PRICE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// A caller-supplied total wins when present and non-zero; otherwise derive it.
pub fn resolve_total(hint: Option<Decimal>, room: &Room, range: &DateRange) -> Decimal {
    match hint {
        Some(total) if !total.is_zero() => total,
        _ => compute_total(room, range),
    }
}
