//! Currency-safe decimal helpers. All amounts are `rust_decimal::Decimal`,
//! rounded half away from zero to two places.

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

pub const MONEY_SCALE: u32 = 2;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MoneyError {
    #[error("amount {0} must not be negative")]
    Negative(Decimal),
}

/// Rounds to cents and pins the scale so amounts always render as `0.00`.
pub fn round_money(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    rounded
}

/// `amount × percentage / 100`, rounded to cents.
pub fn percent_of(amount: Decimal, percentage: Decimal) -> Decimal {
    round_money(amount * percentage / Decimal::ONE_HUNDRED)
}

pub fn ensure_non_negative(amount: Decimal) -> Result<Decimal, MoneyError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(MoneyError::Negative(amount));
    }
    Ok(round_money(amount))
}

pub fn sum<I>(amounts: I) -> Decimal
where
    I: IntoIterator<Item = Decimal>,
{
    amounts.into_iter().fold(Decimal::ZERO, |acc, amount| acc + amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn percent_of_rounds_half_away_from_zero() {
        assert_eq!(percent_of(dec!(1000), dec!(10)), dec!(100.00));
        assert_eq!(percent_of(dec!(99.99), dec!(40)), dec!(40.00));
        assert_eq!(percent_of(dec!(0.05), dec!(50)), dec!(0.03));
        assert_eq!(percent_of(dec!(-0.05), dec!(50)), dec!(-0.03));
    }

    #[test]
    fn rounded_amounts_render_with_cents() {
        assert_eq!(round_money(dec!(900)).to_string(), "900.00");
        assert_eq!(percent_of(dec!(1000), dec!(90)).to_string(), "900.00");
    }

    #[test]
    fn non_negative_guard() {
        assert_eq!(ensure_non_negative(dec!(12.345)).unwrap(), dec!(12.35));
        assert_eq!(ensure_non_negative(Decimal::ZERO).unwrap(), Decimal::ZERO);
        assert_eq!(ensure_non_negative(dec!(-1)), Err(MoneyError::Negative(dec!(-1))));
    }

    #[test]
    fn sums_decimals_exactly() {
        let total = sum(vec![dec!(0.1), dec!(0.2), dec!(0.3)]);
        assert_eq!(total, dec!(0.6));
    }
}
