//! Fee and refund rules. Pure functions of the hours left before a session
//! and the amount paid for it; nothing here touches storage or the clock.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use shared_utils::money::{ensure_non_negative, percent_of, round_money};

use crate::models::{BillingError, RefundOutcome, RescheduleFeeQuote};

/// Hours before a session at which the cheap tiers start (inclusive).
pub const LATE_CHANGE_THRESHOLD_HOURS: Decimal = dec!(24);

pub const PLATFORM_COMMISSION_PERCENTAGE: Decimal = dec!(10);

pub const EARLY_RESCHEDULE_FEE_PERCENTAGE: Decimal = dec!(10);
pub const LATE_RESCHEDULE_FEE_PERCENTAGE: Decimal = dec!(40);

pub const EARLY_REFUND_PERCENTAGE: Decimal = dec!(90);
pub const LATE_REFUND_PERCENTAGE: Decimal = dec!(60);

/// The platform's cut of a scheduled session, whatever happens to it later.
pub fn platform_commission(amount: Decimal) -> Decimal {
    percent_of(amount, PLATFORM_COMMISSION_PERCENTAGE)
}

pub fn reschedule_fee(
    hours_until_session: Decimal,
    payment_amount: Decimal,
) -> Result<RescheduleFeeQuote, BillingError> {
    if hours_until_session < Decimal::ZERO {
        return Err(BillingError::SessionAlreadyPassed {
            hours: hours_until_session.abs(),
        });
    }
    let amount = ensure_non_negative(payment_amount)?;

    let fee_percentage = if hours_until_session >= LATE_CHANGE_THRESHOLD_HOURS {
        EARLY_RESCHEDULE_FEE_PERCENTAGE
    } else {
        LATE_RESCHEDULE_FEE_PERCENTAGE
    };
    let fee = percent_of(amount, fee_percentage);

    Ok(RescheduleFeeQuote {
        requires_payment: fee > Decimal::ZERO,
        fee,
        fee_percentage,
        hours_until_session,
    })
}

pub fn cancellation_refund(
    hours_before_session: Decimal,
    original_amount: Decimal,
) -> Result<RefundOutcome, BillingError> {
    if hours_before_session < Decimal::ZERO {
        return Err(BillingError::SessionAlreadyPassed {
            hours: hours_before_session.abs(),
        });
    }
    let original_amount = ensure_non_negative(original_amount)?;

    let refund_percentage = if hours_before_session >= LATE_CHANGE_THRESHOLD_HOURS {
        EARLY_REFUND_PERCENTAGE
    } else {
        LATE_REFUND_PERCENTAGE
    };
    let refund_amount = percent_of(original_amount, refund_percentage);
    // Cent rounding of refund and commission may overshoot on tiny amounts;
    // the commission absorbs it so the three parts still add up exactly.
    let platform_commission =
        platform_commission(original_amount).min(original_amount - refund_amount);
    let therapist_retained = round_money(original_amount - refund_amount - platform_commission);

    Ok(RefundOutcome {
        original_amount,
        refund_amount,
        refund_percentage,
        platform_commission,
        therapist_retained,
    })
}
