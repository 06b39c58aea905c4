//! Stay pricing: per-night rates, weekend rates, day overrides and
//! length-of-stay discounts.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::model::{Money, Property};
use crate::range::StayRange;

/// Nights at which the weekly discount starts to apply.
pub const WEEKLY_THRESHOLD: i64 = 7;
/// Nights at which the monthly discount starts to apply.
pub const MONTHLY_THRESHOLD: i64 = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateKind {
    Base,
    Weekend,
    Override,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NightlyRate {
    pub date: NaiveDate,
    pub amount: Money,
    pub kind: RateKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedDiscount {
    pub kind: DiscountKind,
    pub percent: u8,
    pub amount: Money,
}

/// Itemized price of a stay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub nights: i64,
    pub nightly: Vec<NightlyRate>,
    pub subtotal: Money,
    pub discount: Option<AppliedDiscount>,
    pub total: Money,
}

/// Which length-of-stay discount applies. The longer period takes precedence
/// when both thresholds are met. A zero percentage counts as "not offered", so
/// a month-long stay at a property with only a weekly discount gets the weekly one.
pub fn applicable_discount(property: &Property, nights: i64) -> Option<(DiscountKind, u8)> {
    if nights >= MONTHLY_THRESHOLD && property.monthly_discount > 0 {
        return Some((DiscountKind::Monthly, property.monthly_discount));
    }
    if nights >= WEEKLY_THRESHOLD && property.weekly_discount > 0 {
        return Some((DiscountKind::Weekly, property.weekly_discount));
    }
    None
}

/// Price a stay.
///
/// Each night is charged at its date's override if one is set, else the
/// weekend price on a weekend day (falling back to the base price), else the
/// base price. The discount is applied to the subtotal.
pub fn quote_stay(
    property: &Property,
    range: StayRange,
    overrides: &BTreeMap<NaiveDate, Money>,
    weekend_days: &[Weekday],
) -> PriceQuote {
    let nightly: Vec<NightlyRate> = range
        .dates()
        .map(|date| {
            if let Some(amount) = overrides.get(&date) {
                return NightlyRate {
                    date,
                    amount: *amount,
                    kind: RateKind::Override,
                };
            }
            match property.weekend_price {
                Some(weekend) if weekend_days.contains(&date.weekday()) => NightlyRate {
                    date,
                    amount: weekend,
                    kind: RateKind::Weekend,
                },
                _ => NightlyRate {
                    date,
                    amount: property.base_price,
                    kind: RateKind::Base,
                },
            }
        })
        .collect();

    let subtotal: Money = nightly.iter().map(|n| n.amount).sum();
    let nights = range.nights();

    let discount = applicable_discount(property, nights).map(|(kind, percent)| {
        let discounted = subtotal.discounted(percent);
        AppliedDiscount {
            kind,
            percent,
            amount: Money(subtotal.0 - discounted.0),
        }
    });
    let total = match &discount {
        Some(d) => Money(subtotal.0 - d.amount.0),
        None => subtotal,
    };

    PriceQuote {
        nights,
        nightly,
        subtotal,
        discount,
        total,
    }
}
