//! Order lifecycle and recurring schedule.

use chrono::{DateTime, Datelike, Duration, Months, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_CHARGE_RETRIES: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    RequireClientConfirmation,
    Processing,
    Pending,
    Paid,
    Active,
    Error,
    Cancelled,
    Expired,
    Refunded,
    Rejected,
    Disputed,
}

impl OrderStatus {
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        match self {
            New => matches!(
                next,
                RequireClientConfirmation | Processing | Pending | Paid | Active | Error | Cancelled
            ),
            RequireClientConfirmation | Processing => {
                matches!(next, Paid | Active | Error | Cancelled)
            }
            Pending => matches!(next, Paid | Active | Expired | Cancelled | Rejected),
            Error => matches!(next, New | Cancelled),
            Paid => matches!(next, Refunded | Disputed),
            Active => matches!(next, Paid | Refunded | Cancelled | Error | Disputed),
            Disputed => matches!(next, Paid | Refunded),
            Cancelled | Expired | Refunded | Rejected => false,
        }
    }

    /// Waiting on a first payment the contributor started. Only these fail
    /// on a processor decline; renewals of `ACTIVE` orders go through the
    /// retry schedule instead.
    pub fn awaits_payment(self) -> bool {
        matches!(
            self,
            OrderStatus::New | OrderStatus::Processing | OrderStatus::RequireClientConfirmation
        )
    }

    /// Whether booking another charge may move the order to `next`.
    /// Renewals keep an `ACTIVE` order active.
    pub fn accepts_charge(self, next: OrderStatus) -> bool {
        (self == OrderStatus::Active && next == OrderStatus::Active) || self.can_transition_to(next)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::RequireClientConfirmation => "REQUIRE_CLIENT_CONFIRMATION",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Active => "ACTIVE",
            OrderStatus::Error => "ERROR",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::Refunded => "REFUNDED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Disputed => "DISPUTED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Month,
    Year,
}

impl Interval {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "month" => Some(Interval::Month),
            "year" => Some(Interval::Year),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Interval::Month => "month",
            Interval::Year => "year",
        }
    }

    fn months(self) -> u32 {
        match self {
            Interval::Month => 1,
            Interval::Year => 12,
        }
    }
}

fn first_of_month_after(date: DateTime<Utc>, months: u32) -> Option<DateTime<Utc>> {
    let first = date.date_naive().with_day(1)?;
    let shifted = first.checked_add_months(Months::new(months))?;
    Some(Utc.from_utc_datetime(&shifted.and_hms_opt(0, 0, 0)?))
}

/// Monthly contributions made after the 15th skip the next 1st.
pub fn first_charge_date(interval: Interval, paid_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match interval {
        Interval::Month if paid_at.day() > 15 => first_of_month_after(paid_at, 2),
        _ => first_of_month_after(paid_at, interval.months()),
    }
}

pub fn next_charge_date(interval: Interval, previous: DateTime<Utc>) -> Option<DateTime<Utc>> {
    first_of_month_after(previous, interval.months())
}

pub fn retry_charge_date(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::days(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 10, 30, 0).unwrap()
    }

    #[test]
    fn new_orders_can_be_paid_or_left_pending() {
        assert!(OrderStatus::New.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::New.can_transition_to(OrderStatus::Pending));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Paid));
        assert!(!OrderStatus::New.can_transition_to(OrderStatus::Refunded));
    }

    #[test]
    fn terminal_statuses_are_final() {
        for status in [
            OrderStatus::Cancelled,
            OrderStatus::Expired,
            OrderStatus::Refunded,
            OrderStatus::Rejected,
        ] {
            assert!(!status.can_transition_to(OrderStatus::Paid));
            assert!(!status.can_transition_to(OrderStatus::New));
        }
    }

    #[test]
    fn paid_orders_can_be_refunded_or_disputed() {
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Refunded));
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Disputed));
        assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::Pending));
    }

    #[test]
    fn only_first_payments_fail_on_decline() {
        assert!(OrderStatus::New.awaits_payment());
        assert!(OrderStatus::Processing.awaits_payment());
        assert!(OrderStatus::RequireClientConfirmation.awaits_payment());
        assert!(!OrderStatus::Active.awaits_payment());
        assert!(!OrderStatus::Paid.awaits_payment());
    }

    #[test]
    fn paid_orders_accept_no_second_charge() {
        assert!(OrderStatus::Active.accepts_charge(OrderStatus::Active));
        assert!(OrderStatus::New.accepts_charge(OrderStatus::Paid));
        assert!(OrderStatus::Processing.accepts_charge(OrderStatus::Active));
        assert!(!OrderStatus::Paid.accepts_charge(OrderStatus::Paid));
        assert!(!OrderStatus::Refunded.accepts_charge(OrderStatus::Paid));
    }

    #[test]
    fn first_monthly_charge_before_the_15th() {
        let next = first_charge_date(Interval::Month, at(2026, 3, 10)).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn first_monthly_charge_after_the_15th_skips_a_month() {
        let next = first_charge_date(Interval::Month, at(2026, 3, 20)).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn first_yearly_charge() {
        let next = first_charge_date(Interval::Year, at(2026, 11, 20)).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2027, 11, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn next_charge_wraps_the_year() {
        let next = next_charge_date(Interval::Month, at(2026, 12, 1)).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn parses_intervals() {
        assert_eq!(Interval::parse("month"), Some(Interval::Month));
        assert_eq!(Interval::parse("year"), Some(Interval::Year));
        assert_eq!(Interval::parse("week"), None);
    }
}
