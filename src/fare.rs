use chrono::{DateTime, Utc};

/// Every trip is billed for at least one minute, even if it is ended
/// seconds after activation.
pub const MINIMUM_BILLED_MINUTES: i64 = 1;

/// Advisory estimate of the fare accrued so far. The authoritative amount is
/// computed server side when the trip ends; this only combines the pricing
/// snapshot taken at activation with wall-clock time.
pub fn estimate(
    price_per_minute: f64,
    base_price: f64,
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> f64 {
    let billed_minutes = now
        .signed_duration_since(started_at)
        .num_minutes()
        .max(MINIMUM_BILLED_MINUTES);

    price_per_minute * billed_minutes as f64 + base_price
}

#[test]
fn minimum_fare_floor_applies_under_one_minute() {
    use chrono::Duration;

    let started_at = Utc::now();
    let now = started_at + Duration::seconds(12);

    assert_eq!(estimate(10.0, 50.0, started_at, now), 60.0);
}

#[test]
fn whole_minutes_are_billed_after_the_first() {
    use chrono::Duration;

    let started_at = Utc::now();
    let now = started_at + Duration::seconds(5 * 60 + 59);

    assert_eq!(estimate(2.5, 30.0, started_at, now), 2.5 * 5.0 + 30.0);
}

#[test]
fn estimates_never_decrease_over_time() {
    use chrono::Duration;

    let started_at = Utc::now();
    let mut previous = f64::MIN;

    for seconds in (0..1800).step_by(10) {
        let now = started_at + Duration::seconds(seconds);
        let cost = estimate(7.0, 100.0, started_at, now);

        assert!(cost >= previous);
        previous = cost;
    }
}

#[test]
fn clock_skew_never_bills_below_the_floor() {
    use chrono::Duration;

    let started_at = Utc::now();
    let now = started_at - Duration::seconds(90);

    assert_eq!(estimate(10.0, 50.0, started_at, now), 60.0);
}
