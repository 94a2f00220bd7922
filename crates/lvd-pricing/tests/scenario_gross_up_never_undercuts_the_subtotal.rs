//! Scenario: the card processor takes 2.9% of whatever we charge plus 30
//! cents. Whatever the fare, the charged total must net at least the
//! subtotal after that cut, and must be the smallest such charge. We accept
//! over-collecting by at most the rounding cent, never under-collecting.

use lvd_pricing::{breakdown, gross_up, Cents, FeeSchedule};

/// Exact processor inequality, no rounding: `total` nets the subtotal iff
/// `total * (10_000 - rate) >= (subtotal + fixed) * 10_000`.
fn nets_subtotal(schedule: &FeeSchedule, total: i64, subtotal: i64) -> bool {
    total as i128 * (10_000 - schedule.card_rate_bps) as i128
        >= (subtotal + schedule.card_fixed_cents) as i128 * 10_000
}

#[test]
fn gross_up_is_sufficient_and_minimal() {
    let schedule = FeeSchedule::default();
    let mut subtotal = 0_i64;
    while subtotal <= 50_000 {
        let total = gross_up(&schedule, Cents::new(subtotal)).unwrap().raw();
        assert!(
            nets_subtotal(&schedule, total, subtotal),
            "subtotal {subtotal}: total {total} undercuts"
        );
        assert!(
            !nets_subtotal(&schedule, total - 1, subtotal),
            "subtotal {subtotal}: total {total} is not minimal"
        );
        subtotal += 7; // step coprime to 10 and 97 to hit all residues
    }
}

#[test]
fn breakdown_and_gross_up_agree() {
    let schedule = FeeSchedule::default();
    for base in [0, 1, 250, 2_500, 9_999, 55_555] {
        let b = breakdown(&schedule, Cents::new(base)).unwrap();
        assert_eq!(gross_up(&schedule, b.subtotal_cents).unwrap(), b.total_cents);
    }
}

#[test]
fn fee_rounding_is_half_up_per_fee() {
    let schedule = FeeSchedule::default();
    // base 0.15: dispatcher 20% = 3.0c; app 10% = 1.5c -> 2c half-up.
    let b = breakdown(&schedule, Cents::new(15)).unwrap();
    assert_eq!(b.dispatcher_fee_cents, Cents::new(3));
    assert_eq!(b.app_fee_cents, Cents::new(2));
    assert_eq!(b.subtotal_cents, Cents::new(20));
}

#[test]
fn custom_schedule_flows_through() {
    let schedule = FeeSchedule {
        dispatcher_fee_bps: 1_500,
        app_fee_bps: 500,
        card_rate_bps: 250,
        card_fixed_cents: 25,
    };
    let b = breakdown(&schedule, Cents::new(10_000)).unwrap();
    assert_eq!(b.dispatcher_fee_cents, Cents::new(1_500));
    assert_eq!(b.app_fee_cents, Cents::new(500));
    assert_eq!(b.subtotal_cents, Cents::new(12_000));
    // ceil((12000 + 25) * 10000 / 9750) = ceil(12333.33..) = 12334.
    assert_eq!(b.total_cents, Cents::new(12_334));
    assert!(nets_subtotal(&schedule, b.total_cents.raw(), 12_000));
    assert!(!nets_subtotal(&schedule, b.total_cents.raw() - 1, 12_000));
}

#[test]
fn over_collection_is_bounded_by_one_gross_up_cent() {
    // The net after the processor cut may exceed the subtotal only by what
    // one cent of charge is worth after the percentage cut.
    let schedule = FeeSchedule::default();
    for subtotal in [0_i64, 1, 329, 3_250, 48_613] {
        let total = gross_up(&schedule, Cents::new(subtotal)).unwrap().raw();
        let net_times_10k = total as i128 * (10_000 - schedule.card_rate_bps) as i128
            - schedule.card_fixed_cents as i128 * 10_000;
        let overshoot_times_10k = net_times_10k - subtotal as i128 * 10_000;
        assert!(overshoot_times_10k >= 0);
        assert!(
            overshoot_times_10k < (10_000 - schedule.card_rate_bps) as i128,
            "subtotal {subtotal} over-collects more than a cent's worth"
        );
    }
}
