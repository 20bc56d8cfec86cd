use std::time::Duration;

use super::backoff::Backoff;
use crate::BackoffPolicy;

fn policy(
    base_delay_ms: u64,
    max_delay_ms: u64,
) -> BackoffPolicy {
    BackoffPolicy {
        base_delay_ms,
        max_delay_ms,
    }
}

#[test]
fn test_delay_doubles_until_cap() {
    let mut backoff = Backoff::new(policy(100, 1_000));

    let delays: Vec<_> = (0..6).map(|_| backoff.next_delay().as_millis()).collect();

    assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    assert_eq!(backoff.attempts(), 6);
}

#[test]
fn test_reset_restarts_from_base() {
    let mut backoff = Backoff::new(policy(50, 10_000));
    backoff.next_delay();
    backoff.next_delay();

    backoff.reset();

    assert_eq!(backoff.attempts(), 0);
    assert_eq!(backoff.next_delay(), Duration::from_millis(50));
}

#[test]
fn test_many_failures_stay_at_cap() {
    let mut backoff = Backoff::new(policy(100, 10_000));
    for _ in 0..200 {
        backoff.next_delay();
    }
    assert_eq!(backoff.next_delay(), Duration::from_millis(10_000));
}
