// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use dd_core::FakeClock;

fn limiter(limit: u32) -> (RateLimiter<FakeClock>, FakeClock) {
    let clock = FakeClock::new();
    (RateLimiter::new(limit, clock.clone()), clock)
}

#[test]
fn exactly_limit_requests_pass() {
    let (limiter, _clock) = limiter(3);
    let session = SessionId::new("s1");

    for _ in 0..3 {
        limiter.check(&session).unwrap();
    }
    let err = limiter.check(&session).unwrap_err();
    assert_eq!(err.code(), "RATE_LIMITED");
    assert!(limiter.is_blocked(&session));
}

#[test]
fn window_resets_after_a_minute() {
    let (limiter, clock) = limiter(2);
    let session = SessionId::new("s1");

    limiter.check(&session).unwrap();
    limiter.check(&session).unwrap();
    assert!(limiter.check(&session).is_err());

    clock.advance(Duration::from_secs(61));
    limiter.check(&session).unwrap();
    assert!(!limiter.is_blocked(&session));
}

#[test]
fn sessions_are_counted_independently() {
    let (limiter, _clock) = limiter(1);
    limiter.check(&SessionId::new("a")).unwrap();
    limiter.check(&SessionId::new("b")).unwrap();
    assert!(limiter.check(&SessionId::new("a")).is_err());
    assert!(!limiter.is_blocked(&SessionId::new("b")));
}

#[test]
fn prune_drops_stale_entries() {
    let (limiter, clock) = limiter(5);
    limiter.check(&SessionId::new("old")).unwrap();

    clock.advance(Duration::from_secs(121));
    limiter.check(&SessionId::new("fresh")).unwrap();

    assert_eq!(limiter.prune(), 1);
    assert_eq!(limiter.len(), 1);
    assert!(!limiter.is_blocked(&SessionId::new("old")));
}

#[test]
fn set_limit_applies_to_next_check() {
    let (limiter, _clock) = limiter(1);
    let session = SessionId::new("s1");
    limiter.check(&session).unwrap();
    assert!(limiter.check(&session).is_err());

    limiter.set_limit(10);
    limiter.check(&session).unwrap();
}
