use crate::clock::Clock;
use crate::strategies::{smaller_is_least, EvictionPolicy, Expiring, Least};

/// Evicts the item whose deadline comes first, and collects expired items.
///
/// An item whose deadline has already passed is absolutely least: the
/// bucket scan stops as soon as one is seen.
#[derive(Clone, Debug, Default)]
pub struct Expiry<C> {
    clock: C,
}

impl<C: Clock> Expiry<C> {
    pub fn new(clock: C) -> Self {
        Expiry { clock }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

impl<P, C> EvictionPolicy<P> for Expiry<C>
where
    P: Expiring + Send,
    C: Clock,
{
    type Needle = P::Key;
    /// Clock reading taken at the start of the pass.
    type Snapshot = u64;

    const EVICTS: bool = true;
    const COLLECTS_GARBAGE: bool = true;

    #[inline]
    fn equals(&self, needle: &P::Key, payload: &P) -> bool {
        payload.key() == needle
    }

    fn begin_search(&self) -> u64 {
        self.clock.now()
    }

    fn least(&self, now: &u64, first: &P, second: &P) -> Least {
        if first.expires_at() < *now {
            return Least::FirstAbsolute;
        }
        if second.expires_at() < *now {
            return Least::SecondAbsolute;
        }
        smaller_is_least(first.expires_at(), second.expires_at())
    }

    fn is_garbage(&self, now: &u64, payload: &P) -> bool {
        payload.expires_at() < *now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::strategies::Keyed;

    struct Item(u64);

    impl Keyed for Item {
        type Key = u64;

        fn key(&self) -> &u64 {
            &self.0
        }
    }

    impl Expiring for Item {
        fn expires_at(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn earliest_deadline_is_least() {
        let policy = Expiry::new(ManualClock::new(100));
        let now = EvictionPolicy::<Item>::begin_search(&policy);
        assert_eq!(now, 100);
        assert_eq!(policy.least(&now, &Item(150), &Item(200)), Least::First);
        assert_eq!(policy.least(&now, &Item(200), &Item(150)), Least::Second);
        assert_eq!(policy.least(&now, &Item(150), &Item(150)), Least::Equal);
    }

    #[test]
    fn expired_items_short_circuit() {
        let policy = Expiry::new(ManualClock::new(100));
        assert_eq!(policy.least(&100, &Item(99), &Item(50)), Least::FirstAbsolute);
        assert_eq!(policy.least(&100, &Item(300), &Item(99)), Least::SecondAbsolute);
        // A deadline equal to now is still valid.
        assert_eq!(policy.least(&100, &Item(100), &Item(101)), Least::First);
    }

    #[test]
    fn garbage_is_strictly_before_now() {
        let clock = ManualClock::new(100);
        let policy = Expiry::new(clock.clone());
        assert!(policy.is_garbage(&100, &Item(99)));
        assert!(!policy.is_garbage(&100, &Item(100)));

        clock.advance(10);
        let now = EvictionPolicy::<Item>::begin_search(&policy);
        assert!(policy.is_garbage(&now, &Item(100)));
    }
}
