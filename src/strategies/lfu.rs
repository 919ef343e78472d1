use crate::clock::Clock;
use crate::strategies::{Counted, EvictionPolicy, Least};

/// Evicts expired items first, otherwise the item served the fewest times.
///
/// This is the policy of a certificate cache: an expired certificate is
/// absolutely least, otherwise the least requested one makes room. On a tie
/// the later item in the chain (`second`) is the one evicted.
/// Expired items are not swept; they are only displaced under pressure.
#[derive(Clone, Debug, Default)]
pub struct LeastUsed<C> {
    clock: C,
}

impl<C: Clock> LeastUsed<C> {
    pub fn new(clock: C) -> Self {
        LeastUsed { clock }
    }
}

impl<P, C> EvictionPolicy<P> for LeastUsed<C>
where
    P: Counted + Send,
    C: Clock,
{
    type Needle = P::Key;
    type Snapshot = u64;

    const EVICTS: bool = true;

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
        if first.hits() < second.hits() {
            Least::First
        } else {
            Least::Second
        }
    }
}
