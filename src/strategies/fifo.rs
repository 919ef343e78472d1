use crate::strategies::{smaller_is_least, EvictionPolicy, Least, Sequenced};

/// Evicts the earliest inserted item of the scanned bucket.
///
/// No garbage collection: entries only leave through removal or eviction.
#[derive(Clone, Copy, Debug, Default)]
pub struct Fifo;

impl<P> EvictionPolicy<P> for Fifo
where
    P: Sequenced + Send,
{
    type Needle = P::Key;
    type Snapshot = ();

    const EVICTS: bool = true;

    #[inline]
    fn equals(&self, needle: &P::Key, payload: &P) -> bool {
        payload.key() == needle
    }

    #[inline]
    fn least(&self, _snapshot: &(), first: &P, second: &P) -> Least {
        smaller_is_least(first.sequence(), second.sequence())
    }
}
