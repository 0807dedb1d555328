use crate::{Client, Invocation, Transport, error::Result};

/// Entry point used by the layers above a client: filters wrap an invoker,
/// routers pick among several.
pub trait Invoker: Send + Sync {
    /// Performs `invocation` and returns its untyped result.
    ///
    /// # Errors
    ///
    /// Fails with send, timeout, decode or remote errors.
    fn invoke(
        &self,
        invocation: Invocation,
    ) -> impl Future<Output = Result<serde_json::Value>> + Send;
}

impl<T: Transport> Invoker for Client<T> {
    async fn invoke(&self, invocation: Invocation) -> Result<serde_json::Value> {
        Client::<T>::invoke(self, invocation).await
    }
}

const BITS: usize = u64::BITS as usize;

/// Set of invoker indices, stored as a bitmap.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InvokerSet {
    words: Vec<u64>,
}

impl InvokerSet {
    /// A set holding every index below `len`.
    #[must_use]
    pub fn full(len: usize) -> Self {
        let mut words = vec![u64::MAX; len / BITS];
        if len % BITS != 0 {
            words.push((1u64 << (len % BITS)) - 1);
        }
        Self { words }
    }

    /// Returns false if `index` was already present.
    pub fn insert(&mut self, index: usize) -> bool {
        let (word, bit) = (index / BITS, index % BITS);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let present = self.words[word] & (1u64 << bit) != 0;
        self.words[word] |= 1u64 << bit;
        !present
    }

    /// Returns false if `index` was absent.
    pub fn remove(&mut self, index: usize) -> bool {
        let (word, bit) = (index / BITS, index % BITS);
        match self.words.get_mut(word) {
            Some(w) if *w & (1u64 << bit) != 0 => {
                *w &= !(1u64 << bit);
                true
            }
            _ => false,
        }
    }

    /// Whether `index` is in the set.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.words
            .get(index / BITS)
            .is_some_and(|&w| w & (1u64 << (index % BITS)) != 0)
    }

    /// Number of indices in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(i * BITS + bit)
            })
        })
    }

    /// Indices present in both sets.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        let words = self
            .words
            .iter()
            .zip(&other.words)
            .map(|(a, b)| a & b)
            .collect();
        Self { words }
    }
}

impl FromIterator<usize> for InvokerSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = Self::default();
        for index in iter {
            set.insert(index);
        }
        set
    }
}

/// Narrows the candidate invokers of one invocation.
pub trait Router: Send + Sync {
    /// Returns the subset of `candidates` allowed to serve `invocation`.
    /// An empty set means no invoker qualifies.
    fn route(&self, candidates: InvokerSet, invocation: &Invocation) -> InvokerSet;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoker_set() {
        let mut set = InvokerSet::default();
        assert!(set.is_empty());
        assert!(set.insert(3));
        assert!(!set.insert(3));
        assert!(set.insert(70));
        assert!(set.contains(70));
        assert!(!set.contains(4));
        assert!(!set.contains(1000));
        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![3, 70]);

        assert!(set.remove(3));
        assert!(!set.remove(3));
        assert!(!set.remove(500));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![70]);
    }

    #[test]
    fn test_intersection() {
        let full = InvokerSet::full(66);
        assert_eq!(full.len(), 66);
        assert!(full.contains(65));
        assert!(!full.contains(66));

        let picked: InvokerSet = [1, 64, 65, 200].into_iter().collect();
        let routed = full.intersection(&picked);
        assert_eq!(routed.iter().collect::<Vec<_>>(), vec![1, 64, 65]);
    }

    struct Passthrough;

    impl Router for Passthrough {
        fn route(&self, candidates: InvokerSet, _: &Invocation) -> InvokerSet {
            candidates
        }
    }

    #[test]
    fn test_router() {
        let router: &dyn Router = &Passthrough;
        let routed = router.route(InvokerSet::full(3), &Invocation::new("GetUser", vec![]));
        assert_eq!(routed.len(), 3);
    }
}
