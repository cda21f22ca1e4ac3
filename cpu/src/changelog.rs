//! A collection of orderable values which the caller can efficiently
//! drain in one go.
use serde::Serialize;
use std::collections::BTreeSet;

/// Accumulate a set of things (for example, the APR flags which have
/// changed since the last time anybody looked) and then return all
/// the members of the set.
#[derive(Debug, Serialize)]
pub(crate) struct ChangeIndex<K: Ord + Serialize> {
    changes: BTreeSet<K>,
}

impl<K: Ord + Serialize> Default for ChangeIndex<K> {
    // Deriving Default would require K: Default, which it need not be.
    fn default() -> Self {
        Self {
            changes: BTreeSet::new(),
        }
    }
}

impl<K: Ord + Serialize> ChangeIndex<K> {
    pub(crate) fn add(&mut self, k: K) {
        self.changes.insert(k);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub(crate) fn drain(&mut self) -> BTreeSet<K> {
        std::mem::take(&mut self.changes)
    }
}

#[test]
fn drain_empties_the_index() {
    let mut ix: ChangeIndex<u8> = ChangeIndex::default();
    ix.add(3);
    ix.add(1);
    ix.add(3);
    assert!(!ix.is_empty());
    assert_eq!(ix.drain().into_iter().collect::<Vec<_>>(), vec![1, 3]);
    assert!(ix.is_empty());
}
