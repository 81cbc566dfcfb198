use std::collections::{BTreeSet, HashSet};

/// Identifier of a queued item
pub type ItemId = i64;

/// Ids handed to an enqueue call.
///
/// A single id, a list or a set all normalise to a plain list; duplicates
/// are kept here and collapse in the bucket set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueIds(Vec<ItemId>);

impl QueueIds {
    pub fn new(ids: Vec<ItemId>) -> Self {
        QueueIds(ids)
    }

    pub fn as_slice(&self) -> &[ItemId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<ItemId> {
        self.0
    }
}

impl From<ItemId> for QueueIds {
    fn from(id: ItemId) -> Self {
        QueueIds(vec![id])
    }
}

impl From<Vec<ItemId>> for QueueIds {
    fn from(ids: Vec<ItemId>) -> Self {
        QueueIds(ids)
    }
}

impl From<&[ItemId]> for QueueIds {
    fn from(ids: &[ItemId]) -> Self {
        QueueIds(ids.to_vec())
    }
}

impl<const N: usize> From<[ItemId; N]> for QueueIds {
    fn from(ids: [ItemId; N]) -> Self {
        QueueIds(ids.to_vec())
    }
}

impl From<HashSet<ItemId>> for QueueIds {
    fn from(ids: HashSet<ItemId>) -> Self {
        QueueIds(ids.into_iter().collect())
    }
}

impl From<&HashSet<ItemId>> for QueueIds {
    fn from(ids: &HashSet<ItemId>) -> Self {
        QueueIds(ids.iter().copied().collect())
    }
}

impl From<BTreeSet<ItemId>> for QueueIds {
    fn from(ids: BTreeSet<ItemId>) -> Self {
        QueueIds(ids.into_iter().collect())
    }
}

impl FromIterator<ItemId> for QueueIds {
    fn from_iter<I: IntoIterator<Item = ItemId>>(iter: I) -> Self {
        QueueIds(iter.into_iter().collect())
    }
}

impl IntoIterator for QueueIds {
    type Item = ItemId;
    type IntoIter = std::vec::IntoIter<ItemId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_scalar_normalises_to_single_entry() {
        let ids = QueueIds::from(42);
        assert_eq!(ids.as_slice(), &[42]);
    }

    #[test]
    fn test_set_normalises_to_list() {
        let set: HashSet<ItemId> = [3, 1, 2].into_iter().collect();
        let mut ids = QueueIds::from(set).into_vec();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_empty_list() {
        assert!(QueueIds::from(Vec::<ItemId>::new()).is_empty());
    }

    proptest! {
        #[test]
        fn list_conversion_preserves_order(ids in proptest::collection::vec(any::<i64>(), 0..64)) {
            let normalised = QueueIds::from(ids.clone());
            prop_assert_eq!(normalised.into_vec(), ids);
        }

        #[test]
        fn set_conversion_preserves_members(ids in proptest::collection::hash_set(any::<i64>(), 0..64)) {
            let normalised: HashSet<ItemId> = QueueIds::from(&ids).into_iter().collect();
            prop_assert_eq!(normalised, ids);
        }
    }
}
