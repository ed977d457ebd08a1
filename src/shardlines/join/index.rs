//! Per-peer hash index tables.
//!
//! During phase 1 every peer accumulates one [`HashIndex`] per join side,
//! holding an entry for every row whose key hash homes here. Phase 2 sorts
//! both tables and merge-walks them; the scan helpers below delimit the
//! hash-equality groups and the per-owner runs inside a group.

/// One registered row: where it lives and what its key tuple hashed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashEntry {
    pub hash: u64,
    pub owner_rank: u32,
    pub owner_index: u64,
}

/// Append-only table of [`HashEntry`] values for one join side.
#[derive(Debug, Default)]
pub struct HashIndex {
    entries: Vec<HashEntry>,
}

impl HashIndex {
    pub fn push(&mut self, entry: HashEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sort by `(hash asc, owner_rank asc)`. Ties beyond that carry no
    /// meaning, so the sort need not be stable.
    pub fn sort_by_hash_owner(&mut self) {
        self.entries.sort_unstable_by(|a, b| {
            a.hash
                .cmp(&b.hash)
                .then_with(|| a.owner_rank.cmp(&b.owner_rank))
        });
    }

    pub fn entries(&self) -> &[HashEntry] {
        &self.entries
    }
}

/// End of the hash-equality group starting at `start` in a sorted slice.
pub fn hash_group_end(entries: &[HashEntry], start: usize) -> usize {
    let hash = entries[start].hash;
    let mut end = start + 1;
    while end < entries.len() && entries[end].hash == hash {
        end += 1;
    }
    end
}

/// End of the same-owner run starting at `start`, bounded by `limit`.
pub fn owner_run_end(entries: &[HashEntry], start: usize, limit: usize) -> usize {
    let owner = entries[start].owner_rank;
    let mut end = start + 1;
    while end < limit && entries[end].owner_rank == owner {
        end += 1;
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(hash: u64, rank: u32, index: u64) -> HashEntry {
        HashEntry {
            hash,
            owner_rank: rank,
            owner_index: index,
        }
    }

    #[test]
    fn sort_orders_by_hash_then_rank() {
        let mut index = HashIndex::default();
        index.push(entry(9, 0, 1));
        index.push(entry(3, 2, 2));
        index.push(entry(9, 1, 3));
        index.push(entry(3, 0, 4));
        index.sort_by_hash_owner();

        let order: Vec<(u64, u32)> = index
            .entries()
            .iter()
            .map(|e| (e.hash, e.owner_rank))
            .collect();
        assert_eq!(order, vec![(3, 0), (3, 2), (9, 0), (9, 1)]);
    }

    #[test]
    fn group_and_run_scans() {
        let entries = vec![
            entry(3, 0, 0),
            entry(3, 0, 1),
            entry(3, 2, 2),
            entry(7, 1, 3),
        ];
        assert_eq!(hash_group_end(&entries, 0), 3);
        assert_eq!(hash_group_end(&entries, 3), 4);
        assert_eq!(owner_run_end(&entries, 0, 3), 2);
        assert_eq!(owner_run_end(&entries, 2, 3), 3);
    }
}
