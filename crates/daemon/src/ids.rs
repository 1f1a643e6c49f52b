use std::collections::BTreeSet;

/// Hands out the smallest positive identifiers not yet taken.
///
/// Every id returned by [`GapFill::next_id`] is recorded as taken, so a batch
/// receives distinct ids without re-reading the store: given `{1, 3, 4}` the
/// next three ids are 2, 5 and 6.
#[derive(Debug, Clone, Default)]
pub struct GapFill {
    taken: BTreeSet<i64>,
    // every id below this is known to be taken
    floor: i64,
}

impl GapFill {
    pub fn new(taken: impl IntoIterator<Item = i64>) -> Self {
        Self {
            taken: taken.into_iter().filter(|id| *id > 0).collect(),
            floor: 1,
        }
    }

    /// Smallest free positive id, which is then marked as taken
    pub fn next_id(&mut self) -> i64 {
        let mut candidate = self.floor;
        for &id in self.taken.range(self.floor..) {
            if id != candidate {
                break;
            }
            candidate += 1;
        }
        self.taken.insert(candidate);
        self.floor = candidate + 1;
        candidate
    }
}
