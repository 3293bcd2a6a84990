use crate::product::{NaturalKey, ProductRecord};
use std::collections::HashSet;

/// Natural keys already persisted before the run plus every key accepted during it.
#[derive(Debug, Default)]
pub struct KnownKeys {
    keys: HashSet<NaturalKey>,
}

impl KnownKeys {
    pub fn seeded(keys: impl IntoIterator<Item = NaturalKey>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    /// Accepts `record` iff its key is unseen, remembering it on acceptance.
    pub fn accept(&mut self, record: &ProductRecord) -> bool {
        self.keys.insert(record.natural_key())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }
}
