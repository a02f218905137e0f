use std::collections::HashSet;

use tracing::{debug, info};

use web3scout_common::{IdentityKey, ProjectRecord};

#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub unique: Vec<ProjectRecord>,
    pub duplicates: usize,
}

/// Run-local set of known identity keys, seeded from the sink snapshot.
///
/// First record encountered for a key wins; later ones are dropped without
/// merging fields. Generic names that fall back to name keys can collide,
/// and such collisions are counted as duplicates.
pub struct Deduplicator {
    known: HashSet<IdentityKey>,
}

impl Deduplicator {
    pub fn new(known: HashSet<IdentityKey>) -> Self {
        Self { known }
    }

    pub fn known_len(&self) -> usize {
        self.known.len()
    }

    pub fn dedup(&mut self, batch: Vec<ProjectRecord>) -> DedupOutcome {
        let input = batch.len();
        let mut outcome = DedupOutcome::default();

        for record in batch {
            let key = record.identity_key();
            if self.known.insert(key.clone()) {
                outcome.unique.push(record);
            } else {
                debug!(key = %key, name = record.name(), "Duplicate suppressed");
                outcome.duplicates += 1;
            }
        }

        info!(
            input,
            unique = outcome.unique.len(),
            duplicates = outcome.duplicates,
            "Dedup complete"
        );
        outcome
    }
}
