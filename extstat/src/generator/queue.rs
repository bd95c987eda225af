use log::{debug, warn};

use crate::catalog::{IndexProvider, StatisticsCatalog};
use crate::error::ExtStatResult;
use crate::generator::{BuildOutcome, StatisticsGenerator};
use crate::stat::{HostExpr, RelationId};

/// Relations created by the running utility command, waiting to be checked for indexes.
///
/// Relations are remembered while the command runs, when their definition isn't complete
/// yet, and processed once it finishes.
#[derive(Debug, Default)]
pub struct IndexCandidateQueue {
    pending: Vec<RelationId>,
}

impl IndexCandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&mut self, relation: RelationId) {
        self.pending.push(relation);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops every remembered relation.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Builds statistics for every remembered relation that is still an index, in the order
    /// they were created. The queue is empty afterwards, whether or not processing failed.
    pub fn process<E, C>(
        &mut self,
        generator: &StatisticsGenerator,
        catalog: &mut C,
    ) -> ExtStatResult<Vec<(RelationId, BuildOutcome)>>
    where
        E: HostExpr,
        C: StatisticsCatalog<E> + IndexProvider<E> + ?Sized,
    {
        let pending = std::mem::take(&mut self.pending);
        let mut outcomes = Vec::with_capacity(pending.len());

        for relation in pending {
            let index = match catalog.index_definition(relation)? {
                Some(index) => index,
                None => {
                    debug!("Relation {} is gone or not an index", relation);
                    continue;
                }
            };

            let outcome = generator.build_for_index(&index, catalog).map_err(|e| {
                warn!("Failed to create statistics for index {}: {}", relation, e);
                e
            })?;
            outcomes.push((relation, outcome));
        }

        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::classifier::RelationKind;
    use crate::config::ExtStatConfig;
    use crate::generator::{
        AccessMethod, BuildOutcome, IndexCandidateQueue, IndexDefinition, IndexKey, SkipReason,
        StatisticsGenerator,
    };
    use crate::signature::SignatureCache;
    use crate::stat::RelationId;
    use crate::test_utils::{MemoryCatalog, TestExpr};

    fn btree(index: u32, keys: &[u16]) -> IndexDefinition<TestExpr> {
        IndexDefinition {
            index: RelationId::from(index),
            relation: RelationId::from(16384),
            relation_kind: RelationKind::Table,
            access_method: AccessMethod::Btree,
            keys: keys.iter().map(|k| IndexKey::Column(*k)).collect(),
        }
    }

    fn generator() -> StatisticsGenerator {
        StatisticsGenerator::new(ExtStatConfig::default(), Arc::new(SignatureCache::new()))
    }

    #[test]
    fn test_process_remembered_indexes() {
        let mut catalog = MemoryCatalog::default()
            .with_index(btree(20001, &[1, 2]))
            .with_index(btree(20002, &[3]));

        let mut queue = IndexCandidateQueue::new();
        // A table created by the same command, and a relation dropped meanwhile.
        queue.remember(RelationId::from(16384));
        queue.remember(RelationId::from(20001));
        queue.remember(RelationId::from(20002));
        queue.remember(RelationId::from(30000));
        assert_eq!(4, queue.len());

        let outcomes = queue.process(&generator(), &mut catalog).unwrap();
        assert!(queue.is_empty());

        let relations = outcomes.iter().map(|(r, _)| u32::from(*r)).collect::<Vec<_>>();
        assert_eq!(vec![20001, 20002], relations);
        assert!(outcomes[0].1.as_built().unwrap().multivariate.is_some());
        assert_eq!(BuildOutcome::Skipped(SkipReason::TooFewKeys(1)), outcomes[1].1);
        assert_eq!(1, catalog.created().len());
    }

    #[test]
    fn test_queue_is_emptied_on_failure() {
        let mut catalog = MemoryCatalog::default()
            .with_index(btree(20001, &[1, 2]))
            .with_index(btree(20002, &[2, 3]));
        catalog.fail_create = true;

        let mut queue = IndexCandidateQueue::new();
        queue.remember(RelationId::from(20001));
        queue.remember(RelationId::from(20002));

        assert!(queue.process(&generator(), &mut catalog).is_err());
        assert!(queue.is_empty());
    }
}
