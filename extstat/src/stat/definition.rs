use crate::stat::{CatalogId, ColumnSet, HostExpr, StatKinds};

/// Extended statistics need at least this many columns and expressions together.
pub const MIN_STAT_DIMENSIONS: usize = 2;

/// A statistics definition proposed by this crate.
#[derive(Clone, Debug, PartialEq)]
pub struct StatDefinitionCandidate<E> {
    columns: ColumnSet,
    expressions: Vec<E>,
    requested_kinds: StatKinds,
}

impl<E: HostExpr> StatDefinitionCandidate<E> {
    /// Returns `None` for degenerate definitions with fewer than two dimensions.
    pub fn new(
        columns: ColumnSet,
        expressions: Vec<E>,
        requested_kinds: StatKinds,
    ) -> Option<Self> {
        if columns.len() + expressions.len() < MIN_STAT_DIMENSIONS {
            return None;
        }

        Some(Self {
            columns,
            expressions,
            requested_kinds,
        })
    }

    pub fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    pub fn expressions(&self) -> &[E] {
        &self.expressions
    }

    pub fn requested_kinds(&self) -> StatKinds {
        self.requested_kinds
    }

    pub fn dimensions(&self) -> usize {
        self.columns.len() + self.expressions.len()
    }
}

/// A statistics definition read from the catalog.
///
/// Always read fresh for each comparison; the catalog is the source of truth.
#[derive(Clone, Debug, PartialEq)]
pub struct ExistingStatDefinition<E> {
    pub catalog_id: CatalogId,
    pub name: String,
    pub columns: ColumnSet,
    pub expressions: Vec<E>,
    pub enabled_kinds: StatKinds,
    /// Statistics target, -1 for the default.
    pub stat_target: i32,
}

impl<E> ExistingStatDefinition<E> {
    pub fn dimensions(&self) -> usize {
        self.columns.len() + self.expressions.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::stat::{ColumnSet, StatDefinitionCandidate, StatKind};
    use crate::test_utils::{expr, TestExpr};

    #[test]
    fn test_candidate_needs_two_dimensions() {
        let single: ColumnSet = [1].into_iter().collect();
        assert!(StatDefinitionCandidate::<TestExpr>::new(
            single.clone(),
            vec![],
            StatKind::generated()
        )
        .is_none());

        let candidate =
            StatDefinitionCandidate::new(single, vec![expr("lower(b)")], StatKind::generated())
                .unwrap();
        assert_eq!(2, candidate.dimensions());
    }
}
