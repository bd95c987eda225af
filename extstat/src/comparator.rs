//! Duplicate and coverage detection between a proposed statistics definition and the
//! definitions already stored for the same relation.
//!
//! Each stored definition is compared with the candidate on its own, stored definitions are
//! never compared with each other. Comparison only ever removes kinds from the candidate and
//! may ask the catalog to narrow or drop a stored definition the candidate supersedes.

use log::debug;

use crate::catalog::CatalogMutation;
use crate::stat::{
    format_kinds, ColumnSet, ExistingStatDefinition, HostExpr, StatDefinitionCandidate, StatKind,
    StatKinds,
};

/// Relationship between a candidate and one stored definition.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OverlapKind {
    /// Same columns and expressions.
    Identical,
    /// The stored definition has every dimension of the candidate.
    CoveredBy,
    /// The candidate has every dimension of the stored definition, and more.
    Covers,
    /// Neither side contains the other.
    Partial,
}

/// Set differences between a candidate and one stored definition.
#[derive(Debug)]
pub struct Overlap<'a, E> {
    pub existing: &'a ExistingStatDefinition<E>,
    pub common_columns: ColumnSet,
    pub existing_only_columns: ColumnSet,
    pub new_only_columns: ColumnSet,
    pub common_exprs: Vec<&'a E>,
    pub existing_only_exprs: Vec<&'a E>,
    pub new_only_exprs: Vec<&'a E>,
}

impl<'a, E: HostExpr> Overlap<'a, E> {
    pub fn compute(
        candidate: &'a StatDefinitionCandidate<E>,
        existing: &'a ExistingStatDefinition<E>,
    ) -> Self {
        debug_assert!(
            existing.dimensions() > 0,
            "Statistics definition {} has no dimensions",
            existing.catalog_id
        );

        // Expressions are matched as multisets: every stored expression pairs with at most
        // one candidate expression.
        let mut matched = vec![false; existing.expressions.len()];
        let mut common_exprs = vec![];
        let mut new_only_exprs = vec![];
        for expr in candidate.expressions() {
            let found = existing
                .expressions
                .iter()
                .enumerate()
                .find(|(idx, stored)| !matched[*idx] && *stored == expr);

            match found {
                Some((idx, stored)) => {
                    matched[idx] = true;
                    common_exprs.push(stored);
                }
                None => new_only_exprs.push(expr),
            }
        }
        let existing_only_exprs = existing
            .expressions
            .iter()
            .zip(matched)
            .filter(|(_, matched)| !matched)
            .map(|(expr, _)| expr)
            .collect();

        Self {
            existing,
            common_columns: candidate.columns().intersection(&existing.columns),
            existing_only_columns: existing.columns.difference(candidate.columns()),
            new_only_columns: candidate.columns().difference(&existing.columns),
            common_exprs,
            existing_only_exprs,
            new_only_exprs,
        }
    }

    pub fn kind(&self) -> OverlapKind {
        let nothing_new = self.new_only_columns.is_empty() && self.new_only_exprs.is_empty();
        let nothing_missing =
            self.existing_only_columns.is_empty() && self.existing_only_exprs.is_empty();
        let something_common = !self.common_columns.is_empty() || !self.common_exprs.is_empty();

        if nothing_new && nothing_missing && something_common {
            OverlapKind::Identical
        } else if nothing_new {
            OverlapKind::CoveredBy
        } else if nothing_missing {
            OverlapKind::Covers
        } else {
            OverlapKind::Partial
        }
    }
}

/// Outcome of [`reduce`].
#[derive(Clone, Debug, PartialEq)]
pub struct Reduction {
    /// Kinds still worth creating. Empty means nothing should be created.
    pub kept_kinds: StatKinds,
    /// Catalog changes to stored definitions superseded by the candidate, in scan order.
    pub mutations: Vec<CatalogMutation>,
}

/// Removes from the candidate's requested kinds what stored definitions already provide and
/// collects changes to stored definitions the candidate makes redundant.
///
/// `kept_kinds` doesn't depend on the order of `existing`, but mutations are emitted once per
/// qualifying stored definition in the given order.
pub fn reduce<E: HostExpr>(
    candidate: &StatDefinitionCandidate<E>,
    existing: &[ExistingStatDefinition<E>],
) -> Reduction {
    let mut kept_kinds = candidate.requested_kinds();
    let mut mutations = vec![];

    for stored in existing {
        let overlap = Overlap::compute(candidate, stored);
        let kind = overlap.kind();
        debug!(
            "Statistics {} ({}) is {:?} against candidate",
            stored.name,
            format_kinds(stored.enabled_kinds),
            kind
        );

        match kind {
            OverlapKind::Identical => {
                kept_kinds -= stored.enabled_kinds;
            }
            OverlapKind::CoveredBy => {
                // MCV lists depend on the exact set of dimensions, a broader one doesn't
                // replace them.
                kept_kinds -= stored.enabled_kinds & StatKind::dimension_insensitive();
            }
            OverlapKind::Covers => {
                if let Some(mutation) = supersede(stored, kept_kinds) {
                    mutations.push(mutation);
                }
            }
            OverlapKind::Partial => {}
        }
    }

    Reduction {
        kept_kinds,
        mutations,
    }
}

/// Kinds of a narrower stored definition that the candidate doesn't provide stay useful.
fn supersede<E>(
    stored: &ExistingStatDefinition<E>,
    kept_kinds: StatKinds,
) -> Option<CatalogMutation> {
    let stored_kinds = stored.enabled_kinds & StatKind::generated();
    let useful = stored_kinds - (kept_kinds & StatKind::dimension_insensitive());

    if useful.is_empty() {
        Some(CatalogMutation::DropDefinition(stored.catalog_id))
    } else if useful != stored_kinds {
        let expressions = stored.enabled_kinds & StatKind::Expressions;
        Some(CatalogMutation::AlterDefinitionKinds(
            stored.catalog_id,
            useful | expressions,
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::CatalogMutation;
    use crate::comparator::{reduce, Overlap, OverlapKind};
    use crate::stat::{
        CatalogId, ColumnSet, ExistingStatDefinition, StatDefinitionCandidate, StatKind,
        StatKinds,
    };
    use crate::test_utils::{column_set, expr, TestExpr};
    use enumset::EnumSet;

    fn candidate(
        columns: &[u16],
        exprs: &[&str],
        kinds: StatKinds,
    ) -> StatDefinitionCandidate<TestExpr> {
        StatDefinitionCandidate::new(
            column_set(columns),
            exprs.iter().map(|e| expr(*e)).collect(),
            kinds,
        )
        .unwrap()
    }

    fn existing(
        id: u32,
        columns: &[u16],
        exprs: &[&str],
        kinds: StatKinds,
    ) -> ExistingStatDefinition<TestExpr> {
        ExistingStatDefinition {
            catalog_id: CatalogId::from(id),
            name: format!("s{}", id),
            columns: column_set(columns),
            expressions: exprs.iter().map(|e| expr(*e)).collect(),
            enabled_kinds: kinds,
            stat_target: -1,
        }
    }

    #[test]
    fn test_no_existing_definitions() {
        let c = candidate(&[1, 2], &[], StatKind::generated());

        let reduction = reduce(&c, &[]);
        assert_eq!(StatKind::generated(), reduction.kept_kinds);
        assert!(reduction.mutations.is_empty());
    }

    #[test]
    fn test_overlap_kinds() {
        let c = candidate(&[1, 2], &["lower(c)"], StatKind::generated());

        let cases = vec![
            (existing(1, &[1, 2], &["lower(c)"], StatKind::Mcv.into()), OverlapKind::Identical),
            (existing(2, &[1, 2, 3], &["lower(c)"], StatKind::Mcv.into()), OverlapKind::CoveredBy),
            (existing(3, &[1], &["lower(c)"], StatKind::Mcv.into()), OverlapKind::Covers),
            (existing(4, &[1, 4], &[], StatKind::Mcv.into()), OverlapKind::Partial),
        ];

        for (stored, expected) in cases {
            assert_eq!(
                expected,
                Overlap::compute(&c, &stored).kind(),
                "Wrong overlap against {:?}",
                stored
            );
        }
    }

    #[test]
    fn test_expressions_are_matched_as_multiset() {
        let c = candidate(&[], &["a + b", "a + b"], StatKind::generated());
        let stored = existing(1, &[], &["a + b", "lower(c)"], StatKind::Mcv.into());

        let overlap = Overlap::compute(&c, &stored);
        assert_eq!(vec![&expr("a + b")], overlap.common_exprs);
        assert_eq!(vec![&expr("a + b")], overlap.new_only_exprs);
        assert_eq!(vec![&expr("lower(c)")], overlap.existing_only_exprs);
        assert_eq!(OverlapKind::Partial, overlap.kind());
    }

    #[test]
    fn test_identical_removes_enabled_kinds() {
        let c = candidate(&[1, 2], &["lower(c)"], StatKind::Mcv | StatKind::Ndistinct);
        let stored = existing(7, &[2, 1], &["lower(c)"], StatKind::Mcv.into());

        let reduction = reduce(&c, &[stored]);
        assert_eq!(StatKinds::from(StatKind::Ndistinct), reduction.kept_kinds);
        assert!(reduction.mutations.is_empty());
    }

    #[test]
    fn test_covered_by_keeps_mcv() {
        let c = candidate(&[1, 2], &[], StatKind::generated());
        let stored = existing(7, &[1, 2, 3], &[], StatKind::generated());

        let reduction = reduce(&c, &[stored]);
        assert_eq!(StatKinds::from(StatKind::Mcv), reduction.kept_kinds);
        assert!(reduction.mutations.is_empty());
    }

    #[test]
    fn test_covers_drops_redundant_definition() {
        let c = candidate(&[1, 2, 3], &[], StatKind::generated());
        let stored = existing(7, &[1, 2], &[], StatKind::Ndistinct | StatKind::Dependencies);

        let reduction = reduce(&c, &[stored]);
        assert_eq!(StatKind::generated(), reduction.kept_kinds);
        assert_eq!(
            vec![CatalogMutation::DropDefinition(CatalogId::from(7))],
            reduction.mutations
        );
    }

    #[test]
    fn test_covers_alters_definition_with_mcv() {
        let c = candidate(&[1, 2, 3], &["lower(c)"], StatKind::Ndistinct.into());
        let stored = existing(
            7,
            &[1, 2],
            &["lower(c)"],
            StatKind::Ndistinct | StatKind::Mcv | StatKind::Expressions,
        );

        let reduction = reduce(&c, &[stored]);
        assert_eq!(
            vec![CatalogMutation::AlterDefinitionKinds(
                CatalogId::from(7),
                StatKind::Mcv | StatKind::Expressions
            )],
            reduction.mutations
        );
    }

    #[test]
    fn test_covers_keeps_definition_still_useful() {
        let c = candidate(&[1, 2, 3], &[], StatKind::Mcv.into());
        let stored = existing(7, &[1, 2], &[], StatKind::generated());

        let reduction = reduce(&c, &[stored]);
        assert_eq!(StatKinds::from(StatKind::Mcv), reduction.kept_kinds);
        assert!(reduction.mutations.is_empty());
    }

    #[test]
    fn test_every_covered_definition_gets_a_mutation() {
        let c = candidate(&[1, 2, 3, 4], &[], StatKind::generated());
        let stored = vec![
            existing(10, &[3, 4], &[], StatKind::Ndistinct.into()),
            existing(11, &[1, 2], &[], StatKind::Dependencies | StatKind::Mcv),
            existing(12, &[1, 5], &[], StatKind::Ndistinct.into()),
        ];

        let reduction = reduce(&c, &stored);
        assert_eq!(
            vec![
                CatalogMutation::DropDefinition(CatalogId::from(10)),
                CatalogMutation::AlterDefinitionKinds(CatalogId::from(11), StatKind::Mcv.into()),
            ],
            reduction.mutations
        );

        // Scan order decides mutation order, kept kinds stay the same.
        let reversed = stored.into_iter().rev().collect::<Vec<_>>();
        let reduction_reversed = reduce(&c, &reversed);
        assert_eq!(reduction.kept_kinds, reduction_reversed.kept_kinds);
        assert_eq!(
            reduction.mutations.into_iter().rev().collect::<Vec<_>>(),
            reduction_reversed.mutations
        );
    }

    #[test]
    fn test_kept_kinds_never_grow() {
        let requested = StatKind::Mcv | StatKind::Dependencies;
        let c = candidate(&[1, 2], &[], requested);
        let stored = vec![
            existing(1, &[1, 2], &[], StatKind::Ndistinct.into()),
            existing(2, &[1, 2, 3], &[], StatKind::Dependencies.into()),
            existing(3, &[1], &["x"], StatKind::generated()),
        ];

        let reduction = reduce(&c, &stored);
        assert!(reduction.kept_kinds.is_subset(requested));
        assert_eq!(StatKinds::from(StatKind::Mcv), reduction.kept_kinds);
    }

    #[test]
    fn test_everything_already_present() {
        let c = candidate(&[1, 2], &[], StatKind::generated());
        let stored = existing(1, &[1, 2], &[], StatKind::generated());

        let reduction = reduce(&c, &[stored]);
        assert_eq!(EnumSet::empty(), reduction.kept_kinds);
    }

    #[test]
    fn test_column_set_helpers() {
        let a: ColumnSet = column_set(&[1, 2]);
        assert_eq!(a.union(&column_set(&[2, 3])).union(&a), column_set(&[1, 2, 3]));
    }
}
