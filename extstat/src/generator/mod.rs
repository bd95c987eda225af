//! Statistics generation on index creation.
//!
//! A multi-column btree index is a strong hint that its key columns are queried together, so
//! the index keys make a good statistics definition. Two flavors can be created, see
//! [`GenerationMode`]:
//!
//! * multivariate statistics over the keys, reduced against what the relation already has;
//! * a univariate statistic over the row of all keys.
//!
//! Created definitions depend on the index and go away with it.

mod queue;
pub use queue::*;

use std::sync::Arc;

use derive_more::Display;
use enum_as_inner::EnumAsInner;
use log::{debug, info};
use strum_macros::AsRefStr;

use crate::catalog::{
    apply_mutations, CatalogMutation, DefinitionBody, NewStatDefinition, StatisticsCatalog,
};
use crate::classifier::RelationKind;
use crate::comparator::reduce;
use crate::config::{ExtStatConfig, GenerationMode};
use crate::error::{ExtStatError, ExtStatResult};
use crate::signature::{DefinitionSignature, SignatureCache};
use crate::stat::{
    format_kinds, AttrNum, CatalogId, ColumnSet, ExistingStatDefinition, HostExpr, RelationId,
    StatDefinitionCandidate, StatKinds, MIN_STAT_DIMENSIONS,
};

pub const MULTIVARIATE_COMMENT: &str = "extstat - multivariate statistics";
pub const UNIVARIATE_COMMENT: &str = "extstat - univariate statistics";

/// Key of an index: a heap column or an expression over the heap.
#[derive(Clone, Debug, PartialEq)]
pub enum IndexKey<E> {
    Column(AttrNum),
    Expression(E),
}

#[derive(Clone, Debug, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum AccessMethod {
    Btree,
    Hash,
    Gist,
    Gin,
    Brin,
    Other(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct IndexDefinition<E> {
    pub index: RelationId,
    /// Indexed relation.
    pub relation: RelationId,
    pub relation_kind: RelationKind,
    pub access_method: AccessMethod,
    /// Key columns, included (non-key) columns excluded.
    pub keys: Vec<IndexKey<E>>,
}

/// Why nothing was created for an index.
#[derive(Clone, Debug, PartialEq, Display)]
pub enum SkipReason {
    #[display(fmt = "generation is disabled")]
    Disabled,
    #[display(fmt = "columns limit is zero")]
    ColumnsLimitZero,
    #[display(fmt = "access method {:?} is not btree", _0)]
    UnsupportedAccessMethod(AccessMethod),
    #[display(fmt = "index has {} key columns", _0)]
    TooFewKeys(usize),
    #[display(fmt = "indexed relation is a {:?}", _0)]
    NotPlainTable(RelationKind),
    #[display(fmt = "less than two distinct keys")]
    TooFewDimensions,
}

/// What was done for an index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BuildReport {
    /// Same multivariate definition was created before.
    pub signature_hit: bool,
    pub mutations: Vec<CatalogMutation>,
    /// Kinds of the multivariate definition, empty if none was created.
    pub kept_kinds: StatKinds,
    pub multivariate: Option<CatalogId>,
    pub univariate: Option<CatalogId>,
}

#[derive(Clone, Debug, PartialEq, EnumAsInner)]
pub enum BuildOutcome {
    Skipped(SkipReason),
    Built(BuildReport),
}

/// Index keys prepared for statistics: duplicate columns removed, limited in number.
struct IndexDimensions<E> {
    columns: ColumnSet,
    expressions: Vec<E>,
    keys: Vec<IndexKey<E>>,
}

impl<E: HostExpr> IndexDimensions<E> {
    fn new(keys: &[IndexKey<E>], limit: usize) -> ExtStatResult<Self> {
        let mut columns = ColumnSet::new();
        let mut expressions = vec![];
        let mut row_keys = vec![];

        for key in keys.iter().take(limit) {
            match key {
                IndexKey::Column(0) => {
                    return Err(ExtStatError::InvalidDefinition(
                        "index key refers to attribute 0".to_string(),
                    ))
                }
                // Statistics can't have a column twice.
                IndexKey::Column(attnum) => {
                    if columns.insert(*attnum) {
                        row_keys.push(key.clone());
                    }
                }
                IndexKey::Expression(expr) => {
                    if !expressions.contains(expr) {
                        expressions.push(expr.clone());
                        row_keys.push(key.clone());
                    }
                }
            }
        }

        Ok(Self {
            columns,
            expressions,
            keys: row_keys,
        })
    }

    fn len(&self) -> usize {
        self.columns.len() + self.expressions.len()
    }
}

/// Creates statistics for new indexes.
pub struct StatisticsGenerator {
    config: ExtStatConfig,
    signatures: Arc<SignatureCache>,
}

impl StatisticsGenerator {
    pub fn new(config: ExtStatConfig, signatures: Arc<SignatureCache>) -> Self {
        Self { config, signatures }
    }

    pub fn config(&self) -> &ExtStatConfig {
        &self.config
    }

    pub fn update_config(&mut self, config: &ExtStatConfig) {
        self.config = config.clone();
    }

    pub fn signatures(&self) -> &SignatureCache {
        &self.signatures
    }

    /// Creates statistics for `index` as configured. Catalog failures are returned as is;
    /// changes made before the failure stay.
    pub fn build_for_index<E, C>(
        &self,
        index: &IndexDefinition<E>,
        catalog: &mut C,
    ) -> ExtStatResult<BuildOutcome>
    where
        E: HostExpr,
        C: StatisticsCatalog<E> + ?Sized,
    {
        if let Some(reason) = self.check_index(index) {
            debug!("No statistics for index {}: {}", index.index, reason);
            return Ok(BuildOutcome::Skipped(reason));
        }

        let dimensions = IndexDimensions::new(&index.keys, self.config.columns_limit)?;
        if dimensions.len() < MIN_STAT_DIMENSIONS {
            return Ok(BuildOutcome::Skipped(SkipReason::TooFewDimensions));
        }

        let mut report = BuildReport::default();
        if self.config.mode.creates_multivariate() {
            self.build_multivariate(index, &dimensions, catalog, &mut report)?;
        }
        if self.config.mode.creates_univariate() {
            let id = catalog.create(NewStatDefinition {
                relation: index.relation,
                body: DefinitionBody::Row(dimensions.keys),
                kinds: StatKinds::empty(),
                comment: UNIVARIATE_COMMENT.to_string(),
                depends_on: Some(index.index),
            })?;
            catalog.make_visible();
            info!("Created univariate statistics {} for index {}", id, index.index);
            report.univariate = Some(id);
        }

        Ok(BuildOutcome::Built(report))
    }

    /// Like [`StatisticsGenerator::build_for_index`] with another mode for this call only.
    pub fn build_for_index_with_mode<E, C>(
        &mut self,
        mode: GenerationMode,
        index: &IndexDefinition<E>,
        catalog: &mut C,
    ) -> ExtStatResult<BuildOutcome>
    where
        E: HostExpr,
        C: StatisticsCatalog<E> + ?Sized,
    {
        let saved = std::mem::replace(&mut self.config.mode, mode);
        let outcome = self.build_for_index(index, catalog);
        self.config.mode = saved;
        outcome
    }

    fn check_index<E>(&self, index: &IndexDefinition<E>) -> Option<SkipReason> {
        if self.config.mode == GenerationMode::Disabled {
            Some(SkipReason::Disabled)
        } else if self.config.columns_limit == 0 {
            Some(SkipReason::ColumnsLimitZero)
        } else if index.access_method != AccessMethod::Btree {
            // Only btree guarantees an ordering operator for every key.
            Some(SkipReason::UnsupportedAccessMethod(index.access_method.clone()))
        } else if index.keys.len() < MIN_STAT_DIMENSIONS {
            Some(SkipReason::TooFewKeys(index.keys.len()))
        } else if index.relation_kind != RelationKind::Table {
            Some(SkipReason::NotPlainTable(index.relation_kind))
        } else {
            None
        }
    }

    fn build_multivariate<E, C>(
        &self,
        index: &IndexDefinition<E>,
        dimensions: &IndexDimensions<E>,
        catalog: &mut C,
        report: &mut BuildReport,
    ) -> ExtStatResult<()>
    where
        E: HostExpr,
        C: StatisticsCatalog<E> + ?Sized,
    {
        let signature = DefinitionSignature::new(&dimensions.columns, &dimensions.expressions);
        if let Some(signature) = &signature {
            // The host may have dropped the statistics since, the catalog has the last word.
            if self.signatures.exists(index.relation, signature) {
                if has_signature(&catalog.list_definitions(index.relation)?, signature) {
                    report.signature_hit = true;
                    return Ok(());
                }
                debug!(
                    "Statistics {:?} of relation {} are gone, building them again",
                    signature.slots(),
                    index.relation
                );
                self.signatures.forget(index.relation, signature);
            }
        }

        let candidate = StatDefinitionCandidate::new(
            dimensions.columns.clone(),
            dimensions.expressions.clone(),
            self.config.stat_kinds,
        )
        .ok_or_else(|| ExtStatError::InvalidDefinition("too few dimensions".to_string()))?;

        let kept_kinds = if self.config.compactify {
            let existing = catalog.list_definitions(index.relation)?;
            let reduction = reduce(&candidate, &existing);
            apply_mutations(catalog, &reduction.mutations)?;
            self.forget_dropped(index.relation, &existing, &reduction.mutations);
            report.mutations = reduction.mutations;
            reduction.kept_kinds
        } else {
            candidate.requested_kinds()
        };

        if kept_kinds.is_empty() {
            debug!(
                "Existing statistics of relation {} already cover index {}",
                index.relation, index.index
            );
        } else {
            let id = catalog.create(NewStatDefinition {
                relation: index.relation,
                body: DefinitionBody::Multivariate {
                    columns: dimensions.columns.clone(),
                    expressions: dimensions.expressions.clone(),
                },
                kinds: kept_kinds,
                comment: MULTIVARIATE_COMMENT.to_string(),
                depends_on: Some(index.index),
            })?;
            catalog.make_visible();
            info!(
                "Created statistics {} ({}) for index {}",
                id,
                format_kinds(kept_kinds),
                index.index
            );
            report.multivariate = Some(id);
        }
        report.kept_kinds = kept_kinds;

        if let Some(signature) = signature {
            self.signatures.register(index.relation, signature);
        }
        Ok(())
    }

    fn forget_dropped<E: HostExpr>(
        &self,
        relation: RelationId,
        existing: &[ExistingStatDefinition<E>],
        mutations: &[CatalogMutation],
    ) {
        let dropped = mutations
            .iter()
            .filter_map(CatalogMutation::as_drop_definition)
            .filter_map(|id| existing.iter().find(|def| def.catalog_id == *id));

        for definition in dropped {
            if let Some(signature) =
                DefinitionSignature::new(&definition.columns, &definition.expressions)
            {
                self.signatures.forget(relation, &signature);
            }
        }
    }
}

fn has_signature<E: HostExpr>(
    definitions: &[ExistingStatDefinition<E>],
    signature: &DefinitionSignature,
) -> bool {
    definitions.iter().any(|def| {
        DefinitionSignature::new(&def.columns, &def.expressions).as_ref() == Some(signature)
    })
}
